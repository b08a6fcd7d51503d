use clap::Parser;
use log::{error, info};
use snare::configuration::{CliArgs, Config};
use snare::controller::Controller;

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    println!(
        "
███████╗███╗   ██╗ █████╗ ██████╗ ███████╗
██╔════╝████╗  ██║██╔══██╗██╔══██╗██╔════╝
███████╗██╔██╗ ██║███████║██████╔╝█████╗  
╚════██║██║╚██╗██║██╔══██║██╔══██╗██╔══╝  
███████║██║ ╚████║██║  ██║██║  ██║███████╗
╚══════╝╚═╝  ╚═══╝╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝
==========================================
  Real-time scam interception relay v{}
==========================================
",
        env!("CARGO_PKG_VERSION")
    );

    let args = CliArgs::parse();

    info!("Importing configuration");
    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let controller = match Controller::new(config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
}
