//! Static dashboard, compiled into the binary.

use rust_embed::RustEmbed;
use warp::http::StatusCode;
use warp::path::Tail;
use warp::reply::Response;
use warp::{reply, Filter, Rejection, Reply};

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/assets/"]
struct DashboardAssets;

const INDEX: &str = "index.html";

/// GET / and GET /assets/<file>
pub fn dashboard_routes() -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and_then(|| async { serve(INDEX) });

    let files = warp::path("assets")
        .and(warp::get())
        .and(warp::path::tail())
        .and_then(|tail: Tail| async move { serve(tail.as_str()) });

    index.or(files).unify()
}

fn serve(path: &str) -> Result<Response, Rejection> {
    let file = DashboardAssets::get(path).ok_or_else(warp::reject::not_found)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let res = reply::with_header(file.data.into_owned(), "content-type", mime.as_ref());
    Ok(reply::with_status(res, StatusCode::OK).into_response())
}
