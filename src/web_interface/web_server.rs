use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use log::info;
use tokio_util::sync::CancellationToken;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::{Filter, Reply};

use super::assets::dashboard_routes;
use super::routes::{api_routes, handle_rejection, ApiContext};
use super::ws::ws_route;
use crate::error_handling::types::WebError;

/// Web server for the HTTP API, the dashboard socket and the dashboard itself
pub struct WebServer {
    ctx: ApiContext,
    send_timeout: Duration,
    dashboard_enabled: bool,
}

impl WebServer {
    pub fn new(ctx: ApiContext, send_timeout: Duration, dashboard_enabled: bool) -> Self {
        Self {
            ctx,
            send_timeout,
            dashboard_enabled,
        }
    }

    /// Every route, with rejections rendered as JSON errors.
    pub fn routes(&self) -> BoxedFilter<(Response,)> {
        let ws = ws_route(self.ctx.service.hub().clone(), self.send_timeout);
        let api = api_routes(self.ctx.clone());

        let enabled = self.dashboard_enabled;
        let dashboard = warp::any()
            .and_then(move || async move {
                if enabled {
                    Ok(())
                } else {
                    Err(warp::reject::not_found())
                }
            })
            .untuple_one()
            .and(dashboard_routes());

        ws.or(api)
            .unify()
            .or(dashboard)
            .unify()
            .recover(handle_rejection)
            .unify()
            .with(warp::log("snare::http"))
            .map(Reply::into_response)
            .boxed()
    }

    /// Binds the listener and returns the bound address together with the
    /// server future. The future resolves once `cancel` fires and in-flight
    /// requests have finished.
    pub fn bind(
        &self,
        addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<(SocketAddr, impl Future<Output = ()>), WebError> {
        let (bound, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(addr, async move { cancel.cancelled().await })
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;
        info!("web server listening on http://{}", bound);
        Ok((bound, server))
    }

    pub async fn run(&self, addr: SocketAddr, cancel: CancellationToken) -> Result<(), WebError> {
        let (_, server) = self.bind(addr, cancel)?;
        server.await;
        info!("web server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastHub;
    use crate::session_management::{
        EventDispatcher, IntelligenceExtractor, InterceptionService, SessionManager,
        SessionSettings,
    };
    use crate::stats::{AggregateCounters, InMemoryStatsCache, StatsAggregator};
    use crate::storage::memory_storage::MemoryStorage;
    use std::sync::Arc;
    use std::time::Instant;
    use warp::http::StatusCode;

    fn server(dashboard_enabled: bool) -> WebServer {
        let hub = BroadcastHub::new(8);
        let counters = Arc::new(AggregateCounters::new(15));
        let aggregator = Arc::new(StatsAggregator::new(
            counters.clone(),
            Arc::new(InMemoryStatsCache::new()),
            hub.clone(),
            Duration::from_secs(30),
        ));
        let manager = SessionManager::new(
            Arc::new(MemoryStorage::new()),
            counters,
            SessionSettings::default(),
        );
        let service = InterceptionService::new(
            Arc::new(manager),
            EventDispatcher::new(hub, None),
            IntelligenceExtractor::new().unwrap(),
        );
        let ctx = ApiContext {
            service,
            aggregator,
            api_key: None,
            started_at: Instant::now(),
        };
        WebServer::new(ctx, Duration::from_secs(1), dashboard_enabled)
    }

    #[tokio::test]
    async fn dashboard_can_be_disabled() {
        let on = server(true).routes();
        let res = warp::test::request().path("/").reply(&on).await;
        assert_eq!(res.status(), StatusCode::OK);

        let off = server(false).routes();
        let res = warp::test::request().path("/").reply(&off).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res = warp::test::request().path("/api/health").reply(&off).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_paths_get_a_json_error() {
        let routes = server(false).routes();
        let res = warp::test::request().path("/nope").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn serves_until_cancelled() {
        let web = server(false);
        let cancel = CancellationToken::new();
        let (bound, future) = web
            .bind("127.0.0.1:0".parse().unwrap(), cancel.clone())
            .unwrap();
        assert_ne!(bound.port(), 0);

        let handle = tokio::spawn(future);
        let stream = tokio::net::TcpStream::connect(bound).await;
        assert!(stream.is_ok());
        drop(stream);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn occupied_port_fails_to_bind() {
        let web = server(false);
        let cancel = CancellationToken::new();
        let (bound, _future) = web
            .bind("127.0.0.1:0".parse().unwrap(), cancel.clone())
            .unwrap();

        let second = server(false).bind(bound, cancel);
        assert!(matches!(second, Err(WebError::BindFailed(_))));
    }
}
