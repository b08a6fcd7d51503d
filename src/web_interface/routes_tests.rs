use super::*;
use crate::broadcast::{BroadcastHub, Connection};
use crate::session_management::{
    EventDispatcher, IntelligenceExtractor, SessionManager, SessionSettings,
};
use crate::stats::{AggregateCounters, InMemoryStatsCache};
use crate::storage::memory_storage::MemoryStorage;
use serde_json::{json, Value};
use std::time::Duration;
use warp::http::Response as HttpResponse;

const KEY: &str = "k";

fn context(settings: SessionSettings) -> (ApiContext, BroadcastHub) {
    let hub = BroadcastHub::new(16);
    let counters = Arc::new(AggregateCounters::new(15));
    let aggregator = Arc::new(StatsAggregator::new(
        counters.clone(),
        Arc::new(InMemoryStatsCache::new()),
        hub.clone(),
        Duration::from_secs(30),
    ));
    let manager = SessionManager::new(Arc::new(MemoryStorage::new()), counters, settings);
    let service = InterceptionService::new(
        Arc::new(manager),
        EventDispatcher::new(hub.clone(), Some(aggregator.trigger())),
        IntelligenceExtractor::new().unwrap(),
    );
    let ctx = ApiContext {
        service,
        aggregator,
        api_key: Some(Arc::from(KEY)),
        started_at: Instant::now(),
    };
    (ctx, hub)
}

fn body(res: &HttpResponse<Bytes>) -> Value {
    serde_json::from_slice(res.body()).unwrap()
}

async fn post(ctx: &ApiContext, path: &str, payload: Option<Value>) -> HttpResponse<Bytes> {
    let routes = api_routes(ctx.clone()).recover(handle_rejection);
    let mut req = warp::test::request()
        .method("POST")
        .path(path)
        .header("x-api-key", KEY);
    if let Some(payload) = payload {
        req = req.json(&payload);
    }
    req.reply(&routes).await
}

async fn get(ctx: &ApiContext, path: &str) -> HttpResponse<Bytes> {
    let routes = api_routes(ctx.clone()).recover(handle_rejection);
    warp::test::request().method("GET").path(path).reply(&routes).await
}

async fn create(ctx: &ApiContext) -> String {
    let res = post(ctx, "/api/sessions", Some(json!({"scammer_ref": "+91-98"}))).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    body(&res)["id"].as_str().unwrap().to_string()
}

fn listener(hub: &BroadcastHub, topics: &[&str]) -> Arc<Connection> {
    let conn = hub.connect(None);
    hub.registry().subscribe(conn.id(), topics).unwrap();
    conn
}

#[tokio::test]
async fn health_reports_counts() {
    let (ctx, hub) = context(SessionSettings::default());
    let _conn = listener(&hub, &["stats"]);
    create(&ctx).await;

    let res = get(&ctx, "/api/health").await;
    assert_eq!(res.status(), StatusCode::OK);
    let health = body(&res);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["resident_sessions"], 1);
}

#[tokio::test]
async fn create_broadcasts_new_session() {
    let (ctx, hub) = context(SessionSettings::default());
    let conn = listener(&hub, &["sessions"]);

    let id = create(&ctx).await;
    let frame: Value = serde_json::from_str(&conn.next_frame().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "NEW_SESSION");
    assert_eq!(frame["data"]["id"], id.as_str());
    assert_eq!(frame["data"]["state"], "PENDING");
}

#[tokio::test]
async fn create_accepts_an_empty_body() {
    let (ctx, _hub) = context(SessionSettings::default());
    let res = post(&ctx, "/api/sessions", None).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert!(body(&res)["scammer_ref"].is_null());
}

#[tokio::test]
async fn writes_need_the_api_key() {
    let (ctx, _hub) = context(SessionSettings::default());
    let routes = api_routes(ctx.clone()).recover(handle_rejection);

    let missing = warp::test::request()
        .method("POST")
        .path("/api/sessions")
        .reply(&routes)
        .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body(&missing)["code"], "UNAUTHORIZED");

    let wrong = warp::test::request()
        .method("POST")
        .path("/api/sessions")
        .header("x-api-key", "nope")
        .reply(&routes)
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    // Reads stay open.
    assert_eq!(get(&ctx, "/api/sessions").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn bad_and_unknown_ids() {
    let (ctx, _hub) = context(SessionSettings::default());

    let res = get(&ctx, "/api/sessions/not-a-uuid").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["code"], "INVALID_ID");

    let res = post(&ctx, &format!("/api/sessions/{}/activate", Uuid::new_v4()), None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body(&res)["code"], "NOT_FOUND");
}

#[tokio::test]
async fn message_extracts_and_activates() {
    let (ctx, hub) = context(SessionSettings::default());
    let id = create(&ctx).await;
    let conn = listener(&hub, &["intelligence"]);

    let res = post(
        &ctx,
        &format!("/api/sessions/{}/messages", id),
        Some(json!({"text": "pay to fraud@okaxis right now"})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let outcome = body(&res);
    assert_eq!(outcome["session"]["state"], "ACTIVE");
    assert_eq!(outcome["session"]["message_count"], 1);
    assert_eq!(outcome["captures"].as_array().unwrap().len(), 1);

    let frame: Value = serde_json::from_str(&conn.next_frame().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "NEW_CAPTURE");
}

#[tokio::test]
async fn message_on_closed_session_conflicts() {
    let (ctx, _hub) = context(SessionSettings::default());
    let id = create(&ctx).await;

    let res = post(
        &ctx,
        &format!("/api/sessions/{}/close", id),
        Some(json!({"reason": "scammer hung up"})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res)["close_reason"], "scammer hung up");

    let res = post(
        &ctx,
        &format!("/api/sessions/{}/messages", id),
        Some(json!({"text": "hello?"})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(body(&res)["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn close_without_body_uses_default_reason() {
    let (ctx, _hub) = context(SessionSettings::default());
    let id = create(&ctx).await;
    let res = post(&ctx, &format!("/api/sessions/{}/close", id), None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res)["close_reason"], DEFAULT_CLOSE_REASON);
}

#[tokio::test]
async fn session_limit_is_too_many_requests() {
    let (ctx, _hub) = context(SessionSettings {
        max_open_sessions: 1,
        ..SessionSettings::default()
    });
    create(&ctx).await;
    let res = post(&ctx, "/api/sessions", None).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body(&res)["code"], "SESSION_LIMIT_REACHED");
}

#[tokio::test]
async fn captures_are_created_and_listed() {
    let (ctx, _hub) = context(SessionSettings::default());
    let id = create(&ctx).await;
    let path = format!("/api/sessions/{}/captures", id);

    let res = post(
        &ctx,
        &path,
        Some(json!({"kind": "bank_account", "payload": {"value": "001122334455"}})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(body(&res)["kind"], "bank_account");

    let res = get(&ctx, &path).await;
    assert_eq!(res.status(), StatusCode::OK);
    let list = body(&res);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["payload"]["value"], "001122334455");
}

#[tokio::test]
async fn malformed_capture_is_a_bad_request() {
    let (ctx, _hub) = context(SessionSettings::default());
    let id = create(&ctx).await;
    let res = post(
        &ctx,
        &format!("/api/sessions/{}/captures", id),
        Some(json!({"kind": "carrier_pigeon", "payload": {}})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_checks_the_event_kind() {
    let (ctx, hub) = context(SessionSettings::default());
    let conn = listener(&hub, &["stats"]);

    let res = post(
        &ctx,
        "/api/events",
        Some(json!({"type": "STATS_UPDATE", "data": {"active_sessions": 0}})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(body(&res)["recipients"], 1);
    assert!(conn.next_frame().await.is_some());

    let res = post(&ctx, "/api/events", Some(json!({"type": "SELF_DESTRUCT"}))).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["code"], "UNKNOWN_EVENT_KIND");

    let res = post(
        &ctx,
        "/api/events",
        Some(json!({"type": "STATS_UPDATE", "topic": "sessions"})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["code"], "INVALID_TOPIC");
}

#[tokio::test]
async fn publish_refuses_kinds_backed_by_storage() {
    let (ctx, hub) = context(SessionSettings::default());
    let conn = listener(&hub, &["sessions", "intelligence", "terminal"]);
    let ghost = Uuid::new_v4();

    for kind in ["NEW_SESSION", "NEW_CAPTURE", "TERMINAL_LOG"] {
        let res = post(
            &ctx,
            "/api/events",
            Some(json!({"type": kind, "data": {"id": ghost}})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&res)["code"], "RESERVED_EVENT_KIND");
    }
    assert_eq!(conn.pending_messages(), 0);

    let res = get(&ctx, &format!("/api/sessions/{}", ghost)).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn terminal_lines_round_trip() {
    let (ctx, _hub) = context(SessionSettings::default());
    for i in 0..3 {
        let res = post(
            &ctx,
            "/api/terminal",
            Some(json!({"level": "warn", "message": format!("line {}", i)})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let res = get(&ctx, "/api/terminal?limit=2").await;
    assert_eq!(res.status(), StatusCode::OK);
    let lines = body(&res);
    let lines = lines.as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["message"], "line 2");
    assert_eq!(lines[1]["level"], "warn");
}

#[tokio::test]
async fn list_filters_by_state() {
    let (ctx, _hub) = context(SessionSettings::default());
    let first = create(&ctx).await;
    create(&ctx).await;
    post(&ctx, &format!("/api/sessions/{}/activate", first), None).await;

    let res = get(&ctx, "/api/sessions?state=active").await;
    assert_eq!(res.status(), StatusCode::OK);
    let sessions = body(&res);
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["id"], first.as_str());

    let res = get(&ctx, "/api/sessions?state=archived").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["code"], "INVALID_STATE");
}

#[tokio::test]
async fn list_filters_by_creation_window() {
    let (ctx, _hub) = context(SessionSettings::default());
    create(&ctx).await;
    create(&ctx).await;

    let res = get(&ctx, "/api/sessions?created_after=2000-01-01T00:00:00Z&limit=1").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res).as_array().unwrap().len(), 1);

    let res = get(&ctx, "/api/sessions?created_after=2999-01-01T00:00:00Z").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body(&res).as_array().unwrap().is_empty());

    let res = get(&ctx, "/api/sessions?created_before=2000-01-01T00:00:00Z").await;
    assert!(body(&res).as_array().unwrap().is_empty());

    let res = get(&ctx, "/api/sessions?created_after=yesterday").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_are_served() {
    let (ctx, _hub) = context(SessionSettings::default());
    create(&ctx).await;
    let res = get(&ctx, "/api/stats").await;
    assert_eq!(res.status(), StatusCode::OK);
    let stats = body(&res);
    assert_eq!(stats["pending_sessions"], 1);
    assert_eq!(stats["total_sessions"], 1);
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let (ctx, _hub) = context(SessionSettings::default());
    let res = get(&ctx, "/api/nowhere").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body(&res)["code"], "NOT_FOUND");
}

#[tokio::test]
async fn oversized_body_is_refused_before_buffering() {
    let (ctx, _hub) = context(SessionSettings::default());
    let routes = api_routes(ctx.clone()).recover(handle_rejection);
    let res = warp::test::request()
        .method("POST")
        .path("/api/sessions")
        .header("x-api-key", KEY)
        .body(vec![b' '; MAX_BODY_BYTES as usize + 1])
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body(&res)["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(ctx.service.manager().resident_sessions().await, 0);
}

#[tokio::test]
async fn unsized_body_needs_a_length() {
    let (ctx, _hub) = context(SessionSettings::default());
    let routes = api_routes(ctx.clone()).recover(handle_rejection);
    let res = warp::test::request()
        .method("POST")
        .path("/api/sessions")
        .header("x-api-key", KEY)
        .header("transfer-encoding", "chunked")
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::LENGTH_REQUIRED);
}
