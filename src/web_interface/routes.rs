use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::Response;
use warp::{reply, Filter, Rejection, Reply};

use super::types::*;
use crate::broadcast::ControlReply;
use crate::error_handling::types::{BroadcastError, SessionError};
use crate::session_management::{CaptureDraft, InterceptionService, SessionState};
use crate::stats::StatsAggregator;
use crate::storage::SessionFilter;

const MAX_BODY_BYTES: u64 = 64 * 1024;
const DEFAULT_TERMINAL_LINES: usize = 100;
const MAX_TERMINAL_LINES: usize = 1_000;
const DEFAULT_CLOSE_REASON: &str = "closed by operator";

/// Shared state handed to every route.
#[derive(Clone)]
pub struct ApiContext {
    pub service: InterceptionService,
    pub aggregator: Arc<StatsAggregator>,
    pub api_key: Option<Arc<str>>,
    pub started_at: Instant,
}

#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

#[derive(Debug)]
struct MalformedBody(String);

impl warp::reject::Reject for MalformedBody {}

fn with_context(
    ctx: ApiContext,
) -> impl Filter<Extract = (ApiContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// Rejects the request unless it carries the configured `x-api-key`.
/// Passes everything through when no key is configured.
pub fn require_api_key(
    expected: Option<Arc<str>>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-api-key")
        .and_then(move |given: Option<String>| {
            let expected = expected.clone();
            async move {
                match expected {
                    None => Ok(()),
                    Some(key) if given.as_deref() == Some(&*key) => Ok(()),
                    Some(_) => Err(warp::reject::custom(Unauthorized)),
                }
            }
        })
        .untuple_one()
}

/// JSON body that may be absent entirely, in which case `T::default()` is used.
///
/// A declared body goes through the same length cap as [`json_body`]. A
/// request without `content-length` or `transfer-encoding` has no body and is
/// answered without reading anything.
fn optional_json<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Default + Send + 'static,
{
    let declared = warp::body::content_length_limit(MAX_BODY_BYTES)
        .and(warp::body::bytes())
        .and_then(|body: Bytes| async move {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(T::default());
            }
            serde_json::from_slice(&body)
                .map_err(|e| warp::reject::custom(MalformedBody(e.to_string())))
        });

    let absent = warp::header::optional::<String>("content-length")
        .and(warp::header::optional::<String>("transfer-encoding"))
        .and_then(|length: Option<String>, encoding: Option<String>| async move {
            if length.is_none() && encoding.is_none() {
                Ok(T::default())
            } else {
                Err(warp::reject::not_found())
            }
        });

    declared.or(absent).unify()
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send + 'static,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    reply::with_status(reply::json(body), status).into_response()
}

fn error_reply(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    json_reply(
        status,
        &ApiError {
            code: code.to_string(),
            message: message.into(),
        },
    )
}

pub fn session_error_reply(err: &SessionError) -> Response {
    match err {
        SessionError::NotFound(_) => error_reply(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        SessionError::InvalidTransition { .. } => {
            error_reply(StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
        }
        SessionError::SessionLimitReached => error_reply(
            StatusCode::TOO_MANY_REQUESTS,
            "SESSION_LIMIT_REACHED",
            err.to_string(),
        ),
        SessionError::StorageError(e) => {
            error!("request failed on storage: {}", e);
            error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                err.to_string(),
            )
        }
    }
}

pub fn broadcast_error_reply(err: &BroadcastError) -> Response {
    let status = match err {
        BroadcastError::InvalidTopic(_)
        | BroadcastError::UnknownEventKind(_)
        | BroadcastError::ReservedEventKind(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    match ControlReply::from_broadcast_error(err) {
        ControlReply::Error { code, message } => error_reply(status, &code, message),
        _ => error_reply(status, "BROADCAST_ERROR", err.to_string()),
    }
}

fn parse_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw)
        .map_err(|_| error_reply(StatusCode::BAD_REQUEST, "INVALID_ID", "Invalid session id"))
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, SessionError>) -> Response {
    match result {
        Ok(value) => json_reply(status, &value),
        Err(e) => session_error_reply(&e),
    }
}

/// Every `/api` route.
pub fn api_routes(ctx: ApiContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let reads = health_route(ctx.clone())
        .or(stats_route(ctx.clone()))
        .unify()
        .or(list_sessions_route(ctx.clone()))
        .unify()
        .or(get_session_route(ctx.clone()))
        .unify()
        .or(list_captures_route(ctx.clone()))
        .unify()
        .or(terminal_tail_route(ctx.clone()))
        .unify();

    let writes = create_session_route(ctx.clone())
        .or(activate_route(ctx.clone()))
        .unify()
        .or(message_route(ctx.clone()))
        .unify()
        .or(capture_route(ctx.clone()))
        .unify()
        .or(close_route(ctx.clone()))
        .unify()
        .or(log_terminal_route(ctx.clone()))
        .unify()
        .or(publish_route(ctx))
        .unify();

    reads.or(writes).unify()
}

/// GET /api/health
pub fn health_route(ctx: ApiContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "health")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(|ctx: ApiContext| async move {
            let body = HealthResponse {
                status: "ok",
                connections: ctx.service.hub().connection_count(),
                resident_sessions: ctx.service.manager().resident_sessions().await,
                uptime_secs: ctx.started_at.elapsed().as_secs(),
            };
            Ok::<_, Rejection>(json_reply(StatusCode::OK, &body))
        })
}

/// GET /api/stats
pub fn stats_route(ctx: ApiContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "stats")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(|ctx: ApiContext| async move {
            let res = match ctx.aggregator.current().await {
                Ok(snapshot) => json_reply(StatusCode::OK, &snapshot),
                Err(e) => {
                    warn!("stats unavailable: {}", e);
                    error_reply(StatusCode::SERVICE_UNAVAILABLE, "STATS_UNAVAILABLE", e.to_string())
                }
            };
            Ok::<_, Rejection>(res)
        })
}

/// GET /api/sessions?state=&scammer_ref=&limit=
pub fn list_sessions_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "sessions")
        .and(warp::get())
        .and(warp::query::<SessionsQuery>())
        .and(with_context(ctx))
        .and_then(|query: SessionsQuery, ctx: ApiContext| async move {
            let state = match query.state.as_deref().map(str::parse::<SessionState>) {
                Some(Err(e)) => {
                    return Ok::<_, Rejection>(error_reply(
                        StatusCode::BAD_REQUEST,
                        "INVALID_STATE",
                        e,
                    ))
                }
                Some(Ok(state)) => Some(state),
                None => None,
            };
            let filter = SessionFilter::default()
                .in_state(state)
                .for_scammer(query.scammer_ref)
                .created_between(query.created_after, query.created_before)
                .with_limit(query.limit);
            Ok(respond(StatusCode::OK, ctx.service.manager().list(Some(filter)).await))
        })
}

/// GET /api/sessions/:id
pub fn get_session_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String)
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(|id_str: String, ctx: ApiContext| async move {
            let id = match parse_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            Ok(respond(StatusCode::OK, ctx.service.manager().get(id).await))
        })
}

/// GET /api/sessions/:id/captures
pub fn list_captures_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "captures")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(|id_str: String, ctx: ApiContext| async move {
            let id = match parse_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            Ok(respond(StatusCode::OK, ctx.service.manager().captures(id).await))
        })
}

/// GET /api/terminal?limit=
pub fn terminal_tail_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "terminal")
        .and(warp::get())
        .and(warp::query::<TerminalQuery>())
        .and(with_context(ctx))
        .and_then(|query: TerminalQuery, ctx: ApiContext| async move {
            let limit = query
                .limit
                .unwrap_or(DEFAULT_TERMINAL_LINES)
                .min(MAX_TERMINAL_LINES);
            Ok::<_, Rejection>(respond(
                StatusCode::OK,
                ctx.service.manager().terminal_tail(limit).await,
            ))
        })
}

/// POST /api/sessions
pub fn create_session_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "sessions")
        .and(warp::post())
        .and(require_api_key(ctx.api_key.clone()))
        .and(optional_json::<CreateSessionRequest>())
        .and(with_context(ctx))
        .and_then(|body: CreateSessionRequest, ctx: ApiContext| async move {
            Ok::<_, Rejection>(respond(
                StatusCode::CREATED,
                ctx.service.create_session(body.scammer_ref).await,
            ))
        })
}

/// POST /api/sessions/:id/activate
pub fn activate_route(ctx: ApiContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "activate")
        .and(warp::post())
        .and(require_api_key(ctx.api_key.clone()))
        .and(with_context(ctx))
        .and_then(|id_str: String, ctx: ApiContext| async move {
            let id = match parse_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            Ok(respond(StatusCode::OK, ctx.service.activate(id).await))
        })
}

/// POST /api/sessions/:id/messages
pub fn message_route(ctx: ApiContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "messages")
        .and(warp::post())
        .and(require_api_key(ctx.api_key.clone()))
        .and(optional_json::<MessageRequest>())
        .and(with_context(ctx))
        .and_then(|id_str: String, body: MessageRequest, ctx: ApiContext| async move {
            let id = match parse_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            let result = ctx
                .service
                .ingest_message(id, &body.text, body.auto_activate)
                .await
                .map(|outcome| MessageResponse {
                    session: outcome.session,
                    captures: outcome.captures,
                });
            Ok(respond(StatusCode::OK, result))
        })
}

/// POST /api/sessions/:id/captures
pub fn capture_route(ctx: ApiContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "captures")
        .and(warp::post())
        .and(require_api_key(ctx.api_key.clone()))
        .and(json_body::<CaptureDraft>())
        .and(with_context(ctx))
        .and_then(|id_str: String, draft: CaptureDraft, ctx: ApiContext| async move {
            let id = match parse_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            Ok(respond(
                StatusCode::CREATED,
                ctx.service.record_capture(id, draft).await,
            ))
        })
}

/// POST /api/sessions/:id/close
pub fn close_route(ctx: ApiContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "close")
        .and(warp::post())
        .and(require_api_key(ctx.api_key.clone()))
        .and(optional_json::<CloseRequest>())
        .and(with_context(ctx))
        .and_then(|id_str: String, body: CloseRequest, ctx: ApiContext| async move {
            let id = match parse_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            let reason = body.reason.as_deref().unwrap_or(DEFAULT_CLOSE_REASON);
            Ok(respond(StatusCode::OK, ctx.service.close(id, reason).await))
        })
}

/// POST /api/terminal
pub fn log_terminal_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "terminal")
        .and(warp::post())
        .and(require_api_key(ctx.api_key.clone()))
        .and(json_body::<TerminalRequest>())
        .and(with_context(ctx))
        .and_then(|body: TerminalRequest, ctx: ApiContext| async move {
            Ok::<_, Rejection>(respond(
                StatusCode::CREATED,
                ctx.service
                    .log_terminal(body.session_id, body.level, body.message)
                    .await,
            ))
        })
}

/// POST /api/events
pub fn publish_route(ctx: ApiContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("api" / "events")
        .and(warp::post())
        .and(require_api_key(ctx.api_key.clone()))
        .and(json_body::<PublishRequest>())
        .and(with_context(ctx))
        .and_then(|body: PublishRequest, ctx: ApiContext| async move {
            let res = match ctx
                .service
                .publish_named(&body.kind, body.topic.as_deref(), body.data)
            {
                Ok(report) => json_reply(
                    StatusCode::ACCEPTED,
                    &PublishResponse {
                        recipients: report.recipients,
                        overflowed: report.overflowed.len(),
                    },
                ),
                Err(e) => broadcast_error_reply(&e),
            };
            Ok::<_, Rejection>(res)
        })
}

/// Turns rejections into JSON errors.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let res = if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "NOT_FOUND", "No such route")
    } else if err.find::<Unauthorized>().is_some() {
        error_reply(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Missing or invalid x-api-key",
        )
    } else if let Some(MalformedBody(e)) = err.find::<MalformedBody>() {
        error_reply(StatusCode::BAD_REQUEST, "BAD_REQUEST", e.clone())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        error_reply(StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string())
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        error_reply(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Invalid query string")
    } else if let Some(e) = err.find::<warp::reject::MissingHeader>() {
        error_reply(StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
        error_reply(StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_reply(StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", "Body too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        error_reply(StatusCode::LENGTH_REQUIRED, "LENGTH_REQUIRED", "Content-Length required")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        error_reply(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "UNSUPPORTED_MEDIA_TYPE",
            "Expected application/json",
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "Method not allowed",
        )
    } else {
        error!("unhandled rejection: {:?}", err);
        error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL",
            "Unhandled rejection",
        )
    };
    Ok(res)
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
