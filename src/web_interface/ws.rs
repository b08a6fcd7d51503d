//! WebSocket endpoint for dashboard clients.
//!
//! Each socket gets a read loop (control messages, liveness) and a write
//! loop (drains the connection's outbound queue, emits protocol pings).
//! Control replies travel through the same queue as envelopes, so a client
//! sees them in order with its data.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use warp::reply::Response;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::broadcast::{BroadcastHub, ClientMessage, Connection, ControlReply, Enqueue};
use crate::error_handling::types::BroadcastError;

/// GET /ws
pub fn ws_route(
    hub: BroadcastHub,
    send_timeout: Duration,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::addr::remote())
        .map(move |ws: Ws, remote: Option<SocketAddr>| {
            let hub = hub.clone();
            ws.on_upgrade(move |socket| serve_socket(socket, remote, hub, send_timeout))
                .into_response()
        })
}

pub async fn serve_socket(
    socket: WebSocket,
    remote: Option<SocketAddr>,
    hub: BroadcastHub,
    send_timeout: Duration,
) {
    let connection = hub.connect(remote);
    let id = connection.id();
    info!(
        "[conn {}] websocket opened from {}",
        id,
        remote.map(|a| a.to_string()).unwrap_or_else(|| "unknown".into())
    );

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        Arc::clone(&connection),
        hub.clone(),
        sink,
        send_timeout,
    ));

    read_loop(&hub, &connection, stream).await;
    hub.disconnect(id);
    if let Err(e) = writer.await {
        warn!("[conn {}] write loop ended abnormally: {}", id, e);
    }
    info!(
        "[conn {}] websocket closed ({} frame(s) dropped)",
        id,
        connection.dropped_messages()
    );
}

/// Handles inbound frames until the client goes away or the connection is
/// closed on our side (eviction, shutdown), whichever comes first.
async fn read_loop<S>(hub: &BroadcastHub, connection: &Connection, mut stream: S)
where
    S: Stream<Item = Result<Message, warp::Error>> + Unpin,
{
    loop {
        let result = tokio::select! {
            next = stream.next() => match next {
                Some(result) => result,
                None => break,
            },
            _ = connection.closed() => {
                debug!("[conn {}] closed by server, read side done", connection.id());
                break;
            }
        };
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                debug!("[conn {}] read error: {}", connection.id(), e);
                break;
            }
        };
        connection.mark_alive();

        if message.is_close() {
            break;
        }
        let replies = if let Ok(text) = message.to_str() {
            handle_control(hub, connection, text)
        } else if message.is_binary() {
            vec![ControlReply::error("BAD_REQUEST", "binary frames are not supported")]
        } else {
            // Protocol pings and pongs only count as activity.
            continue;
        };
        for reply in replies {
            enqueue_reply(connection, &reply);
        }
    }
}

/// Applies one control message and returns what to send back.
///
/// A subscription change naming unknown topics still applies the valid
/// ones; the client then gets the resulting set followed by an error that
/// lists the rejected names.
pub fn handle_control(hub: &BroadcastHub, connection: &Connection, text: &str) -> Vec<ControlReply> {
    let id = connection.id();
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("[conn {}] unparseable control message: {}", id, e);
            return vec![ControlReply::error("BAD_REQUEST", e.to_string())];
        }
    };

    let registry = hub.registry();
    let (result, subscribing) = match message {
        ClientMessage::Ping => return vec![ControlReply::pong()],
        ClientMessage::Subscribe { topics } => (registry.subscribe(id, topics.as_slice()), true),
        ClientMessage::Unsubscribe { topics } => (registry.unsubscribe(id, topics.as_slice()), false),
    };

    let confirm = |set: Vec<_>| {
        if subscribing {
            ControlReply::Subscribed { topics: set }
        } else {
            ControlReply::Unsubscribed { topics: set }
        }
    };
    match result {
        Ok(set) => vec![confirm(set.into_iter().collect())],
        Err(err @ BroadcastError::InvalidTopic(_)) => {
            warn!("[conn {}] {}", id, err);
            let current = registry.subscriptions(id).unwrap_or_default();
            vec![
                confirm(current.into_iter().collect()),
                ControlReply::from_broadcast_error(&err),
            ]
        }
        Err(err) => vec![ControlReply::from_broadcast_error(&err)],
    }
}

fn enqueue_reply(connection: &Connection, reply: &ControlReply) {
    match reply.to_json() {
        Ok(json) => {
            if let Enqueue::DroppedOldest = connection.send(Arc::from(json)) {
                debug!("[conn {}] queue full, oldest frame dropped for reply", connection.id());
            }
        }
        Err(e) => warn!("[conn {}] reply not sent: {}", connection.id(), e),
    }
}

async fn write_loop<K>(
    connection: Arc<Connection>,
    hub: BroadcastHub,
    mut sink: K,
    send_timeout: Duration,
) where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    let id = connection.id();
    loop {
        let message = tokio::select! {
            frame = connection.next_frame() => match frame {
                Some(frame) => Message::text(&*frame),
                None => break,
            },
            _ = connection.ping_requested() => Message::ping(Vec::new()),
        };
        match tokio::time::timeout(send_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("[conn {}] send failed: {}", id, e);
                break;
            }
            Err(_) => {
                warn!("[conn {}] send timed out after {:?}", id, send_timeout);
                break;
            }
        }
    }
    // Ends the read side too if the client is still connected.
    hub.disconnect(id);
    match tokio::time::timeout(send_timeout, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("[conn {}] close failed: {}", id, e),
        Err(_) => debug!("[conn {}] close handshake timed out", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{LivenessSupervisor, Topic};
    use serde_json::{json, Value};
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts frames but never finishes a close handshake.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Infallible> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }
    }

    fn setup() -> (BroadcastHub, Arc<Connection>) {
        let hub = BroadcastHub::new(16);
        let conn = hub.connect(None);
        (hub, conn)
    }

    #[test]
    fn ping_gets_pong() {
        let (hub, conn) = setup();
        let replies = handle_control(&hub, &conn, r#"{"type":"PING"}"#);
        assert!(matches!(replies.as_slice(), [ControlReply::Pong { .. }]));
    }

    #[test]
    fn subscribe_confirms_full_set() {
        let (hub, conn) = setup();
        handle_control(&hub, &conn, r#"{"type":"SUBSCRIBE","topics":["stats"]}"#);
        let replies = handle_control(&hub, &conn, r#"{"type":"SUBSCRIBE","topics":["sessions"]}"#);
        assert_eq!(
            replies,
            vec![ControlReply::Subscribed {
                topics: vec![Topic::Sessions, Topic::Stats]
            }]
        );
    }

    #[test]
    fn unknown_topic_is_partially_applied() {
        let (hub, conn) = setup();
        let replies = handle_control(
            &hub,
            &conn,
            r#"{"type":"SUBSCRIBE","topics":["terminal","alerts"]}"#,
        );
        assert_eq!(replies.len(), 2);
        assert_eq!(
            replies[0],
            ControlReply::Subscribed {
                topics: vec![Topic::Terminal]
            }
        );
        assert!(matches!(&replies[1], ControlReply::Error { code, .. } if code == "INVALID_TOPIC"));
    }

    #[test]
    fn unsubscribe_reports_remaining_topics() {
        let (hub, conn) = setup();
        handle_control(
            &hub,
            &conn,
            r#"{"type":"SUBSCRIBE","topics":["sessions","intelligence"]}"#,
        );
        let replies = handle_control(&hub, &conn, r#"{"type":"UNSUBSCRIBE","topics":["sessions"]}"#);
        assert_eq!(
            replies,
            vec![ControlReply::Unsubscribed {
                topics: vec![Topic::Intelligence]
            }]
        );
    }

    #[test]
    fn garbage_is_a_bad_request() {
        let (hub, conn) = setup();
        for text in ["not json", r#"{"type":"LOGIN"}"#, r#"{"topics":[]}"#] {
            let replies = handle_control(&hub, &conn, text);
            assert!(matches!(&replies[..], [ControlReply::Error { code, .. }] if code == "BAD_REQUEST"));
        }
    }

    #[tokio::test]
    async fn websocket_round_trip() {
        let hub = BroadcastHub::new(16);
        let route = ws_route(hub.clone(), Duration::from_secs(1));
        let mut client = warp::test::ws().path("/ws").handshake(route).await.unwrap();

        client
            .send_text(r#"{"type":"SUBSCRIBE","topics":["sessions"]}"#)
            .await;
        let reply: Value =
            serde_json::from_str(client.recv().await.unwrap().to_str().unwrap()).unwrap();
        assert_eq!(reply, json!({"type": "SUBSCRIBED", "topics": ["sessions"]}));

        hub.publish_event(crate::broadcast::EventKind::NewSession, json!({"id": "s-1"}))
            .unwrap();
        let frame: Value =
            serde_json::from_str(client.recv().await.unwrap().to_str().unwrap()).unwrap();
        assert_eq!(frame["type"], "NEW_SESSION");
        assert_eq!(frame["topic"], "sessions");
        assert_eq!(frame["data"]["id"], "s-1");

        client.send_text(r#"{"type":"PING"}"#).await;
        let pong: Value =
            serde_json::from_str(client.recv().await.unwrap().to_str().unwrap()).unwrap();
        assert_eq!(pong["type"], "PONG");
    }

    #[tokio::test]
    async fn hub_shutdown_closes_the_socket() {
        let hub = BroadcastHub::new(16);
        let route = ws_route(hub.clone(), Duration::from_secs(1));
        let mut client = warp::test::ws().path("/ws").handshake(route).await.unwrap();

        client.send_text(r#"{"type":"PING"}"#).await;
        client.recv().await.unwrap();
        assert_eq!(hub.connection_count(), 1);

        hub.shutdown();
        assert_eq!(hub.connection_count(), 0);
        match client.recv().await {
            Ok(message) => assert!(message.is_close()),
            Err(_) => {}
        }
    }

    #[tokio::test]
    async fn read_side_ends_when_server_closes() {
        let (hub, conn) = setup();
        let silent = futures::stream::pending::<Result<Message, warp::Error>>();
        let closer = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            conn.close();
        };
        let done = tokio::time::timeout(Duration::from_secs(1), async {
            tokio::join!(read_loop(&hub, &conn, silent), closer)
        })
        .await;
        assert!(done.is_ok());
    }

    #[tokio::test]
    async fn write_side_gives_up_on_a_stalled_close() {
        let (hub, conn) = setup();
        conn.send(Arc::from("frame"));
        let writer = tokio::spawn(write_loop(
            conn.clone(),
            hub.clone(),
            StalledSink,
            Duration::from_millis(50),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.disconnect(conn.id());

        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("write loop finished")
            .unwrap();
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn silent_client_is_evicted_and_closed() {
        let hub = BroadcastHub::new(16);
        let route = ws_route(hub.clone(), Duration::from_millis(200));
        let mut client = warp::test::ws().path("/ws").handshake(route).await.unwrap();
        for _ in 0..50 {
            if hub.connection_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.connection_count(), 1);

        let liveness = LivenessSupervisor::new(hub.registry().clone(), Duration::from_secs(30), 0);
        assert!(liveness.sweep().evicted.is_empty());
        assert_eq!(liveness.sweep().evicted.len(), 1);
        assert_eq!(hub.connection_count(), 0);

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match client.recv().await {
                    Ok(message) if message.is_close() => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        })
        .await;
        assert!(closed.is_ok());
    }
}
