use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use super::capture::{CaptureDraft, IntelligenceCapture};
use super::events::{DomainEvent, LogLevel, TerminalLine};
use super::extractor::IntelligenceExtractor;
use super::session::InterceptionSession;
use super::session_manager::{SessionManager, SweepReport, Transition};
use crate::broadcast::{BroadcastHub, EnvelopeBuilder, PublishReport};
use crate::error_handling::types::{BroadcastError, SessionError};
use crate::stats::StatsTrigger;

/// Hands committed domain events to the broadcast hub.
#[derive(Clone)]
pub struct EventDispatcher {
    hub: BroadcastHub,
    stats_trigger: Option<StatsTrigger>,
}

impl EventDispatcher {
    pub fn new(hub: BroadcastHub, stats_trigger: Option<StatsTrigger>) -> Self {
        Self { hub, stats_trigger }
    }

    /// Publishes the event's envelope, if it has one, and pokes the stats
    /// aggregator for events that change session counts.
    ///
    /// The underlying mutation is already committed, so publish failures are
    /// only logged.
    pub fn dispatch(&self, event: &DomainEvent) {
        if let Some(kind) = event.event_kind() {
            match event.payload() {
                Ok(data) => match self.hub.publish_event(kind, data) {
                    Ok(report) => debug!("{} delivered to {} subscriber(s)", kind, report.recipients),
                    Err(e) => warn!("{} not published: {}", kind, e),
                },
                Err(e) => warn!("{} payload could not be serialized: {}", kind, e),
            }
        }
        if event.affects_stats() {
            if let Some(trigger) = &self.stats_trigger {
                trigger.poke();
            }
        }
    }

    fn dispatch_transition<T>(&self, transition: Transition<T>) -> T {
        if let Some(event) = &transition.event {
            self.dispatch(event);
        }
        transition.value
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }
}

/// What an inbound message produced.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub session: InterceptionSession,
    pub captures: Vec<IntelligenceCapture>,
}

/// The operations the web layer calls: each one commits through the
/// [`SessionManager`] and then dispatches whatever event resulted.
#[derive(Clone)]
pub struct InterceptionService {
    manager: Arc<SessionManager>,
    dispatcher: EventDispatcher,
    extractor: Arc<IntelligenceExtractor>,
}

impl InterceptionService {
    pub fn new(
        manager: Arc<SessionManager>,
        dispatcher: EventDispatcher,
        extractor: IntelligenceExtractor,
    ) -> Self {
        Self {
            manager,
            dispatcher,
            extractor: Arc::new(extractor),
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn hub(&self) -> &BroadcastHub {
        self.dispatcher.hub()
    }

    pub async fn create_session(
        &self,
        scammer_ref: Option<String>,
    ) -> Result<InterceptionSession, SessionError> {
        let transition = self.manager.create(scammer_ref).await?;
        Ok(self.dispatcher.dispatch_transition(transition))
    }

    pub async fn activate(&self, id: Uuid) -> Result<InterceptionSession, SessionError> {
        let transition = self.manager.activate(id).await?;
        Ok(self.dispatcher.dispatch_transition(transition))
    }

    pub async fn record_message(&self, id: Uuid) -> Result<InterceptionSession, SessionError> {
        let transition = self.manager.record_message(id).await?;
        Ok(self.dispatcher.dispatch_transition(transition))
    }

    /// Counts an inbound message and records every identifier found in its
    /// text as a capture. With `auto_activate` a PENDING session is activated
    /// first; without it the session must already be ACTIVE.
    pub async fn ingest_message(
        &self,
        id: Uuid,
        text: &str,
        auto_activate: bool,
    ) -> Result<IngestOutcome, SessionError> {
        let transition = if auto_activate {
            self.manager.ingest_message(id).await?
        } else {
            self.manager.record_message(id).await?
        };
        let mut session = self.dispatcher.dispatch_transition(transition);

        let mut captures = Vec::new();
        for draft in self.extractor.extract(text) {
            match self.manager.record_capture(id, draft).await {
                Ok(transition) => captures.push(self.dispatcher.dispatch_transition(transition)),
                Err(e) => warn!("[{}] extracted capture dropped: {}", id, e),
            }
        }
        if !captures.is_empty() {
            session = self.manager.get(id).await?;
        }
        Ok(IngestOutcome { session, captures })
    }

    pub async fn record_capture(
        &self,
        id: Uuid,
        draft: CaptureDraft,
    ) -> Result<IntelligenceCapture, SessionError> {
        let transition = self.manager.record_capture(id, draft).await?;
        Ok(self.dispatcher.dispatch_transition(transition))
    }

    pub async fn close(&self, id: Uuid, reason: &str) -> Result<InterceptionSession, SessionError> {
        let transition = self.manager.close(id, reason).await?;
        Ok(self.dispatcher.dispatch_transition(transition))
    }

    pub async fn log_terminal(
        &self,
        session_id: Option<Uuid>,
        level: LogLevel,
        message: String,
    ) -> Result<TerminalLine, SessionError> {
        let transition = self
            .manager
            .record_terminal_line(session_id, level, message)
            .await?;
        Ok(self.dispatcher.dispatch_transition(transition))
    }

    /// Runs one reaper pass and dispatches the resulting close events.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let report = self.manager.sweep(now).await;
        for event in &report.events {
            self.dispatcher.dispatch(event);
        }
        report
    }

    /// Publishes an event named by an external producer.
    ///
    /// Kinds backed by storage (`NEW_SESSION`, `NEW_CAPTURE`,
    /// `TERMINAL_LOG`) are refused; those go through the session manager.
    pub fn publish_named(
        &self,
        kind: &str,
        topic: Option<&str>,
        data: Value,
    ) -> Result<PublishReport, BroadcastError> {
        let envelope = EnvelopeBuilder::build_named(kind, topic, data)?;
        if envelope.kind.requires_commit() {
            return Err(BroadcastError::ReservedEventKind(kind.to_string()));
        }
        self.hub().publish(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Connection;
    use crate::session_management::{CaptureKind, SessionSettings, SessionState};
    use crate::stats::AggregateCounters;
    use crate::storage::memory_storage::MemoryStorage;
    use serde_json::json;

    fn service(hub: &BroadcastHub, trigger: Option<StatsTrigger>) -> InterceptionService {
        let manager = SessionManager::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(AggregateCounters::new(15)),
            SessionSettings::default(),
        );
        InterceptionService::new(
            Arc::new(manager),
            EventDispatcher::new(hub.clone(), trigger),
            IntelligenceExtractor::new().unwrap(),
        )
    }

    fn listener(hub: &BroadcastHub, topics: &[&str]) -> Arc<Connection> {
        let conn = hub.connect(None);
        hub.registry().subscribe(conn.id(), topics).unwrap();
        conn
    }

    async fn frame(conn: &Connection) -> Value {
        let raw = conn.next_frame().await.unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn created_session_reaches_sessions_subscribers() {
        let hub = BroadcastHub::new(8);
        let conn = listener(&hub, &["sessions"]);
        let svc = service(&hub, None);

        let session = svc.create_session(Some("caller-7".into())).await.unwrap();
        let wire = frame(&conn).await;
        assert_eq!(wire["type"], "NEW_SESSION");
        assert_eq!(wire["topic"], "sessions");
        assert_eq!(wire["data"]["id"], session.id.to_string());
        assert_eq!(wire["data"]["state"], "PENDING");
    }

    #[tokio::test]
    async fn close_only_pokes_stats() {
        let hub = BroadcastHub::new(8);
        let conn = listener(&hub, &["sessions", "intelligence", "terminal"]);
        let trigger = StatsTrigger::new();
        let svc = service(&hub, Some(trigger.clone()));
        let id = svc.create_session(None).await.unwrap().id;
        frame(&conn).await;

        svc.close(id, "done").await.unwrap();
        assert_eq!(conn.pending_messages(), 0);
        let poked =
            tokio::time::timeout(std::time::Duration::from_millis(50), trigger.fired()).await;
        assert!(poked.is_ok());
    }

    #[tokio::test]
    async fn ingest_extracts_and_broadcasts_captures() {
        let hub = BroadcastHub::new(16);
        let conn = listener(&hub, &["intelligence"]);
        let svc = service(&hub, None);
        let id = svc.create_session(None).await.unwrap().id;

        let outcome = svc
            .ingest_message(id, "pay to refund.desk@okaxis or mail helpdesk@scam-bank.com", true)
            .await
            .unwrap();
        assert_eq!(outcome.session.state, SessionState::Active);
        assert_eq!(outcome.session.message_count, 1);
        assert_eq!(outcome.captures.len(), 2);
        assert_eq!(outcome.session.capture_count, 2);

        let first = frame(&conn).await;
        assert_eq!(first["type"], "NEW_CAPTURE");
        assert_eq!(first["data"]["session_id"], id.to_string());
        assert_eq!(conn.pending_messages(), 1);
    }

    #[tokio::test]
    async fn strict_ingest_requires_active_session() {
        let hub = BroadcastHub::new(8);
        let conn = listener(&hub, &["intelligence"]);
        let svc = service(&hub, None);
        let id = svc.create_session(None).await.unwrap().id;

        let result = svc.ingest_message(id, "call 9876543210", false).await;
        assert!(matches!(result, Err(SessionError::InvalidTransition { .. })));
        assert_eq!(conn.pending_messages(), 0);
    }

    #[tokio::test]
    async fn failed_operations_publish_nothing() {
        let hub = BroadcastHub::new(8);
        let conn = listener(&hub, &["sessions", "intelligence"]);
        let svc = service(&hub, None);

        let missing = Uuid::new_v4();
        let draft = CaptureDraft::new(CaptureKind::Url, json!({"value": "http://x.io"}));
        assert!(svc.record_capture(missing, draft).await.is_err());
        assert_eq!(conn.pending_messages(), 0);
    }

    #[tokio::test]
    async fn terminal_lines_go_to_terminal_topic() {
        let hub = BroadcastHub::new(8);
        let conn = listener(&hub, &["terminal"]);
        let svc = service(&hub, None);

        svc.log_terminal(None, LogLevel::Success, "decoy online".into())
            .await
            .unwrap();
        let wire = frame(&conn).await;
        assert_eq!(wire["type"], "TERMINAL_LOG");
        assert_eq!(wire["data"]["level"], "success");
        assert_eq!(wire["data"]["message"], "decoy online");
    }

    #[tokio::test]
    async fn named_publish_is_checked() {
        let hub = BroadcastHub::new(8);
        let svc = service(&hub, None);
        assert!(matches!(
            svc.publish_named("NEW_ALERT", None, json!({})),
            Err(BroadcastError::UnknownEventKind(_))
        ));
        assert!(matches!(
            svc.publish_named("NEW_SESSION", Some("stats"), json!({})),
            Err(BroadcastError::InvalidTopic(_))
        ));
        assert!(svc.publish_named("STATS_UPDATE", Some("stats"), json!({})).is_ok());
    }

    #[tokio::test]
    async fn named_publish_cannot_announce_stored_records() {
        let hub = BroadcastHub::new(8);
        let conn = listener(&hub, &["sessions", "intelligence", "terminal"]);
        let svc = service(&hub, None);
        for kind in ["NEW_SESSION", "NEW_CAPTURE", "TERMINAL_LOG"] {
            assert!(matches!(
                svc.publish_named(kind, None, json!({"id": Uuid::new_v4()})),
                Err(BroadcastError::ReservedEventKind(ref k)) if k == kind
            ));
        }
        assert_eq!(conn.pending_messages(), 0);
    }
}
