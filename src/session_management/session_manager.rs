use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use super::capture::{CaptureDraft, IntelligenceCapture};
use super::events::{DomainEvent, LogLevel, TerminalLine};
use super::session::InterceptionSession;
use super::SessionState;
use crate::error_handling::types::SessionError;
use crate::stats::AggregateCounters;
use crate::storage::{SessionFilter, Storage};

/// Reason recorded on sessions closed by the reaper.
pub const INACTIVITY_REASON: &str = "inactivity timeout";

type Slot = Arc<Mutex<InterceptionSession>>;

/// Limits and timeouts applied by the [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Maximum number of PENDING + ACTIVE sessions, 0 for no limit.
    pub max_open_sessions: usize,
    /// Idle time after which an open session is closed, `None` for never.
    pub inactivity_timeout: Option<Duration>,
    /// How long a closed session stays in memory after closing.
    pub closed_retention: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_open_sessions: 0,
            inactivity_timeout: None,
            closed_retention: Duration::minutes(10),
        }
    }
}

/// Result of a committed operation: the resulting value and, when the
/// operation is observable by others, the domain event to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<T> {
    pub value: T,
    pub event: Option<DomainEvent>,
}

impl<T> Transition<T> {
    fn quiet(value: T) -> Self {
        Self { value, event: None }
    }

    fn emitting(value: T, event: DomainEvent) -> Self {
        Self {
            value,
            event: Some(event),
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    /// `SessionClosed` events of sessions closed for inactivity.
    pub events: Vec<DomainEvent>,
    pub evicted: usize,
}

enum Lookup {
    Live(Slot),
    /// Closed and no longer held in memory.
    Archived(InterceptionSession),
}

/// The session state machine.
///
/// Mutations of one session are serialized by that session's own lock; the
/// lock is held across the storage commit, so a transition is either
/// committed and visible or not applied at all. Different sessions never
/// wait on each other.
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    counters: Arc<AggregateCounters>,
    settings: SessionSettings,
    sessions: RwLock<HashMap<Uuid, Slot>>,
    /// Creations past the limit check whose commit has not finished yet.
    creating: parking_lot::Mutex<u64>,
}

/// An open-session slot held by an in-flight `create`.
struct OpenSlot<'a>(Option<&'a parking_lot::Mutex<u64>>);

impl Drop for OpenSlot<'_> {
    fn drop(&mut self) {
        if let Some(creating) = self.0 {
            *creating.lock() -= 1;
        }
    }
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        counters: Arc<AggregateCounters>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            storage,
            counters,
            settings,
            sessions: RwLock::new(HashMap::new()),
            creating: parking_lot::Mutex::new(0),
        }
    }

    /// Loads open sessions from storage and seeds the aggregate counters.
    /// Called once at startup, before any request is served.
    pub async fn restore(&self) -> Result<usize, SessionError> {
        let stored = self.storage.get_sessions(None).await?;
        self.counters.seed(stored.iter());
        let mut sessions = self.sessions.write().await;
        let mut restored = 0;
        for session in stored.into_iter().filter(|s| s.state.is_open()) {
            sessions.insert(session.id, Arc::new(Mutex::new(session)));
            restored += 1;
        }
        info!("restored {} open session(s) from storage", restored);
        Ok(restored)
    }

    pub async fn create(
        &self,
        scammer_ref: Option<String>,
    ) -> Result<Transition<InterceptionSession>, SessionError> {
        let reservation = self.reserve_open_slot()?;

        let session = InterceptionSession::new(scammer_ref, Utc::now());
        self.storage.commit_session(&session).await?;
        self.sessions
            .write()
            .await
            .insert(session.id, Arc::new(Mutex::new(session.clone())));
        self.counters.session_created(session.created_at);
        // Released only once the counters include the new session.
        drop(reservation);

        info!("[{}] session created", session.id);
        Ok(Transition::emitting(
            session.clone(),
            DomainEvent::SessionCreated(session),
        ))
    }

    pub async fn activate(&self, id: Uuid) -> Result<Transition<InterceptionSession>, SessionError> {
        let slot = self.live_slot(id).await?;
        let mut current = slot.lock().await;
        match current.state {
            SessionState::Pending => {}
            SessionState::Active => return Ok(Transition::quiet(current.clone())),
            SessionState::Closed => return Err(invalid(&current, "activate")),
        }
        let mut next = current.clone();
        next.state = SessionState::Active;
        next.last_activity_at = Utc::now();
        self.commit(&mut current, next).await?;
        info!("[{}] session activated", id);
        Ok(Transition::quiet(current.clone()))
    }

    /// Counts one message. Only valid on an ACTIVE session.
    pub async fn record_message(
        &self,
        id: Uuid,
    ) -> Result<Transition<InterceptionSession>, SessionError> {
        let slot = self.live_slot(id).await?;
        let mut current = slot.lock().await;
        if current.state != SessionState::Active {
            return Err(invalid(&current, "record a message on"));
        }
        let mut next = current.clone();
        next.message_count += 1;
        next.last_activity_at = Utc::now();
        self.commit(&mut current, next).await?;
        debug!("[{}] message recorded ({} total)", id, current.message_count);
        Ok(Transition::quiet(current.clone()))
    }

    /// Counts an inbound message, activating the session first if it is
    /// still PENDING. Both changes are committed together.
    pub async fn ingest_message(
        &self,
        id: Uuid,
    ) -> Result<Transition<InterceptionSession>, SessionError> {
        let slot = self.live_slot(id).await?;
        let mut current = slot.lock().await;
        if current.is_closed() {
            return Err(invalid(&current, "ingest a message on"));
        }
        let mut next = current.clone();
        if next.state == SessionState::Pending {
            next.state = SessionState::Active;
            info!("[{}] session activated by first inbound message", id);
        }
        next.message_count += 1;
        next.last_activity_at = Utc::now();
        self.commit(&mut current, next).await?;
        Ok(Transition::quiet(current.clone()))
    }

    /// Stores an immutable capture. Valid while the session is PENDING or
    /// ACTIVE.
    pub async fn record_capture(
        &self,
        id: Uuid,
        draft: CaptureDraft,
    ) -> Result<Transition<IntelligenceCapture>, SessionError> {
        let slot = self.live_slot(id).await?;
        let mut current = slot.lock().await;
        if current.is_closed() {
            return Err(invalid(&current, "record a capture on"));
        }

        let capture = IntelligenceCapture::from_draft(id, draft, Utc::now());
        self.storage.commit_capture(&capture).await?;

        let mut next = current.clone();
        next.capture_count += 1;
        next.last_activity_at = capture.captured_at;
        if let Err(e) = self.storage.commit_session(&next).await {
            // The capture itself is durable; the stored count catches up on
            // the next successful session commit.
            warn!("[{}] capture count not persisted: {}", id, e);
        }
        *current = next;
        drop(current);

        self.counters.capture_recorded(capture.captured_at);
        info!("[{}] {} captured", id, capture.kind);
        Ok(Transition::emitting(
            capture.clone(),
            DomainEvent::CaptureRecorded(capture),
        ))
    }

    /// Closes the session. Closing an already closed session succeeds
    /// without emitting anything.
    pub async fn close(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<Transition<InterceptionSession>, SessionError> {
        let slot = match self.lookup(id).await? {
            Lookup::Live(slot) => slot,
            Lookup::Archived(session) => return Ok(Transition::quiet(session)),
        };
        let mut current = slot.lock().await;
        self.close_locked(&mut current, reason).await
    }

    pub async fn record_terminal_line(
        &self,
        session_id: Option<Uuid>,
        level: LogLevel,
        message: String,
    ) -> Result<Transition<TerminalLine>, SessionError> {
        if let Some(id) = session_id {
            self.lookup(id).await?;
        }
        let line = TerminalLine::new(session_id, level, message, Utc::now());
        self.storage.commit_terminal_line(&line).await?;
        Ok(Transition::emitting(
            line.clone(),
            DomainEvent::TerminalLogged(line),
        ))
    }

    pub async fn get(&self, id: Uuid) -> Result<InterceptionSession, SessionError> {
        let slot = self.sessions.read().await.get(&id).cloned();
        match slot {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => self
                .storage
                .get_session(id)
                .await?
                .ok_or(SessionError::NotFound(id)),
        }
    }

    pub async fn list(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<InterceptionSession>, SessionError> {
        Ok(self.storage.get_sessions(filter).await?)
    }

    pub async fn captures(&self, id: Uuid) -> Result<Vec<IntelligenceCapture>, SessionError> {
        self.get(id).await?;
        Ok(self.storage.get_captures(id).await?)
    }

    pub async fn terminal_tail(&self, limit: usize) -> Result<Vec<TerminalLine>, SessionError> {
        Ok(self.storage.recent_terminal_lines(limit).await?)
    }

    /// Number of sessions currently held in memory (open plus recently closed).
    pub async fn resident_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Closes idle sessions and evicts closed sessions past retention.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let slots: Vec<(Uuid, Slot)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut report = SweepReport::default();
        let mut expired = Vec::new();
        for (id, slot) in slots {
            let mut current = slot.lock().await;
            if current.is_closed() {
                if now - current.settled_at() >= self.settings.closed_retention {
                    expired.push(id);
                }
                continue;
            }
            let Some(timeout) = self.settings.inactivity_timeout else {
                continue;
            };
            if now - current.last_activity_at < timeout {
                continue;
            }
            match self.close_locked(&mut current, INACTIVITY_REASON).await {
                Ok(transition) => report.events.extend(transition.event),
                Err(e) => warn!("[{}] inactivity close failed: {}", id, e),
            }
        }

        if !expired.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &expired {
                sessions.remove(id);
            }
            report.evicted = expired.len();
            debug!("evicted {} closed session(s) from memory", expired.len());
        }
        report
    }

    /// Checks the open-session limit, counting creations still committing.
    fn reserve_open_slot(&self) -> Result<OpenSlot<'_>, SessionError> {
        let limit = self.settings.max_open_sessions as u64;
        if limit == 0 {
            return Ok(OpenSlot(None));
        }
        let mut creating = self.creating.lock();
        if self.counters.open_sessions() + *creating >= limit {
            warn!("session creation refused: {} open session(s)", limit);
            return Err(SessionError::SessionLimitReached);
        }
        *creating += 1;
        Ok(OpenSlot(Some(&self.creating)))
    }

    /// Deletes closed sessions settled before `older_than` from storage.
    pub async fn purge(&self, older_than: DateTime<Utc>) -> Result<usize, SessionError> {
        Ok(self.storage.cleanup_old_sessions(older_than).await?)
    }

    async fn close_locked(
        &self,
        current: &mut MutexGuard<'_, InterceptionSession>,
        reason: &str,
    ) -> Result<Transition<InterceptionSession>, SessionError> {
        if current.is_closed() {
            debug!("[{}] close ignored: already closed", current.id);
            return Ok(Transition::quiet((**current).clone()));
        }
        let now = Utc::now();
        let mut next = (**current).clone();
        next.state = SessionState::Closed;
        next.closed_at = Some(now);
        next.close_reason = Some(reason.to_string());
        self.commit(current, next).await?;
        info!("[{}] session closed: {}", current.id, reason);
        let closed = (**current).clone();
        Ok(Transition::emitting(
            closed.clone(),
            DomainEvent::SessionClosed(closed),
        ))
    }

    /// Persists `next`, then makes it the current value and updates the
    /// counters. On failure nothing changes.
    async fn commit(
        &self,
        current: &mut MutexGuard<'_, InterceptionSession>,
        next: InterceptionSession,
    ) -> Result<(), SessionError> {
        self.storage.commit_session(&next).await?;
        self.counters.session_transitioned(current.state, next.state);
        **current = next;
        Ok(())
    }

    async fn lookup(&self, id: Uuid) -> Result<Lookup, SessionError> {
        if let Some(slot) = self.sessions.read().await.get(&id) {
            return Ok(Lookup::Live(Arc::clone(slot)));
        }
        let stored = self
            .storage
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound(id))?;
        if stored.is_closed() {
            return Ok(Lookup::Archived(stored));
        }

        // Open in storage but not resident: written by an earlier run that
        // was not restored. Adopt it.
        let mut sessions = self.sessions.write().await;
        let slot = sessions.entry(id).or_insert_with(|| {
            self.counters.seed(std::iter::once(&stored));
            debug!("[{}] adopted open session from storage", id);
            Arc::new(Mutex::new(stored.clone()))
        });
        Ok(Lookup::Live(Arc::clone(slot)))
    }

    /// Like `lookup`, but sessions that are no longer resident count as
    /// unknown.
    async fn live_slot(&self, id: Uuid) -> Result<Slot, SessionError> {
        match self.lookup(id).await? {
            Lookup::Live(slot) => Ok(slot),
            Lookup::Archived(_) => Err(SessionError::NotFound(id)),
        }
    }
}

fn invalid(session: &InterceptionSession, action: &'static str) -> SessionError {
    debug!(
        "[{}] refused to {} in state {}",
        session.id, action, session.state
    );
    SessionError::InvalidTransition {
        session_id: session.id,
        state: session.state,
        action,
    }
}

#[cfg(test)]
#[path = "session_manager_tests.rs"]
mod tests;
