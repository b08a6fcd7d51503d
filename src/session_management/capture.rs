use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    PhoneNumber,
    UpiId,
    Email,
    Url,
    BankAccount,
    PaymentRequest,
    ThreatIndicator,
    Other,
}

impl CaptureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureKind::PhoneNumber => "phone_number",
            CaptureKind::UpiId => "upi_id",
            CaptureKind::Email => "email",
            CaptureKind::Url => "url",
            CaptureKind::BankAccount => "bank_account",
            CaptureKind::PaymentRequest => "payment_request",
            CaptureKind::ThreatIndicator => "threat_indicator",
            CaptureKind::Other => "other",
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capture as submitted, before it is tied to a session and stamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDraft {
    pub kind: CaptureKind,
    pub payload: Value,
}

impl CaptureDraft {
    pub fn new(kind: CaptureKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// Extracted intelligence. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceCapture {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: CaptureKind,
    pub payload: Value,
    pub captured_at: DateTime<Utc>,
}

impl IntelligenceCapture {
    pub fn from_draft(session_id: Uuid, draft: CaptureDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            kind: draft.kind,
            payload: draft.payload,
            captured_at: now,
        }
    }
}
