//! Core domain types shared across the gateway services

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique message identifier
///
/// Assigned once at creation and never reused; the queue entry references
/// the message by this id rather than by row id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(format!("MSG_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Destination number in normalized international form.
///
/// Normalization strips every non-digit character and prefixes `+`. The
/// transform is idempotent: normalizing an already-normalized number is a
/// no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Msisdn(String);

impl Msisdn {
    pub fn new(number: impl AsRef<str>) -> Self {
        let digits: String = number
            .as_ref()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        Self(format!("+{}", digits))
    }

    /// Full normalized form including the leading `+`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits only, without the leading `+`
    pub fn digits(&self) -> &str {
        &self.0[1..]
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() <= 1
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message priority, 1 (lowest) to 5 (highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(3)
    }
}

/// Message status lifecycle
///
/// Transitions are a strict forward progression; `cancelled` and `failed`
/// are terminal and a message never re-enters an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Queued,
    Sending,
    Sent,
    Delivered,
    Failed,
    Cancelled,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Cancelled)
    }

    /// Only messages not yet picked up by a delivery worker can be cancelled
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Queued) => true,
            (Self::Queued, Self::Sending) => true,
            (Self::Sending, Self::Sent) => true,
            (Self::Sent, Self::Delivered) => true,
            (Self::Pending | Self::Queued, Self::Cancelled) => true,
            (Self::Pending | Self::Queued | Self::Sending, Self::Failed) => true,
            // a requeued lease-expired delivery falls back from sending
            (Self::Sending, Self::Queued) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator administrative status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorStatus {
    Active,
    Inactive,
    Suspended,
}

impl OperatorStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue entry status for the durable handoff record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Pending,
    InFlight,
}

impl QueueEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msisdn_normalization_is_idempotent() {
        for raw in ["+1 (900) 555-1234", "1900 555 1234", "+19005551234", "  19-00-5551234"] {
            let once = Msisdn::new(raw);
            let twice = Msisdn::new(once.as_str());
            assert_eq!(once, twice);
            assert!(once.as_str().starts_with('+'));
            assert!(once.digits().chars().all(|c| c.is_ascii_digit()));
        }
        assert_eq!(Msisdn::new("+1 (900) 555-1234").as_str(), "+19005551234");
    }

    #[test]
    fn msisdn_with_no_digits_is_empty() {
        let m = Msisdn::new("abc");
        assert!(m.is_empty());
        assert_eq!(m.as_str(), "+");
    }

    #[test]
    fn message_ids_are_unique_and_prefixed() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("MSG_"));
    }

    #[test]
    fn priority_clamps_to_range() {
        assert_eq!(Priority::new(0).value(), 1);
        assert_eq!(Priority::new(9).value(), 5);
        assert_eq!(Priority::default().value(), 3);
    }

    #[test]
    fn status_forward_progression() {
        use MessageStatus::*;
        assert!(Pending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Sending.can_transition_to(Failed));
        // no silent re-entry
        assert!(!Sent.can_transition_to(Queued));
        assert!(!Cancelled.can_transition_to(Queued));
        assert!(!Failed.can_transition_to(Sending));
        assert!(!Sending.can_transition_to(Cancelled));
    }

    #[test]
    fn cancellable_window() {
        use MessageStatus::*;
        assert!(Pending.is_cancellable());
        assert!(Queued.is_cancellable());
        for s in [Sending, Sent, Delivered, Failed, Cancelled] {
            assert!(!s.is_cancellable());
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        use MessageStatus::*;
        for s in [Pending, Queued, Sending, Sent, Delivered, Failed, Cancelled] {
            assert_eq!(MessageStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MessageStatus::parse("unknown"), None);
    }
}
