//! Subscription bookkeeping.
//!
//! Tracks the observe-state subscription of the active session: how many
//! times it was opened, how many consecutive attempts failed, and when the
//! last event arrived. The supervisor updates it; the client exposes a
//! snapshot of it.

use std::fmt;

use chrono::{DateTime, Utc};

/// Subscription status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionStatus {
    /// No session is being observed
    #[default]
    Idle,

    /// Opening the stream
    Opening { attempt: u32 },

    /// Stream open and delivering events
    Streaming { since: DateTime<Utc> },

    /// Stream ended for a recoverable reason, about to reopen
    Resubscribing { since: DateTime<Utc> },

    /// Stream ended for good
    Terminated { reason: String },
}

impl SubscriptionStatus {
    /// Check if the session is still being followed.
    ///
    /// Resubscribing counts as live: recoverable interruptions are not
    /// reported as disconnects.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Opening { .. } | Self::Streaming { .. } | Self::Resubscribing { .. }
        )
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Opening { attempt } => write!(f, "Opening({})", attempt),
            Self::Streaming { since } => write!(f, "Streaming(since {})", since.to_rfc3339()),
            Self::Resubscribing { since } => {
                write!(f, "Resubscribing(since {})", since.to_rfc3339())
            }
            Self::Terminated { reason } => write!(f, "Terminated({})", reason),
        }
    }
}

/// Subscription state for the active session.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTracker {
    pub status: SubscriptionStatus,

    /// Streams opened or attempted since the session started
    pub attempts: u32,

    /// Failed attempts since the last delivered event
    pub consecutive_failures: u32,

    /// Events delivered across all streams
    pub events_received: u64,

    pub last_event_at: Option<DateTime<Utc>>,

    pub last_error: Option<String>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an open attempt, returning its 1-based number.
    pub fn opening(&mut self) -> u32 {
        self.attempts += 1;
        self.status = SubscriptionStatus::Opening {
            attempt: self.attempts,
        };
        self.attempts
    }

    pub fn opened(&mut self) {
        self.status = SubscriptionStatus::Streaming { since: Utc::now() };
    }

    pub fn event_received(&mut self) {
        self.events_received += 1;
        self.consecutive_failures = 0;
        self.last_event_at = Some(Utc::now());
    }

    /// Record a recoverable interruption.
    pub fn interrupted(&mut self, reason: impl Into<String>) {
        self.consecutive_failures += 1;
        self.last_error = Some(reason.into());
        self.status = SubscriptionStatus::Resubscribing { since: Utc::now() };
    }

    pub fn terminated(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.last_error = Some(reason.clone());
        self.status = SubscriptionStatus::Terminated { reason };
    }
}
