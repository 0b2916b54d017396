//! # Ledger Notifications
//!
//! Every completed ledger operation produces a [`LedgerEvent`], wrapped in a
//! [`Notification`] envelope with a unique ID and a timestamp, and handed to
//! a [`NotificationSink`]. Delivery is fire-and-forget: the ledger never
//! waits for or inspects an acknowledgment, and a sink that drops events
//! cannot fail the operation that produced them.
//!
//! Events are only emitted for operations that succeeded. A rejected
//! deposit produces nothing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::asset::AssetId;
use crate::identity::ParticipantId;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A completed ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Funds were pulled into custody and credited.
    DepositCompleted {
        participant: ParticipantId,
        asset: AssetId,
        amount: u64,
    },
    /// Funds were debited and pushed out of custody.
    WithdrawCompleted {
        participant: ParticipantId,
        asset: AssetId,
        amount: u64,
    },
    /// An asset type joined the allow-list.
    AssetAllowed { asset: AssetId },
    /// The ledger stopped accepting deposits and withdrawals.
    Paused { by: ParticipantId },
    /// The ledger resumed normal operation.
    Unpaused { by: ParticipantId },
    /// Administrative authority moved to a new holder.
    AuthorityTransferred {
        previous: ParticipantId,
        new: ParticipantId,
    },
}

impl LedgerEvent {
    /// Short machine-readable name, matches the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::DepositCompleted { .. } => "deposit_completed",
            LedgerEvent::WithdrawCompleted { .. } => "withdraw_completed",
            LedgerEvent::AssetAllowed { .. } => "asset_allowed",
            LedgerEvent::Paused { .. } => "paused",
            LedgerEvent::Unpaused { .. } => "unpaused",
            LedgerEvent::AuthorityTransferred { .. } => "authority_transferred",
        }
    }
}

/// Envelope carrying an event to its sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification ID.
    pub id: Uuid,
    /// When the ledger emitted the event.
    pub emitted_at: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub event: LedgerEvent,
}

impl Notification {
    /// Wraps `event` with a fresh ID and the current time.
    pub fn new(event: LedgerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            event,
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Fire-and-forget destination for notifications.
pub trait NotificationSink {
    /// Delivers one notification. Must not panic and cannot fail.
    fn emit(&self, notification: Notification);
}

impl<T: NotificationSink + ?Sized> NotificationSink for Box<T> {
    fn emit(&self, notification: Notification) {
        (**self).emit(notification)
    }
}

impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    fn emit(&self, notification: Notification) {
        (**self).emit(notification)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn emit(&self, _notification: Notification) {}
}

/// Writes one structured log line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, notification: Notification) {
        tracing::info!(
            id = %notification.id,
            kind = notification.event.kind(),
            event = ?notification.event,
            "ledger notification"
        );
    }
}

/// Records notifications in memory. Clones share the same buffer, so a test
/// can keep one handle and give the other to the ledger.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    recorded: Arc<Mutex<Vec<Notification>>>,
}

impl MemorySink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, oldest first.
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.recorded
            .lock()
            .iter()
            .map(|n| n.event.clone())
            .collect()
    }

    /// Number of recorded notifications.
    pub fn len(&self) -> usize {
        self.recorded.lock().len()
    }

    /// `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.recorded.lock().is_empty()
    }

    /// Drops everything recorded so far.
    pub fn clear(&self) {
        self.recorded.lock().clear();
    }
}

impl NotificationSink for MemorySink {
    fn emit(&self, notification: Notification) {
        self.recorded.lock().push(notification);
    }
}

/// Fans one notification out to several sinks, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn NotificationSink + Send + Sync>>,
}

impl FanoutSink {
    /// Creates a fan-out with no targets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target sink.
    pub fn with<S: NotificationSink + Send + Sync + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl NotificationSink for FanoutSink {
    fn emit(&self, notification: Notification) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(notification.clone());
            }
            last.emit(notification);
        }
    }
}
