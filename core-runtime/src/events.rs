//! # Event Bus System
//!
//! Typed broadcast events for the catalog core, built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Background work never returns to the caller that started it: a bulk
//! transfer runs on its own task and each cover freshness worker loops until
//! stopped. Both report what they do by emitting [`CoreEvent`]s, and the host
//! (or a test) subscribes to observe them.
//!
//! ```text
//! ┌──────────────────┐   emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ TransferCoord.   ├─────────>│           ├────────────>│ Host UI    │
//! └──────────────────┘          │ EventBus  │             └────────────┘
//! ┌──────────────────┐   emit   │           │  subscribe  ┌────────────┐
//! │ Freshness worker ├─────────>│           ├────────────>│ Test probe │
//! └──────────────────┘          └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use bridge_traits::MediaKind;
//! use core_runtime::events::{CoreEvent, EventBus, FreshnessEvent};
//!
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//! bus.emit(CoreEvent::Freshness(FreshnessEvent::Checked {
//!     kind: MediaKind::Books,
//!     item_id: "b1".to_string(),
//! }))
//! .ok();
//! assert!(rx.try_recv().is_ok());
//! ```

use bridge_traits::MediaKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, SendError};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Bulk import/export lifecycle
    Transfer(TransferEvent),
    /// Cover freshness worker activity
    Freshness(FreshnessEvent),
    /// Catalog content changes
    Catalog(CatalogEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Transfer(e) => e.description(),
            CoreEvent::Freshness(e) => e.description(),
            CoreEvent::Catalog(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Transfer(TransferEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Freshness(FreshnessEvent::CheckFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Transfer(TransferEvent::Completed { .. })
            | CoreEvent::Transfer(TransferEvent::Cancelled { .. }) => EventSeverity::Info,
            CoreEvent::Freshness(FreshnessEvent::CoverRefreshed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Transfer Events
// ============================================================================

/// Counters carried by terminal transfer events.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferTally {
    pub imported: u64,
    pub already_exists: u64,
    pub missing: u64,
    pub manually_added: u64,
    pub exported: u64,
}

/// Events emitted by bulk import/export jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TransferEvent {
    Started {
        job_id: String,
        kind: MediaKind,
        /// "import" or "export"
        direction: String,
        /// Index the run starts from; non-zero for resumed jobs.
        cursor: u64,
    },
    Progress {
        job_id: String,
        kind: MediaKind,
        processed: u64,
        total: u64,
    },
    Completed {
        job_id: String,
        kind: MediaKind,
        tally: TransferTally,
    },
    Cancelled {
        job_id: String,
        kind: MediaKind,
        /// Cursor at the time of cancellation; resume continues from here.
        cursor: u64,
        tally: TransferTally,
    },
    Failed {
        job_id: String,
        kind: MediaKind,
        message: String,
    },
}

impl TransferEvent {
    fn description(&self) -> &str {
        match self {
            TransferEvent::Started { .. } => "Transfer started",
            TransferEvent::Progress { .. } => "Transfer in progress",
            TransferEvent::Completed { .. } => "Transfer completed",
            TransferEvent::Cancelled { .. } => "Transfer cancelled",
            TransferEvent::Failed { .. } => "Transfer failed",
        }
    }
}

// ============================================================================
// Freshness Events
// ============================================================================

/// Events emitted by the cover freshness workers, one per processed id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum FreshnessEvent {
    /// Remote probed; cover was already current.
    Checked { kind: MediaKind, item_id: String },
    /// Id dequeued but not probed.
    Skipped {
        kind: MediaKind,
        item_id: String,
        reason: SkipReason,
    },
    /// Remote was newer; cover re-downloaded and timestamp updated.
    CoverRefreshed {
        kind: MediaKind,
        item_id: String,
        last_modified: i64,
    },
    /// Probe or refresh failed; the worker moved on.
    CheckFailed {
        kind: MediaKind,
        item_id: String,
        message: String,
    },
}

/// Why a dequeued id was not probed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CoolingDown,
    NotFound,
    NoTimestamp,
    NoCover,
}

impl FreshnessEvent {
    fn description(&self) -> &str {
        match self {
            FreshnessEvent::Checked { .. } => "Cover is current",
            FreshnessEvent::Skipped { .. } => "Freshness check skipped",
            FreshnessEvent::CoverRefreshed { .. } => "Cover refreshed",
            FreshnessEvent::CheckFailed { .. } => "Freshness check failed",
        }
    }

    pub fn item_id(&self) -> &str {
        match self {
            FreshnessEvent::Checked { item_id, .. }
            | FreshnessEvent::Skipped { item_id, .. }
            | FreshnessEvent::CoverRefreshed { item_id, .. }
            | FreshnessEvent::CheckFailed { item_id, .. } => item_id,
        }
    }
}

// ============================================================================
// Catalog Events
// ============================================================================

/// Events related to catalog content changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CatalogEvent {
    ItemAdded {
        kind: MediaKind,
        item_id: String,
        title: String,
        manual: bool,
    },
    ItemUpdated { kind: MediaKind, item_id: String },
    ItemDeleted { kind: MediaKind, item_id: String },
}

impl CatalogEvent {
    fn description(&self) -> &str {
        match self {
            CatalogEvent::ItemAdded { .. } => "Item added",
            CatalogEvent::ItemUpdated { .. } => "Item updated",
            CatalogEvent::ItemDeleted { .. } => "Item deleted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers, or an error when nobody is subscribed.
    /// Emitters in this workspace ignore that error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let transfers = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Transfer(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event accepted by the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every sender is dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            match &self.filter {
                Some(filter) if !filter(&event) => continue,
                _ => return Ok(event),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
