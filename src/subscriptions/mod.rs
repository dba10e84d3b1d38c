//! Subscription system for unread aggregates.
//!
//! Two kinds of observers are supported:
//! - Aggregate callbacks, invoked synchronously with the summed unread
//!   total on every change to the map
//! - Event subscribers, fed persistence outcomes over bounded channels
//!   with slow-subscriber dropping
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(|total| println!("{} unread", total), true);
//!
//! let events = store.subscribe_events_with(EventConfig::default())?;
//! while let Ok(event) = events.recv() {
//!     if let StoreEvent::PersistFailed { entries, error, .. } = event {
//!         eprintln!("not durable: {:?} ({})", entries, error);
//!     }
//! }
//!
//! handle.unsubscribe();
//! ```

mod aggregate;
mod manager;
mod types;

pub use aggregate::{AggregateMode, Aggregator};
pub use manager::SubscriptionManager;
pub use types::{
    AggregateCallback, DropReason, EventConfig, EventHandle, StoreEvent, SubscriptionHandle,
    SubscriptionId,
};
