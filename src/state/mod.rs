//! State container for the unread map.
//!
//! All reads and writes of the feed-id → count mapping pass through
//! [`StateContainer`]. Writers replace the whole snapshot atomically and
//! subscribers are told about every replacement.

mod container;

pub use container::StateContainer;
