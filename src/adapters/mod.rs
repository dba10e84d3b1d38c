//! Ready-made collaborator implementations.

mod memory;

pub use memory::{MemoryError, MemorySink, MemorySource, RecordingDirtyMarker};
