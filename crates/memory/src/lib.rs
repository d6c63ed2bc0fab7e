//! Long-term memory collaborators for Taskforge.
//!
//! Both implement `taskforge_core::MemoryRetriever`.

pub mod in_memory;
pub mod noop;

pub use in_memory::InMemoryRetriever;
pub use noop::NoopRetriever;
