//! Offline-first synchronization: write path, reconciler and scheduler.

mod clock;
mod connectivity;
mod coordinator;
mod engine;
mod error;
mod identity;
mod records;
mod scheduler;
mod watermark;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::*;
pub use connectivity::*;
pub use coordinator::*;
pub use engine::*;
pub use error::*;
pub use identity::*;
pub use records::*;
pub use scheduler::*;
pub use watermark::*;
