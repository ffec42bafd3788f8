//! Domain models for the clinic record mirror.

mod catalog;
mod collection;
mod encounter;
mod patient;
mod record;
mod timestamp;

pub use catalog::*;
pub use collection::*;
pub use encounter::*;
pub use patient::*;
pub use record::*;
pub use timestamp::*;
