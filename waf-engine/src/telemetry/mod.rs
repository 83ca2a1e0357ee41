//! Bounded live log of decisions

pub mod stream;
pub mod subscription;

pub use stream::{TelemetryStream, DEFAULT_CAPACITY};
pub use subscription::{Subscription, DEFAULT_BACKLOG};
