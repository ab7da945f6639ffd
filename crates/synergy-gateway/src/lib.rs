//! Live messaging: identity, presence routing, typing indicators and the
//! engine that ties persistence to fan-out.

pub mod connection;
pub mod engine;
pub mod error;
pub mod identity;
pub mod retention;
pub mod router;
pub mod typing;

pub use engine::Engine;
pub use error::{MessagingError, Result};
