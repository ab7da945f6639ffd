//! HTTP surface over the messaging engine.

pub mod conversations;
pub mod error;
pub mod live;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod routes;
pub mod state;
