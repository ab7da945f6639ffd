//! Shared domain and wire types for the SynergyPark messaging core.

pub mod api;
pub mod draft;
pub mod events;
pub mod models;
