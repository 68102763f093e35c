//! API endpoint handlers, one module per surface.

pub mod docker;
pub mod engine;
pub mod events;
pub mod extraction;
pub mod health;
