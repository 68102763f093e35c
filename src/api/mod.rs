//! HTTP surface of the front door.
//!
//! The router is composable: `frontdoor_router()` returns a `Router` that
//! can be mounted on any axum server instance, and `start_server_on()`
//! runs it on a bound address.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod stream;
pub mod types;

pub use router::frontdoor_router;
pub use server::{start_server_on, FrontdoorServer, FrontdoorSession, ServerError};
pub use types::ApiContext;
