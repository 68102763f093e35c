//! Shared types for the HTTP layer.

use std::sync::Arc;

use crate::core_state::CoreState;

/// State handed to every handler and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }
}

/// Request id assigned by the access middleware, available to handlers
/// through request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);
