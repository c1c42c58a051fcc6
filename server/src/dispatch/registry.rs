use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use super::{HandlerContext, HandlerResponse};
use crate::error::Result;
use crate::routing::{HandlerRef, RouteConfigError, RouteTable};

pub type HandlerFuture = BoxFuture<'static, Result<HandlerResponse>>;
pub type Handler = Arc<dyn Fn(HandlerContext) -> HandlerFuture + Send + Sync>;

/// `Controller@method` → async handler, populated once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerRef, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, handler_ref: &str, handler: F) -> std::result::Result<(), RouteConfigError>
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerResponse>> + Send + 'static,
    {
        let handler_ref = HandlerRef::parse(handler_ref)?;
        if self.handlers.contains_key(&handler_ref) {
            return Err(RouteConfigError::DuplicateHandler(handler_ref.to_string()));
        }

        let handler: Handler = Arc::new(move |ctx| handler(ctx).boxed());
        self.handlers.insert(handler_ref, handler);
        Ok(())
    }

    pub fn resolve(&self, handler_ref: &HandlerRef) -> Option<Handler> {
        self.handlers.get(handler_ref).cloned()
    }

    pub fn contains(&self, handler_ref: &HandlerRef) -> bool {
        self.handlers.contains_key(handler_ref)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Every route must point at a registered handler.
    pub fn validate(&self, table: &RouteTable) -> std::result::Result<(), RouteConfigError> {
        for (pattern, route) in table.all_routes() {
            if !self.contains(&route.handler_ref) {
                return Err(RouteConfigError::UnknownHandler {
                    pattern: pattern.to_string(),
                    handler: route.handler_ref.to_string(),
                });
            }
        }
        Ok(())
    }
}
