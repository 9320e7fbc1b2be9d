//! Job handlers
//!
//! A [`JobHandler`] executes the payload of a claimed job. Plain async closures
//! are handlers, and a [`HandlerRegistry`] dispatches on the payload kind to
//! per-kind handlers registered before the scheduler starts.

use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::cancel::Cancellation;
use crate::domain::payload::{JobKind, Payload};

/// Executes job payloads
///
/// Called once per claimed attempt. The same logical job may be handled more
/// than once (retries, lease loss), so handlers must tolerate repeats.
/// `cancel` fires on scheduler shutdown or when the lease is lost.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, cancel: Cancellation, payload: Payload) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Cancellation, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, cancel: Cancellation, payload: Payload) -> anyhow::Result<()> {
        (self)(cancel, payload).await
    }
}

/// Dispatches payloads to handlers by kind
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a typed job
    ///
    /// The payload data is deserialized as `J` before the handler runs; data
    /// that does not fit `J` fails the attempt.
    pub fn register<J, F, Fut>(self, handler: F) -> Self
    where
        J: JobKind,
        F: Fn(Cancellation, J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register_raw(J::KIND, move |cancel: Cancellation, payload: Payload| {
            let handler = Arc::clone(&handler);
            async move {
                let job = payload
                    .to_job::<J>()
                    .with_context(|| format!("Invalid payload for job kind '{}'", J::KIND))?;
                handler(cancel, job).await
            }
        })
    }

    /// Registers a handler receiving the raw payload of `kind`
    ///
    /// A later registration for the same kind replaces the earlier one.
    pub fn register_raw(mut self, kind: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        self.handlers.insert(kind.into(), Arc::new(handler));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds in no particular order
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl JobHandler for HandlerRegistry {
    async fn handle(&self, cancel: Cancellation, payload: Payload) -> anyhow::Result<()> {
        let Some(handler) = self.handlers.get(&payload.kind) else {
            anyhow::bail!("No handler registered for job kind '{}'", payload.kind);
        };
        handler.handle(cancel, payload).await
    }
}
