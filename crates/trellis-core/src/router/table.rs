//! Dispatch table mapping `(topic, key)` to a handler.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::{TrellisError, TrellisResult};

/// Handles every envelope routed to one `(topic, key)`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> TrellisResult<()>;
}

/// Adapts an async closure over a decoded payload into an [`EventHandler`].
pub struct JsonHandler<T, F> {
    f: F,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> JsonHandler<T, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> EventHandler for JsonHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = TrellisResult<()>> + Send,
{
    async fn handle(&self, envelope: &Envelope) -> TrellisResult<()> {
        let payload: T = envelope.decode()?;
        (self.f)(payload).await
    }
}

/// What happened to one envelope.
#[derive(Debug)]
pub enum DispatchOutcome {
    Handled,
    /// No handler for `(topic, key)`.
    Ignored,
    /// The handler returned an error; the envelope is dropped.
    Failed(TrellisError),
}

/// Closed, statically built mapping from `(topic, key)` to handler.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<(String, String), Arc<dyn EventHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `(topic, key)`, replacing any earlier one.
    pub fn register(mut self, topic: &str, key: &str, handler: impl EventHandler + 'static) -> Self {
        let route = (topic.to_string(), key.to_string());
        if self.handlers.insert(route, Arc::new(handler)).is_some() {
            warn!(topic, key, "Handler replaced in dispatch table");
        }
        self
    }

    /// Register an async closure receiving the payload decoded as `T`.
    pub fn on_json<T, F, Fut>(self, topic: &str, key: &str, f: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TrellisResult<()>> + Send + 'static,
    {
        self.register(topic, key, JsonHandler::new(f))
    }

    /// Combine two tables. Routes in `other` win on conflict.
    pub fn merge(mut self, other: HandlerTable) -> Self {
        self.handlers.extend(other.handlers);
        self
    }

    pub fn get(&self, topic: &str, key: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&(topic.to_string(), key.to_string()))
    }

    /// Distinct topics with at least one route, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.handlers
            .keys()
            .map(|(topic, _)| topic.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every registered `(topic, key)`, sorted.
    pub fn routes(&self) -> Vec<(String, String)> {
        let mut routes: Vec<_> = self.handlers.keys().cloned().collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for `envelope`, if any. Never panics on bad input.
    pub async fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        let Some(handler) = self.get(envelope.topic(), envelope.key()) else {
            debug!(topic = %envelope.topic(), key = %envelope.key(), "No handler for envelope, ignoring");
            return DispatchOutcome::Ignored;
        };
        match handler.handle(envelope).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => DispatchOutcome::Failed(e),
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("routes", &self.routes())
            .finish()
    }
}
