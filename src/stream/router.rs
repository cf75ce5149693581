//! Message router: registry of processors, subscription fan-out and dispatch.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;

use super::handler::Handler;
use super::interest::{ActiveTracker, SubTypeSet};
use super::processor::{ExceptionProcessor, Processor};
use super::shape::Shapes;
use super::types::request::Method;
use crate::Result;
use crate::error::Error;
use crate::types::SubType;
use crate::ws::{MessageHandler, RequestSender};

/// Routes subscriptions to processors and inbound pushes to handlers.
///
/// The registry is fixed at construction. A processor becomes active with its
/// first handler and stays active; only active processors see inbound pushes.
pub struct Router {
    processors: Vec<Processor>,
    active: ActiveTracker,
    /// First successful lookup per subtype, as an index into `processors`
    cache: DashMap<SubType, usize>,
    exceptions: ExceptionProcessor,
}

impl Router {
    #[must_use]
    pub fn new(processors: Vec<Processor>) -> Self {
        Self {
            processors,
            active: ActiveTracker::new(),
            cache: DashMap::new(),
            exceptions: ExceptionProcessor::new(),
        }
    }

    /// Register a handler with the first processor that supports it.
    ///
    /// Exception handlers go to the exception processor. Returns `false` if no
    /// processor claims the handler.
    pub fn register(&self, handler: Handler) -> bool {
        if self.exceptions.supports_handler(&handler) {
            return self.exceptions.add_handler(handler);
        }

        let Some(processor) = self
            .processors
            .iter()
            .find(|processor| processor.supports_handler(&handler))
        else {
            #[cfg(feature = "tracing")]
            tracing::warn!(?handler, "No processor supports handler");
            return false;
        };

        let subtype = processor.subtype();
        if processor.add_handler(handler) {
            self.active.add(subtype);
            true
        } else {
            false
        }
    }

    /// The processor responsible for `subtype`.
    pub fn processor(&self, subtype: SubType) -> Result<&Processor> {
        if let Some(processor) = self
            .cache
            .get(&subtype)
            .and_then(|index| self.processors.get(*index))
        {
            return Ok(processor);
        }

        let (index, processor) = self
            .processors
            .iter()
            .enumerate()
            .find(|(_, processor)| processor.supports_subtype(subtype))
            .ok_or_else(|| Error::unsupported_subtype(subtype.to_string()))?;
        self.cache.insert(subtype, index);

        Ok(processor)
    }

    #[must_use]
    pub fn is_active(&self, subtype: SubType) -> bool {
        self.active.is_active(subtype)
    }

    #[must_use]
    pub fn active(&self) -> SubTypeSet {
        self.active.get()
    }

    /// Expand `shapes`, send one `method` request per primitive concurrently
    /// and return each stream name with its outcome, in expansion order.
    ///
    /// Every shape is expanded and every stream name validated before the first
    /// request is sent.
    pub(crate) async fn fan_out(
        &self,
        sender: &dyn RequestSender,
        method: Method,
        shapes: Shapes,
    ) -> Result<Vec<(String, Result<Value>)>> {
        let mut planned = Vec::new();
        for param in shapes.expand()? {
            let processor = self.processor(param.subtype)?;
            let stream = processor.stream_name(&param.args)?;
            planned.push((processor, stream, param));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%method, requests = planned.len(), "Sending stream requests");

        let requests = planned.into_iter().map(|(processor, stream, param)| async move {
            let outcome = processor.subscribe_param(sender, method, &param).await;
            (stream, outcome)
        });

        Ok(join_all(requests).await)
    }

    /// Subscribe to every stream `shapes` expands to.
    ///
    /// All requests are sent concurrently. Once every one of them settled, the
    /// replies are returned in expansion order, or the first error is.
    pub async fn subscribe<S: Into<Shapes>>(
        &self,
        sender: &dyn RequestSender,
        shapes: S,
    ) -> Result<Vec<Value>> {
        self.fan_out(sender, Method::Subscribe, shapes.into())
            .await?
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect()
    }

    /// Unsubscribe from every stream `shapes` expands to.
    pub async fn unsubscribe<S: Into<Shapes>>(
        &self,
        sender: &dyn RequestSender,
        shapes: S,
    ) -> Result<Vec<Value>> {
        self.fan_out(sender, Method::Unsubscribe, shapes.into())
            .await?
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect()
    }

    /// Offer `message` to every active processor.
    ///
    /// Each claiming processor dispatches independently; a failure is handed
    /// to the exception processor and does not keep the others from running.
    pub async fn dispatch(&self, message: Value) {
        let active = self.active.get();

        for processor in &self.processors {
            if !active.contains(processor.subtype().into()) {
                continue;
            }
            let Some(payload) = processor.is_message_type(&message) else {
                continue;
            };

            if let Err(e) = processor.dispatch(payload).await {
                self.exceptions.dispatch(e).await;
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(Processor::registry())
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("processors", &self.processors)
            .field("active", &self.active.get())
            .field("exceptions", &self.exceptions)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageHandler for Router {
    async fn on_message(&self, message: Value) {
        self.dispatch(message).await;
    }
}
