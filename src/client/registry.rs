//! Handler registry and dispatch
//!
//! Handlers are grouped by subscription pattern. Patterns keep their
//! first-registration order and handlers keep registration order, so a
//! dispatch pass is deterministic. Every invocation is isolated: an error or
//! a panic in one handler is logged and the pass continues.

use crate::dispatch_span;
use crate::protocol::{topics, InboundMessage, Message, Payload, TopicError};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, Instrument};

/// Error a handler may return; logged, never propagated
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// Callback invoked for each message matching its pattern
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, message: Message) -> HandlerResult {
        (self)(message).await
    }
}

/// Token identifying one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Outcome of [`HandlerRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: HandlerId,
    /// First handler for this pattern; the caller must subscribe to it
    pub newly_created: bool,
}

/// Summary of one dispatch pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched_patterns: usize,
    pub invoked: usize,
    pub failed: usize,
}

struct HandlerEntry {
    id: HandlerId,
    handler: Arc<dyn MessageHandler>,
}

struct PatternEntry {
    pattern: String,
    handlers: Vec<HandlerEntry>,
}

#[derive(Default)]
pub struct HandlerRegistry {
    patterns: RwLock<Vec<PatternEntry>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler under `pattern`
    pub async fn register(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Registration, TopicError> {
        topics::validate_pattern(pattern)?;

        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = HandlerEntry { id, handler };

        let mut patterns = self.patterns.write().await;
        let newly_created = match patterns.iter_mut().find(|p| p.pattern == pattern) {
            Some(existing) => {
                existing.handlers.push(entry);
                false
            }
            None => {
                patterns.push(PatternEntry {
                    pattern: pattern.to_string(),
                    handlers: vec![entry],
                });
                true
            }
        };

        debug!(pattern, ?id, newly_created, "Handler registered");
        Ok(Registration { id, newly_created })
    }

    /// Remove exactly the handler `id` from `pattern`
    ///
    /// Returns false when nothing matched. The pattern itself stays known, even
    /// when it has no handlers left, until [`remove_pattern`](Self::remove_pattern).
    pub async fn unregister(&self, pattern: &str, id: HandlerId) -> bool {
        let mut patterns = self.patterns.write().await;
        let Some(entry) = patterns.iter_mut().find(|p| p.pattern == pattern) else {
            return false;
        };

        match entry.handlers.iter().position(|h| h.id == id) {
            Some(index) => {
                entry.handlers.remove(index);
                debug!(pattern, ?id, "Handler removed");
                true
            }
            None => false,
        }
    }

    /// Forget a pattern and all of its handlers
    pub async fn remove_pattern(&self, pattern: &str) -> bool {
        let mut patterns = self.patterns.write().await;
        let before = patterns.len();
        patterns.retain(|p| p.pattern != pattern);
        patterns.len() != before
    }

    pub async fn clear(&self) {
        self.patterns.write().await.clear();
    }

    /// Known patterns in first-registration order
    pub async fn patterns(&self) -> Vec<String> {
        self.patterns
            .read()
            .await
            .iter()
            .map(|p| p.pattern.clone())
            .collect()
    }

    pub async fn contains(&self, pattern: &str) -> bool {
        self.patterns
            .read()
            .await
            .iter()
            .any(|p| p.pattern == pattern)
    }

    pub async fn handler_count(&self, pattern: &str) -> usize {
        self.patterns
            .read()
            .await
            .iter()
            .find(|p| p.pattern == pattern)
            .map_or(0, |p| p.handlers.len())
    }

    /// Snapshot of the handlers matching `topic`, in dispatch order
    async fn resolve(&self, topic: &str) -> Vec<(String, Vec<Arc<dyn MessageHandler>>)> {
        self.patterns
            .read()
            .await
            .iter()
            .filter(|p| topics::matches(&p.pattern, topic))
            .map(|p| {
                let handlers = p.handlers.iter().map(|h| h.handler.clone()).collect();
                (p.pattern.clone(), handlers)
            })
            .collect()
    }

    /// Deliver one inbound message to every matching handler
    pub async fn dispatch(&self, inbound: InboundMessage) -> DispatchReport {
        let span = dispatch_span!(topic = %inbound.topic);
        self.dispatch_inner(inbound).instrument(span).await
    }

    async fn dispatch_inner(&self, inbound: InboundMessage) -> DispatchReport {
        let matched = self.resolve(&inbound.topic).await;
        let mut report = DispatchReport {
            matched_patterns: matched.len(),
            ..Default::default()
        };

        if matched.iter().all(|(_, handlers)| handlers.is_empty()) {
            debug!(topic = %inbound.topic, "No handlers registered for topic");
            return report;
        }

        let payload = Payload::decode(&inbound.payload);
        if payload.is_raw() {
            debug!(topic = %inbound.topic, "Payload is not JSON, delivering raw bytes");
        }

        for (pattern, handlers) in matched {
            for handler in handlers {
                let message = Message {
                    topic: inbound.topic.clone(),
                    pattern: pattern.clone(),
                    payload: payload.clone(),
                    received_at: inbound.received_at,
                };

                report.invoked += 1;
                let outcome = AssertUnwindSafe(handler.handle(message))
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        report.failed += 1;
                        error!(topic = %inbound.topic, pattern = %pattern, error = %e, "Handler failed");
                    }
                    Err(panic) => {
                        report.failed += 1;
                        error!(
                            topic = %inbound.topic,
                            pattern = %pattern,
                            panic = panic_message(panic.as_ref()),
                            "Handler panicked"
                        );
                    }
                }
            }
        }

        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Drain the inbound queue, one dispatch pass at a time
pub async fn run_dispatcher(
    registry: Arc<HandlerRegistry>,
    mut inbound: mpsc::Receiver<InboundMessage>,
) {
    debug!("Dispatcher started");
    while let Some(message) = inbound.recv().await {
        registry.dispatch(message).await;
    }
    debug!("Dispatcher stopped");
}
