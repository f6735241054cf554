//! Event system for call and batch lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe execution, most
//! usefully batch progress. Implement [`EventHandler`] to receive events
//! for logging, progress bars, or metrics.

use std::sync::Arc;

/// Events emitted during prompt execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A batch has started.
    BatchStart {
        /// Number of elements in the batch.
        total: usize,
        /// Maximum number of in-flight calls.
        concurrency_limit: usize,
    },
    /// A batch element failed an attempt and will be retried.
    TaskRetry {
        /// Input position of the element.
        index: usize,
        /// The retry attempt number (1-indexed).
        attempt: u64,
        /// Why the previous attempt failed.
        reason: String,
    },
    /// A batch element reached a terminal state.
    TaskEnd {
        /// Input position of the element.
        index: usize,
        /// `true` on success, `false` after exhausting retries.
        ok: bool,
        /// Total attempts made for this element.
        attempts: u64,
        /// Elements finished so far, this one included.
        completed: usize,
        /// Number of elements in the batch.
        total: usize,
    },
    /// A batch has finished (not emitted on timeout).
    BatchEnd {
        /// Number of elements that succeeded.
        succeeded: usize,
        /// Number of elements that exhausted their retries.
        failed: usize,
    },
}

/// Handler for execution events.
///
/// This is entirely optional -- execution works without an event handler.
///
/// # Example
///
/// ```
/// use llm_prompt_batch::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::TaskEnd { completed, total, .. } = event {
///             println!("Progress: {}/{} completed", completed, total);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when an event is emitted.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use llm_prompt_batch::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::TaskEnd { index, ok, .. } = event {
///         println!("element {} ok={}", index, ok);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
