//! Bounded-concurrency batch execution with per-element retry.
//!
//! [`run_batch`] renders and sends one request per argument map. All
//! elements run as futures on the caller's task; a counting semaphore gates
//! the remote call itself, so at most `concurrency_limit` calls are in
//! flight at once. Each element retries independently and never aborts its
//! siblings. Results come back in input order.

use crate::backend::{BackoffConfig, CompletionResponse};
use crate::definition::PromptFunction;
use crate::error::{PromptError, Result};
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::template::Args;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Policy for one batch call.
///
/// # Example
///
/// ```
/// use llm_prompt_batch::batch::BatchOptions;
/// use std::time::Duration;
///
/// let options = BatchOptions::default()
///     .with_concurrency_limit(4)
///     .with_num_retries(1)
///     .with_timeout(Duration::from_secs(300));
/// assert_eq!(options.concurrency_limit, 4);
/// ```
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum number of in-flight remote calls. Must be positive. Default: 10.
    pub concurrency_limit: usize,
    /// Retries after the first attempt, per element. Default: 3.
    pub num_retries: u32,
    /// Deadline for the whole batch, not for each call. Default: none.
    pub timeout: Option<Duration>,
    /// Delay between attempts. Default: immediate retry.
    pub backoff: BackoffConfig,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            num_retries: 3,
            timeout: None,
            backoff: BackoffConfig::immediate(),
        }
    }
}

impl BatchOptions {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_num_retries(mut self, retries: u32) -> Self {
        self.num_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Lifecycle of one batch element.
///
/// `Pending -> InFlight -> (Succeeded | RetryPending -> InFlight ... | FailedPermanently)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Pending,
    InFlight,
    RetryPending,
    Succeeded,
    FailedPermanently,
}

impl TaskState {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::FailedPermanently)
    }
}

/// One element of a batch, owned exclusively by its own execution path.
#[derive(Debug)]
struct BatchTask {
    index: usize,
    args: Args,
    state: TaskState,
    attempts: u64,
}

impl BatchTask {
    fn new(index: usize, args: Args) -> Self {
        Self {
            index,
            args,
            state: TaskState::Pending,
            attempts: 0,
        }
    }
}

/// State shared by every task of one batch call.
struct Shared<'a> {
    function: &'a PromptFunction,
    ctx: &'a ExecCtx,
    options: &'a BatchOptions,
    gate: Semaphore,
    completed: AtomicUsize,
    total: usize,
}

/// Run `function` once per element of `batch_args`.
///
/// Returns one slot per input, in input order: `Some(response)` on success,
/// `None` once an element has failed `num_retries + 1` attempts. Render and
/// service errors are both retried and never escape as errors.
///
/// The batch as a whole fails only when it cannot start
/// ([`PromptError::InvalidConfig`] for a zero concurrency limit, or the
/// definition's own validation error) or when `timeout` elapses
/// ([`PromptError::BatchTimeout`]). On timeout every in-flight call is
/// dropped and no partial results are returned.
pub async fn run_batch(
    function: &PromptFunction,
    ctx: &ExecCtx,
    batch_args: Vec<Args>,
    options: &BatchOptions,
) -> Result<Vec<Option<CompletionResponse>>> {
    if options.concurrency_limit == 0 {
        return Err(PromptError::InvalidConfig(
            "concurrency_limit must be positive".to_string(),
        ));
    }
    function.validate()?;

    let total = batch_args.len();
    let shared = Shared {
        function,
        ctx,
        options,
        gate: Semaphore::new(options.concurrency_limit),
        completed: AtomicUsize::new(0),
        total,
    };

    emit(
        &ctx.event_handler,
        Event::BatchStart {
            total,
            concurrency_limit: options.concurrency_limit,
        },
    );
    tracing::info!(
        total,
        concurrency_limit = options.concurrency_limit,
        num_retries = options.num_retries,
        "starting batch"
    );

    let mut results: Vec<Option<CompletionResponse>> = (0..total).map(|_| None).collect();

    let mut tasks: FuturesUnordered<_> = batch_args
        .into_iter()
        .enumerate()
        .map(|(index, args)| run_task(BatchTask::new(index, args), &shared))
        .collect();

    let collect = async {
        while let Some((index, outcome)) = tasks.next().await {
            results[index] = outcome;
        }
    };

    match options.timeout {
        Some(limit) => tokio::time::timeout(limit, collect).await.map_err(|_| {
            tracing::error!(?limit, "batch timed out");
            PromptError::BatchTimeout(limit)
        })?,
        None => collect.await,
    }

    let succeeded = results.iter().filter(|r| r.is_some()).count();
    emit(
        &ctx.event_handler,
        Event::BatchEnd {
            succeeded,
            failed: total - succeeded,
        },
    );
    Ok(results)
}

async fn run_task(
    mut task: BatchTask,
    shared: &Shared<'_>,
) -> (usize, Option<CompletionResponse>) {
    // u64 so that `u32::MAX` retries still allows `u32::MAX + 1` attempts
    let max_attempts = u64::from(shared.options.num_retries) + 1;
    let mut outcome = None;
    let mut last_error: Option<PromptError> = None;

    while task.attempts < max_attempts {
        if let Some(ref err) = last_error {
            let retry = u32::try_from(task.attempts - 1).unwrap_or(u32::MAX);
            let delay = shared.options.backoff.delay_after(retry, err);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        task.attempts += 1;

        match attempt(&mut task, shared).await {
            Ok(response) => {
                task.state = TaskState::Succeeded;
                outcome = Some(response);
                break;
            }
            Err(err) if task.attempts < max_attempts => {
                task.state = TaskState::RetryPending;
                tracing::warn!(
                    index = task.index,
                    attempt = task.attempts,
                    error = %err,
                    "batch element failed, retrying"
                );
                emit(
                    &shared.ctx.event_handler,
                    Event::TaskRetry {
                        index: task.index,
                        attempt: task.attempts,
                        reason: err.to_string(),
                    },
                );
                last_error = Some(err);
            }
            Err(err) => {
                task.state = TaskState::FailedPermanently;
                tracing::error!(
                    index = task.index,
                    retries = shared.options.num_retries,
                    error = %err,
                    "batch element failed after exhausting retries"
                );
            }
        }
    }

    debug_assert!(task.state.is_terminal());
    let completed = shared.completed.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!("Progress: {}/{} completed", completed, shared.total);
    emit(
        &shared.ctx.event_handler,
        Event::TaskEnd {
            index: task.index,
            ok: outcome.is_some(),
            attempts: task.attempts,
            completed,
            total: shared.total,
        },
    );
    (task.index, outcome)
}

/// One render-and-call attempt. The concurrency slot is held only around
/// the remote call.
async fn attempt(task: &mut BatchTask, shared: &Shared<'_>) -> Result<CompletionResponse> {
    let request = shared.function.render_request(&task.args)?;
    let _permit = shared
        .gate
        .acquire()
        .await
        .map_err(|e| PromptError::Other(e.to_string()))?;
    task.state = TaskState::InFlight;
    shared
        .ctx
        .backend
        .complete(&shared.ctx.client, &shared.ctx.base_url, &request)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MockBackend};
    use crate::error::{ArgumentViolation, Slot};
    use crate::events::FnEventHandler;
    use crate::request::RequestConfig;
    use async_trait::async_trait;
    use reqwest::Client;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Echoes the user message back; behaviour is keyed on that message.
    #[derive(Default)]
    struct ScriptedBackend {
        /// How many leading attempts fail, per user message.
        failures: HashMap<String, u32>,
        /// Latency per user message.
        latency: HashMap<String, Duration>,
        attempts: Mutex<HashMap<String, u32>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedBackend {
        fn attempts_for(&self, content: &str) -> u32 {
            self.attempts.lock().unwrap().get(content).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn complete(
            &self,
            _client: &Client,
            _base_url: &str,
            request: &RequestConfig,
        ) -> Result<CompletionResponse> {
            let content = request.messages.last().unwrap().content.clone();
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(content.clone()).or_insert(0);
                *n += 1;
                *n
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(d) = self.latency.get(&content) {
                tokio::time::sleep(*d).await;
            } else {
                tokio::task::yield_now().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if attempt <= self.failures.get(&content).copied().unwrap_or(0) {
                return Err(PromptError::Service(format!("{} attempt {}", content, attempt)));
            }
            Ok(CompletionResponse::new(200, json!({ "echo": content })))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn echo_function() -> PromptFunction {
        PromptFunction::new(RequestConfig::new("m"))
            .with_prompt_template("{{ item }}")
            .unwrap()
    }

    fn items(n: usize) -> Vec<Args> {
        (0..n)
            .map(|i| {
                let mut args = Args::new();
                args.insert("item".into(), json!(format!("item-{}", i)));
                args
            })
            .collect()
    }

    fn ctx_with(backend: Arc<dyn Backend>) -> ExecCtx {
        ExecCtx::builder("http://unused").backend(backend).build()
    }

    fn echo(result: &Option<CompletionResponse>) -> Option<&str> {
        result.as_ref().and_then(|r| r.body["echo"].as_str())
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let n = 8;
        let mut backend = ScriptedBackend::default();
        for i in 0..n {
            // later elements finish first
            backend.latency.insert(
                format!("item-{}", i),
                Duration::from_millis(((n - i) * 15) as u64),
            );
        }
        let ctx = ctx_with(Arc::new(backend));
        let results = echo_function()
            .run_batch(&ctx, items(n), &BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), n);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(echo(result), Some(format!("item-{}", i).as_str()));
        }
    }

    #[tokio::test]
    async fn test_order_with_mixed_failures() {
        let mut backend = ScriptedBackend::default();
        backend.failures.insert("item-1".into(), u32::MAX);
        backend.failures.insert("item-3".into(), u32::MAX);
        backend.latency.insert("item-0".into(), Duration::from_millis(40));
        let ctx = ctx_with(Arc::new(backend));

        let results = echo_function()
            .run_batch(&ctx, items(5), &BatchOptions::default().with_num_retries(1))
            .await
            .unwrap();

        let echoes: Vec<Option<&str>> = results.iter().map(echo).collect();
        assert_eq!(
            echoes,
            vec![Some("item-0"), None, Some("item-2"), None, Some("item-4")]
        );
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let n = 20;
        let k = 3;
        let mut backend = ScriptedBackend::default();
        for i in 0..n {
            backend
                .latency
                .insert(format!("item-{}", i), Duration::from_millis(10));
        }
        let backend = Arc::new(backend);
        let ctx = ctx_with(backend.clone());

        let results = echo_function()
            .run_batch(&ctx, items(n), &BatchOptions::default().with_concurrency_limit(k))
            .await
            .unwrap();

        assert!(results.iter().all(Option::is_some));
        let max = backend.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= k, "observed {} concurrent calls with limit {}", max, k);
        assert!(max >= 1);
    }

    #[tokio::test]
    async fn test_retry_law() {
        let retries = 3;
        let mut backend = ScriptedBackend::default();
        backend.failures.insert("item-0".into(), retries);
        backend.failures.insert("item-1".into(), retries + 1);
        let backend = Arc::new(backend);
        let ctx = ctx_with(backend.clone());

        let results = echo_function()
            .run_batch(&ctx, items(2), &BatchOptions::default().with_num_retries(retries))
            .await
            .unwrap();

        assert_eq!(echo(&results[0]), Some("item-0"));
        assert!(results[1].is_none());
        assert_eq!(backend.attempts_for("item-0"), retries + 1);
        assert_eq!(backend.attempts_for("item-1"), retries + 1);
    }

    #[tokio::test]
    async fn test_max_retries_first_success_calls_once() {
        let mock = Arc::new(MockBackend::fixed("ok"));
        let ctx = ctx_with(mock.clone());
        let results = echo_function()
            .run_batch(&ctx, items(1), &BatchOptions::default().with_num_retries(u32::MAX))
            .await
            .unwrap();
        assert!(results[0].is_some());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let mock = Arc::new(MockBackend::fixed("ok").with_failures(1));
        let ctx = ctx_with(mock.clone());
        let results = echo_function()
            .run_batch(&ctx, items(1), &BatchOptions::default().with_num_retries(0))
            .await
            .unwrap();
        assert!(results[0].is_none());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_render_error_is_local_to_element() {
        let f = PromptFunction::new(RequestConfig::new("m"))
            .with_prompt_template("{{ a }}-{{ b }}")
            .unwrap();
        let mut good = Args::new();
        good.insert("a".into(), json!("1"));
        good.insert("b".into(), json!("2"));
        let mut partial = Args::new();
        partial.insert("a".into(), json!("1"));

        let mock = Arc::new(MockBackend::fixed("ok"));
        let ctx = ctx_with(mock.clone());
        let results = f
            .run_batch(&ctx, vec![good.clone(), partial, good], &BatchOptions::default())
            .await
            .unwrap();

        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
        // the failing element never reached the backend
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_fails_whole_batch() {
        let mock = Arc::new(MockBackend::fixed("late").with_latency(Duration::from_secs(5)));
        let ctx = ctx_with(mock);
        let err = echo_function()
            .run_batch(
                &ctx,
                items(3),
                &BatchOptions::default().with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::BatchTimeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_timeout_not_hit() {
        let ctx = ctx_with(Arc::new(MockBackend::fixed("fast")));
        let results = echo_function()
            .run_batch(
                &ctx,
                items(4),
                &BatchOptions::default().with_timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(Option::is_some));
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let ctx = ctx_with(Arc::new(MockBackend::fixed("x")));
        let err = echo_function()
            .run_batch(&ctx, items(1), &BatchOptions::default().with_concurrency_limit(0))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_malformed_definition_fails_batch() {
        let f = PromptFunction::new(RequestConfig::new("m"))
            .with_system_message("literal")
            .with_system_message_template("{{ tone }}")
            .unwrap();
        let ctx = ctx_with(Arc::new(MockBackend::fixed("x")));
        let err = f
            .run_batch(&ctx, vec![Args::new()], &BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PromptError::InvalidArgumentCombination(ArgumentViolation::MutuallyExclusive(
                Slot::SystemMessage
            ))
        ));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let ctx = ctx_with(Arc::new(MockBackend::fixed("x")));
        let results = echo_function()
            .run_batch(&ctx, Vec::new(), &BatchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_progress_counts_each_element_once() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mock = MockBackend::fixed("ok").with_failures(2);
        let ctx = ExecCtx::builder("http://unused")
            .backend(Arc::new(mock))
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                sink.lock().unwrap().push(e)
            })))
            .build();

        echo_function()
            .run_batch(&ctx, items(5), &BatchOptions::default())
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let mut completed: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                Event::TaskEnd { completed, .. } => Some(*completed),
                _ => None,
            })
            .collect();
        completed.sort();
        assert_eq!(completed, vec![1, 2, 3, 4, 5]);

        let retries = events
            .iter()
            .filter(|e| matches!(e, Event::TaskRetry { .. }))
            .count();
        assert_eq!(retries, 2);
        assert!(matches!(events.first(), Some(Event::BatchStart { total: 5, .. })));
        assert!(matches!(
            events.last(),
            Some(Event::BatchEnd { succeeded: 5, failed: 0 })
        ));
    }

    #[tokio::test]
    async fn test_backoff_delay_between_attempts() {
        let mock = Arc::new(MockBackend::fixed("ok").with_failures(1));
        let ctx = ctx_with(mock.clone());
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(30),
            jitter: crate::backend::backoff::JitterStrategy::None,
            ..BackoffConfig::exponential()
        };
        let started = std::time::Instant::now();
        let results = echo_function()
            .run_batch(&ctx, items(1), &BatchOptions::default().with_backoff(backoff))
            .await
            .unwrap();
        assert!(results[0].is_some());
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(mock.calls(), 2);
    }

    #[test]
    fn test_batch_call_blocking() {
        let ctx = ctx_with(Arc::new(MockBackend::fixed("ok")));
        let results = echo_function()
            .batch_call(&ctx, items(3), &BatchOptions::default())
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_task_state_terminal() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::FailedPermanently.is_terminal());
        assert!(!TaskState::RetryPending.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
    }
}
