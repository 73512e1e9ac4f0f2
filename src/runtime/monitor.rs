//! Remote state change monitor
//!
//! Polls a status endpoint at a fixed interval until a caller-supplied
//! predicate accepts the response or the attempt budget runs out. The first
//! poll is issued immediately. Polls of one monitor are serialized: the next
//! interval tick is only awaited once the previous response has arrived, so
//! at most one status request per monitor is ever in flight.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use super::RuntimeConfig;
use super::error::{TransportError, TransportResult};
use super::transport::{RemoteClient, RemoteRequest, RemoteResponse};

/// Predicate deciding whether the remote change has been observed
pub type PollPredicate = Arc<dyn Fn(&RemoteResponse) -> bool + Send + Sync>;

/// Description of one polling sequence
#[derive(Clone)]
pub struct PollSpec {
    /// Status request issued on every tick
    pub request: RemoteRequest,
    /// Delay between ticks
    pub interval: Duration,
    /// Attempt budget; 0 means unbounded
    pub max_attempts: u32,
    /// Completion predicate
    pub predicate: PollPredicate,
}

impl PollSpec {
    /// Poll settings
    pub fn new<P>(request: RemoteRequest, interval: Duration, max_attempts: u32, predicate: P) -> Self
    where
        P: Fn(&RemoteResponse) -> bool + Send + Sync + 'static,
    {
        Self {
            request,
            interval,
            max_attempts,
            predicate: Arc::new(predicate),
        }
    }

    /// Poll settings using the configured interval and budget
    pub fn from_config<P>(request: RemoteRequest, config: &RuntimeConfig, predicate: P) -> Self
    where
        P: Fn(&RemoteResponse) -> bool + Send + Sync + 'static,
    {
        Self::new(request, config.poll_interval(), config.max_attempts, predicate)
    }
}

impl fmt::Debug for PollSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollSpec")
            .field("request", &self.request)
            .field("interval", &self.interval)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// How a polling sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDetection {
    /// The predicate accepted a response
    Observed,
    /// The attempt budget ran out first; the last response is reported anyway
    Exhausted,
}

/// Result of a finished polling sequence
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Last status response
    pub response: RemoteResponse,
    /// Number of status requests issued
    pub attempts: u32,
    /// Whether the change was actually observed
    pub detection: ChangeDetection,
}

/// Polling engine for one status endpoint
pub struct RemoteStateChangeMonitor {
    client: Arc<dyn RemoteClient>,
    spec: PollSpec,
    attempts: Arc<AtomicU32>,
}

impl RemoteStateChangeMonitor {
    /// Create a monitor; nothing is sent until [`watch`](Self::watch) or
    /// [`start`](Self::start).
    pub fn new(client: Arc<dyn RemoteClient>, spec: PollSpec) -> Self {
        Self {
            client,
            spec,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Status requests issued so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Poll until the predicate holds or the budget is exhausted.
    ///
    /// A failed request ends the sequence immediately; there is no retry.
    /// Dropping the returned future cancels any pending tick.
    pub async fn watch(&self) -> TransportResult<PollOutcome> {
        let period = self.spec.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;

            let response = match self.client.send(self.spec.request.clone()).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(request = %self.spec.request, attempt, "poll request failed: {err}");
                    return Err(err);
                }
            };

            if (self.spec.predicate)(&response) {
                tracing::debug!(request = %self.spec.request, attempt, "remote change observed");
                return Ok(PollOutcome {
                    response,
                    attempts: attempt,
                    detection: ChangeDetection::Observed,
                });
            }

            if self.spec.max_attempts > 0 && attempt >= self.spec.max_attempts {
                tracing::warn!(
                    request = %self.spec.request,
                    attempt,
                    "poll budget exhausted before the remote change was observed"
                );
                return Ok(PollOutcome {
                    response,
                    attempts: attempt,
                    detection: ChangeDetection::Exhausted,
                });
            }

            tracing::debug!(request = %self.spec.request, attempt, "remote state unchanged");
        }
    }

    /// Run the polling sequence on a background task and report through
    /// callbacks. Exactly one of `on_done`/`on_error` runs, unless the
    /// returned handle is stopped (or dropped) first.
    pub fn start<D, E>(self, on_done: D, on_error: E) -> MonitorHandle
    where
        D: FnOnce(PollOutcome) + Send + 'static,
        E: FnOnce(TransportError) + Send + 'static,
    {
        let shared = Arc::new(MonitorShared {
            stopped: AtomicBool::new(false),
            settled: AtomicBool::new(false),
            task: Mutex::new(None),
            attempts: self.attempts.clone(),
        });

        let task_shared = shared.clone();
        let task = tokio::spawn(async move {
            let result = self.watch().await;
            if !task_shared.settle() {
                return;
            }
            match result {
                Ok(outcome) => on_done(outcome),
                Err(err) => on_error(err),
            }
        });

        *shared.task.lock() = Some(task.abort_handle());
        MonitorHandle { shared }
    }
}

struct MonitorShared {
    stopped: AtomicBool,
    settled: AtomicBool,
    task: Mutex<Option<AbortHandle>>,
    attempts: Arc<AtomicU32>,
}

impl MonitorShared {
    /// Claim the right to report; false once stopped or already reported.
    fn settle(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && !self.settled.swap(true, Ordering::AcqRel)
    }
}

/// Handle to a monitor started with [`RemoteStateChangeMonitor::start`].
///
/// Dropping the handle stops the monitor.
pub struct MonitorHandle {
    shared: Arc<MonitorShared>,
}

impl MonitorHandle {
    /// Cancel the polling sequence. Idempotent, and safe to call from inside
    /// the completion callbacks.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Some(task) = self.shared.task.lock().take() {
            task.abort();
        }
    }

    /// Whether [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Whether a callback has run
    pub fn is_settled(&self) -> bool {
        self.shared.settled.load(Ordering::Acquire)
    }

    /// Status requests issued so far
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Acquire)
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::transport::Method;
    use futures::future::BoxFuture;
    use serde_json::{Value, json};
    use std::collections::VecDeque;

    /// Replays canned results; repeats the last one when the script runs out.
    struct Scripted {
        results: Mutex<VecDeque<TransportResult<RemoteResponse>>>,
        last: Mutex<Option<TransportResult<RemoteResponse>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(results: Vec<TransportResult<RemoteResponse>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                last: Mutex::new(None),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RemoteClient for Scripted {
        fn send(&self, _request: RemoteRequest) -> BoxFuture<'_, TransportResult<RemoteResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.results.lock().pop_front();
            let result = match next {
                Some(result) => {
                    *self.last.lock() = Some(result.clone());
                    result
                }
                None => self
                    .last
                    .lock()
                    .clone()
                    .unwrap_or_else(|| Ok(RemoteResponse::ok(Value::Null))),
            };
            Box::pin(async move { result })
        }
    }

    fn version(token: &str) -> TransportResult<RemoteResponse> {
        Ok(RemoteResponse::ok(json!(token)))
    }

    fn changed_from(old: &'static str) -> impl Fn(&RemoteResponse) -> bool + Send + Sync {
        move |response| response.body != json!(old)
    }

    fn spec(max_attempts: u32) -> PollSpec {
        PollSpec::new(
            RemoteRequest::new(Method::Get, "/api/object/obj-1/version"),
            Duration::from_millis(10),
            max_attempts,
            changed_from("v1"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_predicate_holds() {
        let client = Scripted::new(vec![version("v1"), version("v2"), version("v3")]);
        let monitor = RemoteStateChangeMonitor::new(client.clone(), spec(5));

        let outcome = monitor.watch().await.unwrap();
        assert_eq!(outcome.detection, ChangeDetection::Observed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.response.body, json!("v2"));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_and_reports_last_response() {
        let client = Scripted::new(vec![version("v1")]);
        let monitor = RemoteStateChangeMonitor::new(client.clone(), spec(4));

        let outcome = monitor.watch().await.unwrap();
        assert_eq!(outcome.detection, ChangeDetection::Exhausted);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_is_immediate_and_ticks_follow_interval() {
        let client = Scripted::new(vec![version("v1")]);
        let monitor = RemoteStateChangeMonitor::new(client.clone(), spec(0));
        let handle = monitor.start(|_| {}, |_| {});

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(client.calls(), 1);

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(client.calls(), 3);

        handle.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_is_not_retried() {
        let client = Scripted::new(vec![
            version("v1"),
            Err(TransportError::Network("reset".into())),
            version("v2"),
        ]);
        let monitor = RemoteStateChangeMonitor::new(client.clone(), spec(10));

        let err = monitor.watch().await.unwrap_err();
        assert_eq!(err, TransportError::Network("reset".into()));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn callbacks_fire_exactly_once() {
        let client = Scripted::new(vec![version("v1"), version("v2")]);
        let done = Arc::new(AtomicU32::new(0));
        let errors = Arc::new(AtomicU32::new(0));

        let done_count = done.clone();
        let error_count = errors.clone();
        let handle = RemoteStateChangeMonitor::new(client.clone(), spec(5)).start(
            move |outcome| {
                assert_eq!(outcome.attempts, 2);
                done_count.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                error_count.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.is_settled());
        handle.stop();
        handle.stop();

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_inside_callback_is_safe() {
        let client = Scripted::new(vec![version("v2")]);
        let slot: Arc<Mutex<Option<MonitorHandle>>> = Arc::new(Mutex::new(None));
        let done = Arc::new(AtomicU32::new(0));

        let callback_slot = slot.clone();
        let done_count = done.clone();
        let handle = RemoteStateChangeMonitor::new(client, spec(5)).start(
            move |_| {
                done_count.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = callback_slot.lock().take() {
                    handle.stop();
                }
            },
            |_| {},
        );
        *slot.lock() = Some(handle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_polling() {
        let client = Scripted::new(vec![version("v1")]);
        let handle = RemoteStateChangeMonitor::new(client.clone(), spec(0)).start(|_| {}, |_| {});
        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(handle);

        let before = client.calls();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.calls(), before);
    }
}
