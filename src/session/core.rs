//! Connection session: one logical channel's full lifecycle.
//!
//! A [`ConnectionSession`] owns a state machine, a circuit breaker, a retry
//! scheduler, an outbound queue, a health monitor and a subscription table.
//! All lifecycle work (attempt loop, retry sleeps, event fan-out, heartbeat)
//! runs on one spawned task per `connect()`. Mutable state sits behind short
//! `parking_lot` locks that are never held across an `await`.
//!
//! # Cancellation
//!
//! Every `connect()` creates a fresh [`CancellationToken`] and bumps a
//! generation counter. `disconnect()` or a superseding `connect()` cancels
//! the token, which aborts an in-flight open, probe, call or retry sleep
//! immediately. State writes from a stale generation are ignored.
//!
//! # Example
//!
//! ```ignore
//! let session = ConnectionSession::new(
//!     SessionName::chat(),
//!     Url::parse("wss://example.com/hubs/chat")?,
//!     WebSocketConnector::new().shared(),
//!     SessionOptions::chat(),
//! )?;
//! session.set_credential(Some(Credential::new(token)));
//!
//! session.subscribe("ReceiveMessage", |payload| {
//!     println!("{payload}");
//!     Ok(())
//! });
//! session.connect().await?;
//! session.send("SendPrivateMessage", vec![json!("user-42"), json!("hi")]).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, interval_at, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::identifiers::{HandlerId, SessionName};
use crate::resilience::queue::drain;
use crate::resilience::{
    CircuitBreaker, CircuitState, Deduplicator, HealthMonitor, HealthObserver, OutboundQueue,
    RetryScheduler,
};
use crate::transport::{Channel, ChannelEvent, ChannelFactory, OpenedChannel};

use super::options::SessionOptions;
use super::state::{ConnectionState, SessionMetrics, SessionStatus};
use super::subscription::{
    ErrorHandler, EventHandler, HandlerRegistry, Route, StateHandler, SubscriptionTable,
    invoke_isolated,
};

// ============================================================================
// Types
// ============================================================================

/// Running lifecycle task.
struct Lifecycle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// State guarded by the session's core lock.
struct SessionCore {
    state: ConnectionState,
    breaker: CircuitBreaker,
    channel: Option<Arc<dyn Channel>>,
    lifecycle: Option<Lifecycle>,
    generation: u64,
}

impl SessionCore {
    /// State as reported to observers.
    fn reported_state(&self, now: Instant) -> ConnectionState {
        if self.state != ConnectionState::Disconnected
            && self.breaker.current_state(now) == CircuitState::Open
        {
            ConnectionState::CircuitOpen
        } else {
            self.state
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.state == ConnectionState::Connected
            && self.channel.is_some()
            && self.breaker.current_state(now) != CircuitState::Open
    }
}

/// Outcome of a connect cycle.
enum Cycle {
    Connected(OpenedChannel),
    Failed(Error),
    Cancelled,
}

/// Shared session internals.
pub(crate) struct SessionInner {
    name: SessionName,
    endpoint: Url,
    factory: Arc<dyn ChannelFactory>,
    options: SessionOptions,
    credential: Mutex<Option<Credential>>,
    core: Mutex<SessionCore>,
    queue: Mutex<OutboundQueue>,
    subscriptions: Mutex<SubscriptionTable>,
    dispatch_lock: ReentrantMutex<()>,
    state_handlers: Mutex<HandlerRegistry<StateHandler>>,
    error_handlers: Mutex<HandlerRegistry<ErrorHandler>>,
    state_tx: watch::Sender<ConnectionState>,
    metrics: Mutex<SessionMetrics>,
    last_health_check: Mutex<Option<SystemTime>>,
    dedup: Mutex<Option<Deduplicator>>,
    scheduler: Mutex<RetryScheduler>,
    /// Re-publishes the reported state once an open breaker allows a trial.
    recovery_timer: Mutex<Option<JoinHandle<()>>>,
    this: Weak<SessionInner>,
}

// ============================================================================
// ConnectionSession
// ============================================================================

/// Handle to one resilient logical channel.
///
/// Cheap to clone; all clones share the same session. Call
/// [`disconnect`](Self::disconnect) to stop the background task.
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("name", &self.inner.name)
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionSession - Constructor
// ============================================================================

impl ConnectionSession {
    /// Creates a disconnected session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` are invalid.
    pub fn new(
        name: SessionName,
        endpoint: Url,
        factory: Arc<dyn ChannelFactory>,
        options: SessionOptions,
    ) -> Result<Self> {
        options.validate()?;

        let scheduler = match options.retry_seed {
            Some(seed) => RetryScheduler::with_seed(options.retry.clone(), seed),
            None => RetryScheduler::new(options.retry.clone()),
        };
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new_cyclic(|this| SessionInner {
            endpoint,
            factory,
            credential: Mutex::new(None),
            core: Mutex::new(SessionCore {
                state: ConnectionState::Disconnected,
                breaker: CircuitBreaker::new(options.circuit),
                channel: None,
                lifecycle: None,
                generation: 0,
            }),
            queue: Mutex::new(OutboundQueue::new(
                options.queue_capacity,
                options.queue_max_attempts,
            )),
            subscriptions: Mutex::new(SubscriptionTable::new(options.event_buffer_capacity)),
            dispatch_lock: ReentrantMutex::new(()),
            state_handlers: Mutex::new(HandlerRegistry::default()),
            error_handlers: Mutex::new(HandlerRegistry::default()),
            state_tx,
            metrics: Mutex::new(SessionMetrics::default()),
            last_health_check: Mutex::new(None),
            dedup: Mutex::new(options.dedup.map(Deduplicator::new)),
            scheduler: Mutex::new(scheduler),
            recovery_timer: Mutex::new(None),
            this: this.clone(),
            name,
            options,
        });

        debug!(session = %inner.name, endpoint = %inner.endpoint, "Session created");
        Ok(Self { inner })
    }
}

// ============================================================================
// ConnectionSession - Accessors
// ============================================================================

impl ConnectionSession {
    /// Returns the session name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &SessionName {
        &self.inner.name
    }

    /// Returns the endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Returns the options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// Returns the reported state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().reported_state(Instant::now())
    }

    /// Returns `true` if a send would go straight to the transport.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.core.lock().is_ready(Instant::now())
    }

    /// Returns a point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let now = Instant::now();
        let (state, circuit_state, circuit_failures) = {
            let core = self.inner.core.lock();
            (
                core.reported_state(now),
                core.breaker.current_state(now),
                core.breaker.failure_count(),
            )
        };

        SessionStatus {
            name: self.inner.name.clone(),
            state,
            circuit_state,
            circuit_failures,
            queued_count: self.inner.queue.lock().len(),
            last_health_check: *self.inner.last_health_check.lock(),
            metrics: self.inner.metrics.lock().clone(),
        }
    }

    /// Subscribes to reported state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Returns the credential used by connection attempts.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.inner.credential.lock().clone()
    }

    /// Sets the credential used by future connection attempts.
    pub fn set_credential(&self, credential: Option<Credential>) {
        *self.inner.credential.lock() = credential;
    }
}

// ============================================================================
// ConnectionSession - Lifecycle
// ============================================================================

impl ConnectionSession {
    /// Connects, retrying per the session's policy.
    ///
    /// Resolves once the session is `Connected`. Supersedes any attempt
    /// cycle already running.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no credential is set
    /// - [`Error::CircuitOpen`] if the breaker refuses the attempt, or opens
    ///   during the cycle
    /// - [`Error::RetriesExhausted`] once the attempt budget is spent
    /// - [`Error::Disconnected`] if `disconnect()` interrupts the cycle
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;

        if inner.credential.lock().is_none() {
            return Err(Error::config(format!(
                "No credential set for session {}",
                inner.name
            )));
        }

        let (ready_rx, notify) = {
            let mut core = inner.core.lock();
            let now = Instant::now();

            if core.state == ConnectionState::Connected && core.channel.is_some() {
                return Ok(());
            }

            if !core.breaker.allows_attempt(now) {
                let retry_after = core.breaker.time_until_retry(now);
                debug!(session = %inner.name, retry_after_ms = retry_after.as_millis() as u64, "Connect refused by open circuit");
                return Err(Error::circuit_open(retry_after.as_millis() as u64));
            }

            if let Some(previous) = core.lifecycle.take() {
                debug!(session = %inner.name, "Superseding running connect cycle");
                previous.token.cancel();
            }
            if let Some(channel) = core.channel.take() {
                channel.close();
            }

            core.generation += 1;
            let generation = core.generation;
            let token = CancellationToken::new();
            let (ready_tx, ready_rx) = oneshot::channel();

            let handle = tokio::spawn(run_lifecycle(
                Arc::clone(inner),
                token.clone(),
                generation,
                ready_tx,
            ));
            core.lifecycle = Some(Lifecycle { token, handle });

            let notify = inner.transition(&mut core, ConnectionState::Connecting);
            (ready_rx, notify)
        };

        inner.notify_state(notify);
        info!(session = %inner.name, endpoint = %inner.endpoint, "Connecting");

        ready_rx.await.unwrap_or(Err(Error::Disconnected))
    }

    /// Disconnects. Idempotent; never fails.
    ///
    /// Cancels any running attempt or retry sleep, closes the channel and
    /// rejects every queued operation with [`Error::Disconnected`].
    pub async fn disconnect(&self) {
        let inner = &self.inner;

        let (lifecycle, channel, notify) = {
            let mut core = inner.core.lock();
            core.generation += 1;
            let lifecycle = core.lifecycle.take();
            let channel = core.channel.take();
            let notify = inner.transition(&mut core, ConnectionState::Disconnected);
            (lifecycle, channel, notify)
        };

        if let Some(lifecycle) = &lifecycle {
            lifecycle.token.cancel();
        }
        if let Some(channel) = channel {
            channel.close();
        }

        let rejected = inner.queue.lock().reject_all(|| Error::Disconnected);

        if let Some(lifecycle) = lifecycle {
            let _ = lifecycle.handle.await;
        }

        if notify.is_some() {
            info!(session = %inner.name, rejected, "Disconnected");
        }
        inner.notify_state(notify);
    }
}

// ============================================================================
// ConnectionSession - Calls
// ============================================================================

impl ConnectionSession {
    /// Invokes a remote method.
    ///
    /// Goes straight to the transport when ready. A transport failure feeds
    /// the circuit breaker and demotes the call into the outbound queue.
    /// When not ready the call is queued immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the server answered with an error
    /// - [`Error::NotConnected`] if not ready and queuing is disabled
    /// - [`Error::OperationExhausted`] if every queued attempt failed
    /// - [`Error::QueueCapacityExceeded`] if the call was evicted
    /// - [`Error::Disconnected`] if the session was disconnected first
    pub async fn send(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let inner = &self.inner;

        let direct = {
            let core = inner.core.lock();
            match (&core.channel, &core.lifecycle) {
                (Some(channel), Some(lifecycle)) if core.is_ready(Instant::now()) => {
                    Some((Arc::clone(channel), lifecycle.token.clone()))
                }
                _ => None,
            }
        };

        let Some((channel, token)) = direct else {
            return self.enqueue(method, args, 0).await;
        };

        trace!(session = %inner.name, method, "Sending");
        match inner.invoke(&channel, &token, method, args.clone()).await {
            Ok(value) => {
                inner.metrics.lock().messages_sent += 1;
                Ok(value)
            }
            Err(e) if e.is_transport_failure() => {
                warn!(session = %inner.name, method, error = %e, "Call failed, demoting to queue");
                inner.record_transport_failure(&e);
                if inner.options.queue_when_disconnected {
                    self.enqueue(method, args, 1).await
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn enqueue(&self, method: &str, args: Vec<Value>, attempts: u32) -> Result<Value> {
        let inner = &self.inner;
        if !inner.options.queue_when_disconnected {
            return Err(Error::not_connected(inner.name.as_str()));
        }

        let (id, completion) = inner.queue.lock().enqueue_attempted(method, args, attempts);
        inner.metrics.lock().operations_queued += 1;
        debug!(session = %inner.name, op = %id, method, "Operation queued");

        inner.kick_drain();
        completion.await?
    }
}

// ============================================================================
// ConnectionSession - Subscriptions
// ============================================================================

impl ConnectionSession {
    /// Subscribes to a named inbound event.
    ///
    /// Events buffered while nobody listened are replayed to the first
    /// subscriber before this returns. A handler returning `Err` or
    /// panicking is logged and counted, never propagated.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        let inner = &self.inner;
        let handler: EventHandler = Arc::new(handler);

        let _dispatch = inner.dispatch_lock.lock();
        let (id, replay) = inner
            .subscriptions
            .lock()
            .subscribe(event, Arc::clone(&handler));

        if !replay.is_empty() {
            debug!(session = %inner.name, event, count = replay.len(), "Replaying buffered events");
        }
        for payload in &replay {
            inner.run_handler(event, &handler, payload);
        }

        id
    }

    /// Removes an event handler. Returns `true` if it was registered.
    pub fn unsubscribe(&self, event: &str, id: HandlerId) -> bool {
        self.inner.subscriptions.lock().unsubscribe(event, id)
    }

    /// Registers a state change callback.
    pub fn on_state_change<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state_handlers.lock().add(Arc::new(handler))
    }

    /// Registers a callback for errors absorbed by the session.
    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.error_handlers.lock().add(Arc::new(handler))
    }

    /// Removes a state or error callback. Returns `true` if it was registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.state_handlers.lock().remove(id) || self.inner.error_handlers.lock().remove(id)
    }
}

// ============================================================================
// SessionInner - State
// ============================================================================

impl SessionInner {
    /// Sets the underlying state and publishes the reported state.
    ///
    /// Returns the new reported state if it changed.
    fn transition(&self, core: &mut SessionCore, state: ConnectionState) -> Option<ConnectionState> {
        core.state = state;
        self.publish(core)
    }

    /// Publishes the reported state. Returns it if it changed.
    ///
    /// Entering `CircuitOpen` arms the recovery timer.
    fn publish(&self, core: &SessionCore) -> Option<ConnectionState> {
        let now = Instant::now();
        let reported = core.reported_state(now);
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == reported {
                false
            } else {
                *current = reported;
                true
            }
        });
        if changed && reported == ConnectionState::CircuitOpen {
            self.arm_recovery_timer(core.breaker.time_until_retry(now));
        }
        changed.then_some(reported)
    }

    /// Publishes again once the breaker leaves `Open`.
    fn arm_recovery_timer(&self, mut delay: Duration) {
        let weak = self.this.clone();
        let timer = tokio::spawn(async move {
            loop {
                sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let notify = {
                    let core = inner.core.lock();
                    let now = Instant::now();
                    if core.reported_state(now) == ConnectionState::CircuitOpen {
                        delay = core.breaker.time_until_retry(now).max(Duration::from_millis(1));
                        None
                    } else {
                        Some(inner.publish(&core))
                    }
                };
                if let Some(notify) = notify {
                    trace!(session = %inner.name, "Circuit recovery window reached");
                    inner.notify_state(notify);
                    return;
                }
            }
        });
        if let Some(previous) = self.recovery_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    /// Transitions only if `generation` is current.
    fn transition_if_current(&self, generation: u64, state: ConnectionState) -> bool {
        let notify = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return false;
            }
            self.transition(&mut core, state)
        };
        self.notify_state(notify);
        true
    }

    fn notify_state(&self, changed: Option<ConnectionState>) {
        let Some(state) = changed else {
            return;
        };
        debug!(session = %self.name, %state, "State changed");
        let handlers = self.state_handlers.lock().snapshot();
        for handler in handlers {
            if let Err(e) = invoke_isolated("stateChange", || {
                handler(state);
                Ok(())
            }) {
                self.count_handler_error(&e);
            }
        }
    }

    fn emit_error(&self, error: &Error) {
        self.metrics.lock().last_error = Some(error.to_string());
        let handlers = self.error_handlers.lock().snapshot();
        for handler in handlers {
            if let Err(e) = invoke_isolated("error", || {
                handler(error);
                Ok(())
            }) {
                self.count_handler_error(&e);
            }
        }
    }

    fn count_handler_error(&self, error: &Error) {
        warn!(session = %self.name, error = %error, "Handler failed");
        let mut metrics = self.metrics.lock();
        metrics.handler_errors += 1;
        metrics.last_error = Some(error.to_string());
    }

    /// Feeds a transport failure seen on a live channel to the breaker.
    fn record_transport_failure(&self, error: &Error) {
        let notify = {
            let mut core = self.core.lock();
            core.breaker.record_failure(Instant::now());
            self.publish(&core)
        };
        self.metrics.lock().last_error = Some(error.to_string());
        self.notify_state(notify);
    }
}

// ============================================================================
// SessionInner - Calls
// ============================================================================

impl SessionInner {
    /// Invokes `method` with the call timeout, aborting on cancellation.
    async fn invoke(
        &self,
        channel: &Arc<dyn Channel>,
        token: &CancellationToken,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let call_timeout = self.options.call_timeout;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Disconnected),
            result = timeout(call_timeout, channel.invoke(method, args)) => {
                result.unwrap_or_else(|_| Err(Error::request_timeout(method, call_timeout.as_millis() as u64)))
            }
        }
    }

    /// Starts a queue drain if the session is ready and nothing is draining.
    fn kick_drain(self: &Arc<Self>) {
        let target = {
            let core = self.core.lock();
            match (&core.channel, &core.lifecycle) {
                (Some(channel), Some(lifecycle)) if core.is_ready(Instant::now()) => {
                    Some((Arc::clone(channel), lifecycle.token.clone()))
                }
                _ => None,
            }
        };
        let Some((channel, token)) = target else {
            return;
        };
        {
            let queue = self.queue.lock();
            if queue.is_empty() || queue.is_draining() {
                return;
            }
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let report = drain(&inner.queue, |method, args| {
                let inner = Arc::clone(&inner);
                let channel = Arc::clone(&channel);
                let token = token.clone();
                async move {
                    if !inner.core.lock().is_ready(Instant::now()) {
                        return Err(Error::not_connected(inner.name.as_str()));
                    }
                    let result = inner.invoke(&channel, &token, &method, args).await;
                    match &result {
                        Ok(_) => inner.metrics.lock().messages_sent += 1,
                        Err(e) if e.is_transport_failure() => inner.record_transport_failure(e),
                        Err(_) => {}
                    }
                    result
                }
            })
            .await;

            if let Some(report) = report {
                inner.metrics.lock().operations_exhausted += report.exhausted as u64;
                debug!(
                    session = %inner.name,
                    delivered = report.delivered,
                    requeued = report.requeued,
                    exhausted = report.exhausted,
                    deferred = report.deferred,
                    "Queue drain finished"
                );
            }
        });
    }
}

// ============================================================================
// SessionInner - Events
// ============================================================================

impl SessionInner {
    fn dispatch(&self, event: &str, payload: Value) {
        if self.options.dedup_events.iter().any(|name| name == event) {
            let fresh = self
                .dedup
                .lock()
                .as_mut()
                .is_none_or(|dedup| dedup.check_value(&payload, Instant::now()));
            if !fresh {
                trace!(session = %self.name, event, "Duplicate event suppressed");
                self.metrics.lock().duplicates_suppressed += 1;
                return;
            }
        }

        self.metrics.lock().messages_received += 1;
        trace!(session = %self.name, event, "Event received");

        let _dispatch = self.dispatch_lock.lock();
        let route = self.subscriptions.lock().route(event, &payload);
        match route {
            Route::Deliver(handlers) => {
                for handler in &handlers {
                    self.run_handler(event, handler, &payload);
                }
            }
            Route::Buffered => {}
            Route::Dropped => trace!(session = %self.name, event, "No subscriber, event dropped"),
        }
    }

    fn run_handler(&self, event: &str, handler: &EventHandler, payload: &Value) {
        if let Err(e) = invoke_isolated(event, || handler(payload)) {
            self.count_handler_error(&e);
        }
    }

    fn sweep_dedup(&self) {
        if let Some(dedup) = self.dedup.lock().as_mut() {
            let evicted = dedup.sweep(Instant::now());
            if evicted > 0 {
                trace!(session = %self.name, evicted, "Dedup entries swept");
            }
        }
    }

    fn log_status(&self) {
        let (state, circuit) = {
            let core = self.core.lock();
            let now = Instant::now();
            (core.reported_state(now), core.breaker.current_state(now))
        };
        let metrics = self.metrics.lock().clone();
        debug!(
            session = %self.name,
            %state,
            %circuit,
            queued = self.queue.lock().len(),
            sent = metrics.messages_sent,
            received = metrics.messages_received,
            reconnections = metrics.reconnections,
            "Session status"
        );
    }
}

// ============================================================================
// HealthHooks
// ============================================================================

/// Connects heartbeat activity to the breaker, queue and status.
struct HealthHooks {
    inner: Arc<SessionInner>,
}

impl HealthObserver for HealthHooks {
    fn probe_acknowledged(&self, _rtt: Duration) {
        let notify = {
            let mut core = self.inner.core.lock();
            if core.breaker.try_acquire(Instant::now()).is_ok() {
                core.breaker.record_success();
            }
            self.inner.publish(&core)
        };
        self.inner.notify_state(notify);
        self.inner.kick_drain();
    }

    fn health_checked(&self, at: SystemTime) {
        *self.inner.last_health_check.lock() = Some(at);
    }
}

// ============================================================================
// Lifecycle Task
// ============================================================================

async fn run_lifecycle(
    inner: Arc<SessionInner>,
    token: CancellationToken,
    generation: u64,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut ready = Some(ready);

    loop {
        match connect_cycle(&inner, &token, generation).await {
            Cycle::Connected(opened) => {
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Ok(()));
                }
                if !run_connected(&inner, opened, &token, generation).await {
                    return;
                }
            }
            Cycle::Failed(e) => {
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(e));
                }
                return;
            }
            Cycle::Cancelled => {
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(Error::Disconnected));
                }
                return;
            }
        }
    }
}

/// Opens the channel and runs the initial liveness probe.
async fn open_and_probe(inner: &SessionInner) -> Result<OpenedChannel> {
    let credential = inner
        .credential
        .lock()
        .clone()
        .ok_or_else(|| Error::config(format!("No credential set for session {}", inner.name)))?;
    let connect_timeout = inner.options.connect_timeout;

    let attempt = async {
        let opened = inner.factory.open(&inner.endpoint, &credential).await?;
        match opened
            .channel
            .invoke(&inner.options.probe_method, Vec::new())
            .await
        {
            Ok(_) | Err(Error::Remote { .. }) => Ok(opened),
            Err(e) => {
                opened.channel.close();
                Err(e)
            }
        }
    };

    timeout(connect_timeout, attempt)
        .await
        .unwrap_or_else(|_| Err(Error::connection_timeout(connect_timeout.as_millis() as u64)))
}

/// Runs attempts until connected, cancelled or out of budget.
async fn connect_cycle(inner: &Arc<SessionInner>, token: &CancellationToken, generation: u64) -> Cycle {
    let max_attempts = inner.options.max_connect_attempts;
    let mut first_failure: Option<Instant> = None;
    let mut index: u32 = 0;

    loop {
        let permit = inner.core.lock().breaker.try_acquire(Instant::now());
        if let Err(e) = permit {
            warn!(session = %inner.name, error = %e, "Attempt refused by circuit breaker");
            inner.transition_if_current(generation, ConnectionState::Failed);
            return Cycle::Failed(e);
        }

        inner.metrics.lock().connection_attempts += 1;
        debug!(session = %inner.name, attempt = index + 1, max_attempts, "Opening channel");

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Cycle::Cancelled,
            outcome = open_and_probe(inner) => outcome,
        };

        let error = match outcome {
            Ok(opened) => {
                let notify = {
                    let mut core = inner.core.lock();
                    if core.generation != generation || token.is_cancelled() {
                        opened.channel.close();
                        return Cycle::Cancelled;
                    }
                    core.breaker.record_success();
                    core.channel = Some(Arc::clone(&opened.channel));
                    inner.transition(&mut core, ConnectionState::Connected)
                };
                {
                    let mut metrics = inner.metrics.lock();
                    metrics.successful_connections += 1;
                    metrics.last_connected_at = Some(SystemTime::now());
                }
                info!(session = %inner.name, attempt = index + 1, "Connected");
                inner.notify_state(notify);
                return Cycle::Connected(opened);
            }
            Err(e) => e,
        };

        let breaker_open = {
            let mut core = inner.core.lock();
            core.breaker.record_failure(Instant::now());
            core.breaker.state() == CircuitState::Open
        };
        inner.metrics.lock().failed_attempts += 1;
        warn!(session = %inner.name, attempt = index + 1, error = %error, "Connection attempt failed");
        inner.emit_error(&error);

        if breaker_open {
            let retry_after = inner.core.lock().breaker.time_until_retry(Instant::now());
            warn!(session = %inner.name, retry_after_ms = retry_after.as_millis() as u64, "Circuit open, giving up this cycle");
            inner.transition_if_current(generation, ConnectionState::Failed);
            return Cycle::Failed(Error::circuit_open(retry_after.as_millis() as u64));
        }

        if index + 1 >= max_attempts {
            warn!(session = %inner.name, attempts = index + 1, "Connection retries exhausted");
            inner.transition_if_current(generation, ConnectionState::Failed);
            return Cycle::Failed(Error::retries_exhausted(index + 1, &error));
        }

        if !inner.transition_if_current(generation, ConnectionState::Reconnecting) {
            return Cycle::Cancelled;
        }

        let first = *first_failure.get_or_insert_with(Instant::now);
        let retry = inner.scheduler.lock().schedule(index, first.elapsed());
        info!(
            session = %inner.name,
            attempt = index + 1,
            delay_ms = retry.delay.as_millis() as u64,
            elapsed_ms = retry.elapsed_since_first_failure.as_millis() as u64,
            "Retrying"
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => return Cycle::Cancelled,
            _ = sleep(retry.delay) => {}
        }

        if !inner.transition_if_current(generation, ConnectionState::Connecting) {
            return Cycle::Cancelled;
        }
        index += 1;
    }
}

/// Serves a live channel. Returns `true` if the connection was lost and a
/// new cycle should start, `false` if cancelled.
async fn run_connected(
    inner: &Arc<SessionInner>,
    opened: OpenedChannel,
    token: &CancellationToken,
    generation: u64,
) -> bool {
    let OpenedChannel { channel, mut events } = opened;

    inner.kick_drain();

    let hooks = HealthHooks {
        inner: Arc::clone(inner),
    };
    let mut monitor = HealthMonitor::new(inner.options.health, Instant::now());
    let health = monitor.run(Arc::clone(&channel), &inner.options.probe_method, &hooks);
    tokio::pin!(health);

    let mut sweep_tick = inner.options.dedup.map(|d| every(d.window));
    let mut status_tick = inner.options.status_log_interval.map(every);

    let loss = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                channel.close();
                return false;
            }
            event = events.recv() => match event {
                Some(ChannelEvent::Message { name, payload }) => inner.dispatch(&name, payload),
                Some(ChannelEvent::Closed { reason }) => break Error::transport_closed(reason),
                None => break Error::transport_closed("event stream ended"),
            },
            reason = &mut health => break Error::from(reason),
            _ = tick(&mut sweep_tick) => inner.sweep_dedup(),
            _ = tick(&mut status_tick) => inner.log_status(),
        }
    };

    channel.close();
    warn!(session = %inner.name, error = %loss, "Connection lost, reconnecting");

    let notify = {
        let mut core = inner.core.lock();
        if core.generation != generation {
            return false;
        }
        core.channel = None;
        core.breaker.record_failure(Instant::now());
        inner.transition(&mut core, ConnectionState::Reconnecting)
    };
    inner.metrics.lock().reconnections += 1;
    inner.notify_state(notify);
    inner.emit_error(&loss);
    true
}

fn every(period: Duration) -> Interval {
    interval_at(Instant::now() + period, period)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
