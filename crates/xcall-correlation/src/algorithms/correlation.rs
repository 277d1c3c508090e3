//! # Event Correlation Engine
//!
//! Finds the first event satisfying an [`EventQuery`] at or above a height
//! watermark, or fails once the caller's deadline passes.
//!
//! Two strategies share one contract:
//!
//! - [`PollingWaiter`]: fetch bounded height windows, sleep, repeat.
//! - [`SubscriptionWaiter`]: subscribe, backfill from the watermark, then
//!   hand the live stream to one listener task feeding a single-slot channel.
//!
//! Decode failures are skipped unless the failing event closes a window in
//! which nothing matched; that case surfaces as [`XCallError::Decode`].

use crate::domain::{EventQuery, ObservedEvent, Result, XCallError};
use async_trait::async_trait;
use std::future::pending;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};
use xcall_telemetry::{
    log_correlation, CORRELATIONS_MATCHED, CORRELATIONS_STARTED, CORRELATION_FAILURES,
    CORRELATION_LATENCY,
};

/// Deadline and cancellation for one correlation.
#[derive(Clone, Debug)]
pub struct CorrelationContext {
    deadline: Instant,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every context derived from the one it was created with.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Signal cancellation.
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl CorrelationContext {
    /// Context expiring after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: None,
        }
    }

    /// Context expiring after `timeout` that can also be cancelled.
    pub fn cancellable(timeout: Duration) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: Instant::now() + timeout,
                cancel: Some(rx),
            },
            CancelHandle(tx),
        )
    }

    /// Derived context: the earlier of the parent deadline and `timeout`
    /// from now, sharing the parent's cancellation.
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            deadline: self.deadline.min(Instant::now() + timeout),
            cancel: self.cancel.clone(),
        }
    }

    /// Absolute deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// True once cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves when cancellation is signalled; never resolves otherwise.
    pub async fn cancelled(&self) {
        let Some(mut rx) = self.cancel.clone() else {
            return pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return pending().await;
            }
        }
    }

    /// Sleep for `period`, waking early on deadline or cancellation.
    pub async fn pause(&self, period: Duration) {
        tokio::select! {
            _ = sleep(period) => {}
            _ = sleep_until(self.deadline) => {}
            _ = self.cancelled() => {}
        }
    }
}

/// A native event that could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeFailure {
    /// Height it was seen at
    pub height: u64,
    /// Transaction carrying it
    pub tx_id: String,
    /// Decoder message
    pub reason: String,
}

/// Result of decoding one native event.
pub type DecodedEvent = std::result::Result<ObservedEvent, DecodeFailure>;

/// Wait for the first event satisfying a query.
#[async_trait]
pub trait EventWaiter: Send + Sync {
    /// Block until a match is observed, the deadline passes, or `ctx` is
    /// cancelled.
    async fn wait_for_event(&self, ctx: &CorrelationContext, query: &EventQuery)
        -> Result<ObservedEvent>;
}

/// Height-ranged event fetch (poll strategy).
#[async_trait]
pub trait PollSource: Send + Sync {
    /// Chain NID for errors and logs.
    fn chain(&self) -> &str;

    /// Latest height.
    async fn head(&self) -> Result<u64>;

    /// Candidate events for `query` in `[from, to]`, ascending.
    async fn fetch(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>>;
}

/// Push-based event source (subscription strategy).
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Chain NID for errors and logs.
    fn chain(&self) -> &str;

    /// Latest height.
    async fn head(&self) -> Result<u64>;

    /// Start a live stream of candidate events for `query`.
    async fn subscribe(&self, query: &EventQuery) -> Result<mpsc::Receiver<DecodedEvent>>;

    /// Historical candidate events in `[from, to]`, ascending.
    async fn backfill(&self, query: &EventQuery, from: u64, to: u64)
        -> Result<Vec<DecodedEvent>>;
}

/// Scan one fetched window. Returns the first match, or `Decode` when the
/// window's terminal element failed to decode and nothing matched.
fn scan_window(
    chain: &str,
    query: &EventQuery,
    events: Vec<DecodedEvent>,
) -> Result<Option<ObservedEvent>> {
    let last = events.len().saturating_sub(1);
    for (i, item) in events.into_iter().enumerate() {
        match item {
            Ok(observed) if query.accepts(&observed) => return Ok(Some(observed)),
            Ok(_) => {}
            Err(failure) if i == last => {
                return Err(XCallError::decode(
                    chain,
                    query.kind.signature(),
                    format!("height {} tx {}: {}", failure.height, failure.tx_id, failure.reason),
                ));
            }
            Err(failure) => {
                debug!(
                    chain,
                    signature = query.kind.signature(),
                    height = failure.height,
                    tx = %failure.tx_id,
                    reason = %failure.reason,
                    "Skipping undecodable event"
                );
            }
        }
    }
    Ok(None)
}

fn not_found(chain: &str, query: &EventQuery, to_height: u64) -> XCallError {
    XCallError::EventNotFound {
        chain: chain.to_string(),
        signature: query.kind.signature().to_string(),
        sn: query.matcher.key(),
        from_height: query.start_height,
        to_height: to_height.max(query.start_height),
    }
}

fn cancelled(chain: &str, query: &EventQuery) -> XCallError {
    XCallError::Cancelled {
        chain: chain.to_string(),
        signature: query.kind.signature().to_string(),
    }
}

/// Record metrics and logs for a finished wait.
fn record_outcome(chain: &str, query: &EventQuery, started: Instant, outcome: &Result<ObservedEvent>) {
    let signature = query.kind.signature();
    match outcome {
        Ok(observed) => {
            CORRELATIONS_MATCHED.with_label_values(&[chain, signature]).inc();
            CORRELATION_LATENCY
                .with_label_values(&[chain, signature])
                .observe(started.elapsed().as_secs_f64());
            log_correlation!(
                info,
                chain,
                signature,
                query.matcher.key(),
                "Correlated event",
                height = observed.height,
                tx = %observed.tx_id
            );
        }
        Err(e) => {
            CORRELATION_FAILURES
                .with_label_values(&[chain, signature, e.kind()])
                .inc();
            log_correlation!(warn, chain, signature, query.matcher.key(), "Correlation failed", error = %e);
        }
    }
}

/// Poll-based waiter.
pub struct PollingWaiter<S> {
    source: S,
    interval: Duration,
    max_window: u64,
}

impl<S: PollSource> PollingWaiter<S> {
    /// Poll `source` every `interval`, fetching at most `max_window` heights
    /// per request.
    pub fn new(source: S, interval: Duration, max_window: u64) -> Self {
        Self {
            source,
            interval,
            max_window: max_window.max(1),
        }
    }

    /// Underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    async fn poll(&self, ctx: &CorrelationContext, query: &EventQuery) -> Result<ObservedEvent> {
        let chain = self.source.chain();
        let mut cursor = query.start_height;
        let mut scanned_to = query.start_height;

        loop {
            if ctx.is_cancelled() {
                return Err(cancelled(chain, query));
            }
            if ctx.is_expired() {
                return Err(not_found(chain, query, scanned_to));
            }

            let mut caught_up = true;
            match self.source.head().await {
                Ok(head) if head >= cursor => {
                    let to = head.min(cursor.saturating_add(self.max_window - 1));
                    match self.source.fetch(query, cursor, to).await {
                        Ok(events) => {
                            if let Some(found) = scan_window(chain, query, events)? {
                                return Ok(found);
                            }
                            scanned_to = to;
                            cursor = to + 1;
                            caught_up = to >= head;
                        }
                        Err(e) if e.is_transient() => {
                            warn!(chain, from = cursor, to, error = %e, "Event fetch failed, retrying");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(chain, error = %e, "Height query failed, retrying");
                }
                Err(e) => return Err(e),
            }

            if caught_up {
                ctx.pause(self.interval).await;
            }
        }
    }
}

#[async_trait]
impl<S: PollSource> EventWaiter for PollingWaiter<S> {
    async fn wait_for_event(
        &self,
        ctx: &CorrelationContext,
        query: &EventQuery,
    ) -> Result<ObservedEvent> {
        let chain = self.source.chain();
        CORRELATIONS_STARTED
            .with_label_values(&[chain, query.kind.signature()])
            .inc();
        debug!(
            chain,
            signature = query.kind.signature(),
            key = %query.matcher.key(),
            start = query.start_height,
            "Polling for event"
        );
        let started = Instant::now();
        let outcome = self.poll(ctx, query).await;
        record_outcome(chain, query, started, &outcome);
        outcome
    }
}

/// Delay before resubscribing after a transient failure.
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);

/// Subscription-based waiter.
pub struct SubscriptionWaiter<S> {
    source: S,
}

impl<S: SubscriptionSource> SubscriptionWaiter<S> {
    /// Wrap a subscription source.
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    async fn listen(&self, ctx: &CorrelationContext, query: &EventQuery) -> Result<ObservedEvent> {
        let chain = self.source.chain();
        let mut reached = query.start_height;
        loop {
            if ctx.is_cancelled() {
                return Err(cancelled(chain, query));
            }
            if ctx.is_expired() {
                return Err(not_found(chain, query, reached));
            }
            let attempt = match self.attach(query).await {
                Ok(Attached::Found(found)) => return Ok(found),
                Ok(Attached::Live { stream, head }) => {
                    reached = reached.max(head);
                    self.follow(ctx, query, stream, head).await
                }
                Err(e) => Err(e),
            };
            match attempt {
                Err(e) if e.is_transient() => {
                    warn!(chain, error = %e, "Subscription failed, resubscribing");
                    ctx.pause(RESUBSCRIBE_DELAY).await;
                }
                other => return other,
            }
        }
    }

    /// Subscribe, then backfill from the watermark up to the current head.
    async fn attach(&self, query: &EventQuery) -> Result<Attached> {
        let chain = self.source.chain();

        // Subscribe before backfilling so nothing lands in the gap.
        let stream = self.source.subscribe(query).await?;
        let head = self.source.head().await?;
        if head >= query.start_height {
            let history = self.source.backfill(query, query.start_height, head).await?;
            if let Some(found) = scan_window(chain, query, history)? {
                return Ok(Attached::Found(found));
            }
        }
        Ok(Attached::Live { stream, head })
    }

    async fn follow(
        &self,
        ctx: &CorrelationContext,
        query: &EventQuery,
        mut stream: mpsc::Receiver<DecodedEvent>,
        head: u64,
    ) -> Result<ObservedEvent> {
        let chain = self.source.chain();
        let (found_tx, mut found_rx) = mpsc::channel::<ObservedEvent>(1);
        let listener_query = query.clone();
        let listener_chain = chain.to_string();
        let listener = tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                match item {
                    Ok(observed) if listener_query.accepts(&observed) => {
                        let _ = found_tx.send(observed).await;
                        return;
                    }
                    Ok(_) => {}
                    Err(failure) => {
                        debug!(
                            chain = %listener_chain,
                            height = failure.height,
                            reason = %failure.reason,
                            "Skipping undecodable pushed event"
                        );
                    }
                }
            }
        });

        let outcome = tokio::select! {
            received = found_rx.recv() => match received {
                Some(observed) => Ok(observed),
                None => Err(XCallError::rpc(chain, "subscription closed before a match")),
            },
            _ = sleep_until(ctx.deadline()) => {
                let reached = self.source.head().await.unwrap_or(head);
                Err(not_found(chain, query, reached))
            }
            _ = ctx.cancelled() => Err(cancelled(chain, query)),
        };
        listener.abort();
        outcome
    }
}

enum Attached {
    Found(ObservedEvent),
    Live {
        stream: mpsc::Receiver<DecodedEvent>,
        head: u64,
    },
}

#[async_trait]
impl<S: SubscriptionSource> EventWaiter for SubscriptionWaiter<S> {
    async fn wait_for_event(
        &self,
        ctx: &CorrelationContext,
        query: &EventQuery,
    ) -> Result<ObservedEvent> {
        let chain = self.source.chain();
        CORRELATIONS_STARTED
            .with_label_values(&[chain, query.kind.signature()])
            .inc();
        debug!(
            chain,
            signature = query.kind.signature(),
            key = %query.matcher.key(),
            start = query.start_height,
            "Subscribing for event"
        );
        let started = Instant::now();
        let outcome = if ctx.is_cancelled() {
            Err(cancelled(chain, query))
        } else {
            self.listen(ctx, query).await
        };
        record_outcome(chain, query, started, &outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, EventMatcher, SerialNo, XCallEvent};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn rollback_executed(height: u64, sn: u64) -> DecodedEvent {
        Ok(ObservedEvent {
            height,
            tx_id: format!("tx{}", height),
            event: XCallEvent::RollbackExecuted {
                sn: SerialNo::from_u64(sn),
            },
        })
    }

    fn broken(height: u64) -> DecodedEvent {
        Err(DecodeFailure {
            height,
            tx_id: format!("tx{}", height),
            reason: "truncated".into(),
        })
    }

    fn query(start: u64, sn: u64) -> EventQuery {
        EventQuery::new(
            EventKind::RollbackExecuted,
            "xcall",
            start,
            EventMatcher::by_sn(SerialNo::from_u64(sn)),
        )
    }

    /// In-memory ledger: height → events.
    #[derive(Default)]
    struct Scripted {
        head: AtomicU64,
        events: Mutex<BTreeMap<u64, Vec<DecodedEvent>>>,
        fetches: AtomicUsize,
        fail_first_fetch: bool,
    }

    impl Scripted {
        fn put(&self, height: u64, event: DecodedEvent) {
            self.events.lock().entry(height).or_default().push(event);
            self.head.fetch_max(height, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PollSource for Arc<Scripted> {
        fn chain(&self) -> &str {
            "scripted"
        }

        async fn head(&self) -> Result<u64> {
            Ok(self.head.load(Ordering::SeqCst))
        }

        async fn fetch(&self, _q: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_first_fetch && n == 0 {
                return Err(XCallError::rpc("scripted", "connection reset"));
            }
            Ok(self
                .events
                .lock()
                .range(from..=to)
                .flat_map(|(_, v)| v.iter().cloned())
                .collect())
        }
    }

    #[tokio::test]
    async fn test_poll_finds_event_above_watermark() {
        let ledger = Arc::new(Scripted::default());
        ledger.put(3, rollback_executed(3, 7));
        ledger.put(8, rollback_executed(8, 7));

        let waiter = PollingWaiter::new(ledger.clone(), Duration::from_millis(10), 100);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(5));
        let found = waiter.wait_for_event(&ctx, &query(5, 7)).await.unwrap();
        assert_eq!(found.height, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_with_scanned_range() {
        let ledger = Arc::new(Scripted::default());
        ledger.put(12, rollback_executed(12, 1));

        let waiter = PollingWaiter::new(ledger, Duration::from_secs(1), 100);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(5));
        match waiter.wait_for_event(&ctx, &query(10, 2)).await {
            Err(XCallError::EventNotFound {
                signature,
                sn,
                from_height,
                to_height,
                ..
            }) => {
                assert_eq!(signature, "RollbackExecuted");
                assert_eq!(sn, "2");
                assert_eq!(from_height, 10);
                assert_eq!(to_height, 12);
            }
            other => panic!("expected EventNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_windows_are_bounded() {
        let ledger = Arc::new(Scripted::default());
        ledger.put(250, rollback_executed(250, 4));

        let waiter = PollingWaiter::new(ledger.clone(), Duration::from_millis(10), 100);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(5));
        let found = waiter.wait_for_event(&ctx, &query(1, 4)).await.unwrap();
        assert_eq!(found.height, 250);
        // [1,100] [101,200] [201,250]
        assert_eq!(ledger.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_skips_undecodable_unless_terminal() {
        let ledger = Arc::new(Scripted::default());
        ledger.put(4, broken(4));
        ledger.put(5, rollback_executed(5, 9));

        let waiter = PollingWaiter::new(ledger, Duration::from_millis(10), 100);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(5));
        assert_eq!(waiter.wait_for_event(&ctx, &query(1, 9)).await.unwrap().height, 5);
    }

    #[tokio::test]
    async fn test_poll_terminal_decode_failure_surfaces() {
        let ledger = Arc::new(Scripted::default());
        ledger.put(4, rollback_executed(4, 1));
        ledger.put(5, broken(5));

        let waiter = PollingWaiter::new(ledger, Duration::from_millis(10), 100);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(5));
        let err = waiter.wait_for_event(&ctx, &query(1, 9)).await.unwrap_err();
        assert!(matches!(err, XCallError::Decode { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_poll_retries_transient_rpc_errors() {
        let ledger = Arc::new(Scripted {
            fail_first_fetch: true,
            ..Default::default()
        });
        ledger.put(2, rollback_executed(2, 3));

        let waiter = PollingWaiter::new(ledger, Duration::from_millis(10), 100);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(5));
        assert!(waiter.wait_for_event(&ctx, &query(1, 3)).await.is_ok());
    }

    #[tokio::test]
    async fn test_poll_cancellation() {
        let ledger = Arc::new(Scripted::default());
        let waiter = PollingWaiter::new(ledger, Duration::from_millis(10), 100);
        let (ctx, handle) = CorrelationContext::cancellable(Duration::from_secs(60));

        let wait = tokio::spawn(async move { waiter.wait_for_event(&ctx, &query(1, 1)).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
        let err = wait.await.unwrap().unwrap_err();
        assert!(matches!(err, XCallError::Cancelled { .. }));
    }

    #[test]
    fn test_child_context_never_extends_parent() {
        tokio_test::block_on(async {
            let parent = CorrelationContext::with_timeout(Duration::from_secs(1));
            let child = parent.child(Duration::from_secs(60));
            assert_eq!(child.deadline(), parent.deadline());
            assert!(!child.is_cancelled());
        });
    }

    /// Pushes from a broadcast of decoded events.
    struct Pushed {
        head: AtomicU64,
        history: Vec<DecodedEvent>,
        live: tokio::sync::broadcast::Sender<DecodedEvent>,
    }

    #[async_trait]
    impl SubscriptionSource for Arc<Pushed> {
        fn chain(&self) -> &str {
            "pushed"
        }

        async fn head(&self) -> Result<u64> {
            Ok(self.head.load(Ordering::SeqCst))
        }

        async fn subscribe(&self, _q: &EventQuery) -> Result<mpsc::Receiver<DecodedEvent>> {
            let mut live = self.live.subscribe();
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                while let Ok(item) = live.recv().await {
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }

        async fn backfill(&self, _q: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
            Ok(self
                .history
                .iter()
                .filter(|e| matches!(e, Ok(o) if o.height >= from && o.height <= to))
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_subscription_backfill_finds_early_event() {
        let (live, _) = tokio::sync::broadcast::channel(16);
        let source = Arc::new(Pushed {
            head: AtomicU64::new(6),
            history: vec![rollback_executed(6, 2)],
            live,
        });
        let waiter = SubscriptionWaiter::new(source);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(5));
        assert_eq!(waiter.wait_for_event(&ctx, &query(5, 2)).await.unwrap().height, 6);
    }

    #[tokio::test]
    async fn test_subscription_receives_live_event() {
        let (live, _) = tokio::sync::broadcast::channel(16);
        let source = Arc::new(Pushed {
            head: AtomicU64::new(1),
            history: vec![],
            live: live.clone(),
        });
        let waiter = SubscriptionWaiter::new(source);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(5));

        let publisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = live.send(rollback_executed(2, 1));
            let _ = live.send(broken(3));
            let _ = live.send(rollback_executed(4, 5));
        });
        let found = waiter.wait_for_event(&ctx, &query(1, 5)).await.unwrap();
        assert_eq!(found.height, 4);
        publisher.await.unwrap();
    }

    /// Fails the first `failing_subscribes` subscribes and the first backfill.
    struct Flaky {
        inner: Arc<Pushed>,
        failing_subscribes: usize,
        subscribes: AtomicUsize,
        backfills: AtomicUsize,
    }

    #[async_trait]
    impl SubscriptionSource for Arc<Flaky> {
        fn chain(&self) -> &str {
            "flaky"
        }

        async fn head(&self) -> Result<u64> {
            self.inner.head().await
        }

        async fn subscribe(&self, q: &EventQuery) -> Result<mpsc::Receiver<DecodedEvent>> {
            if self.subscribes.fetch_add(1, Ordering::SeqCst) < self.failing_subscribes {
                return Err(XCallError::rpc("flaky", "connection reset"));
            }
            self.inner.subscribe(q).await
        }

        async fn backfill(&self, q: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
            if self.backfills.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(XCallError::rpc("flaky", "connection reset"));
            }
            self.inner.backfill(q, from, to).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_retries_transient_setup_failures() {
        let (live, _) = tokio::sync::broadcast::channel(16);
        let source = Arc::new(Flaky {
            inner: Arc::new(Pushed {
                head: AtomicU64::new(6),
                history: vec![rollback_executed(6, 2)],
                live,
            }),
            failing_subscribes: 1,
            subscribes: AtomicUsize::new(0),
            backfills: AtomicUsize::new(0),
        });
        let waiter = SubscriptionWaiter::new(source.clone());
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(30));
        let found = waiter.wait_for_event(&ctx, &query(5, 2)).await.unwrap();
        assert_eq!(found.height, 6);
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 3);
        assert_eq!(source.backfills.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_gives_up_at_deadline_while_failing() {
        let (live, _) = tokio::sync::broadcast::channel(16);
        let source = Arc::new(Flaky {
            inner: Arc::new(Pushed {
                head: AtomicU64::new(3),
                history: vec![],
                live,
            }),
            failing_subscribes: usize::MAX,
            subscribes: AtomicUsize::new(0),
            backfills: AtomicUsize::new(0),
        });
        let waiter = SubscriptionWaiter::new(source);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(2));
        let err = waiter.wait_for_event(&ctx, &query(3, 1)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_deadline() {
        let (live, _) = tokio::sync::broadcast::channel(16);
        let source = Arc::new(Pushed {
            head: AtomicU64::new(3),
            history: vec![],
            live,
        });
        let waiter = SubscriptionWaiter::new(source);
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(16));
        let err = waiter.wait_for_event(&ctx, &query(3, 1)).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
