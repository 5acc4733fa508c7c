// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result cache.
//!
//! Executors report test-start and test-result events at whatever rate test
//! execution produces them. The cache batches that stream into bounded
//! chunks: a flush fires when the buffered event count reaches the batch
//! size, or when a non-empty buffer has gone unflushed for the batch
//! timeout, whichever comes first. A recurring timer guarantees forward
//! progress even when no new events arrive (e.g. one long-running test).
//!
//! All access is serialized by a single internal lock: result volume is
//! bounded by test execution speed, so correctness wins over throughput
//! here. The flush callback runs synchronously under that lock; callback
//! implementations must be fast and must not call back into the cache.

use crate::events::RunStatsChange;
use crossbeam_channel::{RecvTimeoutError, Sender};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use std::{
    mem,
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};
use testwire_metadata::{ExecutorUri, RunStatistics, TestCase, TestResult};
use tracing::{debug, warn};

/// Callback invoked with each flushed chunk.
pub type CacheHitCallback = Box<dyn Fn(RunStatsChange) + Send + Sync>;

const MIN_BATCH_TIMEOUT: Duration = Duration::from_millis(1);

enum TimerMessage {
    /// A flush happened; restart the timer period.
    Reset,
    /// The cache is being dropped.
    Stop,
}

#[derive(Debug)]
struct CacheState {
    in_progress: Vec<TestCase>,
    pending: Vec<TestResult>,
    statistics: RunStatistics,
    telemetry: IndexMap<String, u64>,
    last_flush: Instant,
}

#[derive(Debug)]
struct CacheInner {
    batch_size: usize,
    batch_timeout: Duration,
    on_cache_hit: DebugIgnore<CacheHitCallback>,
    timer_tx: Sender<TimerMessage>,
    state: Mutex<CacheState>,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evaluated after every mutation: size trigger first, then the timeout
    /// trigger (which only fires while at least one test is in progress).
    fn check_for_flush(&self, state: &mut CacheState) {
        if state.pending.len() + state.in_progress.len() >= self.batch_size {
            self.flush(state);
        } else if state.last_flush.elapsed() >= self.batch_timeout && !state.in_progress.is_empty()
        {
            self.flush(state);
        }
    }

    /// Timer-driven check: flush whenever anything is buffered.
    fn timer_tick(&self) {
        let mut state = self.lock();
        if !state.pending.is_empty() || !state.in_progress.is_empty() {
            self.flush(&mut state);
        }
    }

    /// Hands both buffers to the callback and starts over with fresh empty
    /// ones. The flushed collections are owned by the callback; no aliasing
    /// with future cache state.
    fn flush(&self, state: &mut CacheState) {
        let chunk = mem::take(&mut state.pending);
        let in_progress = mem::take(&mut state.in_progress);
        let statistics = state.statistics.clone();
        state.last_flush = Instant::now();
        // Restart the timer period so the next timer-driven check is a full
        // timeout away from this flush.
        let _ = self.timer_tx.send(TimerMessage::Reset);
        debug!(
            chunk_len = chunk.len(),
            in_progress_len = in_progress.len(),
            executed = statistics.executed_tests,
            "flushing result chunk"
        );
        (self.on_cache_hit)(RunStatsChange {
            statistics,
            chunk,
            in_progress,
        });
    }
}

/// Thread-safe accumulator of test-start and test-result events.
///
/// See the [module documentation](self) for flush semantics. Dropping the
/// cache stops the internal flush timer; no flush side effects occur after
/// that.
#[derive(Debug)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
    timer: Option<thread::JoinHandle<()>>,
}

impl ResultCache {
    /// Creates a new cache.
    ///
    /// `batch_timeout` is clamped to the range the underlying timer can
    /// represent; the type of `batch_size` enforces that it is positive.
    pub fn new(
        batch_size: NonZeroUsize,
        batch_timeout: Duration,
        on_cache_hit: CacheHitCallback,
    ) -> Self {
        let batch_timeout =
            batch_timeout.clamp(MIN_BATCH_TIMEOUT, crate::config::MAX_BATCH_TIMEOUT);
        let (timer_tx, timer_rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(CacheInner {
            batch_size: batch_size.get(),
            batch_timeout,
            on_cache_hit: DebugIgnore(on_cache_hit),
            timer_tx,
            state: Mutex::new(CacheState {
                in_progress: Vec::new(),
                pending: Vec::new(),
                statistics: RunStatistics::default(),
                telemetry: IndexMap::new(),
                last_flush: Instant::now(),
            }),
        });

        let timer_inner = Arc::clone(&inner);
        let timer = thread::Builder::new()
            .name("testwire-cache-timer".into())
            .spawn(move || {
                loop {
                    match timer_rx.recv_timeout(batch_timeout) {
                        Ok(TimerMessage::Reset) => continue,
                        Ok(TimerMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => timer_inner.timer_tick(),
                    }
                }
            });
        let timer = match timer {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("failed to spawn cache timer thread, relying on event-driven flushes: {err}");
                None
            }
        };

        Self { inner, timer }
    }

    /// Records an in-progress test. May trigger a flush.
    pub fn on_test_started(&self, test_case: TestCase) {
        let mut state = self.inner.lock();
        state.in_progress.push(test_case);
        self.inner.check_for_flush(&mut state);
    }

    /// Records a finished test's result, removing the matching in-progress
    /// entry. May trigger a flush.
    ///
    /// The in-progress entry is matched by full equality first, falling back
    /// to id equality for the case where the reported test case was replaced
    /// (e.g. by a source substitution). A result with no matching in-progress
    /// entry is still recorded.
    pub fn on_new_test_result(&self, result: TestResult) {
        let mut state = self.inner.lock();
        state.statistics.record(result.outcome);
        if let Some(pos) = Self::in_progress_position(&state.in_progress, &result.test_case) {
            state.in_progress.remove(pos);
        }
        state.pending.push(result);
        self.inner.check_for_flush(&mut state);
    }

    /// Explicitly removes a test from the in-progress set, for tests that
    /// end without a full result (e.g. on an executor error). Returns
    /// whether something was actually removed.
    pub fn on_test_completion(&self, test_case: &TestCase) -> bool {
        let mut state = self.inner.lock();
        if state.in_progress.is_empty() {
            warn!(
                test = %test_case.fully_qualified_name,
                "test completion reported but no tests are in progress"
            );
            return false;
        }
        match Self::in_progress_position(&state.in_progress, test_case) {
            Some(pos) => {
                state.in_progress.remove(pos);
                true
            }
            None => {
                debug!(
                    test = %test_case.fully_qualified_name,
                    "test completion reported for a test that is not in progress"
                );
                false
            }
        }
    }

    /// Atomically drains whatever pending results remain, leaving an empty
    /// buffer. Used once, at run completion, to pick up the tail.
    pub fn take_last_chunk(&self) -> Vec<TestResult> {
        let mut state = self.inner.lock();
        mem::take(&mut state.pending)
    }

    /// Total number of tests executed so far.
    pub fn executed_tests(&self) -> u64 {
        self.inner.lock().statistics.executed_tests
    }

    /// Read-only snapshot of the run statistics.
    pub fn statistics(&self) -> RunStatistics {
        self.inner.lock().statistics.clone()
    }

    /// The tests currently in progress.
    pub fn in_progress_tests(&self) -> Vec<TestCase> {
        self.inner.lock().in_progress.clone()
    }

    /// Increments a legacy-adapter telemetry counter.
    pub fn bump_adapter_metric(&self, executor: &ExecutorUri, category: &str) {
        let mut state = self.inner.lock();
        *state
            .telemetry
            .entry(format!("{executor}.{category}"))
            .or_insert(0) += 1;
    }

    /// Snapshot of the accumulated adapter telemetry counters.
    pub fn adapter_telemetry(&self) -> IndexMap<String, u64> {
        self.inner.lock().telemetry.clone()
    }

    fn in_progress_position(in_progress: &[TestCase], test_case: &TestCase) -> Option<usize> {
        in_progress
            .iter()
            .position(|tc| tc == test_case)
            .or_else(|| in_progress.iter().position(|tc| tc.id == test_case.id))
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        let _ = self.inner.timer_tx.send(TimerMessage::Stop);
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}
