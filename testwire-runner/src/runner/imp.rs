// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The executor invocation loop.
//!
//! A [`RunnerLoop`] owns one run from session start to the completion event:
//! it pulls the ordered executor set from its [`DispatchStrategy`], invokes
//! every distinct executor exactly once, isolates per-executor failures,
//! honors cooperative cancellation between executors, and always raises
//! exactly one completion event — normal, cancelled, or aborted.

use crate::{
    cache::ResultCache,
    config::{ExecutionAffinity, RunContext},
    errors::{CompletionDeliveryError, ExecutorError},
    events::{LogLevel, MetricValue, RunCompleteEvent, RunEventHandler, metric_keys},
    extension::{DebuggerLauncher, ExecutorRegistry, InProcCollector, RunRequest, TestExecutor},
    runner::RunRecorder,
    stopwatch::{self, StopwatchStart},
};
use indexmap::{IndexMap, IndexSet};
use std::{
    panic,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use testwire_metadata::{ExecutorReference, ExecutorUri, RunUuid};
use tracing::{debug, warn};

/// A dispatch policy plugged into the [`RunnerLoop`].
///
/// The strategy decides which executors run and what each one is handed;
/// the loop owns everything else about the lifecycle.
pub trait DispatchStrategy: Send {
    /// Resolves the ordered set of executors to invoke, with the work each
    /// one receives.
    ///
    /// Returning `None` is a hard failure: the run completes immediately as
    /// aborted. Returning an empty map is not — zero executors matched
    /// (e.g. no adapters installed), and the run completes normally with
    /// zero executed tests.
    fn executor_map(
        &mut self,
        handler: &dyn RunEventHandler,
    ) -> Option<IndexMap<ExecutorReference, RunRequest>>;

    /// Called right before the completion event is raised. Strategies use
    /// this to emit strategy-specific diagnostics such as the by-source
    /// "no tests available" warning.
    fn before_run_complete(
        &self,
        executed_tests: u64,
        cancelled: bool,
        handler: &dyn RunEventHandler,
    ) {
        let _ = (executed_tests, cancelled, handler);
    }
}

/// Category recorded in adapter telemetry when a legacy executor (one
/// without the extended debugger capability) is selected.
const LEGACY_EXECUTOR_CATEGORY: &str = "legacy-executor";

/// Drives one run to completion. Single run per instance.
pub struct RunnerLoop {
    run_id: RunUuid,
    context: Arc<RunContext>,
    cache: Arc<ResultCache>,
    registry: Arc<dyn ExecutorRegistry>,
    strategy: Mutex<Box<dyn DispatchStrategy>>,
    handler: Arc<dyn RunEventHandler>,
    collectors: Vec<Arc<dyn InProcCollector>>,
    debugger: Option<Arc<dyn DebuggerLauncher>>,
    stopwatch: StopwatchStart,
    cancelled: AtomicBool,
    completion_raised: AtomicBool,
    active_executor: Mutex<Option<Arc<dyn TestExecutor>>>,
}

impl RunnerLoop {
    /// Creates a new loop for a single run.
    pub fn new(
        context: Arc<RunContext>,
        cache: Arc<ResultCache>,
        registry: Arc<dyn ExecutorRegistry>,
        strategy: Box<dyn DispatchStrategy>,
        handler: Arc<dyn RunEventHandler>,
        collectors: Vec<Arc<dyn InProcCollector>>,
        debugger: Option<Arc<dyn DebuggerLauncher>>,
    ) -> Self {
        Self {
            run_id: RunUuid::new_v4(),
            context,
            cache,
            registry,
            strategy: Mutex::new(strategy),
            handler,
            collectors,
            debugger,
            stopwatch: stopwatch::stopwatch(),
            cancelled: AtomicBool::new(false),
            completion_raised: AtomicBool::new(false),
            active_executor: Mutex::new(None),
        }
    }

    /// The unique id of this run.
    pub fn run_id(&self) -> RunUuid {
        self.run_id
    }

    /// Executes the whole run lifecycle.
    ///
    /// Failures inside individual executors are recovered here and never
    /// propagate; the only error this returns is a failure to deliver the
    /// completion event, for which there is no further recovery path.
    pub fn run(&self) -> Result<(), CompletionDeliveryError> {
        for collector in &self.collectors {
            collector.session_start();
        }

        let recorder = RunRecorder::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.handler),
            self.collectors.clone(),
            self.debugger.clone(),
            self.context.package.clone(),
        );

        let map = lock(&self.strategy).executor_map(self.handler.as_ref());

        let mut aborted = false;
        let mut exceptions_occurred = false;
        let mut executors_that_ran: IndexSet<ExecutorUri> = IndexSet::new();
        let mut metrics: IndexMap<String, MetricValue> = IndexMap::new();

        match map {
            None => {
                self.handler.on_log_message(
                    LogLevel::Error,
                    "failed to resolve executors for the run",
                );
                warn!(run_id = %self.run_id, "executor resolution failed, aborting run");
                aborted = true;
            }
            Some(map) => {
                metrics.insert(
                    metric_keys::EXECUTORS_RESOLVED.to_owned(),
                    MetricValue::Count(map.len() as u64),
                );
                let mut invoked: IndexSet<ExecutorReference> = IndexSet::new();
                let mut total_time = Duration::ZERO;
                let mut debugger_attached = false;

                for (exec_ref, request) in map {
                    if self.cancelled.load(Ordering::SeqCst) {
                        debug!(
                            run_id = %self.run_id,
                            "cancellation requested, skipping remaining executors"
                        );
                        break;
                    }
                    // The map key already dedups (uri, extension) pairs;
                    // this guards against strategies that hand back
                    // duplicates some other way.
                    if !invoked.insert(exec_ref.clone()) {
                        continue;
                    }

                    let Some(executor) = self.registry.resolve(&exec_ref.uri) else {
                        self.handler.on_log_message(
                            LogLevel::Warning,
                            &format!(
                                "no executor registered for {exec_ref}, skipping {} item(s)",
                                request.len()
                            ),
                        );
                        warn!(executor = %exec_ref.uri, "executor not found in registry");
                        continue;
                    };

                    if self.context.debug && !debugger_attached {
                        debugger_attached =
                            self.maybe_attach_debugger(executor.as_ref(), &exec_ref, &request);
                    }

                    *lock(&self.active_executor) = Some(Arc::clone(&executor));
                    let executed_before = self.cache.executed_tests();
                    let invoke_started = Instant::now();
                    let invoke_result =
                        self.invoke_executor(executor.as_ref(), &exec_ref, &request, &recorder);
                    let elapsed = invoke_started.elapsed();
                    *lock(&self.active_executor) = None;

                    if let Err(err) = invoke_result {
                        exceptions_occurred = true;
                        self.handler.on_log_message(
                            LogLevel::Warning,
                            &format!("executor {} failed: {err}", exec_ref.uri),
                        );
                        warn!(executor = %exec_ref.uri, "executor invocation failed: {err}");
                    }

                    let executed = self.cache.executed_tests() - executed_before;
                    if executed > 0 {
                        executors_that_ran.insert(exec_ref.uri.clone());
                    }
                    metrics.insert(
                        metric_keys::executor_time(&exec_ref.uri),
                        MetricValue::Duration(elapsed),
                    );
                    metrics.insert(
                        metric_keys::executor_tests(&exec_ref.uri),
                        MetricValue::Count(executed),
                    );
                    total_time += elapsed;
                }

                metrics.insert(
                    metric_keys::TOTAL_EXECUTOR_TIME.to_owned(),
                    MetricValue::Duration(total_time),
                );
                metrics.insert(
                    metric_keys::EXECUTORS_RAN.to_owned(),
                    MetricValue::Count(executors_that_ran.len() as u64),
                );
            }
        }

        for collector in &self.collectors {
            collector.session_end();
        }

        let attachments = recorder.take_attachments();
        self.raise_run_complete(
            aborted,
            exceptions_occurred,
            executors_that_ran.into_iter().collect(),
            metrics,
            attachments,
        )
    }

    /// Requests cancellation. Never blocks the caller: the flag stops
    /// future executors, and the active executor's cooperative cancel is
    /// dispatched on a background thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let active = lock(&self.active_executor).clone();
        if let Some(executor) = active {
            debug!(run_id = %self.run_id, "delegating cancel to the active executor");
            let fallback = Arc::clone(&executor);
            let spawned = thread::Builder::new()
                .name("testwire-cancel".into())
                .spawn(move || executor.cancel());
            if let Err(err) = spawned {
                warn!("failed to spawn cancellation thread, cancelling inline: {err}");
                fallback.cancel();
            }
        }
    }

    /// Raises the completion event immediately with `aborted` set,
    /// bypassing the rest of the loop.
    pub fn abort(&self) -> Result<(), CompletionDeliveryError> {
        debug!(run_id = %self.run_id, "abort requested");
        self.raise_run_complete(true, false, Vec::new(), IndexMap::new(), Vec::new())
    }

    /// Decides and performs the debugger attach for this invocation.
    /// Returns whether an attach decision was consumed (so it only happens
    /// once per run).
    fn maybe_attach_debugger(
        &self,
        executor: &dyn TestExecutor,
        exec_ref: &ExecutorReference,
        request: &RunRequest,
    ) -> bool {
        let attach = match executor.should_attach_debugger(request, &self.context) {
            Some(decision) => decision,
            None => {
                // Legacy executor without the extended capability: it cannot
                // manage its own attach decision.
                self.cache
                    .bump_adapter_metric(&exec_ref.uri, LEGACY_EXECUTOR_CATEGORY);
                true
            }
        };
        if !attach {
            return false;
        }
        match &self.debugger {
            Some(launcher) => {
                if let Err(err) = launcher.attach_to_host() {
                    self.handler.on_log_message(
                        LogLevel::Warning,
                        &format!("failed to attach debugger to the executor host: {err}"),
                    );
                    warn!("debugger attach failed: {err}");
                }
            }
            None => {
                self.handler.on_log_message(
                    LogLevel::Warning,
                    "debugger attach requested but no launcher is available",
                );
            }
        }
        true
    }

    /// Invokes one executor, on a dedicated worker thread when the run
    /// requires exclusive affinity.
    fn invoke_executor(
        &self,
        executor: &dyn TestExecutor,
        exec_ref: &ExecutorReference,
        request: &RunRequest,
        recorder: &RunRecorder,
    ) -> Result<(), ExecutorError> {
        let context = &*self.context;
        let call = || executor.run(request, context, recorder);
        match self.context.affinity {
            // A panicking executor must not take the run down with it, so
            // the invocation is unwind-isolated on both paths: catch_unwind
            // here, the thread join below.
            ExecutionAffinity::Default => {
                panic::catch_unwind(panic::AssertUnwindSafe(call)).unwrap_or_else(|_| {
                    Err(ExecutorError::new(format!(
                        "executor {} panicked during invocation",
                        exec_ref.uri
                    )))
                })
            }
            ExecutionAffinity::Exclusive => thread::scope(|scope| {
                let builder = thread::Builder::new()
                    .name(format!("testwire-exclusive-{}", exec_ref.uri));
                match builder.spawn_scoped(scope, call) {
                    Ok(handle) => handle.join().unwrap_or_else(|_| {
                        Err(ExecutorError::new(format!(
                            "executor {} panicked during invocation",
                            exec_ref.uri
                        )))
                    }),
                    Err(err) => {
                        self.handler.on_log_message(
                            LogLevel::Warning,
                            &format!(
                                "exclusive-affinity thread unavailable on this platform, \
                                 invoking {} on the calling thread",
                                exec_ref.uri
                            ),
                        );
                        warn!("failed to spawn exclusive-affinity thread: {err}");
                        call()
                    }
                }
            }),
        }
    }

    /// Builds and delivers the completion envelope. Guarded so that exactly
    /// one completion event is raised per run, whichever of normal
    /// completion, `cancel` or `abort` gets here first.
    fn raise_run_complete(
        &self,
        aborted: bool,
        exceptions_occurred: bool,
        executors: Vec<ExecutorUri>,
        mut metrics: IndexMap<String, MetricValue>,
        attachments: Vec<testwire_metadata::AttachmentSet>,
    ) -> Result<(), CompletionDeliveryError> {
        if self.completion_raised.swap(true, Ordering::SeqCst) {
            debug!(run_id = %self.run_id, "run completion already raised");
            return Ok(());
        }

        let cancelled = self.cancelled.load(Ordering::SeqCst);
        let statistics = self.cache.statistics();
        lock(&self.strategy).before_run_complete(
            statistics.executed_tests,
            cancelled,
            self.handler.as_ref(),
        );

        for (key, value) in self.cache.adapter_telemetry() {
            metrics.insert(
                metric_keys::adapter_telemetry(&key),
                MetricValue::Count(value),
            );
        }

        let last_chunk = self.cache.take_last_chunk();
        let snapshot = self.stopwatch.snapshot();
        debug!(
            run_id = %self.run_id,
            cancelled,
            aborted,
            executed = statistics.executed_tests,
            "raising run completion"
        );
        self.handler.on_run_complete(RunCompleteEvent {
            run_id: self.run_id,
            statistics,
            last_chunk,
            is_cancelled: cancelled,
            is_aborted: aborted,
            error: exceptions_occurred
                .then(|| "one or more executors failed during the run".to_owned()),
            start_time: snapshot.start_time.fixed_offset(),
            elapsed: snapshot.duration,
            attachments,
            executors,
            metrics,
        })
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
