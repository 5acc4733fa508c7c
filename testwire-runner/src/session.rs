// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The client-facing entry point for running tests.
//!
//! An [`ExecutionSession`] holds the pieces that outlive a single run (the
//! executor registry, discovery, data collectors, a debugger launcher) and
//! dispatches `start`/`cancel`/`abort` requests onto the run that is
//! currently active. Cancel and abort with no active run still deliver a
//! completion event, so a client that fires them early always hears back.

use crate::{
    cache::ResultCache,
    config::{RunConfig, RunContext},
    errors::CompletionDeliveryError,
    events::{RunCompleteEvent, RunEventHandler},
    extension::{DebuggerLauncher, ExecutorRegistry, InProcCollector, SourceDiscovery},
    runner::{DispatchStrategy, RunnerLoop, SourceDispatch, TestListDispatch},
    stopwatch,
};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use testwire_metadata::{RunStatistics, RunUuid, TestCase};
use tracing::{debug, warn};

/// Builder for an [`ExecutionSession`].
#[derive(Default)]
pub struct ExecutionSessionBuilder {
    collectors: Vec<Arc<dyn InProcCollector>>,
    debugger: Option<Arc<dyn DebuggerLauncher>>,
}

impl ExecutionSessionBuilder {
    /// Creates a builder with no collectors and no debugger launcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-process data collector. Collectors only run when the
    /// configuration enables data collection.
    pub fn add_collector(&mut self, collector: Arc<dyn InProcCollector>) -> &mut Self {
        self.collectors.push(collector);
        self
    }

    /// Sets the debugger launcher used for debug runs.
    pub fn set_debugger_launcher(&mut self, launcher: Arc<dyn DebuggerLauncher>) -> &mut Self {
        self.debugger = Some(launcher);
        self
    }

    /// Builds the session.
    pub fn build(
        &mut self,
        config: RunConfig,
        registry: Arc<dyn ExecutorRegistry>,
        discovery: Arc<dyn SourceDiscovery>,
    ) -> ExecutionSession {
        ExecutionSession {
            config,
            registry,
            discovery,
            collectors: std::mem::take(&mut self.collectors),
            debugger: self.debugger.take(),
            active_run: Mutex::new(None),
        }
    }
}

/// Orchestrates test runs for one client session.
///
/// A session runs at most one run at a time; starting a run blocks the
/// calling thread until its completion event has been delivered. `cancel`
/// and `abort` are callable from any other thread while a run is active.
pub struct ExecutionSession {
    config: RunConfig,
    registry: Arc<dyn ExecutorRegistry>,
    discovery: Arc<dyn SourceDiscovery>,
    collectors: Vec<Arc<dyn InProcCollector>>,
    debugger: Option<Arc<dyn DebuggerLauncher>>,
    active_run: Mutex<Option<Arc<RunnerLoop>>>,
}

impl ExecutionSession {
    /// Starts a run over file-system sources, keyed by the extension that
    /// contributed each source group. Blocks until the run completes.
    pub fn start_run_with_sources(
        &self,
        adapter_source_map: IndexMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
        handler: Arc<dyn RunEventHandler>,
    ) -> Result<(), CompletionDeliveryError> {
        let context = Arc::new(RunContext::new(&self.config));
        let strategy = SourceDispatch::new(
            adapter_source_map,
            Arc::clone(&self.discovery),
            Arc::clone(&context),
        );
        self.run_with_strategy(context, Box::new(strategy), handler)
    }

    /// Starts a run over an explicit list of already-discovered tests.
    /// Blocks until the run completes.
    pub fn start_run_with_tests(
        &self,
        tests: Vec<TestCase>,
        handler: Arc<dyn RunEventHandler>,
    ) -> Result<(), CompletionDeliveryError> {
        let mut context = RunContext::new(&self.config);
        if context.filter.take().is_some() {
            warn!("test-case filter is ignored for runs started from an explicit test list");
        }
        let context = Arc::new(context);
        let strategy = TestListDispatch::new(tests, Arc::clone(&context));
        self.run_with_strategy(context, Box::new(strategy), handler)
    }

    fn run_with_strategy(
        &self,
        context: Arc<RunContext>,
        strategy: Box<dyn DispatchStrategy>,
        handler: Arc<dyn RunEventHandler>,
    ) -> Result<(), CompletionDeliveryError> {
        let stats_handler = Arc::clone(&handler);
        let cache = Arc::new(ResultCache::new(
            self.config.batch_size,
            self.config.effective_batch_timeout(),
            Box::new(move |change| stats_handler.on_stats_change(change)),
        ));
        let collectors = if self.config.collect_data {
            self.collectors.clone()
        } else {
            Vec::new()
        };
        let runner = Arc::new(RunnerLoop::new(
            context,
            cache,
            Arc::clone(&self.registry),
            strategy,
            handler,
            collectors,
            self.debugger.clone(),
        ));
        debug!(run_id = %runner.run_id(), "starting run");

        *lock(&self.active_run) = Some(Arc::clone(&runner));
        let result = runner.run();
        *lock(&self.active_run) = None;
        result
    }

    /// Requests cancellation of the active run. With no run active, a
    /// synthesized cancelled completion is delivered instead so the client
    /// still observes exactly one completion.
    pub fn cancel(
        &self,
        handler: &dyn RunEventHandler,
    ) -> Result<(), CompletionDeliveryError> {
        let active = lock(&self.active_run).clone();
        match active {
            Some(runner) => {
                runner.cancel();
                Ok(())
            }
            None => {
                debug!("cancel requested with no active run");
                handler.on_run_complete(synthesized_completion(true, false))
            }
        }
    }

    /// Aborts the active run: its completion event is raised immediately
    /// with the aborted flag set. With no run active, a synthesized aborted
    /// completion is delivered instead.
    pub fn abort(
        &self,
        handler: &dyn RunEventHandler,
    ) -> Result<(), CompletionDeliveryError> {
        let active = lock(&self.active_run).clone();
        match active {
            Some(runner) => runner.abort(),
            None => {
                debug!("abort requested with no active run");
                handler.on_run_complete(synthesized_completion(false, true))
            }
        }
    }
}

/// The completion envelope for a cancel or abort that arrived with no run
/// active.
fn synthesized_completion(cancelled: bool, aborted: bool) -> RunCompleteEvent {
    let snapshot = stopwatch::stopwatch().snapshot();
    RunCompleteEvent {
        run_id: RunUuid::new_v4(),
        statistics: RunStatistics::default(),
        last_chunk: Vec::new(),
        is_cancelled: cancelled,
        is_aborted: aborted,
        error: None,
        start_time: snapshot.start_time.fixed_offset(),
        elapsed: snapshot.duration,
        attachments: Vec::new(),
        executors: Vec::new(),
        metrics: IndexMap::new(),
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::test_helpers::{
        FakeExecutor, RecordingCollector, RecordingHandler, StaticDiscovery, StaticRegistry,
    };
    use pretty_assertions::assert_eq;
    use std::num::NonZeroUsize;
    use std::time::Duration;
    use testwire_metadata::ExecutorUri;

    fn session(config: RunConfig, registry: StaticRegistry) -> ExecutionSession {
        ExecutionSessionBuilder::new().build(
            config,
            Arc::new(registry),
            Arc::new(StaticDiscovery::claim_all("executor://a")),
        )
    }

    fn test_case(name: &str, uri: &str) -> TestCase {
        TestCase::new(name, ExecutorUri::new(uri), "/tests.bin")
    }

    #[test]
    fn cancel_without_active_run_synthesizes_completion() {
        let handler = RecordingHandler::new();
        let session = session(RunConfig::default(), StaticRegistry::new());

        session.cancel(&handler).unwrap();

        let completions = handler.completions();
        assert_eq!(completions.len(), 1);
        let complete = &completions[0];
        assert!(complete.is_cancelled);
        assert!(!complete.is_aborted);
        assert_eq!(complete.statistics.executed_tests, 0);
        assert!(complete.last_chunk.is_empty());
    }

    #[test]
    fn abort_without_active_run_synthesizes_completion() {
        let handler = RecordingHandler::new();
        let session = session(RunConfig::default(), StaticRegistry::new());

        session.abort(&handler).unwrap();

        let completions = handler.completions();
        assert_eq!(completions.len(), 1);
        assert!(completions[0].is_aborted);
        assert!(!completions[0].is_cancelled);
    }

    #[test]
    fn test_list_run_streams_chunks_then_completes() {
        let executor = Arc::new(FakeExecutor::passing("executor://a"));
        let registry = StaticRegistry::new().with(&executor.uri, executor.clone());
        let config = RunConfig {
            // A pending result plus the next test's start reach the
            // threshold, so chunks stream out mid-run.
            batch_size: NonZeroUsize::new(2).unwrap(),
            batch_timeout: Duration::from_secs(3600),
            ..RunConfig::default()
        };
        let session = session(config, registry);
        let handler = Arc::new(RecordingHandler::new());

        let tests = vec![
            test_case("t1", "executor://a"),
            test_case("t2", "executor://a"),
            test_case("t3", "executor://a"),
        ];
        session.start_run_with_tests(tests, handler.clone()).unwrap();

        let completions = handler.completions();
        assert_eq!(completions.len(), 1);
        let complete = &completions[0];
        assert_eq!(complete.statistics.executed_tests, 3);
        assert!(handler.completion_is_last());

        // Every result arrives exactly once, between the streamed chunks and
        // the completion's last chunk.
        let mut names: Vec<String> = handler
            .flushed_chunks()
            .into_iter()
            .flatten()
            .chain(complete.last_chunk.iter().cloned())
            .map(|result| result.test_case.fully_qualified_name)
            .collect();
        names.sort_unstable();
        assert_eq!(names, ["t1", "t2", "t3"]);

        // The session is idle again.
        assert!(lock(&session.active_run).is_none());
    }

    #[test]
    fn collectors_run_only_when_data_collection_is_enabled() {
        let executor = Arc::new(FakeExecutor::passing("executor://a"));
        let collector = Arc::new(RecordingCollector::new());

        for (collect_data, expected_sessions) in [(false, 0), (true, 1)] {
            let registry = StaticRegistry::new().with(&executor.uri, executor.clone());
            let config = RunConfig {
                collect_data,
                ..RunConfig::default()
            };
            let session = ExecutionSessionBuilder::new()
                .add_collector(collector.clone())
                .build(
                    config,
                    Arc::new(registry),
                    Arc::new(StaticDiscovery::claim_all("executor://a")),
                );
            let handler = Arc::new(RecordingHandler::new());
            session
                .start_run_with_tests(vec![test_case("t1", "executor://a")], handler)
                .unwrap();
            assert_eq!(
                collector.session_starts.load(std::sync::atomic::Ordering::SeqCst),
                expected_sessions
            );
        }
    }

    #[test]
    fn source_run_goes_through_discovery() {
        let executor = Arc::new(FakeExecutor::passing("executor://a").with_tests_per_source(2));
        let registry = StaticRegistry::new().with(&executor.uri, executor.clone());
        let session = session(RunConfig::default(), registry);
        let handler = Arc::new(RecordingHandler::new());

        let dir = camino_tempfile::Utf8TempDir::new().unwrap();
        let source = dir.path().join("tests.bin");
        std::fs::write(&source, b"bin").unwrap();
        let mut map = IndexMap::new();
        map.insert(Utf8PathBuf::from("/ext/adapter.ext"), vec![source]);

        session.start_run_with_sources(map, handler.clone()).unwrap();

        assert_eq!(executor.invocation_count(), 1);
        let complete = &handler.completions()[0];
        assert_eq!(complete.statistics.executed_tests, 2);
        assert!(!complete.is_aborted);
    }
}
