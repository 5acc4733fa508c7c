// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared fakes for runner tests.

use crate::{
    config::RunContext,
    errors::{CompletionDeliveryError, DebuggerAttachError, DiscoveryError, ExecutorError},
    events::{LogLevel, RunCompleteEvent, RunEventHandler, RunStatsChange},
    extension::{
        DebuggerLauncher, DiscovererClaim, ExecutorRegistry, InProcCollector, RunRequest,
        SourceDiscovery, TestExecutionRecorder, TestExecutor,
    },
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};
use testwire_metadata::{ExecutorUri, TestCase, TestOutcome, TestResult};

/// Everything a handler observed, in delivery order.
#[derive(Debug)]
pub(crate) enum HandlerEvent {
    Stats(RunStatsChange),
    Log(LogLevel, String),
    Complete(RunCompleteEvent),
}

/// An event handler that records everything it receives.
#[derive(Debug, Default)]
pub(crate) struct RecordingHandler {
    pub(crate) events: Mutex<Vec<HandlerEvent>>,
    pub(crate) fail_completion: AtomicBool,
}

impl RecordingHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn rejecting_completion() -> Self {
        let handler = Self::default();
        handler.fail_completion.store(true, Ordering::SeqCst);
        handler
    }

    fn events(&self) -> std::sync::MutexGuard<'_, Vec<HandlerEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn completions(&self) -> Vec<RunCompleteEvent> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                HandlerEvent::Complete(complete) => Some(complete.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn messages(&self, level: LogLevel) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                HandlerEvent::Log(l, message) if *l == level => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn flushed_chunks(&self) -> Vec<Vec<TestResult>> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                HandlerEvent::Stats(change) => Some(change.chunk.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether the completion event was the last event delivered.
    pub(crate) fn completion_is_last(&self) -> bool {
        matches!(self.events().last(), Some(HandlerEvent::Complete(_)))
    }
}

impl RunEventHandler for RecordingHandler {
    fn on_stats_change(&self, change: RunStatsChange) {
        self.events().push(HandlerEvent::Stats(change));
    }

    fn on_log_message(&self, level: LogLevel, message: &str) {
        self.events()
            .push(HandlerEvent::Log(level, message.to_owned()));
    }

    fn on_run_complete(&self, event: RunCompleteEvent) -> Result<(), CompletionDeliveryError> {
        if self.fail_completion.load(Ordering::SeqCst) {
            return Err(CompletionDeliveryError::new("handler rejected completion"));
        }
        self.events().push(HandlerEvent::Complete(event));
        Ok(())
    }
}

/// An executor that reports a passing result for every test or fabricated
/// source test, or fails outright.
pub(crate) struct FakeExecutor {
    pub(crate) uri: ExecutorUri,
    fail_with: Option<String>,
    tests_per_source: usize,
    pub(crate) invocations: AtomicUsize,
    pub(crate) cancel_requests: AtomicUsize,
    attach_decision: Option<bool>,
    pub(crate) invoked_on_thread: Mutex<Option<String>>,
}

impl FakeExecutor {
    pub(crate) fn passing(uri: &str) -> Self {
        Self {
            uri: ExecutorUri::new(uri),
            fail_with: None,
            tests_per_source: 1,
            invocations: AtomicUsize::new(0),
            cancel_requests: AtomicUsize::new(0),
            attach_decision: None,
            invoked_on_thread: Mutex::new(None),
        }
    }

    pub(crate) fn failing(uri: &str, message: &str) -> Self {
        Self {
            fail_with: Some(message.to_owned()),
            ..Self::passing(uri)
        }
    }

    pub(crate) fn with_tests_per_source(mut self, count: usize) -> Self {
        self.tests_per_source = count;
        self
    }

    pub(crate) fn with_attach_decision(mut self, decision: Option<bool>) -> Self {
        self.attach_decision = decision;
        self
    }

    pub(crate) fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl TestExecutor for FakeExecutor {
    fn run(
        &self,
        request: &RunRequest,
        _context: &RunContext,
        recorder: &dyn TestExecutionRecorder,
    ) -> Result<(), ExecutorError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        *self
            .invoked_on_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) =
            thread::current().name().map(str::to_owned);
        if let Some(message) = &self.fail_with {
            return Err(ExecutorError::new(message.clone()));
        }
        match request {
            RunRequest::Tests(tests) => {
                for test in tests {
                    recorder.record_start(test.clone());
                    recorder.record_result(TestResult::new(
                        test.clone(),
                        TestOutcome::Passed,
                        Duration::from_millis(1),
                    ));
                }
            }
            RunRequest::Sources(sources) => {
                for source in sources {
                    for index in 0..self.tests_per_source {
                        let test = TestCase::new(
                            format!("{source}::t{index}"),
                            self.uri.clone(),
                            source.clone(),
                        );
                        recorder.record_start(test.clone());
                        recorder.record_result(TestResult::new(
                            test,
                            TestOutcome::Passed,
                            Duration::from_millis(1),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancel_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn should_attach_debugger(&self, _request: &RunRequest, _context: &RunContext) -> Option<bool> {
        self.attach_decision
    }
}

/// An executor that blocks until cancelled.
pub(crate) struct BlockingExecutor {
    pub(crate) uri: ExecutorUri,
    pub(crate) started: AtomicBool,
    pub(crate) cancelled: AtomicBool,
}

impl BlockingExecutor {
    pub(crate) fn new(uri: &str) -> Self {
        Self {
            uri: ExecutorUri::new(uri),
            started: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }
}

impl TestExecutor for BlockingExecutor {
    fn run(
        &self,
        _request: &RunRequest,
        _context: &RunContext,
        _recorder: &dyn TestExecutionRecorder,
    ) -> Result<(), ExecutorError> {
        self.started.store(true, Ordering::SeqCst);
        while !self.cancelled.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// An executor that panics mid-invocation.
pub(crate) struct PanickingExecutor {
    pub(crate) uri: ExecutorUri,
}

impl TestExecutor for PanickingExecutor {
    fn run(
        &self,
        _request: &RunRequest,
        _context: &RunContext,
        _recorder: &dyn TestExecutionRecorder,
    ) -> Result<(), ExecutorError> {
        panic!("executor blew up");
    }

    fn cancel(&self) {}
}

/// A registry over a fixed set of executors.
#[derive(Default)]
pub(crate) struct StaticRegistry {
    executors: IndexMap<ExecutorUri, Arc<dyn TestExecutor>>,
}

impl StaticRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, uri: &ExecutorUri, executor: Arc<dyn TestExecutor>) -> Self {
        self.executors.insert(uri.clone(), executor);
        self
    }
}

impl ExecutorRegistry for StaticRegistry {
    fn resolve(&self, uri: &ExecutorUri) -> Option<Arc<dyn TestExecutor>> {
        self.executors.get(uri).cloned()
    }
}

/// A discovery source that returns a fixed set of claims (or fails).
pub(crate) struct StaticDiscovery {
    claims: Vec<DiscovererClaim>,
    fail_with: Option<String>,
}

impl StaticDiscovery {
    pub(crate) fn claiming(claims: Vec<DiscovererClaim>) -> Self {
        Self {
            claims,
            fail_with: None,
        }
    }

    /// Claims every source it is shown under one discoverer nominating
    /// `uri`.
    pub(crate) fn claim_all(uri: &str) -> Self {
        Self {
            claims: vec![DiscovererClaim {
                discoverer: "static".to_owned(),
                default_executor: Some(ExecutorUri::new(uri)),
                sources: Vec::new(),
            }],
            fail_with: None,
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            claims: Vec::new(),
            fail_with: Some(message.to_owned()),
        }
    }
}

impl SourceDiscovery for StaticDiscovery {
    fn map_sources(
        &self,
        _extension: &Utf8Path,
        sources: &[Utf8PathBuf],
    ) -> Result<Vec<DiscovererClaim>, DiscoveryError> {
        if let Some(message) = &self.fail_with {
            return Err(DiscoveryError::new(message.clone()));
        }
        Ok(self
            .claims
            .iter()
            .map(|claim| DiscovererClaim {
                sources: if claim.sources.is_empty() {
                    sources.to_vec()
                } else {
                    claim.sources.clone()
                },
                ..claim.clone()
            })
            .collect())
    }
}

/// A collector that counts its hooks and optionally vetoes every result.
#[derive(Default)]
pub(crate) struct RecordingCollector {
    pub(crate) session_starts: AtomicUsize,
    pub(crate) session_ends: AtomicUsize,
    pub(crate) test_starts: AtomicUsize,
    pub(crate) test_ends: AtomicUsize,
    veto: bool,
}

impl RecordingCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn vetoing() -> Self {
        Self {
            veto: true,
            ..Self::default()
        }
    }

    pub(crate) fn test_ends(&self) -> usize {
        self.test_ends.load(Ordering::SeqCst)
    }
}

impl InProcCollector for RecordingCollector {
    fn session_start(&self) {
        self.session_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn session_end(&self) {
        self.session_ends.fetch_add(1, Ordering::SeqCst);
    }

    fn test_case_start(&self, _test_case: &TestCase) {
        self.test_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn test_case_end(&self, result: TestResult) -> Option<TestResult> {
        self.test_ends.fetch_add(1, Ordering::SeqCst);
        if self.veto { None } else { Some(result) }
    }
}

/// A debugger launcher that records attach requests.
#[derive(Default)]
pub(crate) struct FakeDebugger {
    pub(crate) attach_requests: AtomicUsize,
}

impl FakeDebugger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach_count(&self) -> usize {
        self.attach_requests.load(Ordering::SeqCst)
    }
}

impl DebuggerLauncher for FakeDebugger {
    fn attach_to_host(&self) -> Result<(), DebuggerAttachError> {
        self.attach_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn launch(&self, _program: &Utf8Path, _args: &[String]) -> Result<u32, DebuggerAttachError> {
        Ok(4242)
    }
}
