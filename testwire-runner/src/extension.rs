// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator interfaces consumed by the orchestration core.
//!
//! How executors and discoverers are located, loaded, or hosted (in-process,
//! isolated, or remote) is entirely the host's business: the core only ever
//! sees the traits in this module.

use crate::{
    config::RunContext,
    errors::{DebuggerAttachError, DiscoveryError, ExecutorError},
    events::LogLevel,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use testwire_metadata::{AttachmentSet, ExecutorUri, TestCase, TestOutcome, TestResult};

/// The work handed to one executor invocation: either raw sources or an
/// explicit list of test cases.
#[derive(Clone, Debug)]
pub enum RunRequest {
    /// Run every test found in these sources.
    Sources(Vec<Utf8PathBuf>),

    /// Run exactly these tests.
    Tests(Vec<TestCase>),
}

impl RunRequest {
    /// Number of sources or tests in this request.
    pub fn len(&self) -> usize {
        match self {
            Self::Sources(sources) => sources.len(),
            Self::Tests(tests) => tests.len(),
        }
    }

    /// Whether the request carries no work at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A test executor plugin.
///
/// Implementations run tests and report progress through the
/// [`TestExecutionRecorder`] they are handed. `run` blocks until the
/// invocation is finished; the loop imposes no timeout.
pub trait TestExecutor: Send + Sync {
    /// Runs the tests described by `request`, reporting into `recorder`.
    fn run(
        &self,
        request: &RunRequest,
        context: &RunContext,
        recorder: &dyn TestExecutionRecorder,
    ) -> Result<(), ExecutorError>;

    /// Cooperatively cancels an in-flight `run` call. Must not block.
    fn cancel(&self);

    /// Whether the host should attach a debugger before this invocation.
    ///
    /// `None` means the executor does not implement the extended capability
    /// (a legacy executor); the loop then attaches unconditionally on debug
    /// runs. `Some(decision)` means the executor manages its own
    /// debugger-attach decision.
    fn should_attach_debugger(&self, _request: &RunRequest, _context: &RunContext) -> Option<bool> {
        None
    }
}

/// Resolves executor URIs to loaded executor instances.
///
/// Populated by the host's plugin machinery at process start; the core never
/// learns how instances come to exist.
pub trait ExecutorRegistry: Send + Sync {
    /// Returns the executor registered for `uri`, if any.
    fn resolve(&self, uri: &ExecutorUri) -> Option<Arc<dyn TestExecutor>>;
}

/// One discoverer's claim over a subset of the sources it was shown.
#[derive(Clone, Debug)]
pub struct DiscovererClaim {
    /// Display name of the discoverer, for diagnostics.
    pub discoverer: String,

    /// The executor URI this discoverer nominates for its sources. A
    /// discoverer without a default executor cannot contribute to a run.
    pub default_executor: Option<ExecutorUri>,

    /// The sources this discoverer claimed.
    pub sources: Vec<Utf8PathBuf>,
}

/// Maps sources to the discoverers that claim them.
pub trait SourceDiscovery: Send + Sync {
    /// Returns each discoverer's claim over `sources` for the given
    /// extension. An `Err` is fatal for the run.
    fn map_sources(
        &self,
        extension: &Utf8Path,
        sources: &[Utf8PathBuf],
    ) -> Result<Vec<DiscovererClaim>, DiscoveryError>;
}

/// An in-process data collector.
///
/// Hooks are invoked around the run and around each test when data
/// collection is enabled. `test_case_end` may veto a result (return `None`)
/// or substitute a mutated one.
pub trait InProcCollector: Send + Sync {
    /// The run session is starting.
    fn session_start(&self);

    /// The run session ended. Called regardless of outcome.
    fn session_end(&self);

    /// A test is about to start.
    fn test_case_start(&self, test_case: &TestCase);

    /// A test produced a result. Returns the (possibly mutated) result to
    /// record, or `None` to veto it.
    fn test_case_end(&self, result: TestResult) -> Option<TestResult>;
}

/// Attaches debuggers on behalf of executors.
pub trait DebuggerLauncher: Send + Sync {
    /// Attaches a debugger to the process hosting the executors.
    fn attach_to_host(&self) -> Result<(), DebuggerAttachError>;

    /// Launches a process with a debugger attached, returning its pid.
    fn launch(&self, program: &Utf8Path, args: &[String]) -> Result<u32, DebuggerAttachError>;
}

/// The sink an executor reports into while running.
///
/// Backed by the result cache, the client's event handler, and (when
/// enabled) the in-process data collectors.
pub trait TestExecutionRecorder: Send + Sync {
    /// Records that a test started running.
    fn record_start(&self, test_case: TestCase);

    /// Records a finished test's result.
    fn record_result(&self, result: TestResult);

    /// Records that a test ended without a full result (e.g. on an executor
    /// error). Returns whether the test was actually in progress.
    fn record_end(&self, test_case: &TestCase, outcome: TestOutcome) -> bool;

    /// Records attachments produced outside any single test result.
    fn record_attachments(&self, attachments: Vec<AttachmentSet>);

    /// Sends a log message to the controlling client.
    fn send_message(&self, level: LogLevel, message: &str);

    /// Launches a process with a debugger attached, returning its pid.
    fn launch_process_with_debugger(
        &self,
        program: &Utf8Path,
        args: &[String],
    ) -> Result<u32, DebuggerAttachError>;
}
