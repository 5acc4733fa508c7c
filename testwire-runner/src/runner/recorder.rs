// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The recorder handed to executors while they run.
//!
//! Bridges executor-reported events to the result cache, forwards log
//! messages to the client's event handler, and runs the in-process data
//! collector hooks around each test.

use crate::{
    cache::ResultCache,
    errors::DebuggerAttachError,
    events::{LogLevel, RunEventHandler},
    extension::{DebuggerLauncher, InProcCollector, TestExecutionRecorder},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use testwire_metadata::{AttachmentSet, TestCase, TestOutcome, TestResult};
use tracing::{debug, error, warn};

/// The execution recorder for one run.
///
/// One instance serves every executor invoked during the run; all methods
/// are callable from whichever thread an executor reports on.
pub struct RunRecorder {
    cache: Arc<ResultCache>,
    handler: Arc<dyn RunEventHandler>,
    collectors: Vec<Arc<dyn InProcCollector>>,
    debugger: Option<Arc<dyn DebuggerLauncher>>,
    package: Option<Utf8PathBuf>,
    attachments: Mutex<Vec<AttachmentSet>>,
}

impl RunRecorder {
    pub(crate) fn new(
        cache: Arc<ResultCache>,
        handler: Arc<dyn RunEventHandler>,
        collectors: Vec<Arc<dyn InProcCollector>>,
        debugger: Option<Arc<dyn DebuggerLauncher>>,
        package: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            cache,
            handler,
            collectors,
            debugger,
            package,
            attachments: Mutex::new(Vec::new()),
        }
    }

    /// Drains the attachments accumulated so far. Called once, while
    /// building the completion envelope.
    pub(crate) fn take_attachments(&self) -> Vec<AttachmentSet> {
        std::mem::take(
            &mut self
                .attachments
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Reports results against the logical package the run was started
    /// with, when it differs from the physical source the test was
    /// discovered in.
    fn substitute_case(&self, test_case: TestCase) -> TestCase {
        match &self.package {
            Some(package) if *package != test_case.source => test_case.with_source(package.clone()),
            _ => test_case,
        }
    }

    fn substitute_result(&self, result: TestResult) -> TestResult {
        match &self.package {
            Some(package) if *package != result.test_case.source => result.with_source(package),
            _ => result,
        }
    }
}

impl TestExecutionRecorder for RunRecorder {
    fn record_start(&self, test_case: TestCase) {
        let test_case = self.substitute_case(test_case);
        for collector in &self.collectors {
            collector.test_case_start(&test_case);
        }
        self.cache.on_test_started(test_case);
    }

    fn record_result(&self, result: TestResult) {
        let mut result = self.substitute_result(result);
        for collector in &self.collectors {
            let test_case = result.test_case.clone();
            match collector.test_case_end(result) {
                Some(updated) => result = updated,
                None => {
                    debug!(
                        test = %test_case.fully_qualified_name,
                        "test result vetoed by in-process collector"
                    );
                    self.cache.on_test_completion(&test_case);
                    return;
                }
            }
        }
        self.cache.on_new_test_result(result);
    }

    fn record_end(&self, test_case: &TestCase, outcome: TestOutcome) -> bool {
        debug!(
            test = %test_case.fully_qualified_name,
            %outcome,
            "test ended without a full result"
        );
        self.cache.on_test_completion(test_case)
    }

    fn record_attachments(&self, attachments: Vec<AttachmentSet>) {
        self.attachments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(attachments);
    }

    fn send_message(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Informational => debug!(target: "testwire::executor", "{message}"),
            LogLevel::Warning => warn!(target: "testwire::executor", "{message}"),
            LogLevel::Error => error!(target: "testwire::executor", "{message}"),
        }
        self.handler.on_log_message(level, message);
    }

    fn launch_process_with_debugger(
        &self,
        program: &Utf8Path,
        args: &[String],
    ) -> Result<u32, DebuggerAttachError> {
        match &self.debugger {
            Some(launcher) => launcher.launch(program, args),
            None => Err(DebuggerAttachError::new(
                "no debugger launcher is available for this run",
            )),
        }
    }
}
