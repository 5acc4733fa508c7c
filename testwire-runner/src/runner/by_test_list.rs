// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatch strategy for runs started from an explicit list of tests.
//!
//! Every test already carries the executor URI it was discovered with, so
//! there is no validation or discovery step: tests are grouped by URI in
//! first-appearance order and handed to their executors as-is.

use crate::{
    config::RunContext,
    events::RunEventHandler,
    extension::RunRequest,
    runner::DispatchStrategy,
};
use indexmap::IndexMap;
use std::sync::Arc;
use testwire_metadata::{ExecutorReference, TestCase};

/// Groups an explicit test list by the executor each test was discovered
/// with.
pub struct TestListDispatch {
    tests: Vec<TestCase>,
    context: Arc<RunContext>,
}

impl TestListDispatch {
    /// Creates the strategy for one run.
    pub fn new(tests: Vec<TestCase>, context: Arc<RunContext>) -> Self {
        Self { tests, context }
    }
}

impl DispatchStrategy for TestListDispatch {
    fn executor_map(
        &mut self,
        _handler: &dyn RunEventHandler,
    ) -> Option<IndexMap<ExecutorReference, RunRequest>> {
        // Filters are a by-source concern; the session warns and drops them
        // before a test-list run starts.
        debug_assert!(
            self.context.filter.is_none(),
            "test-list runs do not support a test-case filter"
        );
        let mut map: IndexMap<ExecutorReference, RunRequest> = IndexMap::new();
        for test in &self.tests {
            let request = map
                .entry(ExecutorReference::unspecified(test.executor.clone()))
                .or_insert_with(|| RunRequest::Tests(Vec::new()));
            if let RunRequest::Tests(tests) = request {
                tests.push(test.clone());
            }
        }
        Some(map)
    }
}
