// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run configuration and the per-run execution context.
//!
//! [`RunConfig`] is the already-parsed snapshot of run settings handed to an
//! [`ExecutionSession`](crate::session::ExecutionSession) at construction.
//! There is no ambient state: everything a run needs to know arrives through
//! this value. [`RunContext`] is the immutable per-run view shared by
//! reference with every executor invocation.

use camino::Utf8PathBuf;
use serde::Deserialize;
use std::{num::NonZeroUsize, time::Duration};

/// Threading requirement for executor invocations.
///
/// Some legacy executors require exclusive-affinity execution: each
/// invocation runs on a dedicated worker thread that the loop joins. The
/// default is to invoke executors on the calling thread.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionAffinity {
    /// Invoke executors on the calling thread.
    #[default]
    Default,

    /// Invoke each executor on a dedicated worker thread.
    Exclusive,
}

/// Snapshot of execution settings for a session.
///
/// Deserializable so a host can read it straight out of its settings store;
/// parsing the settings themselves (e.g. a run-settings document) is the
/// host's business.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunConfig {
    /// Run executors in an isolated host.
    pub in_isolation: bool,

    /// Keep the executor host alive after the run.
    pub keep_alive: bool,

    /// Invoke in-process data collectors around the run and around each
    /// test.
    pub collect_data: bool,

    /// The run is being debugged: attach a debugger to the host before
    /// invoking executors that need it.
    pub debug: bool,

    /// Optional test-case filter expression. Only meaningful for runs
    /// started from sources; runs started from an explicit test list must
    /// leave this unset.
    pub test_case_filter: Option<String>,

    /// Threading requirement for executor invocations.
    pub affinity: ExecutionAffinity,

    /// Logical package to report results against, when it differs from the
    /// physical binaries tests were discovered in.
    pub package: Option<Utf8PathBuf>,

    /// Directory test results and attachments are rooted in.
    pub results_directory: Option<Utf8PathBuf>,

    /// Directory of the solution/workspace under test.
    pub solution_directory: Option<Utf8PathBuf>,

    /// Number of buffered events (pending results plus in-progress tests)
    /// that triggers a result-chunk flush.
    pub batch_size: NonZeroUsize,

    /// Longest time a non-empty result buffer may go without a flush.
    #[serde(with = "humantime_serde")]
    pub batch_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            in_isolation: false,
            keep_alive: false,
            collect_data: false,
            debug: false,
            test_case_filter: None,
            affinity: ExecutionAffinity::Default,
            package: None,
            results_directory: None,
            solution_directory: None,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

/// Default number of buffered events that triggers a flush.
pub const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(10).unwrap();

/// Default longest time a non-empty buffer may go without a flush.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(1500);

/// Largest accepted batch timeout. Timeouts beyond this would overflow the
/// millisecond range of the timers some hosts configure this from.
pub const MAX_BATCH_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

const MIN_BATCH_TIMEOUT: Duration = Duration::from_millis(1);

impl RunConfig {
    /// The batch timeout, clamped to `[1ms, MAX_BATCH_TIMEOUT]`.
    pub fn effective_batch_timeout(&self) -> Duration {
        self.batch_timeout.clamp(MIN_BATCH_TIMEOUT, MAX_BATCH_TIMEOUT)
    }
}

/// Immutable per-run view of the configuration.
///
/// Built once at run start and shared by reference with every executor
/// invocation; never mutated for the lifetime of the run.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// Run executors in an isolated host.
    pub in_isolation: bool,

    /// Keep the executor host alive after the run.
    pub keep_alive: bool,

    /// In-process data collection is enabled for this run.
    pub data_collection_enabled: bool,

    /// The run is being debugged.
    pub debug: bool,

    /// Test-case filter expression, if any.
    pub filter: Option<String>,

    /// Threading requirement for executor invocations.
    pub affinity: ExecutionAffinity,

    /// Logical package to report results against.
    pub package: Option<Utf8PathBuf>,

    /// Directory test results and attachments are rooted in.
    pub results_directory: Option<Utf8PathBuf>,

    /// Directory of the solution/workspace under test.
    pub solution_directory: Option<Utf8PathBuf>,
}

impl RunContext {
    /// Builds the per-run context from the session configuration.
    pub fn new(config: &RunConfig) -> Self {
        Self {
            in_isolation: config.in_isolation,
            keep_alive: config.keep_alive,
            data_collection_enabled: config.collect_data,
            debug: config.debug,
            filter: config.test_case_filter.clone(),
            affinity: config.affinity,
            package: config.package.clone(),
            results_directory: config.results_directory.clone(),
            solution_directory: config.solution_directory.clone(),
        }
    }
}
