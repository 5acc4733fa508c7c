// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events delivered to the controlling client.
//!
//! A run produces a stream of [`RunStatsChange`] notifications (one per
//! flushed result chunk) followed by exactly one [`RunCompleteEvent`].
//! Clients receive them through a [`RunEventHandler`].

use crate::errors::CompletionDeliveryError;
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::Serialize;
use std::{fmt, time::Duration};
use testwire_metadata::{AttachmentSet, ExecutorUri, RunStatistics, RunUuid, TestCase, TestResult};

/// Severity of a log message forwarded to the client.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    /// Informational output.
    Informational,

    /// Something was dropped or degraded, but the run continues.
    Warning,

    /// Something went wrong.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Informational => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// An incremental statistics notification carrying one flushed result chunk.
///
/// Produced by the result cache whenever a flush fires; the chunk and the
/// in-progress list are owned by the receiver (the cache starts over with
/// fresh buffers).
#[derive(Clone, Debug)]
pub struct RunStatsChange {
    /// Snapshot of the run statistics at flush time.
    pub statistics: RunStatistics,

    /// The results flushed in this chunk, in arrival order.
    pub chunk: Vec<TestResult>,

    /// Tests that had started but not yet produced a result at flush time.
    pub in_progress: Vec<TestCase>,
}

/// A single metric on the completion envelope.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricValue {
    /// A monotonically accumulated count.
    Count(u64),

    /// An accumulated duration.
    Duration(Duration),
}

/// Keys used in the completion envelope's metrics map.
pub mod metric_keys {
    use testwire_metadata::ExecutorUri;

    /// Total wall-clock time spent inside all executors.
    pub const TOTAL_EXECUTOR_TIME: &str = "run.executors.time-total";

    /// Number of executors the dispatch strategy resolved.
    pub const EXECUTORS_RESOLVED: &str = "run.executors.resolved";

    /// Number of executors that actually ran tests.
    pub const EXECUTORS_RAN: &str = "run.executors.ran";

    /// Time spent inside one executor.
    pub fn executor_time(uri: &ExecutorUri) -> String {
        format!("run.executor.{uri}.time")
    }

    /// Number of tests one executor executed.
    pub fn executor_tests(uri: &ExecutorUri) -> String {
        format!("run.executor.{uri}.tests")
    }

    /// Prefix for counters accumulated by the result cache's adapter
    /// telemetry.
    pub fn adapter_telemetry(key: &str) -> String {
        format!("run.adapter.{key}")
    }
}

/// The completion envelope: the single final report of a run.
///
/// Constructed exactly once per run, whether the run finished normally, was
/// cancelled, or was aborted. Always the last event delivered.
#[derive(Clone, Debug)]
pub struct RunCompleteEvent {
    /// The unique id of this run.
    pub run_id: RunUuid,

    /// Final run statistics.
    pub statistics: RunStatistics,

    /// Results that were still buffered when the run completed.
    pub last_chunk: Vec<TestResult>,

    /// The run was cancelled before all executors were invoked.
    pub is_cancelled: bool,

    /// The run was aborted: executor resolution failed, or the caller
    /// aborted explicitly.
    pub is_aborted: bool,

    /// Description of executor failures observed during the run, if any.
    pub error: Option<String>,

    /// The time at which the run started.
    pub start_time: DateTime<FixedOffset>,

    /// Wall-clock time for the whole run.
    pub elapsed: Duration,

    /// Attachments reported by executors and data collectors.
    pub attachments: Vec<AttachmentSet>,

    /// Executors that actually ran tests, in invocation order.
    pub executors: Vec<ExecutorUri>,

    /// Telemetry metrics accumulated over the run.
    pub metrics: IndexMap<String, MetricValue>,
}

/// Receives the events a run produces.
///
/// `on_stats_change` is called synchronously from inside the result cache's
/// flush path, so implementations must be fast and must not call back into
/// the cache. `on_run_complete` is called exactly once per run; returning an
/// error from it is fatal and propagates out of the run.
pub trait RunEventHandler: Send + Sync {
    /// A result chunk was flushed.
    fn on_stats_change(&self, change: RunStatsChange);

    /// A log message was produced for the client.
    fn on_log_message(&self, level: LogLevel, message: &str);

    /// The run completed. Always the last event for a run.
    fn on_run_complete(&self, event: RunCompleteEvent) -> Result<(), CompletionDeliveryError>;
}
