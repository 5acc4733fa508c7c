// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long a run takes.
//!
//! Runs need to report both a start time and an elapsed duration. For that we
//! use a combination of a realtime clock (`chrono`) and a monotonic clock
//! (`Instant`): the start time comes from the former, elapsed time from the
//! latter.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            // These two syscalls happen imperceptibly close to each other,
            // which is good enough for our purposes.
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    pub(crate) fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            duration: self.instant.elapsed(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct StopwatchSnapshot {
    pub(crate) start_time: DateTime<Local>,
    pub(crate) duration: Duration,
}
