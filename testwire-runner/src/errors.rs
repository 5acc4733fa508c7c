// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the testwire runner.

use std::error;
use thiserror::Error;

type BoxedError = Box<dyn error::Error + Send + Sync>;

/// An error produced while invoking a single executor.
///
/// These are always recovered locally by the invocation loop: the failure is
/// logged, surfaced as a listener warning, and recorded on the completion
/// envelope, but other executors still run.
#[derive(Debug, Error)]
#[error("executor invocation failed: {message}")]
pub struct ExecutorError {
    message: String,
    #[source]
    source: Option<BoxedError>,
}

impl ExecutorError {
    /// Creates a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new error wrapping an underlying cause.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxedError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// An error produced while delivering the run-completion event.
///
/// This is the one failure the loop does not recover from: by the time
/// completion is being reported, the run's own error handling has already
/// finished, so the error propagates to the caller.
#[derive(Debug, Error)]
#[error("failed to deliver run completion: {message}")]
pub struct CompletionDeliveryError {
    message: String,
    #[source]
    source: Option<BoxedError>,
}

impl CompletionDeliveryError {
    /// Creates a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new error wrapping an underlying cause.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxedError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// An error produced while mapping sources to discoverers.
///
/// Fatal for the run: the by-source strategy treats it as a failed executor
/// resolution and the run completes as aborted.
#[derive(Debug, Error)]
#[error("source discovery failed: {message}")]
pub struct DiscoveryError {
    message: String,
    #[source]
    source: Option<BoxedError>,
}

impl DiscoveryError {
    /// Creates a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new error wrapping an underlying cause.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxedError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// An error produced while attaching a debugger or launching a process under
/// one.
///
/// Recovered locally: the failure is logged as a warning and the run
/// continues without the debugger.
#[derive(Debug, Error)]
#[error("debugger operation failed: {message}")]
pub struct DebuggerAttachError {
    message: String,
    #[source]
    source: Option<BoxedError>,
}

impl DebuggerAttachError {
    /// Creates a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new error wrapping an underlying cause.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxedError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}
