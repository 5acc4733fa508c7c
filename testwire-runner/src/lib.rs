// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core orchestration logic for the testwire execution engine.
//!
//! testwire drives a set of pluggable test executors: given file-system
//! sources or an already-selected list of test cases, it resolves which
//! executor runs what, invokes each executor in turn, batches the stream of
//! per-test events into bounded chunks, honors cancel/abort requests, and
//! reports a single completion event per run.
//!
//! The entry point is [`session::ExecutionSession`].

pub mod cache;
pub mod config;
pub mod errors;
pub mod events;
pub mod extension;
pub mod runner;
pub mod session;
mod stopwatch;
