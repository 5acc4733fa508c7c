// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatch strategy for runs started from file-system sources.
//!
//! Sources are validated first, then discovery decides which executor URI
//! claims each surviving source. Invalid sources, unclaimed sources, and
//! duplicate executor claims are dropped with a warning rather than failing
//! the run. This is the only strategy that supports a test-case filter
//! expression; the filter travels to executors on the run context.

use crate::{
    config::RunContext,
    events::{LogLevel, RunEventHandler},
    extension::{RunRequest, SourceDiscovery},
    runner::DispatchStrategy,
};
use camino::Utf8PathBuf;
use indexmap::{IndexMap, IndexSet, map::Entry};
use itertools::Itertools;
use std::sync::Arc;
use testwire_metadata::ExecutorReference;
use tracing::{debug, error, warn};

/// Resolves executors by discovering over an {extension → sources} map.
pub struct SourceDispatch {
    adapter_source_map: IndexMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
    discovery: Arc<dyn SourceDiscovery>,
    context: Arc<RunContext>,
    /// Sources that made it into the executor map, for the completion-time
    /// "no tests available" warning.
    resolved_sources: Vec<Utf8PathBuf>,
}

impl SourceDispatch {
    /// Creates the strategy for one run.
    pub fn new(
        adapter_source_map: IndexMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
        discovery: Arc<dyn SourceDiscovery>,
        context: Arc<RunContext>,
    ) -> Self {
        Self {
            adapter_source_map,
            discovery,
            context,
            resolved_sources: Vec::new(),
        }
    }
}

impl DispatchStrategy for SourceDispatch {
    fn executor_map(
        &mut self,
        handler: &dyn RunEventHandler,
    ) -> Option<IndexMap<ExecutorReference, RunRequest>> {
        let mut map: IndexMap<ExecutorReference, RunRequest> = IndexMap::new();
        if let Some(filter) = &self.context.filter {
            // The filter itself is applied inside executors; it reaches them
            // on the run context.
            debug!(%filter, "run carries a test-case filter");
        }

        for (extension, sources) in &self.adapter_source_map {
            let valid: Vec<Utf8PathBuf> = sources
                .iter()
                .filter(|source| {
                    let found = source.exists();
                    if !found {
                        handler.on_log_message(
                            LogLevel::Warning,
                            &format!("no tests available in source {source}: file not found"),
                        );
                        warn!(%source, "dropping source: file not found");
                    }
                    found
                })
                .cloned()
                .collect();
            if valid.is_empty() {
                continue;
            }

            let claims = match self.discovery.map_sources(extension, &valid) {
                Ok(claims) => claims,
                Err(err) => {
                    handler.on_log_message(
                        LogLevel::Error,
                        &format!("discovery failed for extension {extension}: {err}"),
                    );
                    error!(%extension, "source discovery failed: {err}");
                    return None;
                }
            };

            let mut claimed: IndexSet<Utf8PathBuf> = IndexSet::new();
            for claim in claims {
                let Some(uri) = claim.default_executor else {
                    handler.on_log_message(
                        LogLevel::Warning,
                        &format!(
                            "discoverer {} does not name a default executor, \
                             dropping {} source(s)",
                            claim.discoverer,
                            claim.sources.len()
                        ),
                    );
                    continue;
                };
                claimed.extend(claim.sources.iter().cloned());
                match map.entry(ExecutorReference::from_extension(uri, extension.clone())) {
                    Entry::Occupied(entry) => {
                        handler.on_log_message(
                            LogLevel::Warning,
                            &format!(
                                "executor {} is already claimed by another discoverer for \
                                 {extension}, ignoring the claim from discoverer {}",
                                entry.key().uri,
                                claim.discoverer
                            ),
                        );
                    }
                    Entry::Vacant(entry) => {
                        self.resolved_sources.extend(claim.sources.iter().cloned());
                        entry.insert(RunRequest::Sources(claim.sources));
                    }
                }
            }

            for source in &valid {
                if !claimed.contains(source) {
                    handler.on_log_message(
                        LogLevel::Warning,
                        &format!("no tests available in source {source}: no discoverer claimed it"),
                    );
                    warn!(%source, "dropping source: no discoverer claimed it");
                }
            }
        }

        Some(map)
    }

    fn before_run_complete(
        &self,
        executed_tests: u64,
        cancelled: bool,
        handler: &dyn RunEventHandler,
    ) {
        if executed_tests == 0 && !cancelled && !self.resolved_sources.is_empty() {
            handler.on_log_message(
                LogLevel::Warning,
                &format!(
                    "no tests available in sources: {}",
                    self.resolved_sources.iter().join(", ")
                ),
            );
        }
    }
}
