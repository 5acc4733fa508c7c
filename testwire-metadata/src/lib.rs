// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Shared data model for the testwire execution engine.
//!
//! These types cross the boundary between the orchestration core
//! ([`testwire-runner`](https://docs.rs/testwire-runner)) and whatever
//! transport or client sits in front of it, so everything here is plain data
//! with serde derives.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// UUID kind for a single test run.
pub enum RunKind {}

impl TypedUuidKind for RunKind {
    #[inline]
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("testwire-run");
        TAG
    }
}

/// Unique identifier for a test run.
pub type RunUuid = TypedUuid<RunKind>;

/// UUID kind for a test case.
pub enum TestCaseKind {}

impl TypedUuidKind for TestCaseKind {
    #[inline]
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("testwire-test-case");
        TAG
    }
}

/// Unique identifier for a discovered test case.
pub type TestCaseUuid = TypedUuid<TestCaseKind>;

/// A URI-like key identifying the executor plugin that can run a set of
/// tests.
///
/// Executor URIs are compared case-insensitively by the original platform, so
/// the key is normalized to ASCII lowercase at construction. Two references
/// that differ only in case are the same executor.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ExecutorUri(String);

impl ExecutorUri {
    /// Creates a new executor URI, normalizing it to lowercase.
    pub fn new(uri: impl Into<String>) -> Self {
        let mut uri = uri.into();
        uri.make_ascii_lowercase();
        Self(uri)
    }

    /// Returns the normalized URI as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ExecutorUri {
    fn from(uri: String) -> Self {
        Self::new(uri)
    }
}

impl From<ExecutorUri> for String {
    fn from(uri: ExecutorUri) -> Self {
        uri.0
    }
}

impl fmt::Display for ExecutorUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The extension component of an [`ExecutorReference`].
///
/// Runs started from an explicit test list don't select executors
/// per-extension, so they always use [`ExtensionQualifier::Unspecified`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionQualifier {
    /// No extension component (by-test-list runs).
    Unspecified,

    /// The extension that contributed the executor, identified by its source
    /// path.
    Source(Utf8PathBuf),
}

impl fmt::Display for ExtensionQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => f.write_str("(unspecified)"),
            Self::Source(path) => f.write_str(path.as_str()),
        }
    }
}

/// Identifies which loaded executor plugin should run a group of sources or
/// tests.
///
/// The (URI, extension) pair is unique per run and is used as a map key to
/// deduplicate executor instances.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct ExecutorReference {
    /// The executor URI.
    pub uri: ExecutorUri,

    /// The extension that contributed this executor.
    pub extension: ExtensionQualifier,
}

impl ExecutorReference {
    /// Creates a reference with no extension component.
    pub fn unspecified(uri: ExecutorUri) -> Self {
        Self {
            uri,
            extension: ExtensionQualifier::Unspecified,
        }
    }

    /// Creates a reference qualified by the extension source that contributed
    /// the executor.
    pub fn from_extension(uri: ExecutorUri, extension: impl Into<Utf8PathBuf>) -> Self {
        Self {
            uri,
            extension: ExtensionQualifier::Source(extension.into()),
        }
    }
}

impl fmt::Display for ExecutorReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.uri, self.extension)
    }
}

/// A single discovered test case.
///
/// Immutable once discovered. The only mutation the core ever performs is
/// [`TestCase::with_source`], which produces a clone with a substituted
/// source for runs started against a logical package rather than the physical
/// binary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique identifier for this test case.
    pub id: TestCaseUuid,

    /// The fully qualified name of the test.
    pub fully_qualified_name: String,

    /// A human-readable display name; defaults to the fully qualified name.
    pub display_name: String,

    /// The URI of the executor that can run this test.
    pub executor: ExecutorUri,

    /// The source (file path or logical container) the test was discovered
    /// in.
    pub source: Utf8PathBuf,

    /// Traits/categories attached to the test, in declaration order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub traits: IndexMap<String, String>,
}

impl TestCase {
    /// Creates a new test case with a fresh id.
    pub fn new(
        fully_qualified_name: impl Into<String>,
        executor: ExecutorUri,
        source: impl Into<Utf8PathBuf>,
    ) -> Self {
        let fully_qualified_name = fully_qualified_name.into();
        Self {
            id: TestCaseUuid::new_v4(),
            display_name: fully_qualified_name.clone(),
            fully_qualified_name,
            executor,
            source: source.into(),
            traits: IndexMap::new(),
        }
    }

    /// Returns a clone of this test case with the source replaced.
    ///
    /// Used when the run was started with a logical package that differs from
    /// the physical binary the test was discovered in: results are reported
    /// against the package the caller asked about.
    pub fn with_source(&self, source: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..self.clone()
        }
    }
}

/// The outcome of running a single test.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestOutcome {
    /// The test has no outcome (e.g. it was only observed starting).
    None,

    /// The test passed.
    Passed,

    /// The test failed.
    Failed,

    /// The test was skipped.
    Skipped,

    /// The test was selected but could not be found by its executor.
    NotFound,
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::NotFound => "not-found",
        };
        f.write_str(s)
    }
}

/// The result of running a single test, produced by an executor.
///
/// The core never mutates a result except for the source-substitution clone
/// ([`TestResult::with_source`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// The test case this result belongs to.
    pub test_case: TestCase,

    /// The outcome of the test.
    pub outcome: TestOutcome,

    /// How long the test took to run.
    pub duration: Duration,

    /// The error message, if the test failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Informational messages attached to the result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,

    /// Attachments produced while running this test.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentSet>,
}

impl TestResult {
    /// Creates a new result for the given test case.
    pub fn new(test_case: TestCase, outcome: TestOutcome, duration: Duration) -> Self {
        Self {
            test_case,
            outcome,
            duration,
            error_message: None,
            messages: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Returns a clone with the test case's source replaced.
    pub fn with_source(&self, source: &Utf8Path) -> Self {
        Self {
            test_case: self.test_case.with_source(source),
            ..self.clone()
        }
    }
}

/// A single attachment reported by an executor or a data collector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// The attachment URI (usually a file path).
    pub uri: String,

    /// A description of the attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named group of attachments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentSet {
    /// The display name of this set.
    pub display_name: String,

    /// The attachments in this set.
    pub attachments: Vec<Attachment>,
}

/// Running counts for a test run: one counter per outcome plus a total.
///
/// Counts only ever increase during a run; the cache that owns the statistics
/// hands out read-only snapshots (clones).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// The total number of tests executed so far.
    pub executed_tests: u64,

    /// Per-outcome counts, in first-seen order.
    pub outcomes: IndexMap<TestOutcome, u64>,
}

impl RunStatistics {
    /// Records one test with the given outcome.
    pub fn record(&mut self, outcome: TestOutcome) {
        self.executed_tests += 1;
        *self.outcomes.entry(outcome).or_insert(0) += 1;
    }

    /// Returns the count for a particular outcome.
    pub fn count(&self, outcome: TestOutcome) -> u64 {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("executor://FancyAdapter/v1", "executor://fancyadapter/v1"; "mixed case")]
    #[test_case("executor://plain", "executor://plain"; "already lowercase")]
    fn executor_uri_is_normalized(input: &str, expected: &str) {
        assert_eq!(ExecutorUri::new(input).as_str(), expected);
        assert_eq!(ExecutorUri::new(input), ExecutorUri::new(expected));
    }

    #[test]
    fn with_source_substitutes_but_keeps_identity() {
        let case = TestCase::new(
            "pkg::tests::it_works",
            ExecutorUri::new("executor://unit/v1"),
            "/work/bin/tests.bin",
        );
        let substituted = case.with_source("/work/pkg.testpkg");
        assert_eq!(substituted.id, case.id);
        assert_eq!(substituted.fully_qualified_name, case.fully_qualified_name);
        assert_eq!(substituted.source, "/work/pkg.testpkg");

        let result = TestResult::new(case.clone(), TestOutcome::Passed, Duration::from_millis(5));
        let result = result.with_source(Utf8Path::new("/work/pkg.testpkg"));
        assert_eq!(result.test_case.source, "/work/pkg.testpkg");
        assert_eq!(result.outcome, TestOutcome::Passed);
    }

    #[test]
    fn statistics_record_and_count() {
        let mut stats = RunStatistics::default();
        stats.record(TestOutcome::Passed);
        stats.record(TestOutcome::Passed);
        stats.record(TestOutcome::Failed);
        assert_eq!(stats.executed_tests, 3);
        assert_eq!(stats.count(TestOutcome::Passed), 2);
        assert_eq!(stats.count(TestOutcome::Failed), 1);
        assert_eq!(stats.count(TestOutcome::Skipped), 0);
    }

    #[test]
    fn executor_uri_serde_normalizes() {
        let uri: ExecutorUri = serde_json::from_str(r#""Executor://Mixed/Case""#).unwrap();
        assert_eq!(uri.as_str(), "executor://mixed/case");
        assert_eq!(
            serde_json::to_string(&uri).unwrap(),
            r#""executor://mixed/case""#
        );
    }
}
