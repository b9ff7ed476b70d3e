// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repairs for identity defects in legacy Pest output.
//!
//! Older Pest releases omit `flowId` on some events, and print location hints
//! with absolute paths or with data set names in a legacy shape. Both break
//! correlation downstream. The fixes here are best-effort: a result that
//! can't be repaired is passed on unchanged.

use crate::{
    correlator::ResultCorrelator,
    events::{ResultKind, TestResult},
    teamcity::split_location_hint,
};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static CLASS_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((?P<id>.+)\)").expect("class fragment regex is valid"));

static LEGACY_DATA_SET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r" with (?P<data>\(.*\))$").expect("legacy data set regex is valid")
});

const PEST_SCHEME: &str = "pest_qn://";

/// Applies compatibility fixes to results before they are correlated.
#[derive(Clone, Debug)]
pub struct CompatibilityFixer {
    fix_location_hints: bool,
}

impl Default for CompatibilityFixer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CompatibilityFixer {
    /// Creates a new fixer. Location hints are only rewritten if
    /// `fix_location_hints` is true.
    pub fn new(fix_location_hints: bool) -> Self {
        Self { fix_location_hints }
    }

    /// Repairs `result` in place, using the correlator's history for missing
    /// flowIds.
    pub fn apply(&self, correlator: &ResultCorrelator, result: &mut TestResult) {
        if self.fix_location_hints {
            fix_pest_location_hint(result);
        }
        if needs_flow_id(result) {
            fix_flow_id(correlator.history(), result);
        }
    }
}

fn needs_flow_id(result: &TestResult) -> bool {
    result.flow_id.is_none()
        && matches!(
            result.kind,
            ResultKind::TestStarted
                | ResultKind::TestFailed
                | ResultKind::TestIgnored
                | ResultKind::TestFinished
        )
}

/// Fills in a missing flowId from an earlier record.
///
/// `history` must be ordered most recent first. For a started test, the
/// candidate is a record whose id, as a path with a `Test` suffix, matches
/// the class fragment in parentheses in the test's id. For anything else, the
/// candidate is a started test with the same name. Only the most recent
/// candidate is considered: if it has no flowId either, `result` is left as is.
///
/// Returns true if a flowId was assigned.
pub fn fix_flow_id<'a>(
    history: impl IntoIterator<Item = &'a TestResult>,
    result: &mut TestResult,
) -> bool {
    if result.flow_id.is_some() {
        return false;
    }

    let flow_id = if result.kind == ResultKind::TestStarted {
        let Some(fragment) = result
            .id
            .as_deref()
            .and_then(|id| CLASS_FRAGMENT.captures(id))
            .map(|captures| captures["id"].to_owned())
        else {
            return false;
        };
        history
            .into_iter()
            .find(|prior| {
                prior
                    .id
                    .as_deref()
                    .is_some_and(|id| class_path(id) == fragment)
            })
            .and_then(|prior| prior.flow_id)
    } else {
        history
            .into_iter()
            .find(|prior| prior.kind == ResultKind::TestStarted && prior.name == result.name)
            .and_then(|prior| prior.flow_id)
    };

    match flow_id {
        Some(flow_id) => {
            debug!("assigned flowId {flow_id} to {} `{}`", result.kind, result.name);
            result.flow_id = Some(flow_id);
            true
        }
        None => {
            debug!("no flowId found for {} `{}`", result.kind, result.name);
            false
        }
    }
}

fn class_path(id: &str) -> String {
    let mut path = id.replace('\\', "/");
    path.push_str("Test");
    path
}

/// Normalizes a location hint.
///
/// Any path prefix up to and including the last `tests/` directory is
/// removed, and a trailing ` with (...)` is rewritten to
/// ` with data set "(...)"`. The scheme and the test identifier are kept.
pub fn fix_location_hint(hint: &str) -> String {
    let (scheme, rest) = match hint.find("://") {
        Some(idx) => hint.split_at(idx + 3),
        None => ("", hint),
    };
    let (path, id) = match rest.find("::") {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };

    let fixed = format!("{scheme}{}{id}", strip_tests_prefix(path));
    LEGACY_DATA_SET
        .replace(&fixed, r#" with data set "${data}""#)
        .into_owned()
}

fn strip_tests_prefix(path: &str) -> &str {
    const SEGMENT: &str = "tests/";
    path.match_indices(SEGMENT)
        .filter(|(idx, _)| *idx == 0 || path.as_bytes()[idx - 1] == b'/')
        .last()
        .map_or(path, |(idx, _)| &path[idx + SEGMENT.len()..])
}

fn fix_pest_location_hint(result: &mut TestResult) {
    let Some(hint) = result
        .location_hint
        .as_deref()
        .filter(|hint| hint.starts_with(PEST_SCHEME))
    else {
        return;
    };

    let fixed = fix_location_hint(hint);
    if fixed != hint {
        let (_, id) = split_location_hint(&fixed);
        result.id = Some(id.to_owned());
        result.location_hint = Some(fixed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowIdSearch;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn result(kind: ResultKind, name: &str, flow_id: Option<u64>) -> TestResult {
        TestResult {
            flow_id,
            ..TestResult::new(kind, name)
        }
    }

    #[test]
    fn fault_takes_flow_id_of_started() {
        let mut correlator = ResultCorrelator::default();
        correlator.correlate(result(ResultKind::TestStarted, "test_x", Some(7)));

        let mut failed = result(ResultKind::TestFailed, "test_x", None);
        CompatibilityFixer::default().apply(&correlator, &mut failed);
        assert_eq!(failed.flow_id, Some(7));
    }

    #[test]
    fn most_recent_started_wins() {
        let history = [
            result(ResultKind::TestStarted, "test_x", Some(9)),
            result(ResultKind::TestSuiteStarted, "test_x", Some(8)),
            result(ResultKind::TestStarted, "test_x", Some(3)),
        ];
        let mut finished = result(ResultKind::TestFinished, "test_x", None);
        assert!(fix_flow_id(&history, &mut finished));
        assert_eq!(finished.flow_id, Some(9));
    }

    #[test]
    fn only_started_tests_match_by_name() {
        let history = [result(ResultKind::TestSuiteStarted, "test_x", Some(8))];
        let mut finished = result(ResultKind::TestFinished, "test_x", None);
        assert!(!fix_flow_id(&history, &mut finished));
        assert_eq!(finished.flow_id, None);
    }

    #[test]
    fn no_match_leaves_flow_id_unset() {
        let correlator = ResultCorrelator::default();
        let mut failed = result(ResultKind::TestFailed, "test_x", None);
        CompatibilityFixer::default().apply(&correlator, &mut failed);
        assert_eq!(failed.flow_id, None);
    }

    #[test]
    fn existing_flow_id_is_kept() {
        let history = [result(ResultKind::TestStarted, "test_x", Some(1))];
        let mut failed = result(ResultKind::TestFailed, "test_x", Some(2));
        assert!(!fix_flow_id(&history, &mut failed));
        assert_eq!(failed.flow_id, Some(2));
    }

    #[test]
    fn suites_are_not_repaired() {
        let mut correlator = ResultCorrelator::default();
        correlator.correlate(result(ResultKind::TestStarted, "Suite", Some(1)));
        let mut suite = result(ResultKind::TestSuiteFinished, "Suite", None);
        CompatibilityFixer::default().apply(&correlator, &mut suite);
        assert_eq!(suite.flow_id, None);
    }

    #[test]
    fn started_matches_class_fragment() {
        let suite = TestResult {
            id: Some("Tests\\Unit\\Example".to_owned()),
            ..result(ResultKind::TestSuiteStarted, "Tests\\Unit\\ExampleTest", Some(4))
        };
        let mut started = TestResult {
            id: Some("it works (Tests/Unit/ExampleTest)".to_owned()),
            ..result(ResultKind::TestStarted, "it works", None)
        };
        assert!(fix_flow_id([&suite], &mut started));
        assert_eq!(started.flow_id, Some(4));

        let mut unrelated = TestResult {
            id: Some("it works (Tests/Feature/OtherTest)".to_owned()),
            ..result(ResultKind::TestStarted, "it works", None)
        };
        assert!(!fix_flow_id([&suite], &mut unrelated));

        let mut no_fragment = result(ResultKind::TestStarted, "it works", None);
        no_fragment.id = Some("it works".to_owned());
        assert!(!fix_flow_id([&suite], &mut no_fragment));
    }

    #[test]
    fn open_search_forgets_finished_tests() {
        let mut correlator = ResultCorrelator::new(FlowIdSearch::Open);
        correlator.correlate(result(ResultKind::TestStarted, "test_x", Some(7)));
        correlator.correlate(result(ResultKind::TestFinished, "test_x", Some(7)));

        let mut failed = result(ResultKind::TestFailed, "test_x", None);
        CompatibilityFixer::default().apply(&correlator, &mut failed);
        assert_eq!(failed.flow_id, None);
    }

    #[test]
    fn recent_search_remembers_finished_tests() {
        let mut correlator = ResultCorrelator::new(FlowIdSearch::Recent { depth: 1 });
        correlator.correlate(result(ResultKind::TestStarted, "test_x", Some(7)));
        correlator.correlate(result(ResultKind::TestFinished, "test_x", Some(7)));

        let mut failed = result(ResultKind::TestFailed, "test_x", None);
        CompatibilityFixer::default().apply(&correlator, &mut failed);
        assert_eq!(failed.flow_id, Some(7));

        correlator.correlate(result(ResultKind::TestStarted, "test_y", Some(8)));
        correlator.correlate(result(ResultKind::TestFinished, "test_y", Some(8)));
        let mut failed = result(ResultKind::TestFailed, "test_x", None);
        CompatibilityFixer::default().apply(&correlator, &mut failed);
        assert_eq!(failed.flow_id, None, "evicted beyond the search depth");
    }

    #[test]
    fn unkeyed_restart_does_not_borrow_older_flow_id() {
        let mut correlator = ResultCorrelator::new(FlowIdSearch::Recent { depth: 32 });
        let fixer = CompatibilityFixer::default();

        correlator.correlate(result(ResultKind::TestStarted, "it works", Some(3)));
        correlator.correlate(result(ResultKind::TestFinished, "it works", Some(3)));

        let mut started = result(ResultKind::TestStarted, "it works", None);
        fixer.apply(&correlator, &mut started);
        correlator.correlate(started);

        let mut failed = result(ResultKind::TestFailed, "it works", None);
        fixer.apply(&correlator, &mut failed);
        assert_eq!(failed.flow_id, None, "most recent started test has no flowId");
        correlator.correlate(failed);

        let mut finished = result(ResultKind::TestFinished, "it works", None);
        fixer.apply(&correlator, &mut finished);
        assert_eq!(finished.flow_id, None);
        let terminal = correlator
            .correlate(finished)
            .expect("finished is dispatched");
        assert_eq!(terminal.kind, ResultKind::TestFailed);
        assert_eq!(correlator.open_count(), 0, "restarted test was closed");
    }

    #[test_case(
        "pest_qn:///home/dev/app/tests/Unit/ExampleTest.php::it works",
        "pest_qn://Unit/ExampleTest.php::it works"
        ; "absolute path"
    )]
    #[test_case(
        "pest_qn://tests/Unit/ExampleTest.php::it works",
        "pest_qn://Unit/ExampleTest.php::it works"
        ; "relative path"
    )]
    #[test_case(
        "pest_qn:///app/tests/Fixtures/tests/ExampleTest.php::it works",
        "pest_qn://ExampleTest.php::it works"
        ; "last tests segment wins"
    )]
    #[test_case(
        "pest_qn:///app/mytests/ExampleTest.php::it works",
        "pest_qn:///app/mytests/ExampleTest.php::it works"
        ; "segment boundary required"
    )]
    #[test_case(
        "pest_qn://tests/Unit/ExampleTest.php::it greets with ('nuno')",
        "pest_qn://Unit/ExampleTest.php::it greets with data set \"('nuno')\""
        ; "legacy data set"
    )]
    #[test_case(
        "pest_qn://Unit/ExampleTest.php::it greets with data set \"('nuno')\"",
        "pest_qn://Unit/ExampleTest.php::it greets with data set \"('nuno')\""
        ; "already fixed"
    )]
    #[test_case(
        "pest_qn://tests/Unit/ExampleTest.php::it loads tests/fixtures/a.json",
        "pest_qn://Unit/ExampleTest.php::it loads tests/fixtures/a.json"
        ; "tests segment in identifier is kept"
    )]
    fn location_hints(hint: &str, expected: &str) {
        assert_eq!(fix_location_hint(hint), expected);
    }

    #[test]
    fn pest_hints_rederive_id() {
        let mut started = TestResult {
            id: Some("it greets with ('nuno')".to_owned()),
            file: Some("/app/tests/Unit/ExampleTest.php".to_owned()),
            location_hint: Some(
                "pest_qn:///app/tests/Unit/ExampleTest.php::it greets with ('nuno')"
                    .to_owned(),
            ),
            ..result(ResultKind::TestStarted, "it greets", Some(1))
        };
        CompatibilityFixer::default().apply(&ResultCorrelator::default(), &mut started);
        assert_eq!(
            started.id.as_deref(),
            Some("it greets with data set \"('nuno')\"")
        );
        assert_eq!(
            started.location_hint.as_deref(),
            Some("pest_qn://Unit/ExampleTest.php::it greets with data set \"('nuno')\"")
        );
        assert_eq!(
            started.file.as_deref(),
            Some("/app/tests/Unit/ExampleTest.php"),
            "file is unchanged"
        );
    }

    #[test]
    fn php_hints_and_disabled_fixes_are_untouched() {
        let hint = "php_qn:///app/tests/Unit/ExampleTest.php::\\Tests\\Unit\\ExampleTest::test_x";
        let original = TestResult {
            id: Some("\\Tests\\Unit\\ExampleTest::test_x".to_owned()),
            location_hint: Some(hint.to_owned()),
            ..result(ResultKind::TestStarted, "test_x", Some(1))
        };

        let mut fixed = original.clone();
        CompatibilityFixer::default().apply(&ResultCorrelator::default(), &mut fixed);
        assert_eq!(fixed, original);

        let mut pest = TestResult {
            location_hint: Some("pest_qn:///app/tests/A.php::it works".to_owned()),
            ..original.clone()
        };
        let before = pest.clone();
        CompatibilityFixer::new(false).apply(&ResultCorrelator::default(), &mut pest);
        assert_eq!(pest, before);
    }
}
