// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recognition of informational plain-text lines.

use crate::events::{InfoEvent, ResultSummary};
use regex::Regex;
use std::sync::LazyLock;

static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<runner>\w+)\s+v?(?P<version>\d[\w.\-]*)\s+(?:.*\s)?by\s+.+\s+and contributors\.$",
    )
    .expect("version regex is valid")
});

static RUNTIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Runtime:\s+(?P<runtime>.+)$").expect("runtime regex is valid")
});

static CONFIGURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Configuration:\s+(?P<path>.+)$").expect("configuration regex is valid")
});

static PROCESSES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Processes:\s+(?P<processes>\d+)$").expect("processes regex is valid")
});

static TIME_AND_MEMORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Time:\s+(?P<time>[\d:.]+(?:\s?\w+)?),\s+Memory:\s+(?P<memory>[\d.]+\s*\w+)$")
        .expect("time regex is valid")
});

static PEST_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Duration:\s+(?P<time>[\d.]+\s?m?s)$").expect("duration regex is valid")
});

static PHPUNIT_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Tests:\s+(?P<tests>\d+),\s+Assertions:\s+(?P<assertions>\d+)(?P<rest>.*)$")
        .expect("summary regex is valid")
});

static PHPUNIT_SUMMARY_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<label>[A-Za-z][A-Za-z ]*):\s+(?P<count>\d+)")
        .expect("summary item regex is valid")
});

static PHPUNIT_OK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^OK\s+\((?P<tests>\d+)\s+tests?,\s+(?P<assertions>\d+)\s+assertions?\)$")
        .expect("ok regex is valid")
});

static PEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Tests:\s+(?P<rest>\d+\s+[a-z]+.*)$").expect("pest summary regex is valid")
});

static PEST_SUMMARY_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<count>\d+)\s+(?P<label>[a-z]+)").expect("pest summary item regex is valid")
});

static PEST_ASSERTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\((?P<assertions>\d+)\s+assertions?\)").expect("assertions regex is valid")
});

/// Recognizes an informational plain-text line.
///
/// Leading and trailing whitespace is ignored. Returns `None` for lines that
/// aren't informational.
pub fn parse_info_line(line: &str) -> Option<InfoEvent> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(captures) = VERSION.captures(text) {
        return Some(InfoEvent::Version {
            text: text.to_owned(),
            runner: captures["runner"].to_owned(),
            version: captures["version"].to_owned(),
        });
    }
    if let Some(captures) = RUNTIME.captures(text) {
        return Some(InfoEvent::Runtime {
            text: text.to_owned(),
            runtime: captures["runtime"].trim().to_owned(),
        });
    }
    if let Some(captures) = CONFIGURATION.captures(text) {
        return Some(InfoEvent::Configuration {
            text: text.to_owned(),
            path: captures["path"].trim().to_owned(),
        });
    }
    if let Some(captures) = PROCESSES.captures(text) {
        return Some(InfoEvent::Processes {
            text: text.to_owned(),
            processes: captures["processes"].parse().ok()?,
        });
    }
    if let Some(captures) = TIME_AND_MEMORY.captures(text) {
        return Some(InfoEvent::Duration {
            text: text.to_owned(),
            time: captures["time"].to_owned(),
            memory: Some(captures["memory"].to_owned()),
        });
    }
    if let Some(captures) = PEST_DURATION.captures(text) {
        return Some(InfoEvent::Duration {
            text: text.to_owned(),
            time: captures["time"].to_owned(),
            memory: None,
        });
    }

    parse_summary(text).map(|summary| InfoEvent::ResultSummary {
        text: text.to_owned(),
        summary,
    })
}

fn parse_summary(text: &str) -> Option<ResultSummary> {
    if let Some(captures) = PHPUNIT_OK.captures(text) {
        return Some(ResultSummary {
            tests: captures["tests"].parse().ok()?,
            assertions: captures["assertions"].parse().ok(),
            ..ResultSummary::default()
        });
    }

    if let Some(captures) = PHPUNIT_SUMMARY.captures(text) {
        let mut summary = ResultSummary {
            tests: captures["tests"].parse().ok()?,
            assertions: captures["assertions"].parse().ok(),
            ..ResultSummary::default()
        };
        for item in PHPUNIT_SUMMARY_ITEM.captures_iter(&captures["rest"]) {
            let count: usize = item["count"].parse().ok()?;
            match item["label"].trim().to_ascii_lowercase().as_str() {
                "errors" => summary.errors += count,
                "failures" => summary.failures += count,
                "warnings" | "phpunit warnings" => summary.warnings += count,
                "deprecations" | "phpunit deprecations" => summary.deprecations += count,
                "notices" | "phpunit notices" => summary.notices += count,
                "skipped" => summary.skipped += count,
                "incomplete" => summary.incomplete += count,
                "risky" => summary.risky += count,
                _ => {}
            }
        }
        return Some(summary);
    }

    let captures = PEST_SUMMARY.captures(text)?;
    let rest = &captures["rest"];
    let assertions = PEST_ASSERTIONS
        .captures(rest)
        .and_then(|c| c["assertions"].parse().ok());
    // Counts inside the assertions parenthetical aren't test counts.
    let counts = rest.split('(').next().unwrap_or(rest);

    let mut summary = ResultSummary {
        assertions,
        ..ResultSummary::default()
    };
    let mut passed = 0;
    for item in PEST_SUMMARY_ITEM.captures_iter(counts) {
        let count: usize = item["count"].parse().ok()?;
        summary.tests += count;
        match &item["label"] {
            "passed" => passed += count,
            "failed" => summary.failures += count,
            "skipped" => summary.skipped += count,
            "incomplete" | "todo" | "todos" => summary.incomplete += count,
            "risky" => summary.risky += count,
            "warning" | "warnings" => summary.warnings += count,
            "deprecated" | "deprecations" => summary.deprecations += count,
            "notice" | "notices" => summary.notices += count,
            _ => {}
        }
    }
    summary.passed = Some(passed);
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("PHPUnit 10.5.0 by Sebastian Bergmann and contributors.", "PHPUnit", "10.5.0")]
    #[test_case(
        "ParaTest v7.3.1 upon PHPUnit 10.5.0 by Sebastian Bergmann and contributors.",
        "ParaTest",
        "7.3.1"
    )]
    #[test_case("PHPUnit 11.1-dev by Sebastian Bergmann and contributors.", "PHPUnit", "11.1-dev")]
    fn version_lines(line: &str, runner: &str, version: &str) {
        assert_eq!(
            parse_info_line(line),
            Some(InfoEvent::Version {
                text: line.to_owned(),
                runner: runner.to_owned(),
                version: version.to_owned(),
            })
        );
    }

    #[test]
    fn runtime_and_configuration() {
        assert_eq!(
            parse_info_line("Runtime:       PHP 8.3.4"),
            Some(InfoEvent::Runtime {
                text: "Runtime:       PHP 8.3.4".to_owned(),
                runtime: "PHP 8.3.4".to_owned(),
            })
        );
        assert_eq!(
            parse_info_line("Configuration: /app/phpunit.xml"),
            Some(InfoEvent::Configuration {
                text: "Configuration: /app/phpunit.xml".to_owned(),
                path: "/app/phpunit.xml".to_owned(),
            })
        );
        assert_eq!(
            parse_info_line("Processes:     8"),
            Some(InfoEvent::Processes {
                text: "Processes:     8".to_owned(),
                processes: 8,
            })
        );
    }

    #[test_case("Time: 00:00.049, Memory: 6.00 MB", "00:00.049", Some("6.00 MB"))]
    #[test_case("Time: 49 ms, Memory: 4.00MB", "49 ms", Some("4.00MB"))]
    #[test_case("  Duration: 0.10s", "0.10s", None ; "pest")]
    fn duration_lines(line: &str, time: &str, memory: Option<&str>) {
        assert_eq!(
            parse_info_line(line),
            Some(InfoEvent::Duration {
                text: line.trim().to_owned(),
                time: time.to_owned(),
                memory: memory.map(str::to_owned),
            })
        );
    }

    fn summary_of(line: &str) -> ResultSummary {
        match parse_info_line(line) {
            Some(InfoEvent::ResultSummary { summary, .. }) => summary,
            other => panic!("expected a result summary for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn phpunit_summary() {
        let summary = summary_of(
            "Tests: 33, Assertions: 30, Errors: 2, Failures: 6, Warnings: 1, PHPUnit Deprecations: 8, Skipped: 1, Incomplete: 1, Risky: 2.",
        );
        assert_eq!(
            summary,
            ResultSummary {
                tests: 33,
                assertions: Some(30),
                passed: None,
                errors: 2,
                failures: 6,
                warnings: 1,
                deprecations: 8,
                notices: 0,
                skipped: 1,
                incomplete: 1,
                risky: 2,
            }
        );
        assert!(!summary.is_success());
    }

    #[test]
    fn phpunit_ok_summary() {
        let summary = summary_of("OK (3 tests, 3 assertions)");
        assert_eq!(summary.tests, 3);
        assert_eq!(summary.assertions, Some(3));
        assert!(summary.is_success());
    }

    #[test]
    fn pest_summary() {
        let summary = summary_of("  Tests:    1 failed, 1 risky, 2 passed (4 assertions)");
        assert_eq!(summary.tests, 4);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.risky, 1);
        assert_eq!(summary.passed, Some(2));
        assert_eq!(summary.assertions, Some(4));
    }

    #[test_case("" ; "empty")]
    #[test_case("some output from a test" ; "plain output")]
    #[test_case("Runtime:" ; "runtime without value")]
    #[test_case("PHPUnit is great" ; "not a version line")]
    fn not_informational(line: &str) {
        assert_eq!(parse_info_line(line), None);
    }
}
