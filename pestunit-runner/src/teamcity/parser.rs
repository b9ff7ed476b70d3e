// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    info::parse_info_line,
    message::{SERVICE_MESSAGE_PREFIX, ServiceMessage},
};
use crate::events::{Fault, InfoEvent, ResultKind, SourceLocation, TestResult};
use smallvec::SmallVec;

/// A line of runner output, classified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParsedLine {
    /// A test or suite lifecycle event.
    Result(TestResult),

    /// An informational event.
    Info(InfoEvent),

    /// Plain text, forwarded unchanged.
    Plain(String),
}

/// The items a single line decodes into.
///
/// This is usually one item. A service message preceded by text that a test
/// printed without a trailing newline decodes into the text, then the message.
pub type ParsedLines = SmallVec<[ParsedLine; 2]>;

/// Decodes lines of PHPUnit and Pest `--teamcity` output.
///
/// The parser is stateless and never fails: anything that isn't a well-formed
/// service message with a known name is plain text.
#[derive(Clone, Debug, Default)]
pub struct TestResultParser {
    _private: (),
}

impl TestResultParser {
    /// Creates a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies a single line (without its line terminator).
    pub fn parse(&self, line: &str) -> ParsedLines {
        let mut parsed = ParsedLines::new();

        if let Some(idx) = line.find(SERVICE_MESSAGE_PREFIX) {
            let structured = &line[idx..];
            if let Some(item) = ServiceMessage::parse(structured)
                .and_then(|message| decode_message(&message, structured))
            {
                let leading = &line[..idx];
                if !leading.trim().is_empty() {
                    parsed.push(classify_plain(leading));
                }
                parsed.push(item);
                return parsed;
            }
        }

        parsed.push(classify_plain(line));
        parsed
    }
}

fn classify_plain(text: &str) -> ParsedLine {
    match parse_info_line(text) {
        Some(info) => ParsedLine::Info(info),
        None => ParsedLine::Plain(text.to_owned()),
    }
}

fn decode_message(message: &ServiceMessage, text: &str) -> Option<ParsedLine> {
    let flow_id = message.get("flowId").and_then(|v| v.trim().parse().ok());

    if message.name == "testCount" {
        let count = message.get("count")?.trim().parse().ok()?;
        return Some(ParsedLine::Info(InfoEvent::Count {
            text: text.trim_end().to_owned(),
            count,
            flow_id,
        }));
    }

    let kind = ResultKind::from_message_name(&message.name)?;
    let mut result = TestResult::new(kind, message.get("name")?);
    result.flow_id = flow_id;

    if let Some(hint) = message.get("locationHint") {
        let (file, id) = split_location_hint(hint);
        result.file = Some(file.to_owned());
        result.id = Some(id.to_owned());
        result.location_hint = Some(hint.to_owned());
    } else if kind == ResultKind::TestStarted {
        result.id = Some(result.name.clone());
    }

    result.duration = message.get("duration").and_then(parse_duration);

    if kind.is_fault() {
        result.fault = Some(Fault {
            message: message.get("message").unwrap_or_default().to_owned(),
            details: parse_details(message.get("details").unwrap_or_default()),
            fault_type: message.get("type").map(str::to_owned),
            expected: message.get("expected").map(str::to_owned),
            actual: message.get("actual").map(str::to_owned),
        });
    }

    Some(ParsedLine::Result(result))
}

/// Splits a location hint into its file and test identifier.
///
/// Hints have the form `<scheme>://<file>::<id>`, e.g.
/// `php_qn:///app/tests/ExampleTest.php::\Tests\ExampleTest::test_passed`.
/// A hint without `::` (such as a suite hint) yields its path for both.
pub fn split_location_hint(hint: &str) -> (&str, &str) {
    let path = match hint.find("://") {
        Some(idx) => &hint[idx + 3..],
        None => hint,
    };
    path.split_once("::").unwrap_or((path, path))
}

fn parse_duration(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<u64>() {
        return Some(millis);
    }
    let millis: f64 = value.parse().ok()?;
    (millis.is_finite() && millis >= 0.0).then(|| millis.round() as u64)
}

/// Parses `details` into source locations, skipping lines that aren't
/// `path:line`.
fn parse_details(details: &str) -> Vec<SourceLocation> {
    details
        .lines()
        .filter_map(|line| {
            let (file, line) = line.trim().rsplit_once(':')?;
            let line = line.parse().ok()?;
            (!file.is_empty()).then(|| SourceLocation {
                file: file.to_owned(),
                line,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn parse_one(line: &str) -> ParsedLine {
        let mut parsed = TestResultParser::new().parse(line);
        assert_eq!(parsed.len(), 1, "expected a single item for {line:?}");
        parsed.remove(0)
    }

    fn parse_result(line: &str) -> TestResult {
        match parse_one(line) {
            ParsedLine::Result(result) => result,
            other => panic!("expected a result for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_started() {
        let result = parse_result(
            "##teamcity[testStarted name='test_passed' locationHint='php_qn://A.php::C::test_passed' flowId='12']",
        );
        assert_eq!(
            result,
            TestResult {
                kind: ResultKind::TestStarted,
                name: "test_passed".to_owned(),
                flow_id: Some(12),
                id: Some("C::test_passed".to_owned()),
                file: Some("A.php".to_owned()),
                location_hint: Some("php_qn://A.php::C::test_passed".to_owned()),
                duration: None,
                fault: None,
            }
        );
    }

    #[test]
    fn test_finished_with_duration() {
        let result =
            parse_result("##teamcity[testFinished name='test_passed' duration='5' flowId='12']");
        assert_eq!(result.kind, ResultKind::TestFinished);
        assert_eq!(result.duration, Some(5));
        assert_eq!(result.flow_id, Some(12));
        assert_eq!(result.message(), None);
    }

    #[test]
    fn test_failed_with_comparison() {
        let details = indoc! {"
             /app/tests/AssertionsTest.php:22|n
             /app/vendor/phpunit/phpunit/src/Framework/TestCase.php:1103|n
        "}
        .replace('\n', "");
        let line = format!(
            "##teamcity[testFailed name='test_is_equal' message='Failed asserting that two strings are equal.' details='{details}' duration='7' type='comparisonFailure' actual='|'b|'' expected='|'a|'' flowId='3']"
        );
        let result = parse_result(&line);
        assert_eq!(result.kind, ResultKind::TestFailed);
        assert_eq!(
            result.fault,
            Some(Fault {
                message: "Failed asserting that two strings are equal.".to_owned(),
                details: vec![
                    SourceLocation {
                        file: "/app/tests/AssertionsTest.php".to_owned(),
                        line: 22,
                    },
                    SourceLocation {
                        file: "/app/vendor/phpunit/phpunit/src/Framework/TestCase.php".to_owned(),
                        line: 1103,
                    },
                ],
                fault_type: Some("comparisonFailure".to_owned()),
                expected: Some("'a'".to_owned()),
                actual: Some("'b'".to_owned()),
            })
        );
    }

    #[test]
    fn test_ignored_without_details() {
        let result = parse_result(
            "##teamcity[testIgnored name='test_skipped' message='The MySQLi extension is not available.' duration='0' flowId='3']",
        );
        assert_eq!(result.kind, ResultKind::TestIgnored);
        assert_eq!(
            result.message(),
            Some("The MySQLi extension is not available.")
        );
        assert!(result.fault.expect("fault").details.is_empty());
    }

    #[test]
    fn suite_started_without_hint() {
        let result = parse_result("##teamcity[testSuiteStarted name='default' flowId='1']");
        assert_eq!(result.kind, ResultKind::TestSuiteStarted);
        assert_eq!(result.id, None);
        assert_eq!(result.file, None);
    }

    #[test]
    fn test_started_without_hint_uses_name() {
        let result = parse_result("##teamcity[testStarted name='it works']");
        assert_eq!(result.id.as_deref(), Some("it works"));
        assert_eq!(result.flow_id, None);
    }

    #[test]
    fn test_count_is_informational() {
        assert_eq!(
            parse_one("##teamcity[testCount count='12' flowId='7']"),
            ParsedLine::Info(InfoEvent::Count {
                text: "##teamcity[testCount count='12' flowId='7']".to_owned(),
                count: 12,
                flow_id: Some(7),
            })
        );
    }

    #[test_case("##teamcity[testingStarted]" ; "unknown message name")]
    #[test_case("##teamcity[testStarted name='x' message='|q']" ; "unknown escape")]
    #[test_case("##teamcity[testStarted name='x'" ; "unbalanced brackets")]
    #[test_case("##teamcity[testStarted flowId='1']" ; "missing name")]
    #[test_case("##teamcity[testCount count='many']" ; "invalid count")]
    #[test_case("just some output" ; "plain text")]
    fn degrades_to_plain_text(line: &str) {
        assert_eq!(parse_one(line), ParsedLine::Plain(line.to_owned()));
    }

    #[test]
    fn informational_plain_lines() {
        assert!(matches!(
            parse_one("PHPUnit 11.0.0 by Sebastian Bergmann and contributors."),
            ParsedLine::Info(InfoEvent::Version { .. })
        ));
    }

    #[test]
    fn leaked_output_before_message() {
        let parsed = TestResultParser::new()
            .parse("echoed without newline##teamcity[testFinished name='t' duration='1' flowId='2']");
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed[0],
            ParsedLine::Plain("echoed without newline".to_owned())
        );
        assert!(matches!(&parsed[1], ParsedLine::Result(r) if r.kind == ResultKind::TestFinished));
    }

    #[test_case("5", Some(5))]
    #[test_case("5.4", Some(5))]
    #[test_case("5.5", Some(6))]
    #[test_case("-1", None)]
    #[test_case("soon", None)]
    fn durations(value: &str, expected: Option<u64>) {
        assert_eq!(parse_duration(value), expected);
    }

    #[test_case("php_qn:///app/tests/ExampleTest.php::\\Tests\\ExampleTest::test_x", "/app/tests/ExampleTest.php", "\\Tests\\ExampleTest::test_x")]
    #[test_case("pest_qn://tests/Unit/ExampleTest.php::it works", "tests/Unit/ExampleTest.php", "it works")]
    #[test_case("php_qn:///app/tests/ExampleTest.php", "/app/tests/ExampleTest.php", "/app/tests/ExampleTest.php" ; "suite hint")]
    #[test_case("tests/Unit/ExampleTest.php::it works", "tests/Unit/ExampleTest.php", "it works" ; "no scheme")]
    fn location_hints(hint: &str, file: &str, id: &str) {
        assert_eq!(split_location_hint(hint), (file, id));
    }
}
