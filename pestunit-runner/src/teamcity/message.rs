// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use indexmap::IndexMap;
use std::{iter::Peekable, str::CharIndices};

/// The prefix that starts every service message.
pub const SERVICE_MESSAGE_PREFIX: &str = "##teamcity[";

/// A decoded service message: a name followed by `key='value'` attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceMessage {
    /// The message name, e.g. `testStarted`.
    pub name: String,

    /// Attributes in the order they appeared, with values unescaped.
    pub attributes: IndexMap<String, String>,
}

impl ServiceMessage {
    /// Parses a service message.
    ///
    /// `input` must start with [`SERVICE_MESSAGE_PREFIX`]. Returns `None` if
    /// the message is malformed: an unterminated value, an unknown escape, a
    /// missing closing bracket, or trailing text after it.
    pub fn parse(input: &str) -> Option<Self> {
        let body = input.strip_prefix(SERVICE_MESSAGE_PREFIX)?;
        let mut chars = body.char_indices().peekable();

        let name_end = loop {
            match chars.peek() {
                Some(&(idx, c)) if c.is_whitespace() || c == ']' => break idx,
                Some(_) => {
                    chars.next();
                }
                None => return None,
            }
        };
        let name = &body[..name_end];
        if name.is_empty() {
            return None;
        }

        let mut attributes = IndexMap::new();
        loop {
            skip_whitespace(&mut chars);
            match chars.next()? {
                (idx, ']') => {
                    // Nothing but whitespace may follow the closing bracket.
                    if !body[idx + 1..].trim().is_empty() {
                        return None;
                    }
                    break;
                }
                (start, c) if is_key_char(c) => {
                    let key_end = loop {
                        match chars.next()? {
                            (_, c) if is_key_char(c) => {}
                            (idx, '=') => break idx,
                            _ => return None,
                        }
                    };
                    match chars.next()? {
                        (_, '\'') => {}
                        _ => return None,
                    }
                    let value = read_value(&mut chars)?;
                    attributes.insert(body[start..key_end].to_owned(), value);
                }
                _ => return None,
            }
        }

        Some(Self {
            name: name.to_owned(),
            attributes,
        })
    }

    /// Returns the value of an attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
}

/// Reads a quoted value up to its closing quote, unescaping as it goes.
fn read_value(chars: &mut Peekable<CharIndices<'_>>) -> Option<String> {
    let mut value = String::new();
    loop {
        match chars.next()?.1 {
            '\'' => return Some(value),
            '|' => value.push(read_escape(chars)?),
            c => value.push(c),
        }
    }
}

fn read_escape(chars: &mut Peekable<CharIndices<'_>>) -> Option<char> {
    let c = match chars.next()?.1 {
        '\'' => '\'',
        'n' => '\n',
        'r' => '\r',
        '[' => '[',
        ']' => ']',
        '|' => '|',
        '0' => {
            // |0xXXXX: a unicode code point in four hex digits.
            if chars.next()?.1 != 'x' {
                return None;
            }
            let mut code = 0;
            for _ in 0..4 {
                code = code * 16 + chars.next()?.1.to_digit(16)?;
            }
            char::from_u32(code)?
        }
        _ => return None,
    };
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn attrs(message: &ServiceMessage) -> Vec<(&str, &str)> {
        message
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    #[test]
    fn parses_started_message() {
        let message = ServiceMessage::parse(
            "##teamcity[testStarted name='test_passed' locationHint='php_qn://A.php::C::test_passed' flowId='12']",
        )
        .expect("valid message");
        assert_eq!(message.name, "testStarted");
        assert_eq!(
            attrs(&message),
            vec![
                ("name", "test_passed"),
                ("locationHint", "php_qn://A.php::C::test_passed"),
                ("flowId", "12"),
            ]
        );
    }

    #[test]
    fn parses_message_without_attributes() {
        let message = ServiceMessage::parse("##teamcity[testingStarted]").expect("valid message");
        assert_eq!(message.name, "testingStarted");
        assert!(message.attributes.is_empty());
    }

    #[test_case("|'", "'" ; "quote")]
    #[test_case("|n", "\n" ; "newline")]
    #[test_case("|r", "\r" ; "carriage return")]
    #[test_case("|]", "]" ; "close bracket")]
    #[test_case("|[", "[" ; "open bracket")]
    #[test_case("||", "|" ; "pipe")]
    #[test_case("|0x00e9", "\u{e9}" ; "unicode")]
    #[test_case("a ] b", "a ] b" ; "unescaped close bracket inside value")]
    #[test_case("Failed asserting that |'[1, 2|]|' is identical to |'x|'.", "Failed asserting that '[1, 2]' is identical to 'x'." ; "message with brackets")]
    fn unescapes_values(escaped: &str, expected: &str) {
        let line = format!("##teamcity[testFailed name='t' message='{escaped}']");
        let message = ServiceMessage::parse(&line).expect("valid message");
        assert_eq!(message.get("message"), Some(expected));
    }

    #[test_case("##teamcity[testFailed name='t' message='|x']" ; "unknown escape")]
    #[test_case("##teamcity[testFailed name='t' message='|0xzz00']" ; "bad unicode escape")]
    #[test_case("##teamcity[testFailed name='t' message='oops" ; "unterminated value")]
    #[test_case("##teamcity[testFailed name='t'" ; "missing closing bracket")]
    #[test_case("##teamcity[testFailed name='t'] trailing" ; "trailing text")]
    #[test_case("##teamcity[testFailed name=t]" ; "unquoted value")]
    #[test_case("##teamcity[ name='t']" ; "empty name")]
    #[test_case("##teamcity[testFailed 'value']" ; "single value form")]
    #[test_case("##teamcity[testFailed name='t' message='a|']" ; "escape at end")]
    fn malformed_messages(line: &str) {
        assert_eq!(ServiceMessage::parse(line), None);
    }

    #[test]
    fn trailing_whitespace_is_accepted() {
        let message =
            ServiceMessage::parse("##teamcity[testCount count='3' flowId='1']  ").expect("valid");
        assert_eq!(message.get("count"), Some("3"));
    }
}
