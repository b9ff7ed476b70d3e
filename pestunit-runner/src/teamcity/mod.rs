// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decoding of TeamCity service-message output.
//!
//! PHPUnit and Pest both support `--teamcity`, which makes them print
//! lifecycle events as lines of the form:
//!
//! ```text
//! ##teamcity[testStarted name='test_passed' locationHint='php_qn://...' flowId='12']
//! ```
//!
//! Everything else they print is plain text. Some plain text lines, such as
//! the version banner and the result summary, are recognized as
//! informational events.

mod info;
mod lines;
mod message;
mod parser;

pub use info::parse_info_line;
pub use lines::LineAssembler;
pub use message::{SERVICE_MESSAGE_PREFIX, ServiceMessage};
pub use parser::{ParsedLine, ParsedLines, TestResultParser, split_location_hint};
