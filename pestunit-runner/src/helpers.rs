// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for pestunit-runner.

use std::any::Any;

/// Utilities for pluralizing various words based on count or plurality.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "suite" if `count` is 1, otherwise "suites".
    pub(crate) fn suites_str(count: usize) -> &'static str {
        if count == 1 { "suite" } else { "suites" }
    }

    /// Returns "process" if `count` is 1, otherwise "processes".
    pub(crate) fn processes_str(count: usize) -> &'static str {
        if count == 1 { "process" } else { "processes" }
    }
}

/// Extracts a string message from a panic payload.
pub(crate) fn panic_payload_to_string(payload: Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(unknown panic payload)".to_owned()
    }
}
