// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `pestunit` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum PestunitExitCode {}

impl PestunitExitCode {
    /// No errors occurred and pestunit exited normally.
    pub const OK: i32 = 0;

    /// One or more tests failed, or a test runner exited with a nonzero code.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// A test runner process was killed, or couldn't be started.
    pub const PROCESS_ABORTED: i32 = 105;

    /// A user issue happened while setting up a pestunit invocation.
    pub const SETUP_ERROR: i32 = 96;
}
