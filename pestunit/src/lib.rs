// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A test runner front end for PHPUnit and Pest.
//!
//! pestunit runs a project's test runner with TeamCity output enabled and
//! reports results as they stream in. See [`pestunit_runner`] for the
//! underlying library.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod exit_codes;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
pub use exit_codes::PestunitExitCode;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};
