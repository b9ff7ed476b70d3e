// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for pestunit.
//!
//! pestunit drives PHPUnit- and Pest-family test runner processes and turns
//! their TeamCity service-message output into a stream of structured
//! test-lifecycle events.
//!
//! The flow of data for each process is:
//!
//! 1. [`teamcity::LineAssembler`] turns raw output chunks into lines.
//! 2. [`teamcity::TestResultParser`] decodes each line into a
//!    [`TestResult`](events::TestResult), an [`InfoEvent`](events::InfoEvent)
//!    or plain text.
//! 3. [`fixer::CompatibilityFixer`] repairs identity defects of legacy runners.
//! 4. [`correlator::ResultCorrelator`] merges start, fault and finish events
//!    into terminal results.
//! 5. [`dispatch::EventDispatcher`] fans the events out to subscribers.
//!
//! [`pipeline::EventPipeline`] ties these together, and [`runner::TestRunner`]
//! feeds it from a child process.

pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod fixer;
mod helpers;
pub mod pipeline;
pub mod reporter;
pub mod runner;
pub mod teamcity;
