// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observers that report on test runs.
//!
//! [`RunStats`] counts results across any number of processes, and
//! [`DisplayReporter`] prints them for humans.

mod displayer;
mod stats;

pub use displayer::*;
pub use stats::*;
