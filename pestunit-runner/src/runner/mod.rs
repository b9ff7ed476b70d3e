// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`], which spawns test
//! runner processes and feeds their output through an
//! [`EventPipeline`](crate::pipeline::EventPipeline).

mod command;
mod imp;

pub use command::*;
pub use imp::*;
