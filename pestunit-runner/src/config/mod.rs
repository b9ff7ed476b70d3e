// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for pestunit.
//!
//! Configuration is read from an embedded default config, with the
//! repository's `.config/pestunit.toml` (or a file passed in explicitly)
//! layered on top. Settings live in named profiles; any setting a custom
//! profile doesn't specify is taken from the `default` profile.

mod elements;
mod imp;

pub use elements::{FlowIdSearch, RunnerCommand};
pub use imp::*;
