// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod flow_id_search;
mod runner_command;

pub use flow_id_search::FlowIdSearch;
pub(super) use flow_id_search::deserialize_flow_id_search;
pub use runner_command::RunnerCommand;
pub(super) use runner_command::deserialize_runner_command;
