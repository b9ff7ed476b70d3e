// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::FlowIdSearchParseError;
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// How far back the compatibility fixer searches for a missing flowId.
///
/// Legacy Pest runners omit `flowId` on some events. The fixer recovers it
/// from an earlier started event with a matching name. This controls which
/// earlier events are candidates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FlowIdSearch {
    /// Only tests and suites that are still open.
    #[default]
    Open,

    /// Open tests and suites, plus the `depth` most recently closed ones.
    Recent {
        /// The number of closed entries to remember.
        depth: usize,
    },
}

impl FlowIdSearch {
    /// The depth used for `recent` when none is given.
    pub const DEFAULT_RECENT_DEPTH: usize = 32;

    /// Returns the number of closed entries to remember.
    pub fn closed_depth(self) -> usize {
        match self {
            Self::Open => 0,
            Self::Recent { depth } => depth,
        }
    }
}

impl fmt::Display for FlowIdSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Recent { depth } => write!(f, "recent:{depth}"),
        }
    }
}

impl FromStr for FlowIdSearch {
    type Err = FlowIdSearchParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "recent" => Ok(Self::Recent {
                depth: Self::DEFAULT_RECENT_DEPTH,
            }),
            other => {
                let depth = other
                    .strip_prefix("recent:")
                    .and_then(|depth| depth.parse().ok())
                    .ok_or_else(|| FlowIdSearchParseError::new(other))?;
                Ok(Self::Recent { depth })
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RecentTable {
    recent: usize,
}

pub(in crate::config) fn deserialize_flow_id_search<'de, D>(
    deserializer: D,
) -> Result<Option<FlowIdSearch>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;

    impl<'de2> serde::de::Visitor<'de2> for V {
        type Value = Option<FlowIdSearch>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "a string (\"open\" or \"recent\") or a table ({{ recent = 64 }})"
            )
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            v.parse().map(Some).map_err(E::custom)
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de2>,
        {
            let table = RecentTable::deserialize(serde::de::value::MapAccessDeserializer::new(map))?;
            Ok(Some(FlowIdSearch::Recent {
                depth: table.recent,
            }))
        }
    }

    deserializer.deserialize_any(V)
}
