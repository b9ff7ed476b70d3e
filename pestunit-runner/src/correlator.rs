// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlation of start, fault and finish events into terminal results.
//!
//! Test runners report each test as a sequence of service messages: a
//! started event, zero or more faults, and a finished event. The
//! [`ResultCorrelator`] merges each sequence into a single terminal
//! [`TestResult`] whose kind is the fault kind if any fault was recorded.
//!
//! Sequences are keyed by `(name, flowId)`, so nested and sibling suites may
//! interleave freely.

use crate::{
    config::FlowIdSearch,
    events::{CorrelationKey, Fault, TestResult},
};
use indexmap::IndexMap;
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug)]
struct OpenRecord {
    seq: u64,
    // The record as it was when this entry was opened.
    opened: TestResult,
    current: TestResult,
}

#[derive(Debug)]
struct ClosedRecord {
    seq: u64,
    opened: TestResult,
}

/// Merges started, fault and finished events that share a correlation key.
///
/// Each pipeline owns its own correlator; state is never shared between
/// processes.
#[derive(Debug)]
pub struct ResultCorrelator {
    // Insertion-ordered, oldest open entry first.
    open: IndexMap<CorrelationKey, OpenRecord>,
    // Oldest first, bounded by `closed_depth`.
    closed: VecDeque<ClosedRecord>,
    closed_depth: usize,
    next_seq: u64,
}

impl Default for ResultCorrelator {
    fn default() -> Self {
        Self::new(FlowIdSearch::default())
    }
}

impl ResultCorrelator {
    /// Creates a new correlator that remembers closed entries according to `search`.
    pub fn new(search: FlowIdSearch) -> Self {
        let closed_depth = search.closed_depth();
        Self {
            open: IndexMap::new(),
            closed: VecDeque::with_capacity(closed_depth),
            closed_depth,
            next_seq: 0,
        }
    }

    /// Routes a result to the handler for its kind.
    ///
    /// Returns the record to dispatch, if any. Faults are accumulated and only
    /// surface as part of the terminal record.
    pub fn correlate(&mut self, result: TestResult) -> Option<TestResult> {
        if result.kind.is_started() {
            Some(self.on_started(result))
        } else if result.kind.is_fault() {
            self.on_fault(result);
            None
        } else {
            Some(self.on_finished(result))
        }
    }

    /// Opens an entry for a started test or suite, replacing any open entry
    /// with the same key. Returns the stored record.
    pub fn on_started(&mut self, result: TestResult) -> TestResult {
        let key = result.key();
        if self.open.shift_remove(&key).is_some() {
            debug!("{key} started again while still open, replacing");
        }

        let seq = self.bump_seq();
        self.open.insert(
            key,
            OpenRecord {
                seq,
                opened: result.clone(),
                current: result.clone(),
            },
        );
        result
    }

    /// Records a fault for a test or suite. The entry stays open.
    ///
    /// The first fault for a key provides the base fields of the record, even
    /// if no started event was seen. Later faults append their message
    /// (separated by a blank line) and their details.
    pub fn on_fault(&mut self, result: TestResult) {
        let key = result.key();
        match self.open.get_mut(&key) {
            None => {
                debug!("{key} reported a fault before starting");
                let seq = self.bump_seq();
                self.open.insert(
                    key,
                    OpenRecord {
                        seq,
                        opened: result.clone(),
                        current: result,
                    },
                );
            }
            Some(open) if open.current.fault.is_none() => {
                let base = &mut open.current;
                base.kind = result.kind;
                base.fault = Some(result.fault.unwrap_or_default());
                overlay(&mut base.id, result.id);
                overlay(&mut base.file, result.file);
                overlay(&mut base.location_hint, result.location_hint);
                overlay(&mut base.duration, result.duration);
            }
            Some(open) => {
                let fault = open.current.fault.get_or_insert_with(Fault::default);
                fault.append(result.fault.unwrap_or_default());
            }
        }
    }

    /// Closes the entry for a finished test or suite and returns the terminal record.
    ///
    /// If no entry is open for the key, `result` is returned as is.
    pub fn on_finished(&mut self, result: TestResult) -> TestResult {
        let key = result.key();
        let Some(OpenRecord {
            seq,
            opened,
            current,
        }) = self.open.shift_remove(&key)
        else {
            debug!("{key} finished without being open");
            return result;
        };
        self.remember_closed(seq, opened);

        let kind = if current.fault.is_some() {
            current.kind
        } else {
            result.kind
        };

        TestResult {
            kind,
            name: result.name,
            flow_id: result.flow_id,
            id: result.id.or(current.id),
            file: result.file.or(current.file),
            location_hint: result.location_hint.or(current.location_hint),
            duration: result.duration.or(current.duration),
            fault: current.fault,
        }
    }

    /// Returns the number of open entries.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Returns true if an entry is open for `key`.
    pub fn is_open(&self, key: &CorrelationKey) -> bool {
        self.open.contains_key(key)
    }

    /// Returns the records open entries were opened with, along with the
    /// remembered closed entries, most recent first.
    pub fn history(&self) -> Vec<&TestResult> {
        let mut entries: Vec<(u64, &TestResult)> = self
            .open
            .values()
            .map(|open| (open.seq, &open.opened))
            .chain(self.closed.iter().map(|closed| (closed.seq, &closed.opened)))
            .collect();
        entries.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        entries.into_iter().map(|(_, record)| record).collect()
    }

    /// Drops all open entries without producing terminal records.
    ///
    /// Returns the number of entries dropped.
    pub fn discard_open(&mut self) -> usize {
        let count = self.open.len();
        if count > 0 {
            debug!(
                "discarding {count} open entries: {}",
                itertools::join(self.open.keys(), ", ")
            );
        }
        self.open.clear();
        count
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remember_closed(&mut self, seq: u64, opened: TestResult) {
        if self.closed_depth == 0 {
            return;
        }
        if self.closed.len() == self.closed_depth {
            self.closed.pop_front();
        }
        self.closed.push_back(ClosedRecord { seq, opened });
    }
}

fn overlay<T>(base: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *base = value;
    }
}
