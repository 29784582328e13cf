// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Side channel for interrupting and observing a running query.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result, Status};

const UNKNOWN_TOTAL: u64 = u64::MAX;

/// Snapshot of the progress of the query running on a connection.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QueryProgress {
    /// Percentage complete, or `-1.0` when unknown.
    pub percentage: f64,
    pub rows_processed: u64,
    /// Zero when unknown.
    pub total_rows_to_process: u64,
}

impl QueryProgress {
    pub fn unknown() -> Self {
        Self {
            percentage: -1.0,
            rows_processed: 0,
            total_rows_to_process: 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.percentage < 0.0
    }
}

impl Default for QueryProgress {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Per-connection interrupt flag and progress counters.
///
/// Every field is atomic, so the monitor can be read and interrupted from
/// other threads while the owning connection is busy. The interrupt flag
/// is level-triggered: it stays set until the next execution begins.
#[derive(Debug)]
pub struct QueryMonitor {
    interrupted: AtomicBool,
    execution: AtomicU64,
    active: AtomicBool,
    rows_processed: AtomicU64,
    total_rows: AtomicU64,
}

impl Default for QueryMonitor {
    fn default() -> Self {
        Self {
            interrupted: AtomicBool::new(false),
            execution: AtomicU64::new(0),
            active: AtomicBool::new(false),
            rows_processed: AtomicU64::new(0),
            total_rows: AtomicU64::new(UNKNOWN_TOTAL),
        }
    }
}

impl QueryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        debug!("interrupt requested");
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Poll point: fails with [Status::Cancelled] once an interrupt was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_interrupted() {
            return Err(Error::with_message_and_status(
                "Query was interrupted",
                Status::Cancelled,
            ));
        }
        Ok(())
    }

    /// Start tracking a new execution, clearing any pending interrupt.
    /// Returns the execution id to pass to [QueryMonitor::finish].
    pub fn begin(&self) -> u64 {
        self.interrupted.store(false, Ordering::SeqCst);
        self.rows_processed.store(0, Ordering::SeqCst);
        self.total_rows.store(UNKNOWN_TOTAL, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        self.execution.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stop tracking `execution`, unless a newer one has started since.
    pub fn finish(&self, execution: u64) {
        if self.execution.load(Ordering::SeqCst) == execution {
            self.active.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn add_rows(&self, rows: u64) {
        self.rows_processed.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record the number of rows the query is expected to produce.
    pub fn set_total_rows(&self, total: Option<u64>) {
        self.total_rows
            .store(total.unwrap_or(UNKNOWN_TOTAL), Ordering::Relaxed);
    }

    pub fn progress(&self) -> QueryProgress {
        if !self.is_active() {
            return QueryProgress::unknown();
        }
        let rows_processed = self.rows_processed.load(Ordering::Relaxed);
        match self.total_rows.load(Ordering::Relaxed) {
            UNKNOWN_TOTAL => QueryProgress {
                percentage: -1.0,
                rows_processed,
                total_rows_to_process: 0,
            },
            0 => QueryProgress {
                percentage: 100.0,
                rows_processed,
                total_rows_to_process: 0,
            },
            total => QueryProgress {
                percentage: (rows_processed as f64 * 100.0 / total as f64).min(100.0),
                rows_processed,
                total_rows_to_process: total,
            },
        }
    }
}

/// Cloneable, thread-safe handle onto a connection's [QueryMonitor].
///
/// It stays usable after the connection is disconnected; interrupting a
/// closed connection has no effect.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    monitor: Arc<QueryMonitor>,
}

impl InterruptHandle {
    pub(crate) fn new(monitor: Arc<QueryMonitor>) -> Self {
        Self { monitor }
    }

    pub fn interrupt(&self) {
        self.monitor.interrupt()
    }

    pub fn query_progress(&self) -> QueryProgress {
        self.monitor.progress()
    }
}
