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

//! Vecbridge: a vectorized bridge to an embedded analytical engine.
//!
//! The bridge opens databases and connections, prepares and executes
//! parameterized statements, streams results back as columnar batches and
//! bulk-inserts rows through an appender. Every native-side object is
//! addressed by an opaque [Handle] managed by the [Bridge].
//!
//! Data crosses the bridge in the Arrow columnar layout: fetched batches
//! are [ColumnVector]s, results can be exported as Arrow C streams, and
//! Arrow C streams can be registered as queryable relations.
//!
//! # Engines
//!
//! The engine itself is a black box implementing the traits in [engine]:
//! - [Driver]
//! - [Database]
//! - [Session]
//! - [PreparedQuery]
//! - [Cursor]
//!
//! # Threads
//!
//! A [Bridge] is used from one thread at a time. Queries running on a
//! connection can be interrupted and observed from other threads through an
//! [InterruptHandle], and databases can be shared with bridges on other
//! threads through a [DatabaseRef].

pub mod appender;
pub mod bridge;
mod builder;
pub mod constants;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod options;
pub mod progress;
pub mod registry;
pub mod types;
pub mod value;
pub mod vector;

pub use bridge::{Bridge, DatabaseRef, StatementMeta};
pub use engine::{Cursor, Database, Driver, PreparedQuery, Session};
pub use error::{Error, Result, Status};
pub use progress::{InterruptHandle, QueryMonitor, QueryProgress};
pub use registry::{Handle, Role};
pub use types::{ColumnMeta, ColumnType, LogicalType};
pub use value::{Decimal, Interval, Value};
pub use vector::ColumnVector;

/// Lay out values of one type as an Arrow array, coercing each value to
/// `logical_type` first. Engines use this to turn bound parameters into
/// scalars.
pub fn values_to_array(
    logical_type: &LogicalType,
    values: &[Value],
) -> Result<arrow_array::ArrayRef> {
    let coerced = values
        .iter()
        .map(|v| v.coerce_to(logical_type))
        .collect::<Result<Vec<_>>>()?;
    builder::build_array(logical_type, &coerced)
}
