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

//! Traits implemented by an embedded engine.
//!
//! The bridge treats the engine as a black box that accepts SQL text and
//! bound parameters and produces typed columnar batches. Everything behind
//! these traits (parsing, planning, execution, storage) belongs to the
//! engine.

use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchReader};
use arrow_schema::SchemaRef;

use crate::error::Result;
use crate::options::{DatabaseConfig, ProfilerFormat};
use crate::progress::QueryMonitor;
use crate::types::LogicalType;
use crate::value::Value;

/// Entry point of an engine.
pub trait Driver: Send + Sync {
    /// Open the database described by `config`.
    ///
    /// Fails with [Status::IO](crate::error::Status::IO) if the path is
    /// inaccessible or not a database, and with
    /// [Status::Config](crate::error::Status::Config) on unrecognized
    /// options.
    fn open(&self, config: &DatabaseConfig) -> Result<Arc<dyn Database>>;
}

/// An open database instance.
///
/// Databases hold state shared by every connection: the catalog, the
/// tables and the engine's execution resources. They must be kept alive as
/// long as any connection exists.
pub trait Database: Send + Sync {
    /// Open a new session against this database.
    fn connect(&self) -> Result<Box<dyn Session>>;
}

/// A connection to a [Database].
///
/// Sessions hold the name-resolution context (catalog and schema) and the
/// transaction mode. Sessions start in auto-commit mode.
pub trait Session: Send {
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// Name of the schema unqualified references resolve against.
    fn schema(&self) -> Result<String>;

    /// Fails with [Status::NotFound](crate::error::Status::NotFound) if the
    /// schema does not exist in the current catalog.
    fn set_schema(&mut self, schema: &str) -> Result<()>;

    fn catalog(&self) -> Result<String>;

    /// Fails with [Status::NotFound](crate::error::Status::NotFound) if the
    /// catalog does not exist.
    fn set_catalog(&mut self, catalog: &str) -> Result<()>;

    /// Parse and plan `sql` without executing it.
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedQuery>>;

    /// Arrow schema of a table, resolved in `schema` or the current schema.
    fn table_schema(&self, schema: Option<&str>, table: &str) -> Result<SchemaRef>;

    /// Insert a batch of rows into a table.
    fn append(&mut self, schema: Option<&str>, table: &str, batch: RecordBatch) -> Result<()>;

    /// Make the batches of `reader` queryable under `name`.
    fn register_stream(
        &mut self,
        name: &str,
        reader: Box<dyn RecordBatchReader + Send>,
    ) -> Result<()>;

    /// Describe the plan of the last statement executed on this session.
    ///
    /// Returns an empty string if nothing was executed yet.
    fn profile(&self, format: ProfilerFormat) -> Result<String>;
}

/// A planned statement that can be executed any number of times.
pub trait PreparedQuery: Send {
    /// Declared type of each positional parameter, `None` where the engine
    /// could not infer one.
    fn parameter_types(&self) -> Vec<Option<LogicalType>>;

    /// Schema of the rows an execution produces.
    fn schema(&self) -> Result<SchemaRef>;

    /// Run the statement with `params`, already checked and coerced to the
    /// declared parameter types.
    ///
    /// Engines report progress through `monitor` and must poll
    /// [QueryMonitor::check] at their own suspension points. Errors that
    /// happen while executing may be deferred to the cursor.
    fn execute(&mut self, params: &[Value], monitor: Arc<QueryMonitor>)
        -> Result<Box<dyn Cursor>>;
}

/// Forward-only iterator over the batches of one execution.
///
/// A cursor owns whatever engine state it needs: it remains valid after
/// the statement that produced it is dropped.
pub trait Cursor: Send {
    fn schema(&self) -> SchemaRef;

    /// Next batch, or `None` once the result is exhausted. Batches may hold
    /// any number of rows.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>>;
}
