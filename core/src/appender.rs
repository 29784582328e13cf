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

//! Row-at-a-time bulk insert buffered in columnar form.

use std::collections::VecDeque;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::{Schema, SchemaRef};
use tracing::debug;

use crate::builder::ColumnBuilder;
use crate::constants::FETCH_SIZE;
use crate::error::{Error, Result, Status};
use crate::types::ColumnMeta;
use crate::value::Value;

/// Buffers rows for one table until they are flushed.
///
/// Rows follow a small state machine: [Appender::begin_row] opens a row,
/// one [Appender::append] per column fills it in column order, and
/// [Appender::end_row] commits it to the column buffers. Any failure
/// inside a row discards that row and leaves the appender ready for the
/// next one; rows committed earlier are kept.
///
/// Committed rows stay with the appender until the engine accepts them: a
/// failed flush keeps them queued for the next one.
pub struct Appender {
    schema: Option<String>,
    table: String,
    columns: Vec<ColumnMeta>,
    arrow_schema: SchemaRef,
    builders: Vec<ColumnBuilder>,
    row: Option<Vec<Value>>,
    buffered: usize,
    /// Sealed batches the engine has not accepted yet, oldest first.
    pending: VecDeque<RecordBatch>,
}

impl std::fmt::Debug for Appender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appender")
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("buffered", &self.buffered)
            .field("pending_batches", &self.pending.len())
            .field("row_open", &self.row.is_some())
            .finish()
    }
}

impl Appender {
    /// Appender for a table whose engine schema is `table_schema`.
    pub fn try_new(schema: Option<&str>, table: &str, table_schema: &Schema) -> Result<Self> {
        let columns = ColumnMeta::from_schema(table_schema)?;
        let builders = columns
            .iter()
            .map(|c| ColumnBuilder::new(&c.logical_type, FETCH_SIZE))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
            arrow_schema: Arc::new(ColumnMeta::to_schema(&columns)),
            columns,
            builders,
            row: None,
            buffered: 0,
            pending: VecDeque::new(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Number of complete rows the engine has not accepted yet.
    pub fn buffered_rows(&self) -> usize {
        self.buffered + self.pending.iter().map(RecordBatch::num_rows).sum::<usize>()
    }

    pub fn is_row_open(&self) -> bool {
        self.row.is_some()
    }

    /// Drop the open row, if any, and report whether there was one.
    pub fn discard_row(&mut self) -> bool {
        self.row.take().is_some()
    }

    /// Whether enough rows were committed since the last flush to warrant
    /// another.
    pub fn is_full(&self) -> bool {
        self.buffered >= FETCH_SIZE
    }

    pub fn begin_row(&mut self) -> Result<()> {
        if self.row.is_some() {
            return Err(Error::invalid_state(
                "A row is already open; end it before beginning another",
            ));
        }
        self.row = Some(Vec::with_capacity(self.columns.len()));
        Ok(())
    }

    /// Append the value of the next column of the open row.
    pub fn append(&mut self, value: Value) -> Result<()> {
        let row = self
            .row
            .as_mut()
            .ok_or_else(|| Error::invalid_state("No row is open; call begin_row first"))?;
        let index = row.len();
        let Some(column) = self.columns.get(index) else {
            self.row = None;
            return Err(Error::with_message_and_status(
                format!(
                    "Table {} has {} columns; the row was discarded",
                    self.table,
                    self.columns.len()
                ),
                Status::ExcessColumn,
            ));
        };
        let coerced = match value.coerce_to(&column.logical_type) {
            Ok(Value::Null) if !column.nullable => Err(Error::type_coercion(format!(
                "Column {} does not accept NULL",
                column.name
            ))),
            other => other,
        };
        match coerced {
            Ok(value) => {
                row.push(value);
                Ok(())
            }
            Err(error) => {
                self.row = None;
                Err(error)
            }
        }
    }

    /// Commit the open row. Fails with [Status::IncompleteRow], discarding
    /// the row, unless every column received a value.
    pub fn end_row(&mut self) -> Result<()> {
        let row = self
            .row
            .take()
            .ok_or_else(|| Error::invalid_state("No row is open; call begin_row first"))?;
        if row.len() != self.columns.len() {
            return Err(Error::with_message_and_status(
                format!(
                    "Row has {} of {} values; the row was discarded",
                    row.len(),
                    self.columns.len()
                ),
                Status::IncompleteRow,
            ));
        }
        for (builder, value) in self.builders.iter_mut().zip(&row) {
            builder.append(value)?;
        }
        self.buffered += 1;
        Ok(())
    }

    /// Seal the rows committed so far into a batch queued for the engine.
    fn seal(&mut self) -> Result<()> {
        if self.buffered == 0 {
            return Ok(());
        }
        let arrays = self
            .builders
            .iter_mut()
            .map(ColumnBuilder::finish)
            .collect::<Result<Vec<_>>>()?;
        let rows = std::mem::take(&mut self.buffered);
        debug!(table = %self.table, rows, "sealed appender batch");
        self.pending
            .push_back(RecordBatch::try_new(self.arrow_schema.clone(), arrays)?);
        Ok(())
    }

    /// Hand every committed row to `sink`, one batch at a time and oldest
    /// first, and return the number of rows it accepted. A batch is only
    /// dropped once `sink` returns `Ok`; on error it stays queued and the
    /// error is returned.
    pub fn flush_with(&mut self, mut sink: impl FnMut(RecordBatch) -> Result<()>) -> Result<usize> {
        self.seal()?;
        let mut rows = 0;
        while let Some(batch) = self.pending.front() {
            sink(batch.clone())?;
            rows += batch.num_rows();
            self.pending.pop_front();
        }
        Ok(rows)
    }
}
