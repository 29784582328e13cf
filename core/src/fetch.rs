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

//! Vectorized result fetching.
//!
//! A [ResultSet] drains an engine [Cursor] in chunks of at most
//! [FETCH_SIZE] rows, either as [ColumnVector]s or as an exported Arrow C
//! stream. Both paths share the same chunking and interrupt checks; they
//! are mutually exclusive on one result.

use std::sync::Arc;

use arrow_array::ffi_stream::FFI_ArrowArrayStream;
use arrow_array::{RecordBatch, RecordBatchReader};
use arrow_schema::{ArrowError, SchemaRef};
use tracing::trace;

use crate::constants::FETCH_SIZE;
use crate::engine::Cursor;
use crate::error::{Error, Result};
use crate::progress::QueryMonitor;
use crate::types::ColumnMeta;
use crate::vector::ColumnVector;

/// Number of rows in a full batch. Constant for the lifetime of the process.
pub fn fetch_size() -> usize {
    FETCH_SIZE
}

/// Re-chunks the batches of a cursor, checking for interrupts before every
/// pull.
struct Chunker {
    cursor: Box<dyn Cursor>,
    schema: SchemaRef,
    pending: Option<RecordBatch>,
    chunk_size: usize,
    monitor: Arc<QueryMonitor>,
    execution: u64,
    done: bool,
}

impl Chunker {
    fn next_chunk(&mut self) -> Result<Option<RecordBatch>> {
        if self.done {
            return Ok(None);
        }
        let next = self.pull();
        match &next {
            Ok(Some(batch)) => self.monitor.add_rows(batch.num_rows() as u64),
            Ok(None) | Err(_) => {
                self.done = true;
                self.monitor.finish(self.execution);
            }
        }
        next
    }

    fn pull(&mut self) -> Result<Option<RecordBatch>> {
        loop {
            self.monitor.check()?;
            let batch = match self.pending.take() {
                Some(batch) => batch,
                None => match self.cursor.next_batch()? {
                    Some(batch) => batch,
                    None => return Ok(None),
                },
            };
            let rows = batch.num_rows();
            if rows == 0 {
                continue;
            }
            if rows > self.chunk_size {
                self.pending = Some(batch.slice(self.chunk_size, rows - self.chunk_size));
                return Ok(Some(batch.slice(0, self.chunk_size)));
            }
            return Ok(Some(batch));
        }
    }
}

impl Drop for Chunker {
    fn drop(&mut self) {
        self.monitor.finish(self.execution);
    }
}

impl Iterator for Chunker {
    type Item = std::result::Result<RecordBatch, ArrowError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().map_err(ArrowError::from).transpose()
    }
}

impl RecordBatchReader for Chunker {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

enum State {
    Streaming(Chunker),
    Exported,
    Exhausted,
    Failed,
}

/// The forward-only result of one execution.
pub struct ResultSet {
    columns: Vec<Arc<ColumnMeta>>,
    schema: SchemaRef,
    state: State,
    fetched: bool,
}

impl ResultSet {
    pub(crate) fn new(
        cursor: Box<dyn Cursor>,
        monitor: Arc<QueryMonitor>,
        execution: u64,
    ) -> Result<Self> {
        let schema = cursor.schema();
        let columns = ColumnMeta::from_schema(&schema)?
            .into_iter()
            .map(Arc::new)
            .collect();
        Ok(Self {
            columns,
            schema: schema.clone(),
            state: State::Streaming(Chunker {
                cursor,
                schema,
                pending: None,
                chunk_size: FETCH_SIZE,
                monitor,
                execution,
                done: false,
            }),
            fetched: false,
        })
    }

    pub fn columns(&self) -> Vec<ColumnMeta> {
        self.columns.iter().map(|c| c.as_ref().clone()).collect()
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Whether end-of-stream was reached through [ResultSet::fetch].
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    /// Next batch as one vector per column, or an empty vector once the
    /// result is exhausted.
    ///
    /// The first engine failure is returned as-is; the result is unusable
    /// afterwards.
    pub fn fetch(&mut self) -> Result<Vec<ColumnVector>> {
        let next = match &mut self.state {
            State::Streaming(chunker) => chunker.next_chunk(),
            State::Exhausted => return Ok(Vec::new()),
            State::Exported => {
                return Err(Error::invalid_state(
                    "Result was exported as an Arrow stream and can no longer be fetched",
                ))
            }
            State::Failed => {
                return Err(Error::invalid_state("Result failed during an earlier fetch"))
            }
        };
        self.fetched = true;
        match next {
            Ok(Some(batch)) => {
                trace!(rows = batch.num_rows(), "fetched batch");
                Ok(ColumnVector::from_batch(&self.columns, &batch))
            }
            Ok(None) => {
                trace!("result exhausted");
                self.state = State::Exhausted;
                Ok(Vec::new())
            }
            Err(error) => {
                self.state = State::Failed;
                Err(error)
            }
        }
    }

    /// Hand the remaining batches over as an Arrow C stream of at most
    /// `batch_size` rows per batch (`0` selects [fetch_size]).
    pub fn export(&mut self, batch_size: usize) -> Result<FFI_ArrowArrayStream> {
        if self.fetched {
            return Err(Error::invalid_state(
                "Result was already fetched and cannot be exported",
            ));
        }
        match std::mem::replace(&mut self.state, State::Exported) {
            State::Streaming(mut chunker) => {
                chunker.chunk_size = if batch_size == 0 {
                    FETCH_SIZE
                } else {
                    batch_size
                };
                Ok(FFI_ArrowArrayStream::new(Box::new(chunker)))
            }
            other => {
                self.state = other;
                Err(Error::invalid_state("Result was already exported"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use arrow_array::ffi_stream::ArrowArrayStreamReader;
    use arrow_array::{Int32Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};

    use super::*;
    use crate::error::Status;
    use crate::vector::batch_len;

    struct VecCursor {
        schema: SchemaRef,
        batches: VecDeque<Result<RecordBatch>>,
    }

    impl Cursor for VecCursor {
        fn schema(&self) -> SchemaRef {
            self.schema.clone()
        }

        fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
            self.batches.pop_front().transpose()
        }
    }

    fn batch(schema: &SchemaRef, start: i32, rows: i32) -> RecordBatch {
        let values = Int32Array::from_iter_values(start..start + rows);
        RecordBatch::try_new(schema.clone(), vec![Arc::new(values)]).unwrap()
    }

    fn result_set(sizes: &[i32], error: Option<Error>) -> (ResultSet, Arc<QueryMonitor>) {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let mut batches: VecDeque<_> = sizes
            .iter()
            .scan(0, |start, rows| {
                let b = batch(&schema, *start, *rows);
                *start += rows;
                Some(Ok(b))
            })
            .collect();
        if let Some(error) = error {
            batches.push_back(Err(error));
        }
        let monitor = Arc::new(QueryMonitor::new());
        let execution = monitor.begin();
        let cursor = VecCursor { schema, batches };
        (
            ResultSet::new(Box::new(cursor), monitor.clone(), execution).unwrap(),
            monitor,
        )
    }

    #[test]
    fn rechunks_and_skips_empty_batches() {
        let (mut result, monitor) = result_set(&[5000, 0, 10], None);
        let mut sizes = vec![];
        loop {
            let vectors = result.fetch().unwrap();
            if vectors.is_empty() {
                break;
            }
            assert_eq!(vectors.len(), 1);
            sizes.push(batch_len(&vectors));
        }
        assert_eq!(sizes, vec![2048, 2048, 904, 10]);
        assert!(result.fetch().unwrap().is_empty());
        assert!(result.fetch().unwrap().is_empty());
        assert!(result.is_exhausted());
        assert!(!monitor.is_active());
    }

    #[test]
    fn values_keep_their_order_across_chunks() {
        let (mut result, _) = result_set(&[3000], None);
        result.fetch().unwrap();
        let second = result.fetch().unwrap();
        assert_eq!(second[0].value(0).unwrap(), crate::value::Value::Integer(2048));
    }

    #[test]
    fn first_error_is_reported_once() {
        let error = Error::with_message_and_status("division by zero", Status::Execution);
        let (mut result, _) = result_set(&[1], Some(error));
        assert_eq!(batch_len(&result.fetch().unwrap()), 1);

        let err = result.fetch().unwrap_err();
        assert_eq!(err.status, Status::Execution);
        assert_eq!(err.message, "division by zero");
        assert_eq!(result.fetch().unwrap_err().status, Status::InvalidState);
    }

    #[test]
    fn interrupt_cancels_next_fetch() {
        let (mut result, monitor) = result_set(&[10, 10], None);
        result.fetch().unwrap();
        monitor.interrupt();
        assert_eq!(result.fetch().unwrap_err().status, Status::Cancelled);
    }

    #[test]
    fn fetch_and_export_are_exclusive() {
        let (mut result, _) = result_set(&[10], None);
        result.fetch().unwrap();
        assert_eq!(result.export(0).unwrap_err().status, Status::InvalidState);

        let (mut result, _) = result_set(&[10], None);
        let stream = result.export(4).unwrap();
        assert_eq!(result.fetch().unwrap_err().status, Status::InvalidState);
        assert_eq!(result.export(4).unwrap_err().status, Status::InvalidState);

        let reader = ArrowArrayStreamReader::try_new(stream).unwrap();
        let sizes: Vec<usize> = reader.map(|b| b.unwrap().num_rows()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }
}
