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

//! Column vectors: one column of a fetched batch.

use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Date32Type, Decimal128Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, IntervalMonthDayNanoType, Time64MicrosecondType, TimestampMicrosecondType,
    UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_buffer::NullBuffer;

use crate::error::{Error, Result, Status};
use crate::types::{ColumnMeta, LogicalType};
use crate::value::{Decimal, Interval, Value};

/// One column of a batch: a validity bitmap plus typed buffers, in the
/// canonical Arrow layout of the column's semantic type.
///
/// Vectors are immutable. Cloning shares the underlying buffers.
#[derive(Clone, Debug)]
pub struct ColumnVector {
    meta: Arc<ColumnMeta>,
    array: ArrayRef,
}

impl ColumnVector {
    pub fn new(meta: Arc<ColumnMeta>, array: ArrayRef) -> Self {
        Self { meta, array }
    }

    /// Split a record batch into vectors, one per column.
    pub fn from_batch(columns: &[Arc<ColumnMeta>], batch: &RecordBatch) -> Vec<Self> {
        columns
            .iter()
            .zip(batch.columns())
            .map(|(meta, array)| Self::new(meta.clone(), array.clone()))
            .collect()
    }

    pub fn meta(&self) -> &ColumnMeta {
        &self.meta
    }

    pub fn logical_type(&self) -> &LogicalType {
        &self.meta.logical_type
    }

    /// The Arrow array holding this vector's buffers.
    pub fn array(&self) -> &ArrayRef {
        &self.array
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.array.null_count()
    }

    /// The validity bitmap, `None` when every row is valid.
    pub fn validity(&self) -> Option<&NullBuffer> {
        self.array.nulls()
    }

    pub fn is_null(&self, row: usize) -> bool {
        self.array.is_null(row)
    }

    /// Precision and scale shared by every value of a DECIMAL vector.
    pub fn decimal_parameters(&self) -> Option<(u8, i8)> {
        match self.meta.logical_type {
            LogicalType::Decimal { precision, scale } => Some((precision, scale)),
            _ => None,
        }
    }

    pub fn value(&self, row: usize) -> Result<Value> {
        if row >= self.array.len() {
            return Err(Error::with_message_and_status(
                format!("Row {row} out of range for a vector of {} rows", self.array.len()),
                Status::InvalidState,
            ));
        }
        value_at(self.array.as_ref(), &self.meta.logical_type, row)
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        (0..self.len()).map(|row| self.value(row)).collect()
    }
}

/// Number of rows in a batch of vectors.
pub fn batch_len(vectors: &[ColumnVector]) -> usize {
    vectors.first().map_or(0, ColumnVector::len)
}

fn layout_mismatch(array: &dyn Array, logical_type: &LogicalType) -> Error {
    Error::with_message_and_status(
        format!(
            "Vector of Arrow type {} does not hold {logical_type}",
            array.data_type()
        ),
        Status::Internal,
    )
}

/// Read one cell of an array in the canonical layout of `logical_type`.
pub fn value_at(array: &dyn Array, logical_type: &LogicalType, row: usize) -> Result<Value> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let mismatch = || layout_mismatch(array, logical_type);
    let value = match logical_type {
        LogicalType::Boolean => Value::Boolean(array.as_boolean_opt().ok_or_else(mismatch)?.value(row)),
        LogicalType::TinyInt => {
            Value::TinyInt(array.as_primitive_opt::<Int8Type>().ok_or_else(mismatch)?.value(row))
        }
        LogicalType::SmallInt => {
            Value::SmallInt(array.as_primitive_opt::<Int16Type>().ok_or_else(mismatch)?.value(row))
        }
        LogicalType::Integer => {
            Value::Integer(array.as_primitive_opt::<Int32Type>().ok_or_else(mismatch)?.value(row))
        }
        LogicalType::BigInt => {
            Value::BigInt(array.as_primitive_opt::<Int64Type>().ok_or_else(mismatch)?.value(row))
        }
        LogicalType::UTinyInt => {
            Value::UTinyInt(array.as_primitive_opt::<UInt8Type>().ok_or_else(mismatch)?.value(row))
        }
        LogicalType::USmallInt => Value::USmallInt(
            array.as_primitive_opt::<UInt16Type>().ok_or_else(mismatch)?.value(row),
        ),
        LogicalType::UInteger => Value::UInteger(
            array.as_primitive_opt::<UInt32Type>().ok_or_else(mismatch)?.value(row),
        ),
        LogicalType::UBigInt => {
            Value::UBigInt(array.as_primitive_opt::<UInt64Type>().ok_or_else(mismatch)?.value(row))
        }
        LogicalType::HugeInt => Value::HugeInt(
            array.as_primitive_opt::<Decimal128Type>().ok_or_else(mismatch)?.value(row),
        ),
        LogicalType::Float => {
            Value::Float(array.as_primitive_opt::<Float32Type>().ok_or_else(mismatch)?.value(row))
        }
        LogicalType::Double => {
            Value::Double(array.as_primitive_opt::<Float64Type>().ok_or_else(mismatch)?.value(row))
        }
        LogicalType::Decimal { precision, scale } => Value::Decimal(Decimal {
            value: array.as_primitive_opt::<Decimal128Type>().ok_or_else(mismatch)?.value(row),
            precision: *precision,
            scale: *scale,
        }),
        LogicalType::Varchar => Value::Varchar(
            array.as_string_opt::<i32>().ok_or_else(mismatch)?.value(row).to_string(),
        ),
        LogicalType::Blob => {
            Value::Blob(array.as_binary_opt::<i32>().ok_or_else(mismatch)?.value(row).to_vec())
        }
        LogicalType::Time => Value::Time(
            array
                .as_primitive_opt::<Time64MicrosecondType>()
                .ok_or_else(mismatch)?
                .value(row),
        ),
        LogicalType::Date => {
            Value::Date(array.as_primitive_opt::<Date32Type>().ok_or_else(mismatch)?.value(row))
        }
        LogicalType::Timestamp => Value::Timestamp(
            array
                .as_primitive_opt::<TimestampMicrosecondType>()
                .ok_or_else(mismatch)?
                .value(row),
        ),
        LogicalType::Interval => {
            let interval = array
                .as_primitive_opt::<IntervalMonthDayNanoType>()
                .ok_or_else(mismatch)?
                .value(row);
            Value::Interval(Interval {
                months: interval.months,
                days: interval.days,
                nanos: interval.nanoseconds,
            })
        }
        LogicalType::List(child) => {
            let items = array.as_list_opt::<i32>().ok_or_else(mismatch)?.value(row);
            Value::List(
                (0..items.len())
                    .map(|i| value_at(items.as_ref(), child, i))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        LogicalType::Struct(children) => {
            let record = array.as_struct_opt().ok_or_else(mismatch)?;
            Value::Struct(
                children
                    .iter()
                    .zip(record.columns())
                    .map(|((name, child), column)| Ok((name.clone(), value_at(column.as_ref(), child, row)?)))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
    };
    Ok(value)
}
