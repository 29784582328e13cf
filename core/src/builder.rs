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

//! Columnar buffers filled one value at a time.

use std::sync::Arc;

use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, Date32Builder, Decimal128Builder,
    Float32Builder, Float64Builder, Int16Builder, Int32Builder, Int64Builder, Int8Builder,
    IntervalMonthDayNanoBuilder, StringBuilder, Time64MicrosecondBuilder,
    TimestampMicrosecondBuilder, UInt16Builder, UInt32Builder, UInt64Builder, UInt8Builder,
};
use arrow_array::{ArrayRef, ListArray, StructArray};
use arrow_buffer::{IntervalMonthDayNano, NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow_schema::{Field, Fields};

use crate::error::{Error, Result};
use crate::types::{LogicalType, HUGEINT_MAX, MAX_DECIMAL_PRECISION};
use crate::value::Value;

/// Typed builder for one column. Values must already be coerced to the
/// column's type with [Value::coerce_to].
pub(crate) enum ColumnBuilder {
    Boolean(BooleanBuilder),
    TinyInt(Int8Builder),
    SmallInt(Int16Builder),
    Integer(Int32Builder),
    BigInt(Int64Builder),
    UTinyInt(UInt8Builder),
    USmallInt(UInt16Builder),
    UInteger(UInt32Builder),
    UBigInt(UInt64Builder),
    HugeInt(Decimal128Builder),
    Float(Float32Builder),
    Double(Float64Builder),
    Decimal(Decimal128Builder),
    Varchar(StringBuilder),
    Blob(BinaryBuilder),
    Time(Time64MicrosecondBuilder),
    Date(Date32Builder),
    Timestamp(TimestampMicrosecondBuilder),
    Interval(IntervalMonthDayNanoBuilder),
    /// LIST and STRUCT values are kept as values and laid out on finish.
    Nested {
        logical_type: LogicalType,
        values: Vec<Value>,
    },
}

impl ColumnBuilder {
    pub(crate) fn new(logical_type: &LogicalType, capacity: usize) -> Result<Self> {
        let builder = match logical_type {
            LogicalType::Boolean => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            LogicalType::TinyInt => Self::TinyInt(Int8Builder::with_capacity(capacity)),
            LogicalType::SmallInt => Self::SmallInt(Int16Builder::with_capacity(capacity)),
            LogicalType::Integer => Self::Integer(Int32Builder::with_capacity(capacity)),
            LogicalType::BigInt => Self::BigInt(Int64Builder::with_capacity(capacity)),
            LogicalType::UTinyInt => Self::UTinyInt(UInt8Builder::with_capacity(capacity)),
            LogicalType::USmallInt => Self::USmallInt(UInt16Builder::with_capacity(capacity)),
            LogicalType::UInteger => Self::UInteger(UInt32Builder::with_capacity(capacity)),
            LogicalType::UBigInt => Self::UBigInt(UInt64Builder::with_capacity(capacity)),
            LogicalType::HugeInt => Self::HugeInt(
                Decimal128Builder::with_capacity(capacity)
                    .with_precision_and_scale(MAX_DECIMAL_PRECISION, 0)?,
            ),
            LogicalType::Float => Self::Float(Float32Builder::with_capacity(capacity)),
            LogicalType::Double => Self::Double(Float64Builder::with_capacity(capacity)),
            LogicalType::Decimal { precision, scale } => Self::Decimal(
                Decimal128Builder::with_capacity(capacity)
                    .with_precision_and_scale(*precision, *scale)?,
            ),
            LogicalType::Varchar => Self::Varchar(StringBuilder::new()),
            LogicalType::Blob => Self::Blob(BinaryBuilder::new()),
            LogicalType::Time => Self::Time(Time64MicrosecondBuilder::with_capacity(capacity)),
            LogicalType::Date => Self::Date(Date32Builder::with_capacity(capacity)),
            LogicalType::Timestamp => {
                Self::Timestamp(TimestampMicrosecondBuilder::with_capacity(capacity))
            }
            LogicalType::Interval => {
                Self::Interval(IntervalMonthDayNanoBuilder::with_capacity(capacity))
            }
            LogicalType::List(_) | LogicalType::Struct(_) => Self::Nested {
                logical_type: logical_type.clone(),
                values: Vec::with_capacity(capacity),
            },
        };
        Ok(builder)
    }

    pub(crate) fn append(&mut self, value: &Value) -> Result<()> {
        match (self, value) {
            (Self::Nested { values, .. }, value) => values.push(value.clone()),
            (Self::Boolean(b), Value::Null) => b.append_null(),
            (Self::TinyInt(b), Value::Null) => b.append_null(),
            (Self::SmallInt(b), Value::Null) => b.append_null(),
            (Self::Integer(b), Value::Null) => b.append_null(),
            (Self::BigInt(b), Value::Null) => b.append_null(),
            (Self::UTinyInt(b), Value::Null) => b.append_null(),
            (Self::USmallInt(b), Value::Null) => b.append_null(),
            (Self::UInteger(b), Value::Null) => b.append_null(),
            (Self::UBigInt(b), Value::Null) => b.append_null(),
            (Self::HugeInt(b) | Self::Decimal(b), Value::Null) => b.append_null(),
            (Self::Float(b), Value::Null) => b.append_null(),
            (Self::Double(b), Value::Null) => b.append_null(),
            (Self::Varchar(b), Value::Null) => b.append_null(),
            (Self::Blob(b), Value::Null) => b.append_null(),
            (Self::Time(b), Value::Null) => b.append_null(),
            (Self::Date(b), Value::Null) => b.append_null(),
            (Self::Timestamp(b), Value::Null) => b.append_null(),
            (Self::Interval(b), Value::Null) => b.append_null(),
            (Self::Boolean(b), Value::Boolean(v)) => b.append_value(*v),
            (Self::TinyInt(b), Value::TinyInt(v)) => b.append_value(*v),
            (Self::SmallInt(b), Value::SmallInt(v)) => b.append_value(*v),
            (Self::Integer(b), Value::Integer(v)) => b.append_value(*v),
            (Self::BigInt(b), Value::BigInt(v)) => b.append_value(*v),
            (Self::UTinyInt(b), Value::UTinyInt(v)) => b.append_value(*v),
            (Self::USmallInt(b), Value::USmallInt(v)) => b.append_value(*v),
            (Self::UInteger(b), Value::UInteger(v)) => b.append_value(*v),
            (Self::UBigInt(b), Value::UBigInt(v)) => b.append_value(*v),
            (Self::HugeInt(b), Value::HugeInt(v)) => {
                if v.unsigned_abs() > HUGEINT_MAX.unsigned_abs() {
                    return Err(Error::type_coercion(format!("{v} is out of range for HUGEINT")));
                }
                b.append_value(*v)
            }
            (Self::Float(b), Value::Float(v)) => b.append_value(*v),
            (Self::Double(b), Value::Double(v)) => b.append_value(*v),
            (Self::Decimal(b), Value::Decimal(d)) => b.append_value(d.value),
            (Self::Varchar(b), Value::Varchar(v)) => b.append_value(v),
            (Self::Blob(b), Value::Blob(v)) => b.append_value(v),
            (Self::Time(b), Value::Time(v)) => b.append_value(*v),
            (Self::Date(b), Value::Date(v)) => b.append_value(*v),
            (Self::Timestamp(b), Value::Timestamp(v)) => b.append_value(*v),
            (Self::Interval(b), Value::Interval(v)) => {
                b.append_value(IntervalMonthDayNano::new(v.months, v.days, v.nanos))
            }
            (_, value) => {
                return Err(Error::type_coercion(format!(
                    "{} value does not match the column buffer",
                    value.kind()
                )))
            }
        }
        Ok(())
    }

    /// Lay out the buffered values and reset the builder.
    pub(crate) fn finish(&mut self) -> Result<ArrayRef> {
        let array: ArrayRef = match self {
            Self::Boolean(b) => Arc::new(b.finish()),
            Self::TinyInt(b) => Arc::new(b.finish()),
            Self::SmallInt(b) => Arc::new(b.finish()),
            Self::Integer(b) => Arc::new(b.finish()),
            Self::BigInt(b) => Arc::new(b.finish()),
            Self::UTinyInt(b) => Arc::new(b.finish()),
            Self::USmallInt(b) => Arc::new(b.finish()),
            Self::UInteger(b) => Arc::new(b.finish()),
            Self::UBigInt(b) => Arc::new(b.finish()),
            Self::HugeInt(b) | Self::Decimal(b) => Arc::new(b.finish()),
            Self::Float(b) => Arc::new(b.finish()),
            Self::Double(b) => Arc::new(b.finish()),
            Self::Varchar(b) => Arc::new(b.finish()),
            Self::Blob(b) => Arc::new(b.finish()),
            Self::Time(b) => Arc::new(b.finish()),
            Self::Date(b) => Arc::new(b.finish()),
            Self::Timestamp(b) => Arc::new(b.finish()),
            Self::Interval(b) => Arc::new(b.finish()),
            Self::Nested {
                logical_type,
                values,
            } => {
                let values = std::mem::take(values);
                build_nested(logical_type, &values)?
            }
        };
        Ok(array)
    }
}

/// Lay out coerced values of one type as an Arrow array.
pub(crate) fn build_array(logical_type: &LogicalType, values: &[Value]) -> Result<ArrayRef> {
    let mut builder = ColumnBuilder::new(logical_type, values.len())?;
    for value in values {
        builder.append(value)?;
    }
    builder.finish()
}

fn build_nested(logical_type: &LogicalType, values: &[Value]) -> Result<ArrayRef> {
    let validity = NullBuffer::from(values.iter().map(|v| !v.is_null()).collect::<Vec<_>>());
    match logical_type {
        LogicalType::List(child) => {
            let mut offsets = Vec::with_capacity(values.len() + 1);
            let mut child_values = Vec::new();
            offsets.push(0i32);
            for value in values {
                match value {
                    Value::Null => {}
                    Value::List(items) => child_values.extend(items.iter().cloned()),
                    other => {
                        return Err(Error::type_coercion(format!(
                            "{} value in a LIST column",
                            other.kind()
                        )))
                    }
                }
                let end = i32::try_from(child_values.len())
                    .map_err(|_| Error::type_coercion("LIST column exceeds 2^31 child values"))?;
                offsets.push(end);
            }
            let child_array = build_array(child, &child_values)?;
            Ok(Arc::new(ListArray::try_new(
                Arc::new(child.to_field(Field::LIST_FIELD_DEFAULT_NAME, true)),
                OffsetBuffer::new(ScalarBuffer::from(offsets)),
                child_array,
                Some(validity),
            )?))
        }
        LogicalType::Struct(children) => {
            let fields = children
                .iter()
                .map(|(name, child)| child.to_field(name, true))
                .collect::<Fields>();
            let mut arrays = Vec::with_capacity(children.len());
            for (index, (_, child)) in children.iter().enumerate() {
                let column = values
                    .iter()
                    .map(|value| match value {
                        Value::Null => Ok(Value::Null),
                        Value::Struct(entries) => entries
                            .get(index)
                            .map(|(_, v)| v.clone())
                            .ok_or_else(|| Error::type_coercion("STRUCT value is missing fields")),
                        other => Err(Error::type_coercion(format!(
                            "{} value in a STRUCT column",
                            other.kind()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                arrays.push(build_array(child, &column)?);
            }
            Ok(Arc::new(StructArray::try_new(fields, arrays, Some(validity))?))
        }
        other => build_array(other, values),
    }
}

#[cfg(test)]
mod tests {
    use arrow_array::{Array, Decimal128Array, Int32Array, StringArray};

    use super::*;
    use crate::value::Decimal;

    #[test]
    fn primitive_columns_keep_null_placement() {
        let array = build_array(
            &LogicalType::Integer,
            &[Value::Integer(1), Value::Null, Value::Integer(3)],
        )
        .unwrap();
        let ints = array.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(ints.len(), 3);
        assert!(ints.is_null(1));
        assert_eq!(ints.value(2), 3);
    }

    #[test]
    fn decimal_columns_carry_precision_and_scale() {
        let decimal = LogicalType::decimal(9, 2).unwrap();
        let array = build_array(
            &decimal,
            &[Value::Decimal(Decimal::new(12345, 9, 2).unwrap())],
        )
        .unwrap();
        let decimals = array.as_any().downcast_ref::<Decimal128Array>().unwrap();
        assert_eq!(decimals.precision(), 9);
        assert_eq!(decimals.scale(), 2);
        assert_eq!(decimals.value(0), 12345);
    }

    #[test]
    fn hugeint_stays_within_decimal_precision() {
        let array = build_array(
            &LogicalType::HugeInt,
            &[Value::HugeInt(HUGEINT_MAX), Value::HugeInt(-HUGEINT_MAX)],
        )
        .unwrap();
        let decimals = array.as_any().downcast_ref::<Decimal128Array>().unwrap();
        decimals
            .validate_decimal_precision(MAX_DECIMAL_PRECISION)
            .unwrap();

        let err = build_array(&LogicalType::HugeInt, &[Value::HugeInt(i128::MAX)]).unwrap_err();
        assert_eq!(err.status, crate::error::Status::TypeCoercion);
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let mut builder = ColumnBuilder::new(&LogicalType::Varchar, 1).unwrap();
        assert!(builder.append(&Value::Integer(1)).is_err());
        builder.append(&Value::from("a")).unwrap();
        let array = builder.finish().unwrap();
        let strings = array.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(strings.value(0), "a");
    }

    #[test]
    fn nested_columns() {
        let list = LogicalType::List(Box::new(LogicalType::Integer));
        let array = build_array(
            &list,
            &[
                Value::List(vec![Value::Integer(1), Value::Integer(2)]),
                Value::Null,
                Value::List(vec![]),
            ],
        )
        .unwrap();
        let lists = array.as_any().downcast_ref::<ListArray>().unwrap();
        assert_eq!(lists.value_offsets(), &[0, 2, 2, 2]);
        assert!(lists.is_null(1));

        let record = LogicalType::Struct(vec![
            ("a".into(), LogicalType::Integer),
            ("b".into(), LogicalType::Varchar),
        ]);
        let array = build_array(
            &record,
            &[
                Value::Struct(vec![("a".into(), Value::Integer(1)), ("b".into(), Value::from("x"))]),
                Value::Null,
            ],
        )
        .unwrap();
        assert_eq!(array.len(), 2);
        assert!(array.is_null(1));
    }
}
