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

//! Semantic column types and their Arrow representation.
//!
//! The bridge speaks a closed set of semantic types. Each one has exactly
//! one canonical Arrow layout, which is what crosses the boundary in
//! fetched vectors, appended batches and exported streams.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields, IntervalUnit, Schema, TimeUnit};

use crate::constants::LOGICAL_TYPE_METADATA_KEY;
use crate::error::{Error, Result, Status};

/// Largest precision a DECIMAL column may declare.
pub const MAX_DECIMAL_PRECISION: u8 = 38;

/// Largest magnitude of a HUGEINT. HUGEINT travels as
/// `Decimal128(38, 0)`, so it is bounded by that precision rather than by
/// the `i128` range.
pub const HUGEINT_MAX: i128 = 10_i128.pow(MAX_DECIMAL_PRECISION as u32) - 1;

/// The closed set of semantic column types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    HugeInt,
    Float,
    Double,
    Decimal,
    Varchar,
    Blob,
    Time,
    Date,
    Timestamp,
    Interval,
    List,
    Struct,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::UTinyInt => "UTINYINT",
            Self::USmallInt => "USMALLINT",
            Self::UInteger => "UINTEGER",
            Self::UBigInt => "UBIGINT",
            Self::HugeInt => "HUGEINT",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Varchar => "VARCHAR",
            Self::Blob => "BLOB",
            Self::Time => "TIME",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Interval => "INTERVAL",
            Self::List => "LIST",
            Self::Struct => "STRUCT",
        }
    }
}

/// A semantic type together with its parameters and nested children.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    HugeInt,
    Float,
    Double,
    Decimal { precision: u8, scale: i8 },
    Varchar,
    Blob,
    /// Microseconds since midnight.
    Time,
    /// Days since the Unix epoch.
    Date,
    /// Microseconds since the Unix epoch, without time zone.
    Timestamp,
    Interval,
    List(Box<LogicalType>),
    Struct(Vec<(String, LogicalType)>),
}

impl LogicalType {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Boolean => ColumnType::Boolean,
            Self::TinyInt => ColumnType::TinyInt,
            Self::SmallInt => ColumnType::SmallInt,
            Self::Integer => ColumnType::Integer,
            Self::BigInt => ColumnType::BigInt,
            Self::UTinyInt => ColumnType::UTinyInt,
            Self::USmallInt => ColumnType::USmallInt,
            Self::UInteger => ColumnType::UInteger,
            Self::UBigInt => ColumnType::UBigInt,
            Self::HugeInt => ColumnType::HugeInt,
            Self::Float => ColumnType::Float,
            Self::Double => ColumnType::Double,
            Self::Decimal { .. } => ColumnType::Decimal,
            Self::Varchar => ColumnType::Varchar,
            Self::Blob => ColumnType::Blob,
            Self::Time => ColumnType::Time,
            Self::Date => ColumnType::Date,
            Self::Timestamp => ColumnType::Timestamp,
            Self::Interval => ColumnType::Interval,
            Self::List(_) => ColumnType::List,
            Self::Struct(_) => ColumnType::Struct,
        }
    }

    /// Build a DECIMAL type, rejecting parameters Arrow cannot hold.
    pub fn decimal(precision: u8, scale: i8) -> Result<Self> {
        if precision == 0 || precision > MAX_DECIMAL_PRECISION {
            return Err(Error::with_message_and_status(
                format!("DECIMAL precision must be between 1 and {MAX_DECIMAL_PRECISION}, got {precision}"),
                Status::TypeCoercion,
            ));
        }
        if scale < 0 || scale as u8 > precision {
            return Err(Error::with_message_and_status(
                format!("DECIMAL scale must be between 0 and {precision}, got {scale}"),
                Status::TypeCoercion,
            ));
        }
        Ok(Self::Decimal { precision, scale })
    }

    /// The canonical Arrow layout of this type.
    pub fn to_arrow(&self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::TinyInt => DataType::Int8,
            Self::SmallInt => DataType::Int16,
            Self::Integer => DataType::Int32,
            Self::BigInt => DataType::Int64,
            Self::UTinyInt => DataType::UInt8,
            Self::USmallInt => DataType::UInt16,
            Self::UInteger => DataType::UInt32,
            Self::UBigInt => DataType::UInt64,
            Self::HugeInt => DataType::Decimal128(MAX_DECIMAL_PRECISION, 0),
            Self::Float => DataType::Float32,
            Self::Double => DataType::Float64,
            Self::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale),
            Self::Varchar => DataType::Utf8,
            Self::Blob => DataType::Binary,
            Self::Time => DataType::Time64(TimeUnit::Microsecond),
            Self::Date => DataType::Date32,
            Self::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            Self::Interval => DataType::Interval(IntervalUnit::MonthDayNano),
            Self::List(child) => DataType::List(Arc::new(child.to_field(Field::LIST_FIELD_DEFAULT_NAME, true))),
            Self::Struct(children) => DataType::Struct(
                children
                    .iter()
                    .map(|(name, child)| child.to_field(name, true))
                    .collect::<Fields>(),
            ),
        }
    }

    /// Arrow field carrying this type, tagged when the Arrow type alone is
    /// ambiguous.
    pub fn to_field(&self, name: &str, nullable: bool) -> Field {
        let field = Field::new(name, self.to_arrow(), nullable);
        match self {
            Self::HugeInt => field.with_metadata(HashMap::from([(
                LOGICAL_TYPE_METADATA_KEY.to_string(),
                ColumnType::HugeInt.name().to_string(),
            )])),
            _ => field,
        }
    }

    /// Semantic type of an Arrow field.
    ///
    /// Accepts every Arrow layout an engine is likely to produce for a type,
    /// not only the canonical one.
    pub fn from_field(field: &Field) -> Result<Self> {
        let tagged_hugeint = field
            .metadata()
            .get(LOGICAL_TYPE_METADATA_KEY)
            .is_some_and(|tag| tag == ColumnType::HugeInt.name());
        if tagged_hugeint {
            return Ok(Self::HugeInt);
        }
        Self::from_arrow(field.data_type())
    }

    pub fn from_arrow(data_type: &DataType) -> Result<Self> {
        let logical = match data_type {
            DataType::Boolean => Self::Boolean,
            DataType::Int8 => Self::TinyInt,
            DataType::Int16 => Self::SmallInt,
            DataType::Int32 | DataType::Null => Self::Integer,
            DataType::Int64 => Self::BigInt,
            DataType::UInt8 => Self::UTinyInt,
            DataType::UInt16 => Self::USmallInt,
            DataType::UInt32 => Self::UInteger,
            DataType::UInt64 => Self::UBigInt,
            DataType::Float16 | DataType::Float32 => Self::Float,
            DataType::Float64 => Self::Double,
            DataType::Decimal128(precision, scale) => Self::Decimal {
                precision: *precision,
                scale: *scale,
            },
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => Self::Varchar,
            DataType::Binary
            | DataType::LargeBinary
            | DataType::BinaryView
            | DataType::FixedSizeBinary(_) => Self::Blob,
            DataType::Time32(_) | DataType::Time64(_) => Self::Time,
            DataType::Date32 | DataType::Date64 => Self::Date,
            DataType::Timestamp(_, _) => Self::Timestamp,
            DataType::Interval(_) => Self::Interval,
            DataType::List(child)
            | DataType::LargeList(child)
            | DataType::ListView(child)
            | DataType::LargeListView(child)
            | DataType::FixedSizeList(child, _) => Self::List(Box::new(Self::from_field(child)?)),
            DataType::Struct(fields) => Self::Struct(
                fields
                    .iter()
                    .map(|field| Ok((field.name().clone(), Self::from_field(field)?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            DataType::Dictionary(_, value) => Self::from_arrow(value)?,
            other => {
                return Err(Error::with_message_and_status(
                    format!("Arrow type {other} has no semantic column type"),
                    Status::TypeCoercion,
                ))
            }
        };
        Ok(logical)
    }

    /// Whether a value of this type is stored in a fixed-width buffer.
    pub fn is_fixed_width(&self) -> bool {
        !matches!(
            self,
            Self::Varchar | Self::Blob | Self::List(_) | Self::Struct(_)
        )
    }
}

impl Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            Self::List(child) => write!(f, "{child}[]"),
            Self::Struct(children) => {
                write!(f, "STRUCT(")?;
                for (i, (name, child)) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} {child}")?;
                }
                write!(f, ")")
            }
            other => write!(f, "{}", other.column_type().name()),
        }
    }
}

/// Name, semantic type and nullability of one result or table column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, logical_type: LogicalType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        self.logical_type.column_type()
    }

    pub fn from_field(field: &Field) -> Result<Self> {
        Ok(Self {
            name: field.name().clone(),
            logical_type: LogicalType::from_field(field)?,
            nullable: field.is_nullable(),
        })
    }

    pub fn to_field(&self) -> Field {
        self.logical_type.to_field(&self.name, self.nullable)
    }

    /// Column metadata for every field of a schema.
    pub fn from_schema(schema: &Schema) -> Result<Vec<Self>> {
        schema
            .fields()
            .iter()
            .map(|field| Self::from_field(field))
            .collect()
    }

    /// The canonical schema for a list of columns.
    pub fn to_schema(columns: &[ColumnMeta]) -> Schema {
        Schema::new(columns.iter().map(ColumnMeta::to_field).collect::<Vec<_>>())
    }
}
