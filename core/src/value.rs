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

//! Discriminated values for parameters, appended cells and extracted cells.

use std::fmt::Display;
use std::str::FromStr;

use arrow_array::types::{Date32Type, Time64MicrosecondType, TimestampMicrosecondType};
use arrow_cast::parse::{parse_interval_month_day_nano, Parser};

use crate::error::{Error, Result, Status};
use crate::types::{LogicalType, HUGEINT_MAX, MAX_DECIMAL_PRECISION};

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// A fixed-point number with explicit precision and scale.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
    /// Unscaled value: the number is `value / 10^scale`.
    pub value: i128,
    pub precision: u8,
    pub scale: i8,
}

fn pow10(exponent: u32) -> Result<i128> {
    10i128.checked_pow(exponent).ok_or_else(|| {
        Error::type_coercion(format!("10^{exponent} does not fit in a 128-bit decimal"))
    })
}

impl Decimal {
    pub fn new(value: i128, precision: u8, scale: i8) -> Result<Self> {
        LogicalType::decimal(precision, scale)?;
        let decimal = Self {
            value,
            precision,
            scale,
        };
        decimal.check_precision(precision)?;
        Ok(decimal)
    }

    fn check_precision(&self, precision: u8) -> Result<()> {
        if self.value.unsigned_abs() >= pow10(precision as u32)?.unsigned_abs() {
            return Err(Error::type_coercion(format!(
                "{self} does not fit in DECIMAL({precision},{})",
                self.scale
            )));
        }
        Ok(())
    }

    /// Change the scale without losing digits.
    pub fn rescale(&self, precision: u8, scale: i8) -> Result<Self> {
        LogicalType::decimal(precision, scale)?;
        let value = if scale >= self.scale {
            let factor = pow10((scale - self.scale) as u32)?;
            self.value.checked_mul(factor).ok_or_else(|| {
                Error::type_coercion(format!("{self} overflows DECIMAL({precision},{scale})"))
            })?
        } else {
            let factor = pow10((self.scale - scale) as u32)?;
            if self.value % factor != 0 {
                return Err(Error::type_coercion(format!(
                    "{self} cannot be stored with scale {scale} without truncation"
                )));
            }
            self.value / factor
        };
        let rescaled = Self {
            value,
            precision,
            scale,
        };
        rescaled.check_precision(precision)?;
        Ok(rescaled)
    }

    /// The integral value, if there is no fractional part.
    pub fn to_integer(&self) -> Option<i128> {
        let factor = pow10(self.scale.max(0) as u32).ok()?;
        (self.value % factor == 0).then(|| self.value / factor)
    }

    pub fn to_f64(&self) -> f64 {
        self.value as f64 / 10f64.powi(self.scale as i32)
    }
}

impl Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale <= 0 {
            return write!(f, "{}", self.value);
        }
        let digits = self.value.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        let sign = if self.value < 0 { "-" } else { "" };
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl FromStr for Decimal {
    type Err = Error;

    /// Parse `[-+]digits[.digits]`, keeping every written digit.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::type_coercion(format!("Invalid decimal literal: {s:?}"));
        let trimmed = s.trim();
        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let digits = format!("{int_part}{frac_part}");
        let significant = digits.trim_start_matches('0').len().max(1);
        let scale = frac_part.len();
        let precision = significant.max(scale + 1).max(1);
        if precision > MAX_DECIMAL_PRECISION as usize {
            return Err(invalid());
        }
        let magnitude: i128 = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| invalid())?
        };
        Decimal::new(
            if negative { -magnitude } else { magnitude },
            precision as u8,
            scale as i8,
        )
    }
}

/// A calendar interval.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub nanos: i64,
}

/// One value crossing the bridge.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    HugeInt(i128),
    UTinyInt(u8),
    USmallInt(u16),
    UInteger(u32),
    UBigInt(u64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Varchar(String),
    Blob(Vec<u8>),
    /// Microseconds since midnight.
    Time(i64),
    /// Days since the Unix epoch.
    Date(i32),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
    Interval(Interval),
    List(Vec<Value>),
    Struct(Vec<(String, Value)>),
    /// Name of an external columnar stream registered on the connection.
    Stream(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::TinyInt(_) => "TINYINT",
            Self::SmallInt(_) => "SMALLINT",
            Self::Integer(_) => "INTEGER",
            Self::BigInt(_) => "BIGINT",
            Self::HugeInt(_) => "HUGEINT",
            Self::UTinyInt(_) => "UTINYINT",
            Self::USmallInt(_) => "USMALLINT",
            Self::UInteger(_) => "UINTEGER",
            Self::UBigInt(_) => "UBIGINT",
            Self::Float(_) => "FLOAT",
            Self::Double(_) => "DOUBLE",
            Self::Decimal(_) => "DECIMAL",
            Self::Varchar(_) => "VARCHAR",
            Self::Blob(_) => "BLOB",
            Self::Time(_) => "TIME",
            Self::Date(_) => "DATE",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Interval(_) => "INTERVAL",
            Self::List(_) => "LIST",
            Self::Struct(_) => "STRUCT",
            Self::Stream(_) => "STREAM",
        }
    }

    /// The type a value carries on its own, used when the engine did not
    /// declare a parameter type. `None` for NULL.
    pub fn natural_type(&self) -> Option<LogicalType> {
        let logical = match self {
            Self::Null => return None,
            Self::Boolean(_) => LogicalType::Boolean,
            Self::TinyInt(_) => LogicalType::TinyInt,
            Self::SmallInt(_) => LogicalType::SmallInt,
            Self::Integer(_) => LogicalType::Integer,
            Self::BigInt(_) => LogicalType::BigInt,
            Self::HugeInt(_) => LogicalType::HugeInt,
            Self::UTinyInt(_) => LogicalType::UTinyInt,
            Self::USmallInt(_) => LogicalType::USmallInt,
            Self::UInteger(_) => LogicalType::UInteger,
            Self::UBigInt(_) => LogicalType::UBigInt,
            Self::Float(_) => LogicalType::Float,
            Self::Double(_) => LogicalType::Double,
            Self::Decimal(d) => LogicalType::Decimal {
                precision: d.precision,
                scale: d.scale,
            },
            Self::Varchar(_) | Self::Stream(_) => LogicalType::Varchar,
            Self::Blob(_) => LogicalType::Blob,
            Self::Time(_) => LogicalType::Time,
            Self::Date(_) => LogicalType::Date,
            Self::Timestamp(_) => LogicalType::Timestamp,
            Self::Interval(_) => LogicalType::Interval,
            Self::List(values) => LogicalType::List(Box::new(
                values
                    .iter()
                    .find_map(Value::natural_type)
                    .unwrap_or(LogicalType::Integer),
            )),
            Self::Struct(fields) => LogicalType::Struct(
                fields
                    .iter()
                    .map(|(name, value)| {
                        (name.clone(), value.natural_type().unwrap_or(LogicalType::Integer))
                    })
                    .collect(),
            ),
        };
        Some(logical)
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Self::TinyInt(v) => Some(*v as i128),
            Self::SmallInt(v) => Some(*v as i128),
            Self::Integer(v) => Some(*v as i128),
            Self::BigInt(v) => Some(*v as i128),
            Self::HugeInt(v) => Some(*v),
            Self::UTinyInt(v) => Some(*v as i128),
            Self::USmallInt(v) => Some(*v as i128),
            Self::UInteger(v) => Some(*v as i128),
            Self::UBigInt(v) => Some(*v as i128),
            _ => None,
        }
    }

    fn mismatch(&self, target: &LogicalType) -> Error {
        Error::with_message_and_status(
            format!("Cannot coerce {} value {:?} to {target}", self.kind(), self),
            Status::TypeCoercion,
        )
    }

    /// Convert to a value whose variant matches `target` exactly, failing
    /// rather than losing information.
    pub fn coerce_to(&self, target: &LogicalType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        if let Some(v) = self.as_i128() {
            return integer_to(v, target).ok_or_else(|| self.mismatch(target))?;
        }
        match (self, target) {
            (Self::Boolean(v), LogicalType::Boolean) => Ok(Self::Boolean(*v)),
            (Self::Boolean(v), LogicalType::Varchar) => Ok(Self::Varchar(v.to_string())),
            // Through the shortest decimal text, so FLOAT 1.1 is 1.1 and not
            // its f64 widening.
            (Self::Float(v), LogicalType::Decimal { .. }) => {
                parse_to(&v.to_string(), target).map_err(|_| self.mismatch(target))
            }
            (Self::Double(v), LogicalType::Decimal { .. }) => {
                parse_to(&v.to_string(), target).map_err(|_| self.mismatch(target))
            }
            (Self::Float(v), _) => float_to(*v as f64, target).ok_or_else(|| self.mismatch(target)),
            (Self::Double(v), _) => float_to(*v, target).ok_or_else(|| self.mismatch(target)),
            (Self::Decimal(d), LogicalType::Decimal { precision, scale }) => {
                Ok(Self::Decimal(d.rescale(*precision, *scale)?))
            }
            (Self::Decimal(d), LogicalType::Float) => Ok(Self::Float(d.to_f64() as f32)),
            (Self::Decimal(d), LogicalType::Double) => Ok(Self::Double(d.to_f64())),
            (Self::Decimal(d), LogicalType::Varchar) => Ok(Self::Varchar(d.to_string())),
            (Self::Decimal(d), _) => match d.to_integer() {
                Some(v) => integer_to(v, target).ok_or_else(|| self.mismatch(target))?,
                None => Err(self.mismatch(target)),
            },
            (Self::Varchar(v) | Self::Stream(v), LogicalType::Varchar) => Ok(Self::Varchar(v.clone())),
            (Self::Varchar(v), LogicalType::Blob) => Ok(Self::Blob(v.as_bytes().to_vec())),
            (Self::Varchar(v), _) => parse_to(v, target).map_err(|_| self.mismatch(target)),
            (Self::Blob(v), LogicalType::Blob) => Ok(Self::Blob(v.clone())),
            (Self::Time(v), LogicalType::Time) => Ok(Self::Time(*v)),
            (Self::Date(v), LogicalType::Date) => Ok(Self::Date(*v)),
            (Self::Date(v), LogicalType::Timestamp) => Ok(Self::Timestamp(*v as i64 * MICROS_PER_DAY)),
            (Self::Timestamp(v), LogicalType::Timestamp) => Ok(Self::Timestamp(*v)),
            (Self::Timestamp(v), LogicalType::Date) if v.rem_euclid(MICROS_PER_DAY) == 0 => {
                i32::try_from(v.div_euclid(MICROS_PER_DAY))
                    .map(Self::Date)
                    .map_err(|_| self.mismatch(target))
            }
            (Self::Interval(v), LogicalType::Interval) => Ok(Self::Interval(*v)),
            (Self::List(values), LogicalType::List(child)) => Ok(Self::List(
                values
                    .iter()
                    .map(|value| value.coerce_to(child))
                    .collect::<Result<Vec<_>>>()?,
            )),
            (Self::Struct(values), LogicalType::Struct(children)) if values.len() == children.len() => {
                Ok(Self::Struct(
                    values
                        .iter()
                        .zip(children)
                        .map(|((_, value), (name, child))| Ok((name.clone(), value.coerce_to(child)?)))
                        .collect::<Result<Vec<_>>>()?,
                ))
            }
            _ => Err(self.mismatch(target)),
        }
    }
}

/// `None` when the target is not numeric, `Some(Err)` when the value is out
/// of range.
fn integer_to(v: i128, target: &LogicalType) -> Option<Result<Value>> {
    let out_of_range = || Error::type_coercion(format!("{v} is out of range for {target}"));
    let converted = match target {
        LogicalType::TinyInt => i8::try_from(v).map(Value::TinyInt).map_err(|_| out_of_range()),
        LogicalType::SmallInt => i16::try_from(v).map(Value::SmallInt).map_err(|_| out_of_range()),
        LogicalType::Integer => i32::try_from(v).map(Value::Integer).map_err(|_| out_of_range()),
        LogicalType::BigInt => i64::try_from(v).map(Value::BigInt).map_err(|_| out_of_range()),
        LogicalType::HugeInt if v.unsigned_abs() <= HUGEINT_MAX.unsigned_abs() => Ok(Value::HugeInt(v)),
        LogicalType::HugeInt => Err(out_of_range()),
        LogicalType::UTinyInt => u8::try_from(v).map(Value::UTinyInt).map_err(|_| out_of_range()),
        LogicalType::USmallInt => u16::try_from(v).map(Value::USmallInt).map_err(|_| out_of_range()),
        LogicalType::UInteger => u32::try_from(v).map(Value::UInteger).map_err(|_| out_of_range()),
        LogicalType::UBigInt => u64::try_from(v).map(Value::UBigInt).map_err(|_| out_of_range()),
        LogicalType::Float => Ok(Value::Float(v as f32)),
        LogicalType::Double => Ok(Value::Double(v as f64)),
        LogicalType::Decimal { precision, scale } => pow10(scale.max(&0).unsigned_abs() as u32)
            .and_then(|factor| v.checked_mul(factor).ok_or_else(out_of_range))
            .and_then(|scaled| Decimal::new(scaled, *precision, *scale))
            .map(Value::Decimal),
        LogicalType::Varchar => Ok(Value::Varchar(v.to_string())),
        _ => return None,
    };
    Some(converted)
}

/// 2^127: the first magnitude an `f64` cast to `i128` would saturate at.
const I128_BOUND: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

fn float_to(v: f64, target: &LogicalType) -> Option<Value> {
    match target {
        LogicalType::Float => Some(Value::Float(v as f32)),
        LogicalType::Double => Some(Value::Double(v)),
        LogicalType::Varchar => Some(Value::Varchar(v.to_string())),
        _ if v.fract() == 0.0 && v.abs() < I128_BOUND => integer_to(v as i128, target)?.ok(),
        _ => None,
    }
}

fn parse_to(text: &str, target: &LogicalType) -> Result<Value> {
    let text = text.trim();
    match target {
        LogicalType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Value::Boolean(true)),
            "false" | "f" | "0" => Ok(Value::Boolean(false)),
            _ => Err(Error::type_coercion(format!("{text:?} is not a boolean"))),
        },
        LogicalType::Float | LogicalType::Double => {
            let v: f64 = text
                .parse()
                .map_err(|_| Error::type_coercion(format!("{text:?} is not a number")))?;
            float_to(v, target).ok_or_else(|| Error::type_coercion(format!("{text:?} out of range")))
        }
        LogicalType::Decimal { precision, scale } => {
            Ok(Value::Decimal(text.parse::<Decimal>()?.rescale(*precision, *scale)?))
        }
        LogicalType::Date => Date32Type::parse(text)
            .map(Value::Date)
            .ok_or_else(|| Error::type_coercion(format!("{text:?} is not a date"))),
        LogicalType::Time => Time64MicrosecondType::parse(text)
            .map(Value::Time)
            .ok_or_else(|| Error::type_coercion(format!("{text:?} is not a time"))),
        LogicalType::Timestamp => TimestampMicrosecondType::parse(text)
            .map(Value::Timestamp)
            .ok_or_else(|| Error::type_coercion(format!("{text:?} is not a timestamp"))),
        LogicalType::Interval => {
            let interval = parse_interval_month_day_nano(text)
                .map_err(|_| Error::type_coercion(format!("{text:?} is not an interval")))?;
            Ok(Value::Interval(Interval {
                months: interval.months,
                days: interval.days,
                nanos: interval.nanoseconds,
            }))
        }
        _ => {
            let v: i128 = text
                .parse()
                .map_err(|_| Error::type_coercion(format!("{text:?} is not an integer")))?;
            integer_to(v, target)
                .unwrap_or_else(|| Err(Error::type_coercion(format!("{text:?} cannot become {target}"))))
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i8> for Value {
    fn from(value: i8) -> Self {
        Self::TinyInt(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Self::SmallInt(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::BigInt(value)
    }
}

impl From<i128> for Value {
    fn from(value: i128) -> Self {
        Self::HugeInt(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Varchar(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Varchar(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
