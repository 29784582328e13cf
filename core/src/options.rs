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

//! Various option and configuration types.
use std::str::FromStr;

use crate::{
    constants,
    error::{Error, Result, Status},
};

/// Option value.
///
/// Can be created with various implementations of [From].
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Double(f64),
}

impl OptionValue {
    /// Gets the data type of the option's value.
    pub(crate) fn get_type(&self) -> &str {
        match self {
            Self::String(_) => "String",
            Self::Bytes(_) => "Bytes",
            Self::Int(_) => "Int",
            Self::Double(_) => "Double",
        }
    }

    /// Render the value the way the engine receives settings.
    pub fn to_setting(&self) -> Result<String> {
        match self {
            Self::String(value) => Ok(value.clone()),
            Self::Int(value) => Ok(value.to_string()),
            Self::Double(value) => Ok(value.to_string()),
            Self::Bytes(value) => String::from_utf8(value.clone()).map_err(|_| {
                Error::with_message_and_status(
                    format!("{} option value is not valid UTF-8", self.get_type()),
                    Status::Config,
                )
            }),
        }
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<Vec<u8>> for OptionValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for OptionValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.into())
    }
}

/// Database option key, applied when the database is opened.
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub enum OptionDatabase {
    /// Number of threads the engine may use.
    Threads,
    /// Upper bound on engine memory, e.g. `512MB` or `2GiB`.
    MemoryLimit,
    /// Number of rows the engine produces per internal batch.
    BatchSize,
    /// Catalog new connections resolve unqualified names against.
    DefaultCatalog,
    /// Schema new connections resolve unqualified names against.
    DefaultSchema,
    /// Engine-specific key, forwarded as is.
    Other(String),
}

impl AsRef<str> for OptionDatabase {
    fn as_ref(&self) -> &str {
        match self {
            Self::Threads => constants::DATABASE_OPTION_THREADS,
            Self::MemoryLimit => constants::DATABASE_OPTION_MEMORY_LIMIT,
            Self::BatchSize => constants::DATABASE_OPTION_BATCH_SIZE,
            Self::DefaultCatalog => constants::DATABASE_OPTION_DEFAULT_CATALOG,
            Self::DefaultSchema => constants::DATABASE_OPTION_DEFAULT_SCHEMA,
            Self::Other(key) => key,
        }
    }
}

impl From<&str> for OptionDatabase {
    fn from(value: &str) -> Self {
        match value {
            constants::DATABASE_OPTION_THREADS => Self::Threads,
            constants::DATABASE_OPTION_MEMORY_LIMIT => Self::MemoryLimit,
            constants::DATABASE_OPTION_BATCH_SIZE => Self::BatchSize,
            constants::DATABASE_OPTION_DEFAULT_CATALOG => Self::DefaultCatalog,
            constants::DATABASE_OPTION_DEFAULT_SCHEMA => Self::DefaultSchema,
            key => Self::Other(key.into()),
        }
    }
}

/// Everything the engine needs to open a database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database location, or [constants::IN_MEMORY_PATH].
    pub path: String,
    /// Reject statements that modify the database.
    pub read_only: bool,
    /// Settings in the order they were given; later keys win.
    pub options: Vec<(OptionDatabase, OptionValue)>,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<String>, read_only: bool) -> Self {
        Self {
            path: path.into(),
            read_only,
            options: Vec::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(constants::IN_MEMORY_PATH, false)
    }

    pub fn with_option(mut self, key: impl Into<OptionDatabase>, value: impl Into<OptionValue>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.is_empty() || self.path == constants::IN_MEMORY_PATH
    }

    /// Syntactic validation of option keys. Whether a key is known is up
    /// to the engine.
    pub fn validate(&self) -> Result<()> {
        for (key, _) in &self.options {
            let key = key.as_ref();
            let well_formed = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            if !well_formed {
                return Err(Error::with_message_and_status(
                    format!("Malformed option key: {key:?}"),
                    Status::Config,
                ));
            }
        }
        Ok(())
    }
}

/// Output format of [profiling_information][crate::Bridge::profiling_information].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ProfilerFormat {
    NoOutput,
    /// Indented plan tree.
    #[default]
    QueryTree,
    Json,
    Graphviz,
}

impl FromStr for ProfilerFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "no_output" | "none" => Ok(Self::NoOutput),
            "query_tree" | "tree" => Ok(Self::QueryTree),
            "json" => Ok(Self::Json),
            "graphviz" | "dot" => Ok(Self::Graphviz),
            value => Err(Error::with_message_and_status(
                format!("Unknown profiler format: {value}"),
                Status::Config,
            )),
        }
    }
}

/// Parse a memory size such as `512MB`, `2GiB` or a plain byte count.
pub fn parse_memory_size(value: &str) -> Result<usize> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let invalid = || {
        Error::with_message_and_status(format!("Invalid memory size: {value:?}"), Status::Config)
    };
    let number: f64 = number.parse().map_err(|_| invalid())?;
    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" | "bytes" => 1.0,
        "kb" => 1e3,
        "mb" => 1e6,
        "gb" => 1e9,
        "tb" => 1e12,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return Err(invalid()),
    };
    Ok((number * multiplier) as usize)
}
