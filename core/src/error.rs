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

//! Error, status and result types.

use std::fmt::Display;

use arrow_schema::ArrowError;

/// Status of an operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    /// The database path is inaccessible or is not a valid database image.
    IO,
    /// A configuration option is unknown or has an invalid value.
    Config,
    /// The SQL text could not be parsed.
    Syntax,
    /// The SQL text parsed but could not be bound or planned.
    Bind,
    /// The number of bound parameters differs from the declared count.
    ParameterCountMismatch,
    /// A value cannot be coerced to the declared parameter or column type.
    TypeCoercion,
    /// The engine reported a failure while executing a statement.
    Execution,
    /// A row was ended before every column received a value.
    IncompleteRow,
    /// More values were appended than the target table has columns.
    ExcessColumn,
    /// The operation was interrupted.
    Cancelled,
    /// A handle was used in a role it does not have.
    TypeMismatch,
    /// A handle was used after it was released, likely a programming error.
    UseAfterRelease,
    /// A handle was released twice, likely a programming error.
    DoubleRelease,
    /// A requested object (table, schema, catalog, relation) was not found.
    NotFound,
    /// The preconditions for the operation are not met, likely a programming error.
    /// For instance, a row may already be open, or a result may already
    /// have been exported.
    InvalidState,
    /// An error internal to the bridge or the engine occurred.
    Internal,
}

/// A bridge error.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Error {
    /// The error message. Engine messages are kept verbatim.
    pub message: String,
    /// The status of the operation.
    pub status: Status,
    /// The bridge operation that failed, if known.
    pub operation: Option<&'static str>,
}

/// Result type wrapping [Error].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn with_message_and_status(message: impl Into<String>, status: Status) -> Self {
        Self {
            message: message.into(),
            status,
            operation: None,
        }
    }

    /// Attach the bridge operation name, keeping an operation set closer
    /// to the failure.
    pub fn in_operation(mut self, operation: &'static str) -> Self {
        self.operation.get_or_insert(operation);
        self
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::with_message_and_status(message, Status::InvalidState)
    }

    pub(crate) fn type_coercion(message: impl Into<String>) -> Self {
        Self::with_message_and_status(message, Status::TypeCoercion)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.operation {
            Some(operation) => write!(f, "{:?}: {} (in {})", self.status, self.message, operation),
            None => write!(f, "{:?}: {}", self.status, self.message),
        }
    }
}

impl std::error::Error for Error {}

impl From<ArrowError> for Error {
    fn from(value: ArrowError) -> Self {
        let status = match value {
            ArrowError::CastError(_) | ArrowError::InvalidArgumentError(_) => Status::TypeCoercion,
            ArrowError::IoError(..) => Status::IO,
            _ => Status::Internal,
        };
        Self::with_message_and_status(value.to_string(), status)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::with_message_and_status(value.to_string(), Status::IO)
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::with_message_and_status(
            format!("Error while decoding UTF-8: {value}"),
            Status::TypeCoercion,
        )
    }
}

impl From<Error> for ArrowError {
    fn from(value: Error) -> Self {
        ArrowError::ExternalError(Box::new(value))
    }
}
