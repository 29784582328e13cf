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

//! The bridge: every operation a client performs, addressed by handle.

use std::collections::HashSet;
use std::sync::Arc;

use arrow_array::ffi_stream::{ArrowArrayStreamReader, FFI_ArrowArrayStream};
use arrow_array::RecordBatchReader;
use tracing::{debug, warn};

use crate::appender::Appender;
use crate::engine::{Database, Driver, PreparedQuery, Session};
use crate::error::{Error, Result, Status};
use crate::fetch::{self, ResultSet};
use crate::options::{DatabaseConfig, ProfilerFormat};
use crate::progress::{InterruptHandle, QueryMonitor, QueryProgress};
use crate::registry::{Handle, Registry, Role};
use crate::types::{ColumnMeta, LogicalType};
use crate::value::{Decimal, Value};
use crate::vector::ColumnVector;

/// A shareable reference to an open database.
///
/// Pass it to a bridge owned by another thread and [Bridge::attach] it
/// there; the database stays open as long as any reference or connection
/// exists.
#[derive(Clone)]
pub struct DatabaseRef {
    database: Arc<dyn Database>,
    path: String,
}

impl DatabaseRef {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for DatabaseRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRef").field("path", &self.path).finish()
    }
}

/// Column and parameter description of a prepared statement.
#[derive(Clone, Debug, PartialEq)]
pub struct StatementMeta {
    pub columns: Vec<ColumnMeta>,
    /// Declared type of each positional parameter, `None` where unknown.
    pub parameter_types: Vec<Option<LogicalType>>,
}

impl StatementMeta {
    pub fn parameter_count(&self) -> usize {
        self.parameter_types.len()
    }
}

struct DatabaseEntry {
    database: DatabaseRef,
    connections: usize,
    closed: bool,
}

struct ConnectionEntry {
    database: Handle,
    session: Box<dyn Session>,
    monitor: Arc<QueryMonitor>,
    auto_commit: bool,
    streams: HashSet<String>,
}

struct StatementEntry {
    connection: Handle,
    query: Box<dyn PreparedQuery>,
    parameter_types: Vec<Option<LogicalType>>,
}

struct ResultEntry {
    connection: Handle,
    result: ResultSet,
}

struct AppenderEntry {
    connection: Handle,
    appender: Appender,
}

/// Owner of every database, connection, statement, result and appender a
/// client opened, addressed through opaque [Handle]s.
///
/// All operations take `&mut self`: calls on one bridge are serialized by
/// its owner. The exceptions are interrupts and progress polling, which go
/// through an [InterruptHandle] usable from any thread.
pub struct Bridge {
    driver: Box<dyn Driver>,
    databases: Registry<DatabaseEntry>,
    connections: Registry<ConnectionEntry>,
    statements: Registry<StatementEntry>,
    results: Registry<ResultEntry>,
    appenders: Registry<AppenderEntry>,
}

impl Bridge {
    pub fn new(driver: impl Driver + 'static) -> Self {
        Self {
            driver: Box::new(driver),
            databases: Registry::new(),
            connections: Registry::new(),
            statements: Registry::new(),
            results: Registry::new(),
            appenders: Registry::new(),
        }
    }

    /// Number of live handles of every role.
    pub fn open_handles(&self) -> usize {
        self.databases.len()
            + self.connections.len()
            + self.statements.len()
            + self.results.len()
            + self.appenders.len()
    }

    /// Number of rows in a full batch returned by [Bridge::fetch].
    pub fn fetch_size(&self) -> usize {
        fetch::fetch_size()
    }

    // Databases

    pub fn open(&mut self, config: &DatabaseConfig) -> Result<Handle> {
        config.validate().map_err(|e| e.in_operation("open"))?;
        let database = self
            .driver
            .open(config)
            .map_err(|e| e.in_operation("open"))?;
        debug!(path = %config.path, read_only = config.read_only, "opened database");
        Ok(self.insert_database(DatabaseRef {
            database,
            path: config.path.clone(),
        }))
    }

    fn insert_database(&mut self, database: DatabaseRef) -> Handle {
        self.databases.insert(
            Role::Database,
            DatabaseEntry {
                database,
                connections: 0,
                closed: false,
            },
        )
    }

    fn open_database(&self, handle: Handle) -> Result<&DatabaseEntry> {
        let entry = self.databases.get(handle, Role::Database)?;
        if entry.closed {
            return Err(Error::with_message_and_status(
                format!("Database {handle} was closed"),
                Status::UseAfterRelease,
            ));
        }
        Ok(entry)
    }

    /// Close a database handle. The engine instance is destroyed once its
    /// last connection is disconnected too.
    pub fn close_database(&mut self, handle: Handle) -> Result<()> {
        let entry = self.databases.get_mut(handle, Role::Database).map_err(|e| {
            if e.status == Status::UseAfterRelease {
                Error::with_message_and_status(e.message, Status::DoubleRelease)
            } else {
                e
            }
        })?;
        if entry.closed {
            return Err(Error::with_message_and_status(
                format!("Database {handle} was closed twice"),
                Status::DoubleRelease,
            ));
        }
        entry.closed = true;
        debug!(%handle, connections = entry.connections, "closing database");
        if entry.connections == 0 {
            self.databases.remove(handle, Role::Database)?;
        }
        Ok(())
    }

    /// A reference to the database behind `handle`, for use by another bridge.
    pub fn database_ref(&self, handle: Handle) -> Result<DatabaseRef> {
        Ok(self.open_database(handle)?.database.clone())
    }

    /// Adopt a database opened by another bridge.
    pub fn attach(&mut self, database: DatabaseRef) -> Handle {
        debug!(path = %database.path, "attached database");
        self.insert_database(database)
    }

    // Connections

    pub fn connect(&mut self, database: Handle) -> Result<Handle> {
        let session = self
            .open_database(database)?
            .database
            .database
            .connect()
            .map_err(|e| e.in_operation("connect"))?;
        self.databases.get_mut(database, Role::Database)?.connections += 1;
        let handle = self.connections.insert(
            Role::Connection,
            ConnectionEntry {
                database,
                session,
                monitor: Arc::new(QueryMonitor::new()),
                auto_commit: true,
                streams: HashSet::new(),
            },
        );
        debug!(%database, connection = %handle, "connected");
        Ok(handle)
    }

    /// Disconnect and release every statement, result and appender derived
    /// from the connection. Appenders are flushed first; flush failures are
    /// logged, not returned. Disconnecting twice is a no-op.
    pub fn disconnect(&mut self, connection: Handle) -> Result<()> {
        if connection.role() != Role::Connection {
            return Err(Error::with_message_and_status(
                format!("Handle {connection} is not a connection"),
                Status::TypeMismatch,
            ));
        }
        if !self.connections.contains(connection) {
            debug!(%connection, "already disconnected");
            return Ok(());
        }

        let appenders: Vec<_> = self
            .appenders
            .iter()
            .filter(|(_, entry)| entry.connection == connection)
            .map(|(handle, _)| handle)
            .collect();
        for handle in appenders {
            let mut entry = self.appenders.remove(handle, Role::Appender)?;
            let conn = self.connections.get_mut(connection, Role::Connection)?;
            if let Err(error) = flush_appender(conn.session.as_mut(), &mut entry.appender) {
                warn!(%handle, %error, "failed to flush appender while disconnecting");
            }
        }
        let results: Vec<_> = self
            .results
            .iter()
            .filter(|(_, entry)| entry.connection == connection)
            .map(|(handle, _)| handle)
            .collect();
        for handle in results {
            self.results.remove(handle, Role::Result)?;
        }
        let statements: Vec<_> = self
            .statements
            .iter()
            .filter(|(_, entry)| entry.connection == connection)
            .map(|(handle, _)| handle)
            .collect();
        for handle in statements {
            self.statements.remove(handle, Role::Statement)?;
        }

        let entry = self.connections.remove(connection, Role::Connection)?;
        entry.monitor.interrupt();
        let database = self.databases.get_mut(entry.database, Role::Database)?;
        database.connections -= 1;
        if database.closed && database.connections == 0 {
            self.databases.remove(entry.database, Role::Database)?;
        }
        debug!(%connection, "disconnected");
        Ok(())
    }

    fn connection(&self, handle: Handle) -> Result<&ConnectionEntry> {
        self.connections.get(handle, Role::Connection)
    }

    fn connection_mut(&mut self, handle: Handle) -> Result<&mut ConnectionEntry> {
        self.connections.get_mut(handle, Role::Connection)
    }

    pub fn auto_commit(&self, connection: Handle) -> Result<bool> {
        Ok(self.connection(connection)?.auto_commit)
    }

    pub fn set_auto_commit(&mut self, connection: Handle, enabled: bool) -> Result<()> {
        let entry = self.connection_mut(connection)?;
        entry
            .session
            .set_auto_commit(enabled)
            .map_err(|e| e.in_operation("set_auto_commit"))?;
        entry.auto_commit = enabled;
        Ok(())
    }

    pub fn schema(&self, connection: Handle) -> Result<String> {
        self.connection(connection)?
            .session
            .schema()
            .map_err(|e| e.in_operation("schema"))
    }

    pub fn set_schema(&mut self, connection: Handle, schema: &str) -> Result<()> {
        self.connection_mut(connection)?
            .session
            .set_schema(schema)
            .map_err(|e| e.in_operation("set_schema"))
    }

    pub fn catalog(&self, connection: Handle) -> Result<String> {
        self.connection(connection)?
            .session
            .catalog()
            .map_err(|e| e.in_operation("catalog"))
    }

    pub fn set_catalog(&mut self, connection: Handle, catalog: &str) -> Result<()> {
        self.connection_mut(connection)?
            .session
            .set_catalog(catalog)
            .map_err(|e| e.in_operation("set_catalog"))
    }

    /// Request cancellation of the query running on `connection`.
    pub fn interrupt(&self, connection: Handle) -> Result<()> {
        self.connection(connection)?.monitor.interrupt();
        Ok(())
    }

    pub fn query_progress(&self, connection: Handle) -> Result<QueryProgress> {
        Ok(self.connection(connection)?.monitor.progress())
    }

    /// A handle for interrupting and polling `connection` from another thread.
    pub fn interrupt_handle(&self, connection: Handle) -> Result<InterruptHandle> {
        Ok(InterruptHandle::new(
            self.connection(connection)?.monitor.clone(),
        ))
    }

    /// Render the plan of the last statement executed on `connection`.
    pub fn profiling_information(
        &self,
        connection: Handle,
        format: ProfilerFormat,
    ) -> Result<String> {
        if format == ProfilerFormat::NoOutput {
            self.connection(connection)?;
            return Ok(String::new());
        }
        self.connection(connection)?
            .session
            .profile(format)
            .map_err(|e| e.in_operation("profiling_information"))
    }

    // Statements

    pub fn prepare(&mut self, connection: Handle, sql: &str) -> Result<Handle> {
        let query = self
            .connection_mut(connection)?
            .session
            .prepare(sql)
            .map_err(|e| e.in_operation("prepare"))?;
        let parameter_types = query.parameter_types();
        let handle = self.statements.insert(
            Role::Statement,
            StatementEntry {
                connection,
                query,
                parameter_types,
            },
        );
        debug!(%connection, statement = %handle, "prepared statement");
        Ok(handle)
    }

    pub fn prepared_statement_meta(&self, statement: Handle) -> Result<StatementMeta> {
        let entry = self.statements.get(statement, Role::Statement)?;
        let schema = entry
            .query
            .schema()
            .map_err(|e| e.in_operation("prepared_statement_meta"))?;
        Ok(StatementMeta {
            columns: ColumnMeta::from_schema(&schema)?,
            parameter_types: entry.parameter_types.clone(),
        })
    }

    /// Execute a prepared statement with positional parameters.
    ///
    /// The parameter count and each value's coercibility are checked before
    /// the engine sees the call. Engine failures during execution are
    /// reported by the first [Bridge::fetch] of the result.
    pub fn execute(&mut self, statement: Handle, params: &[Value]) -> Result<Handle> {
        let entry = self.statements.get_mut(statement, Role::Statement)?;
        let connection = self.connections.get(entry.connection, Role::Connection)?;
        let expected = entry.parameter_types.len();
        if params.len() != expected {
            return Err(Error::with_message_and_status(
                format!("Statement expects {expected} parameters, got {}", params.len()),
                Status::ParameterCountMismatch,
            )
            .in_operation("execute"));
        }
        let params = params
            .iter()
            .zip(&entry.parameter_types)
            .map(|(value, declared)| bind_parameter(&connection.streams, value, declared.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.in_operation("execute"))?;

        let monitor = connection.monitor.clone();
        let execution = monitor.begin();
        let result = entry
            .query
            .execute(&params, monitor.clone())
            .and_then(|cursor| ResultSet::new(cursor, monitor.clone(), execution));
        let result = match result {
            Ok(result) => result,
            Err(error) => {
                monitor.finish(execution);
                return Err(error.in_operation("execute"));
            }
        };
        let connection = entry.connection;
        let handle = self.results.insert(Role::Result, ResultEntry { connection, result });
        debug!(%statement, result = %handle, "executed statement");
        Ok(handle)
    }

    /// Release a statement. Results it produced stay valid.
    pub fn release_statement(&mut self, statement: Handle) -> Result<()> {
        self.statements.remove(statement, Role::Statement)?;
        debug!(%statement, "released statement");
        Ok(())
    }

    // Results

    pub fn query_result_meta(&self, result: Handle) -> Result<Vec<ColumnMeta>> {
        Ok(self.results.get(result, Role::Result)?.result.columns())
    }

    /// Next batch of the result, one vector per column. An empty vector
    /// signals the end of the result, on this and every later call.
    pub fn fetch(&mut self, result: Handle) -> Result<Vec<ColumnVector>> {
        self.results
            .get_mut(result, Role::Result)?
            .result
            .fetch()
            .map_err(|e| e.in_operation("fetch"))
    }

    /// Export the rest of the result as an Arrow C stream. The result can
    /// no longer be fetched afterwards, and a result that was fetched from
    /// cannot be exported.
    pub fn arrow_stream(&mut self, result: Handle, batch_size: usize) -> Result<FFI_ArrowArrayStream> {
        self.results
            .get_mut(result, Role::Result)?
            .result
            .export(batch_size)
            .map_err(|e| e.in_operation("arrow_stream"))
    }

    pub fn free_result(&mut self, result: Handle) -> Result<()> {
        self.results.remove(result, Role::Result)?;
        debug!(%result, "freed result");
        Ok(())
    }

    /// Make an Arrow C stream queryable on `connection` as relation `name`.
    pub fn arrow_register(
        &mut self,
        connection: Handle,
        stream: FFI_ArrowArrayStream,
        name: &str,
    ) -> Result<()> {
        let reader = ArrowArrayStreamReader::try_new(stream)
            .map_err(|e| Error::from(e).in_operation("arrow_register"))?;
        self.register_reader(connection, Box::new(reader), name)
    }

    /// Like [Bridge::arrow_register], taking ownership of the stream behind
    /// a raw pointer.
    ///
    /// # Safety
    ///
    /// `stream` must point to a valid, initialized Arrow C stream. The
    /// stream is moved out and its release callback becomes the bridge's
    /// responsibility.
    pub unsafe fn arrow_register_ptr(
        &mut self,
        connection: Handle,
        stream: *mut FFI_ArrowArrayStream,
        name: &str,
    ) -> Result<()> {
        if stream.is_null() {
            return Err(Error::invalid_state("Arrow stream pointer is null")
                .in_operation("arrow_register"));
        }
        let reader = ArrowArrayStreamReader::from_raw(stream)
            .map_err(|e| Error::from(e).in_operation("arrow_register"))?;
        self.register_reader(connection, Box::new(reader), name)
    }

    fn register_reader(
        &mut self,
        connection: Handle,
        reader: Box<dyn RecordBatchReader + Send>,
        name: &str,
    ) -> Result<()> {
        let entry = self.connection_mut(connection)?;
        entry
            .session
            .register_stream(name, reader)
            .map_err(|e| e.in_operation("arrow_register"))?;
        entry.streams.insert(name.to_string());
        debug!(%connection, name, "registered arrow stream");
        Ok(())
    }

    // Appenders

    /// Start appending to `table`, resolved in `schema` or the current one.
    pub fn create_appender(
        &mut self,
        connection: Handle,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Handle> {
        let table_schema = self
            .connection(connection)?
            .session
            .table_schema(schema, table)
            .map_err(|e| e.in_operation("create_appender"))?;
        let appender = Appender::try_new(schema, table, &table_schema)?;
        let handle = self
            .appenders
            .insert(Role::Appender, AppenderEntry { connection, appender });
        debug!(%connection, appender = %handle, table, "created appender");
        Ok(handle)
    }

    fn appender_mut(&mut self, handle: Handle) -> Result<&mut Appender> {
        Ok(&mut self.appenders.get_mut(handle, Role::Appender)?.appender)
    }

    pub fn appender_columns(&self, appender: Handle) -> Result<Vec<ColumnMeta>> {
        Ok(self
            .appenders
            .get(appender, Role::Appender)?
            .appender
            .columns()
            .to_vec())
    }

    pub fn begin_row(&mut self, appender: Handle) -> Result<()> {
        self.appender_mut(appender)?.begin_row()
    }

    /// Commit the open row, flushing once a full batch is buffered.
    pub fn end_row(&mut self, appender: Handle) -> Result<()> {
        let full = {
            let appender = self.appender_mut(appender)?;
            appender.end_row()?;
            appender.is_full()
        };
        if full {
            self.flush(appender)?;
        }
        Ok(())
    }

    /// Append the value of the next column of the open row.
    pub fn append(&mut self, appender: Handle, value: Value) -> Result<()> {
        self.appender_mut(appender)?.append(value)
    }

    pub fn append_null(&mut self, appender: Handle) -> Result<()> {
        self.append(appender, Value::Null)
    }

    pub fn append_boolean(&mut self, appender: Handle, value: bool) -> Result<()> {
        self.append(appender, Value::Boolean(value))
    }

    pub fn append_byte(&mut self, appender: Handle, value: i8) -> Result<()> {
        self.append(appender, Value::TinyInt(value))
    }

    pub fn append_short(&mut self, appender: Handle, value: i16) -> Result<()> {
        self.append(appender, Value::SmallInt(value))
    }

    pub fn append_int(&mut self, appender: Handle, value: i32) -> Result<()> {
        self.append(appender, Value::Integer(value))
    }

    pub fn append_long(&mut self, appender: Handle, value: i64) -> Result<()> {
        self.append(appender, Value::BigInt(value))
    }

    pub fn append_float(&mut self, appender: Handle, value: f32) -> Result<()> {
        self.append(appender, Value::Float(value))
    }

    pub fn append_double(&mut self, appender: Handle, value: f64) -> Result<()> {
        self.append(appender, Value::Double(value))
    }

    pub fn append_string(&mut self, appender: Handle, value: &str) -> Result<()> {
        self.append(appender, Value::Varchar(value.to_string()))
    }

    pub fn append_bytes(&mut self, appender: Handle, value: &[u8]) -> Result<()> {
        self.append(appender, Value::Blob(value.to_vec()))
    }

    /// Append a timestamp given in microseconds since the Unix epoch.
    pub fn append_timestamp(&mut self, appender: Handle, micros: i64) -> Result<()> {
        self.append(appender, Value::Timestamp(micros))
    }

    pub fn append_decimal(&mut self, appender: Handle, value: Decimal) -> Result<()> {
        self.append(appender, Value::Decimal(value))
    }

    /// Send buffered rows to the engine without closing the appender.
    pub fn flush(&mut self, appender: Handle) -> Result<()> {
        let entry = self.appenders.get_mut(appender, Role::Appender)?;
        let connection = self.connections.get_mut(entry.connection, Role::Connection)?;
        flush_appender(connection.session.as_mut(), &mut entry.appender)
            .map_err(|e| e.in_operation("flush"))
    }

    /// Flush and release the appender. A row left open is discarded. If the
    /// flush fails the appender stays registered with its rows, so the caller
    /// can fix the cause and close it again.
    pub fn close_appender(&mut self, appender: Handle) -> Result<()> {
        let entry = self.appenders.get_mut(appender, Role::Appender)?;
        if entry.appender.discard_row() {
            warn!(%appender, "closing appender with an open row; the row is discarded");
        }
        let connection = self.connections.get_mut(entry.connection, Role::Connection)?;
        flush_appender(connection.session.as_mut(), &mut entry.appender)
            .map_err(|e| e.in_operation("close_appender"))?;
        self.appenders.remove(appender, Role::Appender)?;
        debug!(%appender, "closed appender");
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        for connection in self.connections.handles() {
            if let Err(error) = self.disconnect(connection) {
                warn!(%connection, %error, "failed to disconnect while dropping bridge");
            }
        }
    }
}

fn flush_appender(session: &mut dyn Session, appender: &mut Appender) -> Result<()> {
    let schema = appender.schema().map(str::to_owned);
    let table = appender.table().to_owned();
    let rows = appender.flush_with(|batch| session.append(schema.as_deref(), &table, batch))?;
    if rows > 0 {
        debug!(table, rows, "flushed appender");
    }
    Ok(())
}

fn bind_parameter(
    streams: &HashSet<String>,
    value: &Value,
    declared: Option<&LogicalType>,
) -> Result<Value> {
    if let Value::Stream(name) = value {
        if !streams.contains(name) {
            return Err(Error::with_message_and_status(
                format!("No Arrow stream is registered as {name:?}"),
                Status::NotFound,
            ));
        }
    }
    match declared {
        Some(logical_type) => value.coerce_to(logical_type),
        None => Ok(match value {
            Value::Stream(name) => Value::Varchar(name.clone()),
            other => other.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_parameters_must_be_registered() {
        let mut streams = HashSet::new();
        let value = Value::Stream("events".to_string());
        let err = bind_parameter(&streams, &value, None).unwrap_err();
        assert_eq!(err.status, Status::NotFound);

        streams.insert("events".to_string());
        assert_eq!(
            bind_parameter(&streams, &value, Some(&LogicalType::Varchar)).unwrap(),
            Value::Varchar("events".to_string())
        );
    }

    #[test]
    fn parameters_are_coerced_to_declared_types() {
        let streams = HashSet::new();
        let bound = bind_parameter(&streams, &Value::Integer(7), Some(&LogicalType::BigInt)).unwrap();
        assert_eq!(bound, Value::BigInt(7));
        let err = bind_parameter(&streams, &Value::Varchar("x".into()), Some(&LogicalType::Integer))
            .unwrap_err();
        assert_eq!(err.status, Status::TypeCoercion);
        assert_eq!(
            bind_parameter(&streams, &Value::Double(1.5), None).unwrap(),
            Value::Double(1.5)
        );
    }
}
