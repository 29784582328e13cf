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

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arrow_array::ffi_stream::{ArrowArrayStreamReader, FFI_ArrowArrayStream};
use arrow_array::{Int32Array, RecordBatch, RecordBatchIterator, RecordBatchReader};
use arrow_schema::{DataType, Field, Schema};

use vecbridge_core::options::{DatabaseConfig, ProfilerFormat};
use vecbridge_core::vector::batch_len;
use vecbridge_core::{Bridge, Decimal, Handle, LogicalType, Status, Value};
use vecbridge_datafusion::DataFusionDriver;

fn connect() -> (Bridge, Handle, Handle) {
    let mut bridge = Bridge::new(DataFusionDriver::default());
    let database = bridge.open(&DatabaseConfig::in_memory()).unwrap();
    let connection = bridge.connect(database).unwrap();
    (bridge, database, connection)
}

fn run(bridge: &mut Bridge, connection: Handle, sql: &str) -> Handle {
    let statement = bridge.prepare(connection, sql).unwrap();
    let result = bridge.execute(statement, &[]).unwrap();
    bridge.release_statement(statement).unwrap();
    result
}

/// Drain `result` and return its values column by column.
fn columns(bridge: &mut Bridge, result: Handle) -> Vec<Vec<Value>> {
    let mut columns: Vec<Vec<Value>> = vec![];
    loop {
        let vectors = bridge.fetch(result).unwrap();
        if vectors.is_empty() {
            return columns;
        }
        columns.resize(vectors.len(), vec![]);
        for (column, vector) in columns.iter_mut().zip(&vectors) {
            column.extend(vector.values().unwrap());
        }
    }
}

fn query(bridge: &mut Bridge, connection: Handle, sql: &str) -> Vec<Vec<Value>> {
    let result = run(bridge, connection, sql);
    let values = columns(bridge, result);
    bridge.free_result(result).unwrap();
    values
}

fn execute(bridge: &mut Bridge, connection: Handle, sql: &str) {
    let result = run(bridge, connection, sql);
    columns(bridge, result);
    bridge.free_result(result).unwrap();
}

#[test]
fn test_appender_then_select() {
    let (mut bridge, _, connection) = connect();
    execute(&mut bridge, connection, "CREATE TABLE t(a INTEGER, b VARCHAR)");

    let appender = bridge.create_appender(connection, None, "t").unwrap();
    let meta = bridge.appender_columns(appender).unwrap();
    assert_eq!(meta[0].logical_type, LogicalType::Integer);
    assert_eq!(meta[1].logical_type, LogicalType::Varchar);

    bridge.begin_row(appender).unwrap();
    bridge.append_int(appender, 5).unwrap();
    bridge.append_string(appender, "x").unwrap();
    bridge.end_row(appender).unwrap();
    bridge.close_appender(appender).unwrap();

    let result = run(&mut bridge, connection, "SELECT a, b FROM t");
    let meta = bridge.query_result_meta(result).unwrap();
    assert_eq!(meta[0].name, "a");
    assert_eq!(meta[1].logical_type, LogicalType::Varchar);
    assert_eq!(
        columns(&mut bridge, result),
        vec![vec![Value::Integer(5)], vec![Value::Varchar("x".into())]]
    );
}

#[test]
fn test_appender_decimal_and_nulls() {
    let (mut bridge, _, connection) = connect();
    execute(&mut bridge, connection, "CREATE TABLE d(v DECIMAL(10, 2), n INTEGER)");

    let appender = bridge.create_appender(connection, None, "d").unwrap();
    bridge.begin_row(appender).unwrap();
    bridge
        .append_decimal(appender, Decimal::new(12345, 10, 2).unwrap())
        .unwrap();
    bridge.append_null(appender).unwrap();
    bridge.end_row(appender).unwrap();

    bridge.begin_row(appender).unwrap();
    bridge.append_null(appender).unwrap();
    bridge.append_long(appender, 7).unwrap();
    bridge.end_row(appender).unwrap();

    bridge.begin_row(appender).unwrap();
    bridge.append_int(appender, 1).unwrap();
    let err = bridge.end_row(appender).unwrap_err();
    assert_eq!(err.status, Status::IncompleteRow);
    bridge.close_appender(appender).unwrap();

    let result = run(&mut bridge, connection, "SELECT v, n FROM d ORDER BY n NULLS FIRST");
    let vectors = bridge.fetch(result).unwrap();
    assert_eq!(batch_len(&vectors), 2);
    assert_eq!(vectors[0].decimal_parameters(), Some((10, 2)));
    assert_eq!(
        vectors[0].values().unwrap(),
        vec![
            Value::Decimal(Decimal::new(12345, 10, 2).unwrap()),
            Value::Null
        ]
    );
    assert_eq!(vectors[1].values().unwrap(), vec![Value::Null, Value::Integer(7)]);
    assert!(vectors[1].is_null(0));
}

#[test]
fn test_prepared_statement_reexecution() {
    let (mut bridge, _, connection) = connect();
    execute(&mut bridge, connection, "CREATE TABLE t(a INTEGER, b VARCHAR)");
    execute(
        &mut bridge,
        connection,
        "INSERT INTO t VALUES (1, 'one'), (2, 'two'), (2, 'deux')",
    );

    let statement = bridge
        .prepare(connection, "SELECT b FROM t WHERE a = $1 ORDER BY b")
        .unwrap();
    let meta = bridge.prepared_statement_meta(statement).unwrap();
    assert_eq!(meta.parameter_count(), 1);
    assert_eq!(meta.parameter_types, vec![Some(LogicalType::Integer)]);
    assert_eq!(meta.columns[0].name, "b");

    let err = bridge.execute(statement, &[]).unwrap_err();
    assert_eq!(err.status, Status::ParameterCountMismatch);

    let result = bridge.execute(statement, &[Value::Integer(1)]).unwrap();
    assert_eq!(
        columns(&mut bridge, result),
        vec![vec![Value::Varchar("one".into())]]
    );
    let result = bridge.execute(statement, &[Value::Integer(2)]).unwrap();
    assert_eq!(
        columns(&mut bridge, result),
        vec![vec![
            Value::Varchar("deux".into()),
            Value::Varchar("two".into())
        ]]
    );
}

#[test]
fn test_errors_by_phase() {
    let (mut bridge, _, connection) = connect();

    let err = bridge.prepare(connection, "SELEC 1").unwrap_err();
    assert_eq!(err.status, Status::Syntax);
    assert_eq!(err.operation, Some("prepare"));

    let err = bridge
        .prepare(connection, "SELECT no_such_column FROM (VALUES (1)) v(a)")
        .unwrap_err();
    assert_eq!(err.status, Status::Bind);

    // Relations that do not exist yet fail when the result is fetched.
    let result = run(&mut bridge, connection, "SELECT * FROM no_such_table");
    let err = bridge.fetch(result).unwrap_err();
    assert_eq!(err.status, Status::Execution);
    assert_eq!(bridge.fetch(result).unwrap_err().status, Status::InvalidState);
}

#[test]
fn test_schema_context() {
    let (mut bridge, _, connection) = connect();
    assert_eq!(bridge.catalog(connection).unwrap(), "memory");
    assert_eq!(bridge.schema(connection).unwrap(), "main");

    let err = bridge.set_schema(connection, "s2").unwrap_err();
    assert_eq!(err.status, Status::NotFound);
    let err = bridge.set_catalog(connection, "elsewhere").unwrap_err();
    assert_eq!(err.status, Status::NotFound);

    execute(&mut bridge, connection, "CREATE SCHEMA s2");
    bridge.set_schema(connection, "s2").unwrap();
    assert_eq!(bridge.schema(connection).unwrap(), "s2");
    execute(&mut bridge, connection, "CREATE TABLE u AS VALUES (1), (2)");

    bridge.set_schema(connection, "main").unwrap();
    let statement = bridge.prepare(connection, "SELECT * FROM u").unwrap();
    let result = bridge.execute(statement, &[]).unwrap();
    assert_eq!(bridge.fetch(result).unwrap_err().status, Status::Execution);

    // Deferred statements are planned again against the current schema.
    bridge.set_schema(connection, "s2").unwrap();
    let result = bridge.execute(statement, &[]).unwrap();
    assert_eq!(columns(&mut bridge, result)[0].len(), 2);

    assert_eq!(
        query(&mut bridge, connection, "SELECT count(*) FROM s2.u"),
        vec![vec![Value::BigInt(2)]]
    );
}

#[test]
fn test_fetch_chunks_cover_every_row() {
    let (mut bridge, _, connection) = connect();
    let result = run(&mut bridge, connection, "SELECT * FROM generate_series(1, 10000)");

    let mut total = 0;
    loop {
        let vectors = bridge.fetch(result).unwrap();
        if vectors.is_empty() {
            break;
        }
        let rows = batch_len(&vectors);
        assert!(rows > 0 && rows <= bridge.fetch_size());
        total += rows;
    }
    for _ in 0..3 {
        assert!(bridge.fetch(result).unwrap().is_empty());
    }

    let count = query(
        &mut bridge,
        connection,
        "SELECT count(*) FROM generate_series(1, 10000)",
    );
    assert_eq!(count, vec![vec![Value::BigInt(total as i64)]]);
    assert_eq!(total, 10000);
}

#[test]
fn test_interrupt_long_query() {
    let (mut bridge, _, connection) = connect();
    let statement = bridge
        .prepare(
            connection,
            "SELECT count(*) FROM generate_series(1, 100000000000) WHERE value % 7 = 3",
        )
        .unwrap();
    let result = bridge.execute(statement, &[]).unwrap();

    let handle = bridge.interrupt_handle(connection).unwrap();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        handle.interrupt();
    });

    let err = bridge.fetch(result).unwrap_err();
    interrupter.join().unwrap();
    assert_eq!(err.status, Status::Cancelled);
    assert_eq!(bridge.fetch(result).unwrap_err().status, Status::InvalidState);

    // The connection stays usable and the interrupt does not leak.
    assert_eq!(
        query(&mut bridge, connection, "SELECT 1"),
        vec![vec![Value::BigInt(1)]]
    );
}

#[test]
fn test_arrow_stream_export() {
    let (mut bridge, _, connection) = connect();
    let result = run(&mut bridge, connection, "SELECT * FROM generate_series(1, 5000)");

    let stream = bridge.arrow_stream(result, 1000).unwrap();
    let err = bridge.fetch(result).unwrap_err();
    assert_eq!(err.status, Status::InvalidState);

    let reader = ArrowArrayStreamReader::try_new(stream).unwrap();
    let schema = reader.schema();
    assert_eq!(schema.field(0).name(), "value");
    assert_eq!(schema.field(0).data_type(), &DataType::Int64);

    let sizes = reader
        .map(|batch| batch.unwrap().num_rows())
        .collect::<Vec<_>>();
    assert!(sizes.iter().all(|size| *size <= 1000));
    assert_eq!(sizes.iter().sum::<usize>(), 5000);
}

#[test]
fn test_arrow_register() {
    let (mut bridge, _, connection) = connect();
    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, true)]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Int32Array::from(vec![Some(1), Some(2), None, Some(3)]))],
    )
    .unwrap();
    let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
    let stream = FFI_ArrowArrayStream::new(Box::new(reader));
    bridge.arrow_register(connection, stream, "nums").unwrap();

    assert_eq!(
        query(&mut bridge, connection, "SELECT sum(x), count(x) FROM nums"),
        vec![vec![Value::BigInt(6)], vec![Value::BigInt(3)]]
    );

    let statement = bridge
        .prepare(connection, "SELECT count(*) FROM nums WHERE x > $1")
        .unwrap();
    let result = bridge.execute(statement, &[Value::Integer(1)]).unwrap();
    assert_eq!(columns(&mut bridge, result), vec![vec![Value::BigInt(2)]]);
}

#[test]
fn test_read_only_database() {
    let mut bridge = Bridge::new(DataFusionDriver::default());
    let database = bridge.open(&DatabaseConfig::new(":memory:", true)).unwrap();
    let connection = bridge.connect(database).unwrap();

    let err = bridge
        .prepare(connection, "CREATE TABLE t(a INTEGER)")
        .unwrap_err();
    assert_eq!(err.status, Status::Bind);
    assert_eq!(
        query(&mut bridge, connection, "SELECT 40 + 2"),
        vec![vec![Value::BigInt(42)]]
    );
}

#[test]
fn test_open_errors() {
    let mut bridge = Bridge::new(DataFusionDriver::default());
    for config in [
        DatabaseConfig::in_memory().with_option("threads", 0_i64),
        DatabaseConfig::in_memory().with_option("no_such_option", "1"),
        DatabaseConfig::in_memory().with_option("memory_limit", "plenty"),
    ] {
        let err = bridge.open(&config).unwrap_err();
        assert_eq!(err.status, Status::Config, "{err}");
    }

    let err = bridge
        .open(&DatabaseConfig::new("/no/such/directory", false))
        .unwrap_err();
    assert_eq!(err.status, Status::IO);

    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();
    let err = bridge.open(&DatabaseConfig::new(path, false)).unwrap_err();
    assert_eq!(err.status, Status::IO);
    assert_eq!(bridge.open_handles(), 0);
}

#[test]
fn test_parquet_directory() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("numbers.parquet");
    {
        let (mut bridge, _, connection) = connect();
        execute(
            &mut bridge,
            connection,
            &format!(
                "COPY (SELECT * FROM generate_series(1, 100)) TO '{}' STORED AS PARQUET",
                target.display()
            ),
        );
    }
    assert!(target.exists());

    let mut bridge = Bridge::new(DataFusionDriver::default());
    let path = dir.path().to_str().unwrap();
    let database = bridge.open(&DatabaseConfig::new(path, true)).unwrap();
    let connection = bridge.connect(database).unwrap();
    assert_eq!(
        query(&mut bridge, connection, "SELECT count(*), max(value) FROM numbers"),
        vec![vec![Value::BigInt(100)], vec![Value::BigInt(100)]]
    );
}

#[test]
fn test_profiling_information() {
    let (mut bridge, _, connection) = connect();
    let tree = bridge
        .profiling_information(connection, ProfilerFormat::QueryTree)
        .unwrap();
    assert!(tree.is_empty());

    query(&mut bridge, connection, "SELECT 1 AS one");
    let tree = bridge
        .profiling_information(connection, ProfilerFormat::QueryTree)
        .unwrap();
    assert!(tree.contains("Projection"), "{tree}");
    let json = bridge
        .profiling_information(connection, ProfilerFormat::Json)
        .unwrap();
    assert!(json.contains("Projection"), "{json}");
    let dot = bridge
        .profiling_information(connection, ProfilerFormat::Graphviz)
        .unwrap();
    assert!(dot.contains("digraph"), "{dot}");
    assert_eq!(
        bridge
            .profiling_information(connection, ProfilerFormat::NoOutput)
            .unwrap(),
        ""
    );
}

#[test]
fn test_connections_share_tables() {
    let (mut bridge, database, first) = connect();
    let second = bridge.connect(database).unwrap();

    execute(&mut bridge, first, "CREATE TABLE shared AS VALUES (1), (2), (3)");
    assert_eq!(
        query(&mut bridge, second, "SELECT count(*) FROM shared"),
        vec![vec![Value::BigInt(3)]]
    );

    execute(&mut bridge, second, "CREATE SCHEMA other");
    bridge.set_schema(second, "other").unwrap();
    assert_eq!(bridge.schema(first).unwrap(), "main");

    bridge.disconnect(first).unwrap();
    assert_eq!(
        query(&mut bridge, second, "SELECT count(*) FROM main.shared"),
        vec![vec![Value::BigInt(3)]]
    );
}

#[test]
fn test_dml_runs_at_execute() {
    let (mut bridge, _, connection) = connect();
    execute(&mut bridge, connection, "CREATE TABLE t(a INTEGER)");

    let result = run(&mut bridge, connection, "INSERT INTO t VALUES (1), (2)");
    // Not fetched: the insert has already taken effect.
    assert_eq!(
        query(&mut bridge, connection, "SELECT count(*) FROM t"),
        vec![vec![Value::BigInt(2)]]
    );
    assert_eq!(columns(&mut bridge, result), vec![vec![Value::UBigInt(2)]]);
}
