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

//! A scripted in-memory engine for exercising the bridge.
//!
//! Statements are a handful of keywords rather than SQL:
//! - `SELECT * FROM <table>`: scan a table of the current schema
//! - `RANGE <n>`: one BIGINT column `i` holding `0..n`, in batches of 1000
//! - `INFINITE`: batches of 1000 rows forever
//! - `ECHO <type>`: one row holding the single parameter, `?` for untyped
//! - `FAIL`: one row, then an execution error

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use arrow_array::{Int64Array, RecordBatch, RecordBatchReader};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use arrow_select::concat::concat_batches;

use vecbridge_core::engine::{Cursor, Database, Driver, PreparedQuery, Session};
use vecbridge_core::error::{Error, Result, Status};
use vecbridge_core::options::{DatabaseConfig, ProfilerFormat};
use vecbridge_core::{values_to_array, LogicalType, QueryMonitor, Value};

pub struct SingleBatchReader {
    batch: Option<RecordBatch>,
    schema: SchemaRef,
}

impl SingleBatchReader {
    pub fn new(batch: RecordBatch) -> Self {
        let schema = batch.schema();
        Self {
            batch: Some(batch),
            schema,
        }
    }
}

impl Iterator for SingleBatchReader {
    // `RecordBatchReader` requires item to be wrapped within `Result`.
    type Item = std::result::Result<RecordBatch, ArrowError>;

    fn next(&mut self) -> Option<Self::Item> {
        Ok(self.batch.take()).transpose()
    }
}

impl RecordBatchReader for SingleBatchReader {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

pub fn range_batch(start: i64, end: i64) -> RecordBatch {
    let schema = Schema::new(vec![Field::new("i", DataType::Int64, false)]);
    let values = Int64Array::from_iter_values(start..end);
    RecordBatch::try_new(Arc::new(schema), vec![Arc::new(values)]).unwrap()
}

#[derive(Default)]
struct Tables {
    schemas: HashSet<String>,
    tables: HashMap<(String, String), (SchemaRef, Vec<RecordBatch>)>,
}

/// Tables shared by the test and every database the driver opens.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<Mutex<Tables>>,
}

impl Default for Catalog {
    fn default() -> Self {
        let catalog = Self {
            inner: Arc::default(),
        };
        catalog.create_schema("main");
        catalog
    }
}

impl Catalog {
    pub fn create_schema(&self, schema: &str) {
        self.inner.lock().unwrap().schemas.insert(schema.to_string());
    }

    pub fn create_table(&self, schema: &str, table: &str, table_schema: Schema) {
        self.inner.lock().unwrap().tables.insert(
            (schema.to_string(), table.to_string()),
            (Arc::new(table_schema), Vec::new()),
        );
    }

    pub fn drop_table(&self, schema: &str, table: &str) {
        self.inner
            .lock()
            .unwrap()
            .tables
            .remove(&(schema.to_string(), table.to_string()));
    }

    /// Every row inserted into a table, as one batch.
    pub fn rows(&self, schema: &str, table: &str) -> RecordBatch {
        let inner = self.inner.lock().unwrap();
        let (table_schema, batches) = &inner.tables[&(schema.to_string(), table.to_string())];
        concat_batches(table_schema, batches).unwrap()
    }

    /// Number of appends the table received.
    pub fn append_count(&self, schema: &str, table: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.tables[&(schema.to_string(), table.to_string())].1.len()
    }

    fn table(&self, schema: &str, table: &str) -> Result<(SchemaRef, Vec<RecordBatch>)> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::with_message_and_status(
                    format!("Table {schema}.{table} does not exist"),
                    Status::NotFound,
                )
            })
    }
}

pub struct MockDriver {
    catalog: Catalog,
}

impl MockDriver {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

impl Driver for MockDriver {
    fn open(&self, config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
        if !config.is_in_memory() {
            return Err(Error::with_message_and_status(
                format!("{} is not a database", config.path),
                Status::IO,
            ));
        }
        for (key, _) in &config.options {
            if key.as_ref() != "threads" {
                return Err(Error::with_message_and_status(
                    format!("Unrecognized option {}", key.as_ref()),
                    Status::Config,
                ));
            }
        }
        Ok(Arc::new(MockDatabase {
            catalog: self.catalog.clone(),
        }))
    }
}

struct MockDatabase {
    catalog: Catalog,
}

impl Database for MockDatabase {
    fn connect(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(MockSession {
            catalog: self.catalog.clone(),
            schema: "main".to_string(),
            last: Arc::default(),
        }))
    }
}

struct MockSession {
    catalog: Catalog,
    schema: String,
    last: Arc<Mutex<Option<String>>>,
}

impl Session for MockSession {
    fn set_auto_commit(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn schema(&self) -> Result<String> {
        Ok(self.schema.clone())
    }

    fn set_schema(&mut self, schema: &str) -> Result<()> {
        if !self.catalog.inner.lock().unwrap().schemas.contains(schema) {
            return Err(Error::with_message_and_status(
                format!("Schema {schema} does not exist"),
                Status::NotFound,
            ));
        }
        self.schema = schema.to_string();
        Ok(())
    }

    fn catalog(&self) -> Result<String> {
        Ok("memory".to_string())
    }

    fn set_catalog(&mut self, catalog: &str) -> Result<()> {
        match catalog {
            "memory" => Ok(()),
            _ => Err(Error::with_message_and_status(
                format!("Catalog {catalog} does not exist"),
                Status::NotFound,
            )),
        }
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedQuery>> {
        let tokens: Vec<&str> = sql.split_whitespace().collect();
        let script = match tokens.as_slice() {
            ["SELECT", "*", "FROM", table] => Script::Scan(table.to_string()),
            ["RANGE", n] => Script::Range(n.parse().map_err(|_| syntax(sql))?),
            ["INFINITE"] => Script::Infinite,
            ["FAIL"] => Script::Fail,
            ["ECHO", "?"] => Script::Echo(None),
            ["ECHO", "INTEGER"] => Script::Echo(Some(LogicalType::Integer)),
            ["ECHO", "VARCHAR"] => Script::Echo(Some(LogicalType::Varchar)),
            ["ECHO", "DECIMAL"] => Script::Echo(Some(LogicalType::decimal(10, 2)?)),
            _ => return Err(syntax(sql)),
        };
        Ok(Box::new(MockQuery {
            sql: sql.to_string(),
            script,
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            last: self.last.clone(),
        }))
    }

    fn table_schema(&self, schema: Option<&str>, table: &str) -> Result<SchemaRef> {
        let schema = schema.unwrap_or(&self.schema);
        Ok(self.catalog.table(schema, table)?.0)
    }

    fn append(&mut self, schema: Option<&str>, table: &str, batch: RecordBatch) -> Result<()> {
        let schema = schema.unwrap_or(&self.schema).to_string();
        let mut inner = self.catalog.inner.lock().unwrap();
        let (table_schema, batches) = inner
            .tables
            .get_mut(&(schema, table.to_string()))
            .ok_or_else(|| Error::with_message_and_status("no table", Status::NotFound))?;
        batches.push(batch.with_schema(table_schema.clone())?);
        Ok(())
    }

    fn register_stream(
        &mut self,
        name: &str,
        reader: Box<dyn RecordBatchReader + Send>,
    ) -> Result<()> {
        let schema = reader.schema();
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        self.catalog.inner.lock().unwrap().tables.insert(
            (self.schema.clone(), name.to_string()),
            (schema, batches),
        );
        Ok(())
    }

    fn profile(&self, format: ProfilerFormat) -> Result<String> {
        let last = self.last.lock().unwrap();
        Ok(match (&*last, format) {
            (None, _) => String::new(),
            (Some(sql), ProfilerFormat::Json) => format!("{{\"plan\": \"{sql}\"}}"),
            (Some(sql), _) => format!("plan: {sql}"),
        })
    }
}

fn syntax(sql: &str) -> Error {
    Error::with_message_and_status(format!("Cannot parse {sql:?}"), Status::Syntax)
}

enum Script {
    Scan(String),
    Range(i64),
    Infinite,
    Fail,
    Echo(Option<LogicalType>),
}

struct MockQuery {
    sql: String,
    script: Script,
    catalog: Catalog,
    schema: String,
    last: Arc<Mutex<Option<String>>>,
}

impl PreparedQuery for MockQuery {
    fn parameter_types(&self) -> Vec<Option<LogicalType>> {
        match &self.script {
            Script::Echo(declared) => vec![declared.clone()],
            _ => vec![],
        }
    }

    fn schema(&self) -> Result<SchemaRef> {
        Ok(match &self.script {
            Script::Scan(table) => self
                .catalog
                .table(&self.schema, table)
                .map(|(schema, _)| schema)
                .unwrap_or_else(|_| Arc::new(Schema::empty())),
            Script::Echo(Some(logical_type)) => {
                Arc::new(Schema::new(vec![logical_type.to_field("value", true)]))
            }
            Script::Echo(None) => Arc::new(Schema::empty()),
            _ => range_batch(0, 0).schema(),
        })
    }

    fn execute(
        &mut self,
        params: &[Value],
        _monitor: Arc<QueryMonitor>,
    ) -> Result<Box<dyn Cursor>> {
        *self.last.lock().unwrap() = Some(self.sql.clone());
        let cursor = match &self.script {
            Script::Scan(table) => match self.catalog.table(&self.schema, table) {
                Ok((schema, batches)) => ScriptedCursor::new(schema, batches.into_iter().map(Ok)),
                Err(error) => ScriptedCursor::new(
                    Arc::new(Schema::empty()),
                    [Err(Error::with_message_and_status(error.message, Status::Execution))],
                ),
            },
            Script::Range(n) => {
                let batches = (0..*n)
                    .step_by(1000)
                    .map(|start| Ok(range_batch(start, (start + 1000).min(*n))));
                ScriptedCursor::new(range_batch(0, 0).schema(), batches)
            }
            Script::Infinite => {
                let mut cursor = ScriptedCursor::new(range_batch(0, 0).schema(), std::iter::empty());
                cursor.repeat = Some(range_batch(0, 1000));
                cursor
            }
            Script::Fail => ScriptedCursor::new(
                range_batch(0, 0).schema(),
                [
                    Ok(range_batch(0, 1)),
                    Err(Error::with_message_and_status("boom", Status::Execution)),
                ],
            ),
            Script::Echo(declared) => {
                let logical_type = declared
                    .clone()
                    .or_else(|| params[0].natural_type())
                    .unwrap_or(LogicalType::Integer);
                let array = values_to_array(&logical_type, params)?;
                let schema = Arc::new(Schema::new(vec![logical_type.to_field("value", true)]));
                let batch = RecordBatch::try_new(schema.clone(), vec![array])?;
                ScriptedCursor::new(schema, [Ok(batch)])
            }
        };
        Ok(Box::new(cursor))
    }
}

struct ScriptedCursor {
    schema: SchemaRef,
    batches: VecDeque<Result<RecordBatch>>,
    repeat: Option<RecordBatch>,
}

impl ScriptedCursor {
    fn new(schema: SchemaRef, batches: impl IntoIterator<Item = Result<RecordBatch>>) -> Self {
        Self {
            schema,
            batches: batches.into_iter().collect(),
            repeat: None,
        }
    }
}

impl Cursor for ScriptedCursor {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if let Some(batch) = &self.repeat {
            std::thread::sleep(std::time::Duration::from_millis(1));
            return Ok(Some(batch.clone()));
        }
        self.batches.pop_front().transpose()
    }
}
