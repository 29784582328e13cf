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

use std::sync::{Arc, Mutex, PoisonError};

use arrow_array::{RecordBatch, RecordBatchReader};
use arrow_schema::SchemaRef;
use datafusion::arrow::compute::cast;
use datafusion::catalog::CatalogProvider;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::datasource::{MemTable, TableProvider};
use datafusion::logical_expr::LogicalPlan;
use datafusion::prelude::*;
use datafusion::sql::TableReference;
use tracing::debug;

use vecbridge_core::engine::{PreparedQuery, Session};
use vecbridge_core::error::{Error, Result, Status};
use vecbridge_core::options::ProfilerFormat;

use crate::statement::DataFusionQuery;
use crate::{engine_error, Runtime};

/// Plan of the last statement executed on a session.
pub(crate) type LastPlan = Arc<Mutex<Option<LogicalPlan>>>;

pub struct DataFusionSession {
    runtime: Arc<Runtime>,
    ctx: SessionContext,
    read_only: bool,
    last_plan: LastPlan,
}

impl DataFusionSession {
    pub(crate) fn new(runtime: Arc<Runtime>, ctx: SessionContext, read_only: bool) -> Self {
        Self {
            runtime,
            ctx,
            read_only,
            last_plan: Arc::default(),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let query = format!("SET {key} = '{}'", value.replace('\'', "''"));
        self.runtime
            .block_on(self.ctx.sql(&query))
            .map_err(|e| engine_error(e, Status::Internal))?;
        Ok(())
    }

    fn table_provider(&self, schema: Option<&str>, table: &str) -> Result<Arc<dyn TableProvider>> {
        let table_ref = match schema {
            Some(schema) => TableReference::partial(schema, table),
            None => TableReference::bare(table),
        };
        self.runtime
            .block_on(self.ctx.table_provider(table_ref.clone()))
            .map_err(|e| {
                Error::with_message_and_status(
                    format!("Table {table_ref} does not exist: {e}"),
                    Status::NotFound,
                )
            })
    }
}

impl Session for DataFusionSession {
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        // DataFusion has no transactions: every statement commits on its own.
        debug!(enabled, "auto-commit");
        Ok(())
    }

    fn schema(&self) -> Result<String> {
        Ok(self
            .ctx
            .state()
            .config_options()
            .catalog
            .default_schema
            .clone())
    }

    fn set_schema(&mut self, schema: &str) -> Result<()> {
        let catalog = self.catalog()?;
        let exists = self
            .ctx
            .catalog(&catalog)
            .is_some_and(|c| c.schema(schema).is_some());
        if !exists {
            return Err(Error::with_message_and_status(
                format!("Schema {catalog}.{schema} does not exist"),
                Status::NotFound,
            ));
        }
        self.set("datafusion.catalog.default_schema", schema)
    }

    fn catalog(&self) -> Result<String> {
        Ok(self
            .ctx
            .state()
            .config_options()
            .catalog
            .default_catalog
            .clone())
    }

    fn set_catalog(&mut self, catalog: &str) -> Result<()> {
        if self.ctx.catalog(catalog).is_none() {
            return Err(Error::with_message_and_status(
                format!("Catalog {catalog} does not exist"),
                Status::NotFound,
            ));
        }
        self.set("datafusion.catalog.default_catalog", catalog)
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedQuery>> {
        let query = DataFusionQuery::try_new(
            self.runtime.clone(),
            self.ctx.clone(),
            sql,
            self.read_only,
            self.last_plan.clone(),
        )?;
        Ok(Box::new(query))
    }

    fn table_schema(&self, schema: Option<&str>, table: &str) -> Result<SchemaRef> {
        Ok(self.table_provider(schema, table)?.schema())
    }

    fn append(&mut self, schema: Option<&str>, table: &str, batch: RecordBatch) -> Result<()> {
        if self.read_only {
            return Err(Error::with_message_and_status(
                "Database is read-only",
                Status::Execution,
            ));
        }
        let target = self.table_provider(schema, table)?.schema();
        let columns = batch
            .columns()
            .iter()
            .zip(target.fields())
            .map(|(array, field)| cast(array, field.data_type()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = RecordBatch::try_new(target.clone(), columns)?;
        let table_ref = match schema {
            Some(schema) => TableReference::partial(schema, table),
            None => TableReference::bare(table),
        };
        let rows = batch.num_rows();
        self.runtime
            .block_on(async {
                self.ctx
                    .read_batch(batch)?
                    .write_table(&table_ref.to_quoted_string(), DataFrameWriteOptions::new())
                    .await
            })
            .map_err(|e| engine_error(e, Status::Execution))?;
        debug!(table = %table_ref, rows, "appended batch");
        Ok(())
    }

    fn register_stream(
        &mut self,
        name: &str,
        reader: Box<dyn RecordBatchReader + Send>,
    ) -> Result<()> {
        let schema = reader.schema();
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        let table = MemTable::try_new(schema, vec![batches])
            .map_err(|e| engine_error(e, Status::Execution))?;
        let table_ref = TableReference::bare(name);
        self.ctx
            .deregister_table(table_ref.clone())
            .map_err(|e| engine_error(e, Status::Execution))?;
        self.ctx
            .register_table(table_ref, Arc::new(table))
            .map_err(|e| engine_error(e, Status::Execution))?;
        Ok(())
    }

    fn profile(&self, format: ProfilerFormat) -> Result<String> {
        let last_plan = self.last_plan.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(plan) = last_plan.as_ref() else {
            return Ok(String::new());
        };
        Ok(match format {
            ProfilerFormat::NoOutput => String::new(),
            ProfilerFormat::QueryTree => plan.display_indent().to_string(),
            ProfilerFormat::Json => plan.display_pg_json().to_string(),
            ProfilerFormat::Graphviz => plan.display_graphviz().to_string(),
        })
    }
}
