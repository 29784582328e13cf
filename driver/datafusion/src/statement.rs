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

//! Prepared statements and result cursors.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use arrow_array::{RecordBatch, RecordBatchOptions};
use arrow_schema::{DataType, Schema, SchemaRef};
use datafusion::arrow::compute::cast;
use datafusion::common::stats::Precision;
use datafusion::common::ScalarValue;
use datafusion::error::DataFusionError;
use datafusion::execution::context::SQLOptions;
use datafusion::execution::session_state::SessionState;
use datafusion::logical_expr::LogicalPlan;
use datafusion::physical_plan::{collect, execute_stream, ExecutionPlan, SendableRecordBatchStream};
use datafusion::prelude::*;
use datafusion::sql::parser::Statement as DFStatement;
use datafusion::sql::sqlparser::ast::Statement as SqlStatement;
use datafusion::sql::TableReference;
use futures::StreamExt;
use tracing::{debug, trace};

use vecbridge_core::engine::{Cursor, PreparedQuery};
use vecbridge_core::error::{Error, Result, Status};
use vecbridge_core::{values_to_array, ColumnMeta, LogicalType, QueryMonitor, Value};

use crate::session::LastPlan;
use crate::{engine_error, Runtime};

/// How often a blocked engine call checks for an interrupt.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A parsed statement, planned unless it references relations that do not
/// exist yet. Those are planned again at every execution.
pub struct DataFusionQuery {
    runtime: Arc<Runtime>,
    ctx: SessionContext,
    statement: DFStatement,
    plan: Option<LogicalPlan>,
    parameters: Vec<Option<DataType>>,
    read_only: bool,
    last_plan: LastPlan,
}

impl DataFusionQuery {
    pub(crate) fn try_new(
        runtime: Arc<Runtime>,
        ctx: SessionContext,
        sql: &str,
        read_only: bool,
        last_plan: LastPlan,
    ) -> Result<Self> {
        let state = ctx.state();
        let dialect = state.config().options().sql_parser.dialect.clone();
        let statement = state
            .sql_to_statement(sql, &dialect)
            .map_err(|e| engine_error(e, Status::Syntax))?;
        let mut parameters = vec![None; count_placeholders(sql)];

        let missing = missing_relations(&ctx, &state, &statement);
        let plan = if missing.is_empty() {
            let plan = runtime
                .block_on(state.statement_to_plan(statement.clone()))
                .map_err(|e| engine_error(e, Status::Bind))?;
            if read_only {
                verify_read_only(&plan).map_err(|e| engine_error(e, Status::Bind))?;
            }
            let types = plan
                .get_parameter_types()
                .map_err(|e| engine_error(e, Status::Bind))?;
            for (name, data_type) in types {
                let index = placeholder_index(&name).ok_or_else(|| {
                    Error::with_message_and_status(
                        format!("Unsupported placeholder {name}; use $1, $2, ..."),
                        Status::Bind,
                    )
                })?;
                if index > parameters.len() {
                    parameters.resize(index, None);
                }
                parameters[index - 1] = data_type;
            }
            Some(plan)
        } else {
            debug!(?missing, "deferring planning until execution");
            None
        };

        Ok(Self {
            runtime,
            ctx,
            statement,
            plan,
            parameters,
            read_only,
            last_plan,
        })
    }

    fn plan_now(&self) -> Result<LogicalPlan> {
        let state = self.ctx.state();
        let plan = self
            .runtime
            .block_on(state.statement_to_plan(self.statement.clone()))
            .map_err(|e| engine_error(e, Status::Execution))?;
        if self.read_only {
            verify_read_only(&plan).map_err(|e| engine_error(e, Status::Execution))?;
        }
        Ok(plan)
    }

    fn bind(&self, plan: LogicalPlan, params: &[Value]) -> Result<LogicalPlan> {
        if params.is_empty() {
            return Ok(plan);
        }
        let values = params
            .iter()
            .zip(&self.parameters)
            .map(|(value, declared)| to_scalar(value, declared.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        plan.with_param_values(values)
            .map_err(|e| engine_error(e, Status::TypeCoercion))
    }
}

impl PreparedQuery for DataFusionQuery {
    fn parameter_types(&self) -> Vec<Option<LogicalType>> {
        self.parameters
            .iter()
            .map(|data_type| {
                data_type
                    .as_ref()
                    .and_then(|data_type| LogicalType::from_arrow(data_type).ok())
            })
            .collect()
    }

    fn schema(&self) -> Result<SchemaRef> {
        match &self.plan {
            Some(plan) => canonical_schema(plan.schema().as_arrow()),
            None => Ok(Arc::new(Schema::empty())),
        }
    }

    fn execute(
        &mut self,
        params: &[Value],
        monitor: Arc<QueryMonitor>,
    ) -> Result<Box<dyn Cursor>> {
        let plan = match &self.plan {
            Some(plan) => plan.clone(),
            None => match self.plan_now() {
                Ok(plan) => plan,
                Err(error) => {
                    return Ok(Box::new(DataFusionCursor::failed(
                        self.runtime.clone(),
                        monitor,
                        error,
                    )))
                }
            },
        };
        let plan = self.bind(plan, params)?;
        *self.last_plan.lock().unwrap_or_else(PoisonError::into_inner) = Some(plan.clone());
        let cursor = DataFusionCursor::start(self.runtime.clone(), &self.ctx, plan, monitor)?;
        Ok(Box::new(cursor))
    }
}

enum Source {
    Stream(SendableRecordBatchStream),
    Batches(VecDeque<RecordBatch>),
    Failed(Option<Error>),
}

/// Batches of one execution, cast to the canonical layout of their
/// column types.
pub struct DataFusionCursor {
    runtime: Arc<Runtime>,
    schema: SchemaRef,
    monitor: Arc<QueryMonitor>,
    source: Source,
}

impl DataFusionCursor {
    /// Start executing `plan`. DDL runs to completion here and DML is
    /// drained eagerly, so both take effect before the first fetch.
    /// Engine failures are kept for the first call to `next_batch`.
    fn start(
        runtime: Arc<Runtime>,
        ctx: &SessionContext,
        plan: LogicalPlan,
        monitor: Arc<QueryMonitor>,
    ) -> Result<Self> {
        let schema = canonical_schema(plan.schema().as_arrow())?;
        let eager = matches!(plan, LogicalPlan::Dml(_) | LogicalPlan::Copy(_));
        let started = interruptible(&runtime, &monitor, async {
            let df = ctx.execute_logical_plan(plan).await?;
            let task_ctx = Arc::new(df.task_ctx());
            let physical = df.create_physical_plan().await?;
            let total = exact_rows(&physical);
            let source = if eager {
                Source::Batches(collect(physical, task_ctx).await?.into())
            } else {
                Source::Stream(execute_stream(physical, task_ctx)?)
            };
            Ok::<_, DataFusionError>((source, total))
        });
        let source = match started {
            Ok(Ok((source, total))) => {
                monitor.set_total_rows(total);
                source
            }
            Ok(Err(error)) => Source::Failed(Some(engine_error(error, Status::Execution))),
            Err(cancelled) => Source::Failed(Some(cancelled)),
        };
        Ok(Self {
            runtime,
            schema,
            monitor,
            source,
        })
    }

    fn failed(runtime: Arc<Runtime>, monitor: Arc<QueryMonitor>, error: Error) -> Self {
        Self {
            runtime,
            schema: Arc::new(Schema::empty()),
            monitor,
            source: Source::Failed(Some(error)),
        }
    }
}

impl Cursor for DataFusionCursor {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let batch = match &mut self.source {
            Source::Failed(error) => {
                return match error.take() {
                    Some(error) => Err(error),
                    None => Ok(None),
                }
            }
            Source::Batches(batches) => batches.pop_front(),
            Source::Stream(stream) => interruptible(&self.runtime, &self.monitor, stream.next())?
                .transpose()
                .map_err(|e| engine_error(e, Status::Execution))?,
        };
        if let Some(batch) = &batch {
            trace!(rows = batch.num_rows(), "engine batch");
        }
        batch.map(|batch| normalize(&self.schema, batch)).transpose()
    }
}

/// Run `future` to completion unless the query is interrupted first.
fn interruptible<F: Future>(
    runtime: &Runtime,
    monitor: &QueryMonitor,
    future: F,
) -> Result<F::Output> {
    runtime.block_on(async {
        tokio::select! {
            output = future => Ok(output),
            _ = wait_for_interrupt(monitor) => Err(Error::with_message_and_status(
                "Query was interrupted",
                Status::Cancelled,
            )),
        }
    })
}

async fn wait_for_interrupt(monitor: &QueryMonitor) {
    while !monitor.is_interrupted() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn verify_read_only(plan: &LogicalPlan) -> datafusion::error::Result<()> {
    SQLOptions::new()
        .with_allow_ddl(false)
        .with_allow_dml(false)
        .verify_plan(plan)
}

/// Relations a query reads that do not exist in the catalog yet.
fn missing_relations(
    ctx: &SessionContext,
    state: &SessionState,
    statement: &DFStatement,
) -> Vec<TableReference> {
    let is_query = matches!(
        statement,
        DFStatement::Statement(s) if matches!(**s, SqlStatement::Query(_))
    );
    if !is_query {
        return vec![];
    }
    let Ok(references) = state.resolve_table_references(statement) else {
        return vec![];
    };
    references
        .into_iter()
        .filter(|r| !(r.schema().is_none() && state.table_functions().contains_key(r.table())))
        .filter(|r| !ctx.table_exist(r.clone()).unwrap_or(false))
        .collect()
}

fn canonical_schema(schema: &Schema) -> Result<SchemaRef> {
    Ok(Arc::new(ColumnMeta::to_schema(&ColumnMeta::from_schema(schema)?)))
}

fn normalize(schema: &SchemaRef, batch: RecordBatch) -> Result<RecordBatch> {
    let columns = batch
        .columns()
        .iter()
        .zip(schema.fields())
        .map(|(array, field)| {
            if array.data_type() == field.data_type() {
                Ok(array.clone())
            } else {
                cast(array, field.data_type())
            }
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        schema.clone(),
        columns,
        &options,
    )?)
}

#[allow(deprecated)]
fn exact_rows(plan: &Arc<dyn ExecutionPlan>) -> Option<u64> {
    match plan.statistics().ok()?.num_rows {
        Precision::Exact(rows) => Some(rows as u64),
        _ => None,
    }
}

fn to_scalar(value: &Value, declared: Option<&DataType>) -> Result<ScalarValue> {
    if value.is_null() {
        return match declared {
            Some(data_type) => {
                ScalarValue::try_from(data_type).map_err(|e| engine_error(e, Status::TypeCoercion))
            }
            None => Ok(ScalarValue::Null),
        };
    }
    let logical_type = declared
        .and_then(|data_type| LogicalType::from_arrow(data_type).ok())
        .or_else(|| value.natural_type())
        .ok_or_else(|| {
            Error::with_message_and_status(
                format!("Cannot bind a {} parameter", value.kind()),
                Status::TypeCoercion,
            )
        })?;
    let array = values_to_array(&logical_type, std::slice::from_ref(value))?;
    let array = match declared {
        Some(data_type) if data_type != array.data_type() => cast(&array, data_type)?,
        _ => array,
    };
    ScalarValue::try_from_array(&array, 0).map_err(|e| engine_error(e, Status::TypeCoercion))
}

fn placeholder_index(name: &str) -> Option<usize> {
    name.strip_prefix('$')?
        .parse()
        .ok()
        .filter(|index| *index > 0)
}

/// Highest `$n` placeholder in `sql`, skipping quoted text and comments.
fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                for next in chars.by_ref() {
                    if next == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = ' ';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
            }
            '$' => {
                let mut digits = String::new();
                while let Some(&digit) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(digit);
                    chars.next();
                }
                if let Ok(index) = digits.parse::<usize>() {
                    count = count.max(index);
                }
            }
            _ => {}
        }
    }
    count
}
