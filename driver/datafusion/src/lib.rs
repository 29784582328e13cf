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

//! Apache DataFusion binding for vecbridge.
//!
//! Every database shares one catalog list between its connections, so
//! tables created on one connection are visible on the others while the
//! catalog and schema used for name resolution stay per connection.
//!
//! A database opened on a directory attaches every `*.parquet` file in it
//! as a table named after the file stem.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use datafusion::catalog::{
    CatalogProvider, CatalogProviderList, MemoryCatalogProvider, MemoryCatalogProviderList,
    MemorySchemaProvider,
};
use datafusion::error::DataFusionError;
use datafusion::execution::runtime_env::{RuntimeEnv, RuntimeEnvBuilder};
use datafusion::execution::session_state::SessionStateBuilder;
use datafusion::prelude::*;
use tracing::debug;

use vecbridge_core::engine::{Database, Driver, Session};
use vecbridge_core::error::{Error, Result, Status};
use vecbridge_core::options::DatabaseConfig;

mod config;
mod session;
mod statement;

pub use config::{EngineSettings, DEFAULT_CATALOG, DEFAULT_SCHEMA};
pub use session::DataFusionSession;
pub use statement::{DataFusionCursor, DataFusionQuery};

static SHARED_RUNTIME: OnceLock<std::io::Result<tokio::runtime::Runtime>> = OnceLock::new();

/// Where blocking calls into DataFusion run.
pub enum Runtime {
    /// The tokio runtime the caller is already running in.
    Handle(tokio::runtime::Handle),
    /// The process-wide runtime, started on first use.
    Shared(&'static tokio::runtime::Runtime),
}

impl Runtime {
    pub fn new() -> Result<Self> {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            return Ok(Self::Handle(handle));
        }
        let runtime = SHARED_RUNTIME.get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .thread_name("vecbridge-datafusion")
                .enable_all()
                .build()
        });
        match runtime {
            Ok(runtime) => Ok(Self::Shared(runtime)),
            Err(error) => Err(Error::with_message_and_status(
                format!("Failed to start the engine runtime: {error}"),
                Status::Internal,
            )),
        }
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        match self {
            Runtime::Handle(handle) => tokio::task::block_in_place(|| handle.block_on(future)),
            Runtime::Shared(runtime) => runtime.block_on(future),
        }
    }
}

/// Map an engine error, keeping its message verbatim. Parser failures are
/// always [Status::Syntax]; anything else gets `status`.
pub(crate) fn engine_error(error: DataFusionError, status: Status) -> Error {
    let status = match error.find_root() {
        DataFusionError::SQL(..) => Status::Syntax,
        DataFusionError::ResourcesExhausted(_) => Status::Execution,
        _ => status,
    };
    Error::with_message_and_status(error.to_string(), status)
}

#[derive(Default)]
pub struct DataFusionDriver {}

impl Driver for DataFusionDriver {
    fn open(&self, config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
        let database = DataFusionDatabase::try_new(config)?;
        Ok(Arc::new(database))
    }
}

pub struct DataFusionDatabase {
    runtime: Arc<Runtime>,
    catalogs: Arc<dyn CatalogProviderList>,
    settings: EngineSettings,
    runtime_env: Arc<RuntimeEnv>,
    read_only: bool,
}

impl DataFusionDatabase {
    pub fn try_new(config: &DatabaseConfig) -> Result<Self> {
        let settings = EngineSettings::try_from(config)?;
        let mut runtime_env = RuntimeEnvBuilder::new();
        if let Some(limit) = settings.memory_limit {
            runtime_env = runtime_env.with_memory_limit(limit, 1.0);
        }
        let runtime_env = runtime_env
            .build_arc()
            .map_err(|e| engine_error(e, Status::Config))?;

        let catalogs = Arc::new(MemoryCatalogProviderList::new());
        let catalog = Arc::new(MemoryCatalogProvider::new());
        catalog
            .register_schema(&settings.default_schema, Arc::new(MemorySchemaProvider::new()))
            .map_err(|e| engine_error(e, Status::Internal))?;
        catalogs.register_catalog(settings.default_catalog.clone(), catalog);

        let database = Self {
            runtime: Arc::new(Runtime::new()?),
            catalogs,
            settings,
            runtime_env,
            read_only: config.read_only,
        };
        if !config.is_in_memory() {
            database.attach_directory(Path::new(&config.path))?;
        }
        debug!(path = %config.path, read_only = config.read_only, "opened DataFusion database");
        Ok(database)
    }

    fn context(&self) -> SessionContext {
        let state = SessionStateBuilder::new()
            .with_config(self.settings.session.clone())
            .with_runtime_env(self.runtime_env.clone())
            .with_catalog_list(self.catalogs.clone())
            .with_default_features()
            .build();
        SessionContext::new_with_state(state)
    }

    /// Register every parquet file of `dir` as a table.
    fn attach_directory(&self, dir: &Path) -> Result<()> {
        let metadata = std::fs::metadata(dir)?;
        if !metadata.is_dir() {
            return Err(Error::with_message_and_status(
                format!("{} is not a database directory", dir.display()),
                Status::IO,
            ));
        }
        let ctx = self.context();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            let (Some(table), Some(location)) =
                (path.file_stem().and_then(|s| s.to_str()), path.to_str())
            else {
                continue;
            };
            self.runtime
                .block_on(ctx.register_parquet(table, location, ParquetReadOptions::default()))
                .map_err(|e| engine_error(e, Status::IO))?;
            debug!(table, location, "attached parquet table");
        }
        Ok(())
    }
}

impl Database for DataFusionDatabase {
    fn connect(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(DataFusionSession::new(
            self.runtime.clone(),
            self.context(),
            self.read_only,
        )))
    }
}
