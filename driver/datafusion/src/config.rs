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

//! Translation of database options into DataFusion configuration.

use datafusion::prelude::SessionConfig;
use vecbridge_core::error::{Error, Result, Status};
use vecbridge_core::options::{parse_memory_size, DatabaseConfig, OptionDatabase, OptionValue};

pub const DEFAULT_CATALOG: &str = "memory";
pub const DEFAULT_SCHEMA: &str = "main";

/// Engine settings derived from the options given at open.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub session: SessionConfig,
    pub memory_limit: Option<usize>,
    pub default_catalog: String,
    pub default_schema: String,
}

impl TryFrom<&DatabaseConfig> for EngineSettings {
    type Error = Error;

    fn try_from(config: &DatabaseConfig) -> Result<Self> {
        let mut session = SessionConfig::new()
            .with_information_schema(true)
            .with_create_default_catalog_and_schema(false);
        let mut memory_limit = None;
        let mut default_catalog = DEFAULT_CATALOG.to_string();
        let mut default_schema = DEFAULT_SCHEMA.to_string();

        for (key, value) in &config.options {
            match key {
                OptionDatabase::Threads => {
                    session = session.with_target_partitions(positive(key, value)?)
                }
                OptionDatabase::BatchSize => session = session.with_batch_size(positive(key, value)?),
                OptionDatabase::MemoryLimit => {
                    memory_limit = Some(parse_memory_size(&value.to_setting()?)?)
                }
                OptionDatabase::DefaultCatalog => default_catalog = name(key, value)?,
                OptionDatabase::DefaultSchema => default_schema = name(key, value)?,
                OptionDatabase::Other(key) if key.starts_with("datafusion.") => session
                    .options_mut()
                    .set(key, &value.to_setting()?)
                    .map_err(|e| {
                        Error::with_message_and_status(e.to_string(), Status::Config)
                    })?,
                OptionDatabase::Other(key) => {
                    return Err(Error::with_message_and_status(
                        format!("Unrecognized option: {key}"),
                        Status::Config,
                    ))
                }
            }
        }

        let session = session.with_default_catalog_and_schema(&default_catalog, &default_schema);
        Ok(Self {
            session,
            memory_limit,
            default_catalog,
            default_schema,
        })
    }
}

fn positive(key: &OptionDatabase, value: &OptionValue) -> Result<usize> {
    let parsed = match value {
        OptionValue::Int(value) => usize::try_from(*value).ok(),
        other => other.to_setting()?.trim().parse::<usize>().ok(),
    };
    parsed.filter(|v| *v > 0).ok_or_else(|| {
        Error::with_message_and_status(
            format!("{} must be a positive integer, got {value:?}", key.as_ref()),
            Status::Config,
        )
    })
}

fn name(key: &OptionDatabase, value: &OptionValue) -> Result<String> {
    let name = value.to_setting()?;
    if name.is_empty() {
        return Err(Error::with_message_and_status(
            format!("{} must not be empty", key.as_ref()),
            Status::Config,
        ));
    }
    Ok(name)
}
