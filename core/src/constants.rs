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

/// Maximum number of rows in one fetched batch.
pub const FETCH_SIZE: usize = 2048;

/// Path selecting an in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

pub const DATABASE_OPTION_THREADS: &str = "threads";
pub const DATABASE_OPTION_MEMORY_LIMIT: &str = "memory_limit";
pub const DATABASE_OPTION_BATCH_SIZE: &str = "batch_size";
pub const DATABASE_OPTION_DEFAULT_CATALOG: &str = "default_catalog";
pub const DATABASE_OPTION_DEFAULT_SCHEMA: &str = "default_schema";

/// Field metadata key marking Arrow fields whose semantic type is not
/// recoverable from the Arrow type alone (HUGEINT).
pub const LOGICAL_TYPE_METADATA_KEY: &str = "vecbridge.logical_type";
