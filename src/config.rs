// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Server configuration.
//!
//! Passed to [`crate::reactor::Reactor::new`] at construction. A `Config`
//! never reads the environment or argv itself; loading it from a file, or
//! building one programmatically, is the host process's job.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ServerError};

/// Edge/level trigger selection for the listen and connection descriptors.
///
/// Bit 0 selects edge-triggered connection descriptors; bit 1 selects
/// edge-triggered listen descriptors. Values outside `0..=3` default to `3`
/// (both edge-triggered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub struct TrigMode(u8);

impl TrigMode {
    /// Whether connection descriptors should be drained edge-triggered.
    pub fn conn_edge_triggered(self) -> bool {
        self.0 & 0b01 != 0
    }

    /// Whether the listen descriptor should be drained edge-triggered.
    pub fn listen_edge_triggered(self) -> bool {
        self.0 & 0b10 != 0
    }
}

impl TryFrom<u8> for TrigMode {
    type Error = std::convert::Infallible;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Ok(if value <= 3 { Self(value) } else { Self(3) })
    }
}

impl Default for TrigMode {
    fn default() -> Self {
        Self(3)
    }
}

/// Database connection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    /// Host, e.g. `"localhost"`.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database/schema name.
    pub db_name: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            db_name: "webserver".to_string(),
        }
    }
}

/// Cache (Redis) connection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Host, e.g. `"localhost"`.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
        }
    }
}

/// Logging configuration. The server logs through the `log` facade
/// regardless; this only governs whether a sink is installed and at what
/// level.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Whether the server should install a logger on startup.
    pub enabled: bool,
    /// Minimum level that reaches the sink.
    pub level: log::LevelFilter,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: log::LevelFilter::Info,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen port, must be in `[1024, 65535]`.
    pub port: u16,
    /// Edge/level trigger mode for listen and connection descriptors.
    #[serde(default)]
    pub trig_mode: TrigMode,
    /// Idle-connection timeout in milliseconds. `0` disables idle timeouts.
    pub timeout_ms: u64,
    /// Whether `SO_LINGER{on=1,linger=1}` is set on the listen socket.
    pub opt_linger: bool,
    /// Maximum simultaneous connections before new accepts are rejected.
    #[serde(default = "default_max_fd")]
    pub max_fd: usize,
    /// Database connection parameters.
    #[serde(default)]
    pub db: DbConfig,
    /// Number of pre-opened database handles.
    pub conn_pool_num: usize,
    /// Cache connection parameters.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Number of pre-opened cache handles.
    #[serde(default = "default_conn_pool_num")]
    pub cache_pool_num: usize,
    /// Number of worker threads.
    pub thread_num: usize,
    /// Document root served for static files.
    pub doc_root: PathBuf,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_max_fd() -> usize {
    65536
}

fn default_conn_pool_num() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1316,
            trig_mode: TrigMode::default(),
            timeout_ms: 60_000,
            opt_linger: false,
            max_fd: default_max_fd(),
            db: DbConfig::default(),
            conn_pool_num: 4,
            cache: CacheConfig::default(),
            cache_pool_num: default_conn_pool_num(),
            thread_num: 4,
            doc_root: PathBuf::from("./resources"),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates invariants that the reactor relies on at construction time.
    pub fn validate(&self) -> Result<()> {
        if !(1024..=65535).contains(&self.port) {
            return Err(ServerError::Config(format!(
                "port {} out of range [1024, 65535]",
                self.port
            )));
        }
        if self.thread_num == 0 {
            return Err(ServerError::Config("thread_num must be > 0".to_string()));
        }
        if self.conn_pool_num == 0 {
            return Err(ServerError::Config(
                "conn_pool_num must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
