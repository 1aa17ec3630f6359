// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Layered configuration (§6), mirroring the server's `config`-crate +
//! serde-default convention: defaults, then an optional TOML file, then
//! `TRACEPIPE_*` environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_min_cluster_size() -> usize {
    2
}

fn default_min_matching_traces() -> usize {
    2
}

fn default_min_segment_words() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_worker_poll_timeout_ms() -> u64 {
    1000
}

fn default_worker_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_max_output_tokens() -> i64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub enable_cors: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// The six core-relevant keys from spec.md §6, plus the grouping worker's
/// fallback `max_output_tokens` from §4.F step 4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    #[serde(default = "default_min_matching_traces")]
    pub min_matching_traces: usize,
    #[serde(default = "default_min_segment_words")]
    pub min_segment_words: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_worker_poll_timeout_ms")]
    pub worker_poll_timeout_ms: u64,
    #[serde(default = "default_worker_shutdown_timeout_ms")]
    pub worker_shutdown_timeout_ms: u64,
    #[serde(default = "default_max_output_tokens")]
    pub default_max_output_tokens: i64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
            min_matching_traces: default_min_matching_traces(),
            min_segment_words: default_min_segment_words(),
            queue_capacity: default_queue_capacity(),
            worker_poll_timeout_ms: default_worker_poll_timeout_ms(),
            worker_shutdown_timeout_ms: default_worker_shutdown_timeout_ms(),
            default_max_output_tokens: default_max_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracepipeConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub grouping: GroupingConfig,
}

impl TracepipeConfig {
    /// Load defaults, merge an optional TOML file, then merge `TRACEPIPE_*`
    /// environment overrides (double-underscore separated, e.g.
    /// `TRACEPIPE_SERVER__LISTEN_ADDR`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&TracepipeConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TRACEPIPE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = TracepipeConfig::default();
        assert_eq!(cfg.grouping.min_cluster_size, 2);
        assert_eq!(cfg.grouping.min_matching_traces, 2);
        assert_eq!(cfg.grouping.min_segment_words, 3);
        assert_eq!(cfg.grouping.queue_capacity, 1000);
        assert_eq!(cfg.grouping.worker_poll_timeout_ms, 1000);
        assert_eq!(cfg.grouping.worker_shutdown_timeout_ms, 5000);
    }

    #[test]
    fn load_with_no_file_returns_defaults() {
        let cfg = TracepipeConfig::load(None).expect("config loads");
        assert_eq!(cfg.server.listen_addr, "0.0.0.0:8080");
    }
}
