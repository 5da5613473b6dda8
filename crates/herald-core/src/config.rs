// Copyright 2025 eraflo
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

//! Tunables for an [`EventBus`](crate::EventBus).

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// Configuration for an event bus.
///
/// Every field has a default, so a RON file only needs to list the values it
/// overrides:
///
/// ```ron
/// (
///     sweep_interval: 512,
///     event_pool_size: 128,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Number of publish calls between two full sweeps of dead handlers.
    /// `0` disables the periodic sweep.
    pub sweep_interval: u32,
    /// Maximum number of snapshot buffers retained per handler list.
    pub snapshot_pool_size: usize,
    /// Maximum number of pooled payload objects retained per event type.
    pub event_pool_size: usize,
    /// Removal batches larger than this use a hash set instead of a linear scan.
    pub batch_set_threshold: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            sweep_interval: 256,
            snapshot_pool_size: 8,
            event_pool_size: 64,
            batch_set_threshold: 8,
        }
    }
}

impl BusConfig {
    /// Parses a configuration from RON text.
    pub fn from_ron_str(source: &str) -> anyhow::Result<Self> {
        ron::from_str(source).context("Failed to parse bus configuration")
    }

    /// Loads a configuration from a RON file on disk.
    ///
    /// ## Arguments
    /// * `path` - Location of the `.ron` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bus configuration {}", path.display()))?;
        let config = Self::from_ron_str(&source)?;
        log::info!("Loaded bus configuration from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_config_keeps_defaults() {
        let config = BusConfig::from_ron_str("(sweep_interval: 4)").unwrap();
        assert_eq!(config.sweep_interval, 4);
        assert_eq!(config.snapshot_pool_size, BusConfig::default().snapshot_pool_size);
        assert_eq!(config.event_pool_size, 64);
    }

    #[test]
    fn empty_struct_is_default() {
        assert_eq!(BusConfig::from_ron_str("()").unwrap(), BusConfig::default());
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(BusConfig::from_ron_str("(sweep_interval: \"often\")").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "(event_pool_size: 3, batch_set_threshold: 2)").unwrap();

        let config = BusConfig::load(file.path()).unwrap();
        assert_eq!(config.event_pool_size, 3);
        assert_eq!(config.batch_set_threshold, 2);
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = BusConfig::load("/definitely/not/here.ron").unwrap_err();
        assert!(format!("{err}").contains("/definitely/not/here.ron"));
    }
}
