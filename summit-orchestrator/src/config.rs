// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing orchestrator configuration

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// The set of instance types offered in each cloud region
///
/// This is loaded once at startup and never changes while the orchestrator is
/// running.  Cluster creation validates requested head node and partition
/// instance types against it before any external call is made.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct InstanceCatalog {
    pub regions: BTreeMap<String, BTreeSet<String>>,
}

impl InstanceCatalog {
    pub fn allows(&self, region: &str, instance_type: &str) -> bool {
        self.regions
            .get(region)
            .map(|types| types.contains(instance_type))
            .unwrap_or(false)
    }
}

fn default_status_poll_interval_ms() -> u64 {
    15_000
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct OrchestratorConfig {
    pub instance_catalog: InstanceCatalog,
    /// How often the background monitor polls a newly applied stack
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> OrchestratorConfig {
        OrchestratorConfig {
            instance_catalog: InstanceCatalog::default(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("error reading \"{}\": {}", path.display(), err)]
    Io { path: PathBuf, err: std::io::Error },
    #[error("error parsing \"{}\": {}", path.display(), err)]
    Parse { path: PathBuf, err: toml::de::Error },
}

impl OrchestratorConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    /// Load an `OrchestratorConfig` from the given TOML file
    pub fn from_file(path: &Path) -> Result<OrchestratorConfig, LoadError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.to_owned(), err })?;
        toml::from_str(&contents)
            .map_err(|err| LoadError::Parse { path: path.to_owned(), err })
    }
}

#[cfg(test)]
mod test {
    use super::InstanceCatalog;
    use super::OrchestratorConfig;

    #[test]
    fn test_parse_config() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
            status_poll_interval_ms = 500
            [instance_catalog.regions]
            "us-west-2" = ["c5.xlarge", "t3.micro"]
            "#,
        )
        .unwrap();
        assert_eq!(config.status_poll_interval_ms, 500);
        assert!(config.instance_catalog.allows("us-west-2", "c5.xlarge"));
        assert!(!config.instance_catalog.allows("us-west-2", "m5.large"));
        assert!(!config.instance_catalog.allows("eu-north-1", "c5.xlarge"));
    }

    #[test]
    fn test_poll_interval_default() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
            [instance_catalog.regions]
            "#,
        )
        .unwrap();
        assert_eq!(config.status_poll_interval_ms, 15_000);
    }

    #[test]
    fn test_empty_catalog_allows_nothing() {
        let catalog = InstanceCatalog::default();
        assert!(!catalog.allows("us-west-2", "c5.xlarge"));
    }
}
