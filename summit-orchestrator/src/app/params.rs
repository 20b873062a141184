// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parameter types accepted by orchestrator operations

use crate::db::model::ClusterProvider;
use crate::db::model::StorageSource;
use crate::external::PartitionSpec;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterCreate {
    pub name: String,
    pub description: String,
    pub provider: ClusterProvider,
    /// required when `provider` is `Cloud`
    pub cloud: Option<CloudClusterConfig>,
    /// caller-provided client secret; generated when absent
    pub secret: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CloudClusterConfig {
    pub cloud_account_id: Uuid,
    pub region: String,
    pub head_node_instance_type: String,
    pub partitions: Vec<PartitionSpec>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterUpdate {
    pub description: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StorageCreate {
    pub name: String,
    pub region: String,
    pub source: StorageSource,
    /// required when `source` is `Imported`; assigned by the provider when
    /// `Managed`
    pub fs_id: Option<String>,
    pub cloud_account_id: Uuid,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StorageUpdate {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MountRequest {
    pub fs_id: String,
    pub cluster_name: String,
    /// absolute path on the cluster head node
    pub path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionBlocker {
    HasMountPoints,
    UnknownStackState,
}

/// Whether a cluster can currently be deleted, and if not, why
#[derive(Clone, Debug, PartialEq)]
pub struct DeletionReadiness {
    pub is_available: bool,
    pub reason: Option<DeletionBlocker>,
}
