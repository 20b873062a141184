// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Records stored by the orchestrator and their status state machines

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use summit_common::ClusterName;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum ClusterProvider {
    OnPrem,
    Cloud,
}

/// Lifecycle status of a [`Cluster`]
///
/// Status fields are written only by the state machine and by background task
/// completions, and only along the legal transitions below.  There is no
/// automatic recovery: a record stranded in a non-terminal status by a crash
/// stays there until an operator intervenes.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum ClusterStatus {
    Preparing,
    Ready,
    Deleting,
}

impl ClusterStatus {
    pub fn can_transition_to(self, next: ClusterStatus) -> bool {
        matches!(
            (self, next),
            (ClusterStatus::Preparing, ClusterStatus::Ready)
                | (ClusterStatus::Preparing, ClusterStatus::Deleting)
                | (ClusterStatus::Ready, ClusterStatus::Deleting)
        )
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClusterStatus::Preparing => "preparing",
            ClusterStatus::Ready => "ready",
            ClusterStatus::Deleting => "deleting",
        })
    }
}

/// Lifecycle status of a [`MountPoint`]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum MountPointStatus {
    Mounting,
    Mounted,
    Unmounting,
    Unmounted,
    Error,
}

impl MountPointStatus {
    pub fn can_transition_to(self, next: MountPointStatus) -> bool {
        matches!(
            (self, next),
            (MountPointStatus::Mounting, MountPointStatus::Mounted)
                | (MountPointStatus::Mounting, MountPointStatus::Error)
                | (MountPointStatus::Mounted, MountPointStatus::Unmounting)
                | (MountPointStatus::Mounted, MountPointStatus::Error)
                | (MountPointStatus::Unmounting, MountPointStatus::Unmounted)
                | (MountPointStatus::Unmounting, MountPointStatus::Error)
                | (MountPointStatus::Error, MountPointStatus::Unmounting)
        )
    }

    /// An active mount point blocks another mount of the same
    /// (storage, cluster) pair.
    pub fn is_active(self) -> bool {
        !matches!(self, MountPointStatus::Unmounted)
    }
}

impl fmt::Display for MountPointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MountPointStatus::Mounting => "mounting",
            MountPointStatus::Mounted => "mounted",
            MountPointStatus::Unmounting => "unmounting",
            MountPointStatus::Unmounted => "unmounted",
            MountPointStatus::Error => "error",
        })
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum StorageSource {
    /// the file system already existed and was imported by its id
    Imported,
    /// the orchestrator created the backing file system and owns it
    Managed,
}

/// An HPC cluster owned by a tenant
///
/// The name is unique per tenant and immutable.  `client_id` and the stack
/// name are derived from the name and never stored inconsistently with it.
/// `creation_parameters` holds the provider apply inputs merged with the
/// generated portal token; the client secret is never stored.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Cluster {
    pub name: ClusterName,
    pub description: String,
    pub provider: ClusterProvider,
    pub client_id: String,
    pub cloud_account_id: Option<Uuid>,
    pub creation_parameters: BTreeMap<String, String>,
    pub status: ClusterStatus,
    pub owner_email: String,
    pub time_created: DateTime<Utc>,
}

/// A network file system registered with a tenant
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Storage {
    pub id: Uuid,
    /// backing file system id, unique per tenant
    pub fs_id: String,
    pub name: String,
    pub region: String,
    pub source: StorageSource,
    pub cloud_account_id: Uuid,
    pub owner_email: String,
    pub time_created: DateTime<Utc>,
}

/// An attachment of a [`Storage`] to a [`Cluster`] at a path
///
/// At most one active row exists per (storage, cluster) pair.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MountPoint {
    pub id: Uuid,
    pub storage_id: Uuid,
    pub cluster_name: ClusterName,
    pub client_id: String,
    pub mount_point: String,
    pub status: MountPointStatus,
    pub error: Option<String>,
    pub time_created: DateTime<Utc>,
}

/// A tenant's registered cloud account
///
/// The attributes map holds what the provider gateways need to authenticate,
/// notably `role_arn`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CloudAccount {
    pub id: Uuid,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}
