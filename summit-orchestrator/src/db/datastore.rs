// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Primary control plane interface for resource storage
//!
//! Tables are tenant-scoped and held in memory behind one async mutex.  Each
//! method is one logical transaction: the lock is taken once, the
//! precondition checks and the write happen inside that one critical
//! section, and the lock is never held across a call to an external
//! provider.  Handles are cheaply cloneable so background tasks can take
//! their own.

use crate::db::model::CloudAccount;
use crate::db::model::Cluster;
use crate::db::model::ClusterStatus;
use crate::db::model::MountPoint;
use crate::db::model::MountPointStatus;
use crate::db::model::Storage;
use std::collections::BTreeMap;
use std::sync::Arc;
use summit_common::ClusterName;
use summit_common::CreateResult;
use summit_common::DeleteResult;
use summit_common::Error;
use summit_common::ListResultVec;
use summit_common::LookupResult;
use summit_common::LookupType;
use summit_common::ResourceType;
use summit_common::UpdateResult;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct TenantTables {
    clusters: BTreeMap<ClusterName, Cluster>,
    storages: BTreeMap<Uuid, Storage>,
    mount_points: BTreeMap<Uuid, MountPoint>,
    cloud_accounts: BTreeMap<Uuid, CloudAccount>,
}

#[derive(Clone)]
pub struct DataStore {
    data: Arc<Mutex<BTreeMap<String, TenantTables>>>,
}

impl DataStore {
    pub fn new() -> DataStore {
        DataStore { data: Arc::new(Mutex::new(BTreeMap::new())) }
    }

    /*
     * Cloud accounts
     */

    pub async fn cloud_account_upsert(
        &self,
        tenant: &str,
        account: CloudAccount,
    ) -> CreateResult<CloudAccount> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        tables.cloud_accounts.insert(account.id, account.clone());
        Ok(account)
    }

    pub async fn cloud_account_lookup(
        &self,
        tenant: &str,
        id: &Uuid,
    ) -> LookupResult<CloudAccount> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        tables.cloud_accounts.get(id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::CloudAccount, id)
        })
    }

    /*
     * Clusters
     */

    pub async fn cluster_create(
        &self,
        tenant: &str,
        cluster: Cluster,
    ) -> CreateResult<Cluster> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        if tables.clusters.contains_key(&cluster.name) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::Cluster,
                object_name: cluster.name.to_string(),
            });
        }
        tables.clusters.insert(cluster.name.clone(), cluster.clone());
        Ok(cluster)
    }

    pub async fn cluster_lookup(
        &self,
        tenant: &str,
        name: &ClusterName,
    ) -> LookupResult<Cluster> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        tables.clusters.get(name).cloned().ok_or_else(|| {
            Error::not_found_by_name(ResourceType::Cluster, name.as_str())
        })
    }

    pub async fn clusters_list(&self, tenant: &str) -> ListResultVec<Cluster> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        Ok(tables.clusters.values().cloned().collect())
    }

    /// Commits a status transition.  Illegal transitions indicate a bug in
    /// the state machine or an operator-visible divergence and are reported
    /// as `InvariantViolation`.
    pub async fn cluster_set_status(
        &self,
        tenant: &str,
        name: &ClusterName,
        status: ClusterStatus,
    ) -> UpdateResult<Cluster> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        let cluster = tables.clusters.get_mut(name).ok_or_else(|| {
            Error::not_found_by_name(ResourceType::Cluster, name.as_str())
        })?;
        if !cluster.status.can_transition_to(status) {
            return Err(Error::invariant_violation(&format!(
                "illegal status transition for cluster {:?}: {} -> {}",
                name.as_str(),
                cluster.status,
                status
            )));
        }
        cluster.status = status;
        Ok(cluster.clone())
    }

    pub async fn cluster_update_description(
        &self,
        tenant: &str,
        name: &ClusterName,
        description: &str,
    ) -> UpdateResult<Cluster> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        let cluster = tables.clusters.get_mut(name).ok_or_else(|| {
            Error::not_found_by_name(ResourceType::Cluster, name.as_str())
        })?;
        cluster.description = description.to_string();
        Ok(cluster.clone())
    }

    pub async fn cluster_delete(
        &self,
        tenant: &str,
        name: &ClusterName,
    ) -> DeleteResult {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        tables.clusters.remove(name).map(|_| ()).ok_or_else(|| {
            Error::not_found_by_name(ResourceType::Cluster, name.as_str())
        })
    }

    /*
     * Storages
     */

    /// Reports a conflict if `name` (or `fs_id`, when known up front) is
    /// already taken in this tenant.  Used for a clean failure before the
    /// provider is asked to create a file system; `storage_create` enforces
    /// the same rules again at insert.
    pub async fn storage_validate_unique(
        &self,
        tenant: &str,
        name: &str,
        fs_id: Option<&str>,
    ) -> Result<(), Error> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        Self::storage_check_conflicts(tables, None, name, fs_id)
    }

    fn storage_check_conflicts(
        tables: &TenantTables,
        exclude: Option<&Uuid>,
        name: &str,
        fs_id: Option<&str>,
    ) -> Result<(), Error> {
        for storage in tables.storages.values() {
            if Some(&storage.id) == exclude {
                continue;
            }
            if storage.name == name {
                return Err(Error::ObjectAlreadyExists {
                    type_name: ResourceType::Storage,
                    object_name: name.to_string(),
                });
            }
            if let Some(fs_id) = fs_id {
                if storage.fs_id == fs_id {
                    return Err(Error::ObjectAlreadyExists {
                        type_name: ResourceType::Storage,
                        object_name: fs_id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub async fn storage_create(
        &self,
        tenant: &str,
        storage: Storage,
    ) -> CreateResult<Storage> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        Self::storage_check_conflicts(
            tables,
            None,
            &storage.name,
            Some(&storage.fs_id),
        )?;
        tables.storages.insert(storage.id, storage.clone());
        Ok(storage)
    }

    pub async fn storage_lookup(
        &self,
        tenant: &str,
        id: &Uuid,
    ) -> LookupResult<Storage> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        tables
            .storages
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Storage, id))
    }

    pub async fn storage_lookup_by_fs_id(
        &self,
        tenant: &str,
        fs_id: &str,
    ) -> LookupResult<Storage> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        tables
            .storages
            .values()
            .find(|storage| storage.fs_id == fs_id)
            .cloned()
            .ok_or_else(|| {
                LookupType::ByCompositeId(format!("fs_id = {:?}", fs_id))
                    .into_not_found(ResourceType::Storage)
            })
    }

    pub async fn storages_list(&self, tenant: &str) -> ListResultVec<Storage> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        let mut storages: Vec<Storage> =
            tables.storages.values().cloned().collect();
        storages.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(storages)
    }

    pub async fn storage_update_name(
        &self,
        tenant: &str,
        id: &Uuid,
        name: &str,
    ) -> UpdateResult<Storage> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        if !tables.storages.contains_key(id) {
            return Err(Error::not_found_by_id(ResourceType::Storage, id));
        }
        Self::storage_check_conflicts(tables, Some(id), name, None)?;
        let storage = tables
            .storages
            .get_mut(id)
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Storage, id))?;
        storage.name = name.to_string();
        Ok(storage.clone())
    }

    /// Deletes a storage record.  Refused while any mount point still
    /// references it; those must be resolved first.
    pub async fn storage_delete(&self, tenant: &str, id: &Uuid) -> DeleteResult {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        if !tables.storages.contains_key(id) {
            return Err(Error::not_found_by_id(ResourceType::Storage, id));
        }
        if tables.mount_points.values().any(|mp| mp.storage_id == *id) {
            return Err(Error::invalid_request(
                "storage is mounted on one or more clusters and cannot be \
                 deleted",
            ));
        }
        tables.storages.remove(id);
        Ok(())
    }

    /*
     * Mount points
     */

    /// Inserts a mount point.  The check for an existing active row on the
    /// same (storage, cluster) pair and the insert happen under one lock
    /// section, so two concurrent mounts of the same pair cannot both
    /// succeed.
    pub async fn mount_point_create(
        &self,
        tenant: &str,
        mount_point: MountPoint,
    ) -> CreateResult<MountPoint> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        let conflict = tables.mount_points.values().find(|mp| {
            mp.storage_id == mount_point.storage_id
                && mp.cluster_name == mount_point.cluster_name
                && mp.status.is_active()
        });
        if let Some(existing) = conflict {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::MountPoint,
                object_name: format!(
                    "storage {} on cluster {}",
                    existing.storage_id, existing.cluster_name
                ),
            });
        }
        tables.mount_points.insert(mount_point.id, mount_point.clone());
        Ok(mount_point)
    }

    pub async fn mount_point_lookup(
        &self,
        tenant: &str,
        id: &Uuid,
    ) -> LookupResult<MountPoint> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        tables.mount_points.get(id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::MountPoint, id)
        })
    }

    pub async fn active_mount_point_for_pair(
        &self,
        tenant: &str,
        storage_id: &Uuid,
        cluster_name: &ClusterName,
    ) -> LookupResult<Option<MountPoint>> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        Ok(tables
            .mount_points
            .values()
            .find(|mp| {
                mp.storage_id == *storage_id
                    && mp.cluster_name == *cluster_name
                    && mp.status.is_active()
            })
            .cloned())
    }

    pub async fn mount_points_for_cluster(
        &self,
        tenant: &str,
        cluster_name: &ClusterName,
    ) -> ListResultVec<MountPoint> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        Ok(tables
            .mount_points
            .values()
            .filter(|mp| mp.cluster_name == *cluster_name)
            .cloned()
            .collect())
    }

    pub async fn mount_points_list(
        &self,
        tenant: &str,
    ) -> ListResultVec<MountPoint> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        Ok(tables.mount_points.values().cloned().collect())
    }

    pub async fn mount_point_set_status(
        &self,
        tenant: &str,
        id: &Uuid,
        status: MountPointStatus,
        error: Option<String>,
    ) -> UpdateResult<MountPoint> {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        let mount_point = tables.mount_points.get_mut(id).ok_or_else(|| {
            Error::not_found_by_id(ResourceType::MountPoint, id)
        })?;
        if !mount_point.status.can_transition_to(status) {
            return Err(Error::invariant_violation(&format!(
                "illegal status transition for mount point {}: {} -> {}",
                id, mount_point.status, status
            )));
        }
        mount_point.status = status;
        mount_point.error = error;
        Ok(mount_point.clone())
    }

    pub async fn mount_point_delete(
        &self,
        tenant: &str,
        id: &Uuid,
    ) -> DeleteResult {
        let mut data = self.data.lock().await;
        let tables = data.entry(tenant.to_string()).or_default();
        tables.mount_points.remove(id).map(|_| ()).ok_or_else(|| {
            Error::not_found_by_id(ResourceType::MountPoint, id)
        })
    }
}

impl Default for DataStore {
    fn default() -> DataStore {
        DataStore::new()
    }
}
