// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Storage registration and mount lifecycle

use crate::app::background::TaskId;
use crate::app::params::MountRequest;
use crate::app::params::StorageCreate;
use crate::app::params::StorageUpdate;
use crate::app::Orchestrator;
use crate::context::OpContext;
use crate::db::model::ClusterProvider;
use crate::db::model::MountPoint;
use crate::db::model::MountPointStatus;
use crate::db::model::Storage;
use crate::db::model::StorageSource;
use crate::external::ClusterStackInfo;
use crate::external::MountSpec;
use crate::external::ProviderCredentials;
use crate::external::UnmountSpec;
use chrono::Utc;
use slog::info;
use slog::o;
use slog::warn;
use std::sync::Arc;
use summit_common::ClusterName;
use summit_common::CreateResult;
use summit_common::DeleteResult;
use summit_common::Error;
use summit_common::LookupResult;
use summit_common::LookupType;
use summit_common::ResourceType;
use summit_common::UpdateResult;
use uuid::Uuid;

impl Orchestrator {
    /// Registers a storage, either importing an existing file system or
    /// creating a managed one.  Synchronous: there is no background work.
    pub async fn storage_create(
        &self,
        opctx: &OpContext,
        params: StorageCreate,
    ) -> CreateResult<Storage> {
        let credentials = self
            .cloud_credentials(opctx, &params.cloud_account_id, &params.region)
            .await?;

        // Fail on a conflict before asking the provider to create anything.
        self.datastore
            .storage_validate_unique(
                &opctx.tenant,
                &params.name,
                params.fs_id.as_deref(),
            )
            .await?;

        let fs_id = match params.source {
            StorageSource::Managed => {
                self.providers
                    .storage
                    .create_filesystem(&params.name, &credentials)
                    .await?
            }
            StorageSource::Imported => {
                let fs_id = params.fs_id.clone().ok_or_else(|| {
                    Error::invalid_request(
                        "imported storage requires the id of an existing \
                         file system",
                    )
                })?;
                if !self
                    .providers
                    .storage
                    .check_filesystem(&fs_id, &credentials)
                    .await?
                {
                    return Err(Error::provider_misconfigured(
                        "The file system is not tagged with the correct \
                         tags or it was not found.",
                    ));
                }
                fs_id
            }
        };

        let storage = self
            .datastore
            .storage_create(
                &opctx.tenant,
                Storage {
                    id: Uuid::new_v4(),
                    fs_id,
                    name: params.name.clone(),
                    region: params.region.clone(),
                    source: params.source,
                    cloud_account_id: params.cloud_account_id,
                    owner_email: opctx.caller_email.clone(),
                    time_created: Utc::now(),
                },
            )
            .await?;
        info!(opctx.log, "created storage record";
            "storage_id" => %storage.id, "fs_id" => &storage.fs_id);
        Ok(storage)
    }

    /// Deletes a storage record, and for managed storages the backing file
    /// system too.  Refused while mount points still reference it.
    pub async fn storage_delete(
        &self,
        opctx: &OpContext,
        id: &Uuid,
    ) -> DeleteResult {
        let storage = self.datastore.storage_lookup(&opctx.tenant, id).await?;
        if storage.owner_email != opctx.caller_email {
            return Err(Error::not_found_by_id(ResourceType::Storage, id));
        }

        let credentials = match storage.source {
            StorageSource::Managed => Some(
                self.cloud_credentials(
                    opctx,
                    &storage.cloud_account_id,
                    &storage.region,
                )
                .await?,
            ),
            StorageSource::Imported => None,
        };

        self.datastore.storage_delete(&opctx.tenant, id).await?;

        if let Some(credentials) = credentials {
            if let Err(error) = self
                .providers
                .storage
                .delete_filesystem(&storage.fs_id, &credentials)
                .await
            {
                warn!(opctx.log, "failed to delete backing file system";
                    "fs_id" => &storage.fs_id, "error" => %error);
            }
        }
        info!(opctx.log, "deleted storage record"; "storage_id" => %id);
        Ok(())
    }

    pub async fn storage_update(
        &self,
        opctx: &OpContext,
        id: &Uuid,
        params: StorageUpdate,
    ) -> UpdateResult<Storage> {
        self.datastore
            .storage_update_name(&opctx.tenant, id, &params.name)
            .await
    }

    /// Mounts a storage on a cluster
    ///
    /// Checks run in a fixed order so callers get the most specific error:
    /// storage, then cluster, then an active duplicate, then the deployed
    /// stack, then the path.  The `Mounting` row insert is the durability
    /// point; the actual mount runs in the background and commits `Mounted`
    /// or `Error`.
    pub async fn storage_mount(
        &self,
        opctx: &OpContext,
        params: MountRequest,
    ) -> CreateResult<MountPoint> {
        let storage = self
            .datastore
            .storage_lookup_by_fs_id(&opctx.tenant, &params.fs_id)
            .await?;
        let cluster_name = Self::cluster_name_for_lookup(&params.cluster_name)?;
        let cluster =
            self.datastore.cluster_lookup(&opctx.tenant, &cluster_name).await?;
        if cluster.provider != ClusterProvider::Cloud {
            return Err(Error::invalid_request(
                "storage can only be mounted on cloud clusters",
            ));
        }
        if let Some(existing) = self
            .datastore
            .active_mount_point_for_pair(
                &opctx.tenant,
                &storage.id,
                &cluster_name,
            )
            .await?
        {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::MountPoint,
                object_name: format!(
                    "storage {} on cluster {}",
                    existing.storage_id, existing.cluster_name
                ),
            });
        }

        let credentials = self
            .cloud_credentials(
                opctx,
                &storage.cloud_account_id,
                &storage.region,
            )
            .await?;
        let stack_info =
            self.cluster_stack_info(&cluster_name, &credentials).await?;
        if stack_info.public_subnet_ids.is_empty()
            && stack_info.private_subnet_ids.is_empty()
        {
            return Err(Error::invariant_violation(
                "cluster stack has no subnets to attach the file system to",
            ));
        }
        if !self
            .providers
            .storage
            .check_path(
                &params.path,
                &stack_info.head_node_instance_id,
                &credentials,
            )
            .await?
        {
            return Err(Error::invalid_request(
                "Either path to mount is not valid or it's in use by the \
                 cluster",
            ));
        }

        let mount_point = self
            .datastore
            .mount_point_create(
                &opctx.tenant,
                MountPoint {
                    id: Uuid::new_v4(),
                    storage_id: storage.id,
                    cluster_name: cluster_name.clone(),
                    client_id: cluster.client_id.clone(),
                    mount_point: params.path.clone(),
                    status: MountPointStatus::Mounting,
                    error: None,
                    time_created: Utc::now(),
                },
            )
            .await?;
        info!(opctx.log, "created mount point";
            "mount_point_id" => %mount_point.id,
            "cluster" => %cluster_name,
            "path" => &mount_point.mount_point);

        self.start_storage_mount(
            opctx,
            &storage,
            &mount_point,
            stack_info,
            credentials,
        );
        Ok(mount_point)
    }

    fn start_storage_mount(
        &self,
        opctx: &OpContext,
        storage: &Storage,
        mount_point: &MountPoint,
        stack_info: ClusterStackInfo,
        credentials: ProviderCredentials,
    ) -> TaskId {
        let log = opctx
            .log
            .new(o!("mount_point_id" => mount_point.id.to_string()));
        let datastore = self.datastore.clone();
        let gateway = Arc::clone(&self.providers.storage);
        let tenant = opctx.tenant.clone();
        let id = mount_point.id;
        let mut subnet_ids = stack_info.private_subnet_ids.clone();
        subnet_ids.extend(stack_info.public_subnet_ids.iter().cloned());
        let spec = MountSpec {
            fs_id: storage.fs_id.clone(),
            path: mount_point.mount_point.clone(),
            instance_id: stack_info.head_node_instance_id.clone(),
            vpc_id: stack_info.vpc_id.clone(),
            subnet_ids,
        };
        self.executor.spawn("storage-mount", async move {
            match gateway.mount(&spec, &credentials).await {
                Ok(()) => {
                    datastore
                        .mount_point_set_status(
                            &tenant,
                            &id,
                            MountPointStatus::Mounted,
                            None,
                        )
                        .await?;
                    info!(log, "storage mounted");
                    Ok(())
                }
                Err(error) => {
                    warn!(log, "storage mount failed"; "error" => %error);
                    datastore
                        .mount_point_set_status(
                            &tenant,
                            &id,
                            MountPointStatus::Error,
                            Some(error.to_string()),
                        )
                        .await?;
                    Err(error)
                }
            }
        })
    }

    /// Unmounts a storage from a cluster
    ///
    /// The transition to `Unmounting` is synchronous, so pollers see
    /// progress even if the stack introspection that follows fails.  The
    /// background task deletes the row on success and commits `Error` with a
    /// message on failure.
    pub async fn storage_unmount(
        &self,
        opctx: &OpContext,
        storage_id: &Uuid,
        cluster_name: &str,
    ) -> UpdateResult<MountPoint> {
        let cluster_name = Self::cluster_name_for_lookup(cluster_name)?;
        let storage =
            self.datastore.storage_lookup(&opctx.tenant, storage_id).await?;
        let mount_point = self
            .datastore
            .active_mount_point_for_pair(
                &opctx.tenant,
                storage_id,
                &cluster_name,
            )
            .await?
            .ok_or_else(|| {
                LookupType::ByCompositeId(format!(
                    "storage {} on cluster {}",
                    storage_id, cluster_name
                ))
                .into_not_found(ResourceType::MountPoint)
            })?;
        if mount_point.status == MountPointStatus::Mounting {
            return Err(Error::invalid_request(
                "storage is still being mounted",
            ));
        }
        if mount_point.status == MountPointStatus::Unmounting {
            return Err(Error::invalid_request(
                "storage is already being unmounted",
            ));
        }

        let mount_point = self
            .datastore
            .mount_point_set_status(
                &opctx.tenant,
                &mount_point.id,
                MountPointStatus::Unmounting,
                None,
            )
            .await?;

        let credentials = self
            .cloud_credentials(
                opctx,
                &storage.cloud_account_id,
                &storage.region,
            )
            .await?;
        let stack_info =
            self.cluster_stack_info(&cluster_name, &credentials).await?;

        self.start_storage_unmount(
            opctx,
            &storage,
            &mount_point,
            stack_info,
            credentials,
        );
        Ok(mount_point)
    }

    fn start_storage_unmount(
        &self,
        opctx: &OpContext,
        storage: &Storage,
        mount_point: &MountPoint,
        stack_info: ClusterStackInfo,
        credentials: ProviderCredentials,
    ) -> TaskId {
        let log = opctx
            .log
            .new(o!("mount_point_id" => mount_point.id.to_string()));
        let datastore = self.datastore.clone();
        let gateway = Arc::clone(&self.providers.storage);
        let tenant = opctx.tenant.clone();
        let id = mount_point.id;
        let spec = UnmountSpec {
            fs_id: storage.fs_id.clone(),
            path: mount_point.mount_point.clone(),
            instance_id: stack_info.head_node_instance_id.clone(),
        };
        self.executor.spawn("storage-unmount", async move {
            match gateway.unmount(&spec, &credentials).await {
                Ok(()) => {
                    datastore.mount_point_delete(&tenant, &id).await?;
                    info!(log, "storage unmounted");
                    Ok(())
                }
                Err(error) => {
                    warn!(log, "storage unmount failed"; "error" => %error);
                    datastore
                        .mount_point_set_status(
                            &tenant,
                            &id,
                            MountPointStatus::Error,
                            Some(format!(
                                "Was not possible to detach the storage. \
                                 Check if the mount point is busy and try \
                                 again: {}",
                                error
                            )),
                        )
                        .await?;
                    Err(error)
                }
            }
        })
    }

    /// Read-only probe: reports whether `path` is available for a new mount
    /// on the given cluster
    pub async fn mount_point_check(
        &self,
        opctx: &OpContext,
        cluster_name: &str,
        path: &str,
    ) -> LookupResult<bool> {
        let cluster_name = Self::cluster_name_for_lookup(cluster_name)?;
        let cluster =
            self.datastore.cluster_lookup(&opctx.tenant, &cluster_name).await?;
        let cloud_account_id = cluster.cloud_account_id.ok_or_else(|| {
            Error::invalid_request(
                "mount points are only supported on cloud clusters",
            )
        })?;
        let region = cluster
            .creation_parameters
            .get("region_name")
            .ok_or_else(|| {
                Error::invariant_violation(
                    "cloud cluster record has no region",
                )
            })?;
        let credentials =
            self.cloud_credentials(opctx, &cloud_account_id, region).await?;
        let stack_info =
            self.cluster_stack_info(&cluster_name, &credentials).await?;
        self.providers
            .storage
            .check_path(path, &stack_info.head_node_instance_id, &credentials)
            .await
    }

    /// Reads the deployed stack resources needed for mount operations.
    /// A cluster record whose stack cannot be read has diverged.
    async fn cluster_stack_info(
        &self,
        name: &ClusterName,
        credentials: &ProviderCredentials,
    ) -> LookupResult<ClusterStackInfo> {
        let resources = self
            .providers
            .infra
            .stack_resources(&name.stack_name(), credentials)
            .await
            .map_err(|error| {
                Error::invariant_violation(&format!(
                    "impossible to get the stack resources: {}",
                    error
                ))
            })?;
        let resources = resources.ok_or_else(|| {
            Error::invariant_violation(
                "impossible to get the stack resources: stack not found",
            )
        })?;
        ClusterStackInfo::from_resources(&resources)
    }
}
