// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Orchestrator-level functionality

use crate::app::background::Executor;
use crate::config::OrchestratorConfig;
use crate::context::OpContext;
use crate::db::model::CloudAccount;
use crate::db::model::Cluster;
use crate::db::model::MountPoint;
use crate::db::model::Storage;
use crate::db::DataStore;
use crate::external::ProviderCredentials;
use crate::external::Providers;
use slog::o;
use slog::Logger;
use summit_common::ClusterName;
use summit_common::CreateResult;
use summit_common::Error;
use summit_common::ListResultVec;
use summit_common::LookupResult;
use summit_common::ResourceType;
use uuid::Uuid;

pub mod background;
pub mod compensation;
pub mod params;

mod cluster;
mod storage;

/// Manages the lifecycle of clusters and storage for all tenants
///
/// Mutating operations live in the `cluster` and `storage` submodules; this
/// module holds construction, the read-only status query surface, and the
/// helpers shared by both.
pub struct Orchestrator {
    log: Logger,
    config: OrchestratorConfig,
    datastore: DataStore,
    providers: Providers,
    executor: Executor,
}

impl Orchestrator {
    pub fn new(
        log: Logger,
        config: OrchestratorConfig,
        providers: Providers,
    ) -> Orchestrator {
        let executor = Executor::new(log.new(o!("component" => "executor")));
        Orchestrator {
            log: log.new(o!("component" => "orchestrator")),
            config,
            datastore: DataStore::new(),
            providers,
            executor,
        }
    }

    pub fn datastore(&self) -> &DataStore {
        &self.datastore
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub async fn cloud_account_upsert(
        &self,
        opctx: &OpContext,
        account: CloudAccount,
    ) -> CreateResult<CloudAccount> {
        self.datastore.cloud_account_upsert(&opctx.tenant, account).await
    }

    /*
     * Status query surface.  These never block on background task
     * completion; they report whatever status is currently persisted.
     */

    pub async fn cluster_lookup(
        &self,
        opctx: &OpContext,
        name: &str,
    ) -> LookupResult<Cluster> {
        let name = Self::cluster_name_for_lookup(name)?;
        self.datastore.cluster_lookup(&opctx.tenant, &name).await
    }

    pub async fn clusters_list(
        &self,
        opctx: &OpContext,
    ) -> ListResultVec<Cluster> {
        self.datastore.clusters_list(&opctx.tenant).await
    }

    pub async fn storage_lookup(
        &self,
        opctx: &OpContext,
        id: &Uuid,
    ) -> LookupResult<Storage> {
        self.datastore.storage_lookup(&opctx.tenant, id).await
    }

    pub async fn storages_list(
        &self,
        opctx: &OpContext,
    ) -> ListResultVec<Storage> {
        self.datastore.storages_list(&opctx.tenant).await
    }

    pub async fn mount_points_list(
        &self,
        opctx: &OpContext,
    ) -> ListResultVec<MountPoint> {
        self.datastore.mount_points_list(&opctx.tenant).await
    }

    pub async fn mount_point_lookup(
        &self,
        opctx: &OpContext,
        id: &Uuid,
    ) -> LookupResult<MountPoint> {
        self.datastore.mount_point_lookup(&opctx.tenant, id).await
    }

    /*
     * Shared helpers
     */

    /// Parses a caller-supplied name for a lookup.  A syntactically invalid
    /// name can never name a cluster, so it reports not-found rather than a
    /// validation error.
    fn cluster_name_for_lookup(name: &str) -> LookupResult<ClusterName> {
        ClusterName::try_from(name)
            .map_err(|_| Error::not_found_by_name(ResourceType::Cluster, name))
    }

    /// Resolves per-call provider credentials from a tenant's cloud account
    pub(crate) async fn cloud_credentials(
        &self,
        opctx: &OpContext,
        cloud_account_id: &Uuid,
        region: &str,
    ) -> LookupResult<ProviderCredentials> {
        let account = self
            .datastore
            .cloud_account_lookup(&opctx.tenant, cloud_account_id)
            .await
            .map_err(|_| {
                Error::invalid_request("Cloud account not found with ID provided.")
            })?;
        let role_arn = account.attributes.get("role_arn").ok_or_else(|| {
            Error::provider_misconfigured(
                "cloud account has no role to assume",
            )
        })?;
        Ok(ProviderCredentials {
            role_arn: role_arn.clone(),
            region: region.to_string(),
        })
    }
}
