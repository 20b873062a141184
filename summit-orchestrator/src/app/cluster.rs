// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster provisioning and teardown

use crate::app::background::TaskId;
use crate::app::compensation::CompensationStep;
use crate::app::compensation::Compensations;
use crate::app::params::CloudClusterConfig;
use crate::app::params::ClusterCreate;
use crate::app::params::ClusterUpdate;
use crate::app::params::DeletionBlocker;
use crate::app::params::DeletionReadiness;
use crate::app::Orchestrator;
use crate::context::OpContext;
use crate::db::model::Cluster;
use crate::db::model::ClusterProvider;
use crate::db::model::ClusterStatus;
use crate::db::model::MountPointStatus;
use crate::external::ClusterStackInfo;
use crate::external::IdentityClientCreate;
use crate::external::ProviderCredentials;
use crate::external::StackApply;
use crate::external::UnmountSpec;
use crate::external::STACK_STATUSES_SAFE_FOR_DELETION;
use crate::external::STACK_STATUS_CREATE_COMPLETE;
use crate::external::STACK_STATUS_CREATE_IN_PROGRESS;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use slog::info;
use slog::o;
use slog::warn;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use summit_common::ClusterName;
use summit_common::CreateResult;
use summit_common::DeleteResult;
use summit_common::Error;
use summit_common::InternalContext;
use summit_common::LookupResult;
use summit_common::UpdateResult;

/// Generates a URL-safe random secret
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

impl Orchestrator {
    /// Creates a cluster
    ///
    /// All validation happens before any side effect, so a rejected request
    /// leaves no trace.  The record insert is the durability point: once it
    /// succeeds, any later failure leaves the record behind for inspection.
    /// For cloud clusters the stack is applied synchronously and a background
    /// task polls it to readiness; the returned cluster is still `Preparing`.
    pub async fn cluster_create(
        &self,
        opctx: &OpContext,
        params: ClusterCreate,
    ) -> CreateResult<Cluster> {
        let name =
            ClusterName::try_from(params.name.as_str()).map_err(|_| {
                Error::invalid_request(
                    "cluster name must contain only alphanumeric characters \
                     and hyphens, with no spaces",
                )
            })?;

        let cloud = match params.provider {
            ClusterProvider::Cloud => {
                let cloud = params.cloud.as_ref().ok_or_else(|| {
                    Error::invalid_request(
                        "cloud clusters require cloud configuration \
                         parameters",
                    )
                })?;
                self.validate_cloud_config(cloud)?;
                Some(cloud)
            }
            ClusterProvider::OnPrem => None,
        };

        let client_id = name.client_id(&opctx.tenant);
        let client_secret =
            params.secret.clone().unwrap_or_else(generate_token);
        let portal_token = generate_token();

        // The client secret is handed to the identity provider and the
        // stack; it is never stored.
        let mut creation_parameters = BTreeMap::new();
        creation_parameters
            .insert("portal_token".to_string(), portal_token.clone());
        if let Some(cloud) = cloud {
            creation_parameters
                .insert("region_name".to_string(), cloud.region.clone());
            creation_parameters.insert(
                "head_node_instance_type".to_string(),
                cloud.head_node_instance_type.clone(),
            );
        }

        let status = match params.provider {
            ClusterProvider::Cloud => ClusterStatus::Preparing,
            ClusterProvider::OnPrem => ClusterStatus::Ready,
        };

        let cluster = self
            .datastore
            .cluster_create(
                &opctx.tenant,
                Cluster {
                    name: name.clone(),
                    description: params.description.clone(),
                    provider: params.provider,
                    client_id: client_id.clone(),
                    cloud_account_id: cloud.map(|c| c.cloud_account_id),
                    creation_parameters,
                    status,
                    owner_email: opctx.caller_email.clone(),
                    time_created: Utc::now(),
                },
            )
            .await?;
        info!(opctx.log, "created cluster record";
            "cluster" => %name, "status" => %cluster.status);

        let mut compensations = Compensations::new();
        let client_uuid = match self
            .providers
            .identity
            .create_client(&IdentityClientCreate {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            })
            .await
        {
            Ok(uuid) => uuid,
            Err(error) => {
                // The record exists but its client does not.  Manual
                // remediation, not rollback: the record is the durable
                // evidence of what was attempted.
                return Err(Error::invariant_violation(&format!(
                    "cluster record exists but the identity client could \
                     not be registered: {}",
                    error
                )));
            }
        };
        compensations
            .record(CompensationStep::IdentityClient { client_uuid });

        if let Some(cloud) = cloud {
            let credentials = match self
                .cloud_credentials(opctx, &cloud.cloud_account_id, &cloud.region)
                .await
            {
                Ok(credentials) => credentials,
                Err(error) => {
                    compensations.unwind(&opctx.log, &self.providers).await;
                    return Err(error);
                }
            };

            let stack = StackApply {
                stack_name: name.stack_name(),
                cluster_name: name.to_string(),
                client_id,
                client_secret,
                portal_token,
                head_node_instance_type: cloud
                    .head_node_instance_type
                    .clone(),
                partitions: cloud.partitions.clone(),
            };
            if let Err(error) =
                self.providers.infra.apply(&stack, &credentials).await
            {
                compensations.unwind(&opctx.log, &self.providers).await;
                return Err(
                    error.internal_context("cluster could not be deployed")
                );
            }
            info!(opctx.log, "applied cluster stack";
                "cluster" => %name, "stack" => &stack.stack_name);

            self.start_cluster_status_monitor(opctx, &name, &credentials);
        }

        Ok(cluster)
    }

    fn validate_cloud_config(
        &self,
        cloud: &CloudClusterConfig,
    ) -> Result<(), Error> {
        if cloud.partitions.is_empty() {
            return Err(Error::invalid_request(
                "cloud clusters require at least one partition",
            ));
        }
        let mut seen = BTreeSet::new();
        for partition in &cloud.partitions {
            if !seen.insert(partition.name.as_str()) {
                return Err(Error::invalid_request(
                    "Multiple partitions with the same name are not \
                     allowed. Please review your configuration and ensure \
                     that each partition has a unique name.",
                ));
            }
        }
        let catalog = &self.config.instance_catalog;
        if !catalog.allows(&cloud.region, &cloud.head_node_instance_type) {
            return Err(Error::InvalidRequest {
                message: format!(
                    "Head node instance type {} for region {} is not valid",
                    cloud.head_node_instance_type, cloud.region
                ),
            });
        }
        for partition in &cloud.partitions {
            if !catalog.allows(&cloud.region, &partition.node_type) {
                return Err(Error::InvalidRequest {
                    message: format!(
                        "Compute node instance type {} for region {} is \
                         not valid",
                        partition.node_type, cloud.region
                    ),
                });
            }
        }
        Ok(())
    }

    /// Polls the applied stack until it reports `CREATE_COMPLETE`, then
    /// commits `Ready`.  Any other terminal status leaves the cluster in
    /// `Preparing` for an operator to inspect.
    fn start_cluster_status_monitor(
        &self,
        opctx: &OpContext,
        name: &ClusterName,
        credentials: &ProviderCredentials,
    ) -> TaskId {
        let log = opctx.log.new(o!("cluster" => name.to_string()));
        let datastore = self.datastore.clone();
        let infra = Arc::clone(&self.providers.infra);
        let tenant = opctx.tenant.clone();
        let name = name.clone();
        let stack_name = name.stack_name();
        let credentials = credentials.clone();
        let poll_interval = self.config.status_poll_interval();
        self.executor.spawn("cluster-status-monitor", async move {
            loop {
                let status =
                    infra.stack_status(&stack_name, &credentials).await?;
                match status.as_deref() {
                    Some(STACK_STATUS_CREATE_COMPLETE) => {
                        datastore
                            .cluster_set_status(
                                &tenant,
                                &name,
                                ClusterStatus::Ready,
                            )
                            .await?;
                        info!(log, "cluster is ready");
                        return Ok(());
                    }
                    Some(STACK_STATUS_CREATE_IN_PROGRESS) => {
                        tokio::time::sleep(poll_interval).await;
                    }
                    other => {
                        return Err(Error::invariant_violation(&format!(
                            "cluster stack reached unexpected status {:?}",
                            other
                        )));
                    }
                }
            }
        })
    }

    /// Deletes a cluster
    ///
    /// On-prem clusters are deleted synchronously.  For cloud clusters the
    /// status transition to `Deleting` is the durability point; stack
    /// teardown then runs in the background and deletes the record when it
    /// finishes.  If the stack is already gone the record is deleted
    /// synchronously.
    pub async fn cluster_delete(
        &self,
        opctx: &OpContext,
        name: &str,
    ) -> DeleteResult {
        let name = Self::cluster_name_for_lookup(name)?;
        let cluster =
            self.datastore.cluster_lookup(&opctx.tenant, &name).await?;

        if cluster.provider == ClusterProvider::OnPrem {
            self.identity_client_delete(&cluster.client_id).await?;
            self.datastore.cluster_delete(&opctx.tenant, &name).await?;
            info!(opctx.log, "deleted cluster"; "cluster" => %name);
            return Ok(());
        }

        if cluster.status == ClusterStatus::Deleting {
            return Err(Error::invalid_request(
                "cluster is already being deleted",
            ));
        }

        let region = cluster
            .creation_parameters
            .get("region_name")
            .ok_or_else(|| {
                Error::invariant_violation(
                    "cloud cluster record has no region",
                )
            })?;
        let cloud_account_id = cluster.cloud_account_id.ok_or_else(|| {
            Error::invariant_violation(
                "cloud cluster record has no cloud account",
            )
        })?;
        let credentials =
            self.cloud_credentials(opctx, &cloud_account_id, region).await?;

        self.datastore
            .cluster_set_status(&opctx.tenant, &name, ClusterStatus::Deleting)
            .await?;
        self.identity_client_delete(&cluster.client_id).await?;

        let stack_name = name.stack_name();
        let resources = self
            .providers
            .infra
            .stack_resources(&stack_name, &credentials)
            .await?;
        let Some(resources) = resources else {
            // Nothing deployed; nothing to tear down.
            self.datastore.cluster_delete(&opctx.tenant, &name).await?;
            info!(opctx.log, "deleted cluster with no deployed stack";
                "cluster" => %name);
            return Ok(());
        };
        let stack_info = ClusterStackInfo::from_resources(&resources)?;

        self.start_cluster_teardown(opctx, &cluster, stack_info, credentials);
        Ok(())
    }

    /// Resolves, verifies, and deletes the identity client backing a
    /// cluster.  Any divergence between the record and the identity provider
    /// is an invariant violation and stops the deletion.
    async fn identity_client_delete(&self, client_id: &str) -> DeleteResult {
        let client = self
            .providers
            .identity
            .get_client(client_id)
            .await
            .internal_context("looking up identity client")?;
        let client = client.ok_or_else(|| {
            Error::invariant_violation(
                "cluster record exists but the identity client does not",
            )
        })?;
        if let Err(error) =
            self.providers.identity.get_service_account(&client.uuid).await
        {
            return Err(Error::invariant_violation(&format!(
                "identity client is missing its service account: {}",
                error
            )));
        }
        if let Err(error) =
            self.providers.identity.delete_client(&client.uuid).await
        {
            return Err(Error::invariant_violation(&format!(
                "identity client could not be deleted: {}",
                error
            )));
        }
        Ok(())
    }

    fn start_cluster_teardown(
        &self,
        opctx: &OpContext,
        cluster: &Cluster,
        stack_info: ClusterStackInfo,
        credentials: ProviderCredentials,
    ) -> TaskId {
        let log = opctx.log.new(o!("cluster" => cluster.name.to_string()));
        let datastore = self.datastore.clone();
        let infra = Arc::clone(&self.providers.infra);
        let storage_gateway = Arc::clone(&self.providers.storage);
        let dns = Arc::clone(&self.providers.dns);
        let tenant = opctx.tenant.clone();
        let name = cluster.name.clone();
        let client_id = cluster.client_id.clone();
        let stack_name = name.stack_name();
        self.executor.spawn("cluster-teardown", async move {
            let mount_points =
                datastore.mount_points_for_cluster(&tenant, &name).await?;
            for mount_point in mount_points {
                let storage = datastore
                    .storage_lookup(&tenant, &mount_point.storage_id)
                    .await?;
                let spec = UnmountSpec {
                    fs_id: storage.fs_id.clone(),
                    path: mount_point.mount_point.clone(),
                    instance_id: stack_info.head_node_instance_id.clone(),
                };
                match storage_gateway.unmount(&spec, &credentials).await {
                    Ok(()) => {
                        datastore
                            .mount_point_delete(&tenant, &mount_point.id)
                            .await?;
                    }
                    Err(error) => {
                        // The stack is going away regardless; leave the row
                        // in error for the operator.
                        warn!(log,
                            "failed to unmount storage during teardown";
                            "mount_point" => &mount_point.mount_point,
                            "error" => %error);
                        datastore
                            .mount_point_set_status(
                                &tenant,
                                &mount_point.id,
                                MountPointStatus::Error,
                                Some(error.to_string()),
                            )
                            .await?;
                    }
                }
            }

            infra.destroy(&stack_name, &credentials).await?;
            if let Err(error) = dns.release_record(&client_id).await {
                warn!(log, "failed to release dns record";
                    "client_id" => &client_id, "error" => %error);
            }
            datastore.cluster_delete(&tenant, &name).await?;
            info!(log, "cluster teardown complete");
            Ok(())
        })
    }

    pub async fn cluster_update(
        &self,
        opctx: &OpContext,
        name: &str,
        params: ClusterUpdate,
    ) -> UpdateResult<Cluster> {
        let name = Self::cluster_name_for_lookup(name)?;
        self.datastore
            .cluster_update_description(
                &opctx.tenant,
                &name,
                &params.description,
            )
            .await
    }

    /// Reports whether a cluster could be deleted right now, without
    /// changing anything
    pub async fn cluster_available_for_deletion(
        &self,
        opctx: &OpContext,
        name: &str,
    ) -> LookupResult<DeletionReadiness> {
        let name = Self::cluster_name_for_lookup(name)?;
        let cluster =
            self.datastore.cluster_lookup(&opctx.tenant, &name).await?;

        if cluster.provider == ClusterProvider::OnPrem {
            return Ok(DeletionReadiness { is_available: true, reason: None });
        }

        let mount_points = self
            .datastore
            .mount_points_for_cluster(&opctx.tenant, &name)
            .await?;
        if !mount_points.is_empty() {
            return Ok(DeletionReadiness {
                is_available: false,
                reason: Some(DeletionBlocker::HasMountPoints),
            });
        }

        let region = cluster
            .creation_parameters
            .get("region_name")
            .ok_or_else(|| {
                Error::invariant_violation(
                    "cloud cluster record has no region",
                )
            })?;
        let cloud_account_id = cluster.cloud_account_id.ok_or_else(|| {
            Error::invariant_violation(
                "cloud cluster record has no cloud account",
            )
        })?;
        let credentials =
            self.cloud_credentials(opctx, &cloud_account_id, region).await?;
        let status = self
            .providers
            .infra
            .stack_status(&name.stack_name(), &credentials)
            .await?;
        match status {
            None => Ok(DeletionReadiness { is_available: true, reason: None }),
            Some(status)
                if STACK_STATUSES_SAFE_FOR_DELETION
                    .contains(&status.as_str()) =>
            {
                Ok(DeletionReadiness { is_available: true, reason: None })
            }
            Some(_) => Ok(DeletionReadiness {
                is_available: false,
                reason: Some(DeletionBlocker::UnknownStackState),
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::app::params::ClusterCreate;
    use crate::app::params::CloudClusterConfig;
    use crate::app::test_helpers::seed_cloud_account;
    use crate::app::test_helpers::test_setup;
    use crate::db::model::ClusterProvider;
    use crate::db::model::ClusterStatus;
    use crate::external::PartitionSpec;
    use summit_common::Error;
    use uuid::Uuid;

    fn partition(name: &str) -> PartitionSpec {
        PartitionSpec {
            name: name.to_string(),
            node_type: "t3.micro".to_string(),
            max_node_count: 4,
            is_default: name == "general",
        }
    }

    fn cloud_params(name: &str, cloud_account_id: Uuid) -> ClusterCreate {
        ClusterCreate {
            name: name.to_string(),
            description: "test cluster".to_string(),
            provider: ClusterProvider::Cloud,
            cloud: Some(CloudClusterConfig {
                cloud_account_id,
                region: "us-west-2".to_string(),
                head_node_instance_type: "c5.xlarge".to_string(),
                partitions: vec![partition("general")],
            }),
            secret: None,
        }
    }

    #[tokio::test]
    async fn test_invalid_name_leaves_no_trace() {
        let (orchestrator, fakes, opctx) = test_setup();
        let account_id = seed_cloud_account(&orchestrator, &opctx).await;

        for _ in 0..2 {
            let error = orchestrator
                .cluster_create(
                    &opctx,
                    cloud_params("has space", account_id),
                )
                .await
                .unwrap_err();
            assert!(matches!(error, Error::InvalidRequest { .. }));
        }
        assert!(orchestrator
            .clusters_list(&opctx)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(fakes.identity.client_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_partition_names_rejected() {
        let (orchestrator, fakes, opctx) = test_setup();
        let account_id = seed_cloud_account(&orchestrator, &opctx).await;

        let mut params = cloud_params("alpha", account_id);
        params.cloud.as_mut().unwrap().partitions =
            vec![partition("general"), partition("general")];
        let error =
            orchestrator.cluster_create(&opctx, params).await.unwrap_err();
        match error {
            Error::InvalidRequest { message } => {
                assert!(message.contains("Multiple partitions"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fakes.identity.client_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_instance_type_rejected() {
        let (orchestrator, _fakes, opctx) = test_setup();
        let account_id = seed_cloud_account(&orchestrator, &opctx).await;

        let mut params = cloud_params("alpha", account_id);
        params.cloud.as_mut().unwrap().head_node_instance_type =
            "m7i.gigantic".to_string();
        let error =
            orchestrator.cluster_create(&opctx, params).await.unwrap_err();
        match error {
            Error::InvalidRequest { message } => {
                assert_eq!(
                    message,
                    "Head node instance type m7i.gigantic for region \
                     us-west-2 is not valid"
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_apply_failure_compensates_identity_client() {
        let (orchestrator, fakes, opctx) = test_setup();
        let account_id = seed_cloud_account(&orchestrator, &opctx).await;
        fakes.infra.set_fail_apply(true);

        let error = orchestrator
            .cluster_create(&opctx, cloud_params("alpha", account_id))
            .await
            .unwrap_err();
        match error {
            Error::ProviderError { internal_message, .. } => {
                assert!(internal_message
                    .starts_with("cluster could not be deployed"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // The client was deleted exactly once and the record remains in
        // Preparing for inspection.
        assert_eq!(fakes.identity.delete_calls().len(), 1);
        assert_eq!(fakes.identity.client_count(), 0);
        let cluster =
            orchestrator.cluster_lookup(&opctx, "alpha").await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Preparing);
    }

    #[tokio::test]
    async fn test_on_prem_cluster_is_ready_immediately() {
        let (orchestrator, fakes, opctx) = test_setup();
        let params = ClusterCreate {
            name: "ops".to_string(),
            description: "on-prem".to_string(),
            provider: ClusterProvider::OnPrem,
            cloud: None,
            secret: None,
        };
        let cluster =
            orchestrator.cluster_create(&opctx, params).await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Ready);
        assert!(fakes.identity.has_client("ops-acme"));

        orchestrator.cluster_delete(&opctx, "ops").await.unwrap();
        assert!(orchestrator.cluster_lookup(&opctx, "ops").await.is_err());
        assert_eq!(fakes.identity.client_count(), 0);
    }

    #[tokio::test]
    async fn test_secret_is_never_stored() {
        let (orchestrator, _fakes, opctx) = test_setup();
        let account_id = seed_cloud_account(&orchestrator, &opctx).await;
        let mut params = cloud_params("alpha", account_id);
        params.secret = Some("super-secret".to_string());

        let cluster =
            orchestrator.cluster_create(&opctx, params).await.unwrap();
        assert!(!cluster
            .creation_parameters
            .values()
            .any(|v| v == "super-secret"));
        assert!(cluster.creation_parameters.contains_key("portal_token"));
    }
}
