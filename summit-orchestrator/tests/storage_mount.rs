// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end storage mount and unmount tests against fake providers

use slog::o;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use summit_common::Error;
use summit_orchestrator::app::params::CloudClusterConfig;
use summit_orchestrator::app::params::ClusterCreate;
use summit_orchestrator::app::params::DeletionBlocker;
use summit_orchestrator::app::params::MountRequest;
use summit_orchestrator::app::params::StorageCreate;
use summit_orchestrator::config::InstanceCatalog;
use summit_orchestrator::db::model::CloudAccount;
use summit_orchestrator::db::model::ClusterProvider;
use summit_orchestrator::db::model::MountPointStatus;
use summit_orchestrator::db::model::Storage;
use summit_orchestrator::db::model::StorageSource;
use summit_orchestrator::external::fakes::FakeProviderSet;
use summit_orchestrator::external::PartitionSpec;
use summit_orchestrator::OpContext;
use summit_orchestrator::Orchestrator;
use summit_orchestrator::OrchestratorConfig;
use uuid::Uuid;

fn setup() -> (Orchestrator, FakeProviderSet, OpContext) {
    let log = Logger::root(slog::Discard, o!());
    let opctx = OpContext::new(&log, "acme", "user@example.com");
    let mut regions = BTreeMap::new();
    regions.insert(
        "us-west-2".to_string(),
        BTreeSet::from(["c5.xlarge".to_string(), "t3.micro".to_string()]),
    );
    let config = OrchestratorConfig {
        instance_catalog: InstanceCatalog { regions },
        status_poll_interval_ms: 10,
    };
    let fakes = FakeProviderSet::new();
    let orchestrator = Orchestrator::new(log, config, fakes.providers());
    (orchestrator, fakes, opctx)
}

async fn seed_cloud_account(
    orchestrator: &Orchestrator,
    opctx: &OpContext,
) -> Uuid {
    let id = Uuid::new_v4();
    let mut attributes = BTreeMap::new();
    attributes.insert(
        "role_arn".to_string(),
        "arn:aws:iam::123456789012:role/summit".to_string(),
    );
    orchestrator
        .cloud_account_upsert(
            opctx,
            CloudAccount { id, name: "primary".to_string(), attributes },
        )
        .await
        .unwrap();
    id
}

/// Creates a cloud cluster, waits for it to become ready, and registers a
/// managed storage in the same account
async fn ready_cluster_and_storage(
    orchestrator: &Orchestrator,
    opctx: &OpContext,
    account_id: Uuid,
    cluster_name: &str,
) -> Storage {
    orchestrator
        .cluster_create(
            opctx,
            ClusterCreate {
                name: cluster_name.to_string(),
                description: "mount test cluster".to_string(),
                provider: ClusterProvider::Cloud,
                cloud: Some(CloudClusterConfig {
                    cloud_account_id: account_id,
                    region: "us-west-2".to_string(),
                    head_node_instance_type: "c5.xlarge".to_string(),
                    partitions: vec![PartitionSpec {
                        name: "general".to_string(),
                        node_type: "t3.micro".to_string(),
                        max_node_count: 4,
                        is_default: true,
                    }],
                }),
                secret: None,
            },
        )
        .await
        .unwrap();
    orchestrator.executor().wait_for_all().await;

    orchestrator
        .storage_create(
            opctx,
            StorageCreate {
                name: "nas".to_string(),
                region: "us-west-2".to_string(),
                source: StorageSource::Managed,
                fs_id: None,
                cloud_account_id: account_id,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_mount_to_mounted() {
    let (orchestrator, fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;

    let mount_point = orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "alpha".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(mount_point.status, MountPointStatus::Mounting);

    orchestrator.executor().wait_for_all().await;
    let mount_point = orchestrator
        .mount_point_lookup(&opctx, &mount_point.id)
        .await
        .unwrap();
    assert_eq!(mount_point.status, MountPointStatus::Mounted);
    assert!(mount_point.error.is_none());
    assert!(fakes.storage.is_mounted(&storage.fs_id));
}

#[tokio::test]
async fn test_duplicate_mount_rejected_while_active() {
    let (orchestrator, _fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;

    let request = MountRequest {
        fs_id: storage.fs_id.clone(),
        cluster_name: "alpha".to_string(),
        path: "/shared".to_string(),
    };
    orchestrator.storage_mount(&opctx, request.clone()).await.unwrap();

    // A second mount of the same pair is rejected while the first is still
    // in flight, and also after it completes.
    let error =
        orchestrator.storage_mount(&opctx, request.clone()).await.unwrap_err();
    assert!(matches!(error, Error::ObjectAlreadyExists { .. }));

    orchestrator.executor().wait_for_all().await;
    let error =
        orchestrator.storage_mount(&opctx, request).await.unwrap_err();
    assert!(matches!(error, Error::ObjectAlreadyExists { .. }));
}

#[tokio::test]
async fn test_mount_failure_is_recorded_not_thrown() {
    let (orchestrator, fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;
    fakes.storage.set_fail_mount(true);

    let mount_point = orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "alpha".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await
        .unwrap();

    orchestrator.executor().wait_for_all().await;
    let mount_point = orchestrator
        .mount_point_lookup(&opctx, &mount_point.id)
        .await
        .unwrap();
    assert_eq!(mount_point.status, MountPointStatus::Error);
    let message = mount_point.error.unwrap();
    assert!(message.contains("injected mount failure"));
    assert!(!fakes.storage.is_mounted(&storage.fs_id));
}

#[tokio::test]
async fn test_unavailable_path_rejected_synchronously() {
    let (orchestrator, fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;
    fakes.storage.set_path_unavailable("/data");

    let error = orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "alpha".to_string(),
                path: "/data".to_string(),
            },
        )
        .await
        .unwrap_err();
    match error {
        Error::InvalidRequest { message } => {
            assert_eq!(
                message,
                "Either path to mount is not valid or it's in use by the \
                 cluster"
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(orchestrator.mount_points_list(&opctx).await.unwrap().is_empty());

    assert!(!orchestrator
        .mount_point_check(&opctx, "alpha", "/data")
        .await
        .unwrap());
    assert!(orchestrator
        .mount_point_check(&opctx, "alpha", "/scratch")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unknown_storage_and_cluster() {
    let (orchestrator, _fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;

    let error = orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: "fs-missing".to_string(),
                cluster_name: "alpha".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        Error::ObjectNotFound { type_name: summit_common::ResourceType::Storage, .. }
    ));

    let error = orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "missing".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        Error::ObjectNotFound { type_name: summit_common::ResourceType::Cluster, .. }
    ));
}

#[tokio::test]
async fn test_unmount_deletes_row() {
    let (orchestrator, fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;

    orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "alpha".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await
        .unwrap();
    orchestrator.executor().wait_for_all().await;

    let mount_point = orchestrator
        .storage_unmount(&opctx, &storage.id, "alpha")
        .await
        .unwrap();
    assert_eq!(mount_point.status, MountPointStatus::Unmounting);

    orchestrator.executor().wait_for_all().await;
    assert!(orchestrator.mount_points_list(&opctx).await.unwrap().is_empty());
    assert!(!fakes.storage.is_mounted(&storage.fs_id));

    // With nothing mounted, the pair can no longer be unmounted.
    let error = orchestrator
        .storage_unmount(&opctx, &storage.id, "alpha")
        .await
        .unwrap_err();
    assert!(matches!(error, Error::ObjectNotFound { .. }));
}

#[tokio::test]
async fn test_unmount_failure_then_retry() {
    let (orchestrator, fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;

    orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "alpha".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await
        .unwrap();
    orchestrator.executor().wait_for_all().await;

    fakes.storage.set_fail_unmount(true);
    let mount_point = orchestrator
        .storage_unmount(&opctx, &storage.id, "alpha")
        .await
        .unwrap();
    orchestrator.executor().wait_for_all().await;

    let mount_point = orchestrator
        .mount_point_lookup(&opctx, &mount_point.id)
        .await
        .unwrap();
    assert_eq!(mount_point.status, MountPointStatus::Error);
    assert!(mount_point
        .error
        .unwrap()
        .starts_with("Was not possible to detach the storage."));

    // The error row is still the active attachment; unmount can be retried
    // from it.
    fakes.storage.set_fail_unmount(false);
    orchestrator
        .storage_unmount(&opctx, &storage.id, "alpha")
        .await
        .unwrap();
    orchestrator.executor().wait_for_all().await;
    assert!(orchestrator.mount_points_list(&opctx).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unmount_while_unmounting_rejected() {
    let (orchestrator, _fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;

    let mount_point = orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "alpha".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await
        .unwrap();
    orchestrator.executor().wait_for_all().await;

    // Put the row into Unmounting, as an in-flight unmount would.
    orchestrator
        .datastore()
        .mount_point_set_status(
            &opctx.tenant,
            &mount_point.id,
            MountPointStatus::Unmounting,
            None,
        )
        .await
        .unwrap();

    // A second unmount is an ordinary precondition failure, not a state
    // machine violation.
    let error = orchestrator
        .storage_unmount(&opctx, &storage.id, "alpha")
        .await
        .unwrap_err();
    match error {
        Error::InvalidRequest { message } => {
            assert_eq!(message, "storage is already being unmounted");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_storage_delete_refused_while_mounted() {
    let (orchestrator, _fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;

    orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "alpha".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await
        .unwrap();
    orchestrator.executor().wait_for_all().await;

    let error =
        orchestrator.storage_delete(&opctx, &storage.id).await.unwrap_err();
    assert!(matches!(error, Error::InvalidRequest { .. }));

    let readiness = orchestrator
        .cluster_available_for_deletion(&opctx, "alpha")
        .await
        .unwrap();
    assert!(!readiness.is_available);
    assert_eq!(readiness.reason, Some(DeletionBlocker::HasMountPoints));

    orchestrator.storage_unmount(&opctx, &storage.id, "alpha").await.unwrap();
    orchestrator.executor().wait_for_all().await;
    orchestrator.storage_delete(&opctx, &storage.id).await.unwrap();
}

#[tokio::test]
async fn test_cluster_teardown_unmounts_storage() {
    let (orchestrator, fakes, opctx) = setup();
    let account_id = seed_cloud_account(&orchestrator, &opctx).await;
    let storage =
        ready_cluster_and_storage(&orchestrator, &opctx, account_id, "alpha")
            .await;

    orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "alpha".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await
        .unwrap();
    orchestrator.executor().wait_for_all().await;

    orchestrator.cluster_delete(&opctx, "alpha").await.unwrap();
    orchestrator.executor().wait_for_all().await;

    assert!(orchestrator.cluster_lookup(&opctx, "alpha").await.is_err());
    assert!(orchestrator.mount_points_list(&opctx).await.unwrap().is_empty());
    assert!(!fakes.storage.is_mounted(&storage.fs_id));
    assert!(!fakes.infra.has_stack("alpha"));
    // The storage record itself is untouched by cluster teardown.
    assert!(orchestrator.storage_lookup(&opctx, &storage.id).await.is_ok());
}
