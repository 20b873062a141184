// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Developer harness: runs one cluster-and-storage lifecycle against the
//! fake providers with terminal logging
//!
//! Useful for watching the orchestrator's log output and background task
//! behavior without any real provider credentials.

use slog::crit;
use slog::info;
use slog::o;
use slog::Drain;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use summit_common::Error;
use summit_orchestrator::app::params::CloudClusterConfig;
use summit_orchestrator::app::params::ClusterCreate;
use summit_orchestrator::app::params::MountRequest;
use summit_orchestrator::app::params::StorageCreate;
use summit_orchestrator::config::InstanceCatalog;
use summit_orchestrator::db::model::CloudAccount;
use summit_orchestrator::db::model::ClusterProvider;
use summit_orchestrator::db::model::StorageSource;
use summit_orchestrator::external::fakes::FakeProviderSet;
use summit_orchestrator::external::PartitionSpec;
use summit_orchestrator::OpContext;
use summit_orchestrator::Orchestrator;
use summit_orchestrator::OrchestratorConfig;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let log = Logger::root(drain, o!("name" => "summit-dev"));

    if let Err(error) = run(&log).await {
        crit!(log, "lifecycle failed"; "error" => %error);
        std::process::exit(1);
    }
}

async fn run(log: &Logger) -> Result<(), Error> {
    let mut regions = BTreeMap::new();
    regions.insert(
        "us-west-2".to_string(),
        BTreeSet::from(["c5.xlarge".to_string(), "t3.micro".to_string()]),
    );
    let config = OrchestratorConfig {
        instance_catalog: InstanceCatalog { regions },
        status_poll_interval_ms: 100,
    };

    let fakes = FakeProviderSet::new();
    let orchestrator =
        Orchestrator::new(log.clone(), config, fakes.providers());
    let opctx = OpContext::new(orchestrator.log(), "dev", "dev@example.com");

    let account_id = Uuid::new_v4();
    let mut attributes = BTreeMap::new();
    attributes.insert(
        "role_arn".to_string(),
        "arn:aws:iam::123456789012:role/summit-dev".to_string(),
    );
    orchestrator
        .cloud_account_upsert(
            &opctx,
            CloudAccount {
                id: account_id,
                name: "dev".to_string(),
                attributes,
            },
        )
        .await?;

    let cluster = orchestrator
        .cluster_create(
            &opctx,
            ClusterCreate {
                name: "dev-alpha".to_string(),
                description: "dev harness cluster".to_string(),
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
        .await?;
    info!(log, "created cluster"; "cluster" => %cluster.name,
        "status" => %cluster.status);
    orchestrator.executor().wait_for_all().await;

    let storage = orchestrator
        .storage_create(
            &opctx,
            StorageCreate {
                name: "dev-nas".to_string(),
                region: "us-west-2".to_string(),
                source: StorageSource::Managed,
                fs_id: None,
                cloud_account_id: account_id,
            },
        )
        .await?;
    info!(log, "created storage"; "fs_id" => &storage.fs_id);

    let mount_point = orchestrator
        .storage_mount(
            &opctx,
            MountRequest {
                fs_id: storage.fs_id.clone(),
                cluster_name: "dev-alpha".to_string(),
                path: "/shared".to_string(),
            },
        )
        .await?;
    orchestrator.executor().wait_for_all().await;
    let mount_point =
        orchestrator.mount_point_lookup(&opctx, &mount_point.id).await?;
    info!(log, "mounted storage"; "status" => %mount_point.status);

    orchestrator.storage_unmount(&opctx, &storage.id, "dev-alpha").await?;
    orchestrator.executor().wait_for_all().await;
    orchestrator.storage_delete(&opctx, &storage.id).await?;
    orchestrator.cluster_delete(&opctx, "dev-alpha").await?;
    orchestrator.executor().wait_for_all().await;

    info!(log, "lifecycle complete";
        "tasks_run" => orchestrator.executor().tasks().len());
    Ok(())
}
