// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Gateways to the external providers the orchestrator drives
//!
//! Each gateway is stateless from the orchestrator's point of view: every
//! call carries the tenant-scoped [`ProviderCredentials`] it needs, resolved
//! per call from the tenant's cloud account.  The traits are the seams the
//! fakes in [`fakes`] plug into; real implementations live outside this
//! crate.

pub mod fakes;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use summit_common::CreateResult;
use summit_common::DeleteResult;
use summit_common::Error;
use summit_common::LookupResult;

pub const STACK_STATUS_CREATE_COMPLETE: &str = "CREATE_COMPLETE";
pub const STACK_STATUS_CREATE_IN_PROGRESS: &str = "CREATE_IN_PROGRESS";

/// Stack statuses from which a teardown can be started without losing
/// information about an in-flight change
pub const STACK_STATUSES_SAFE_FOR_DELETION: &[&str] = &[
    "CREATE_COMPLETE",
    "CREATE_FAILED",
    "CREATE_IN_PROGRESS",
    "ROLLBACK_COMPLETE",
    "UPDATE_COMPLETE",
    "UPDATE_ROLLBACK_COMPLETE",
    "DELETE_COMPLETE",
];

/// Tenant-scoped credentials resolved for a single provider call
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderCredentials {
    pub role_arn: String,
    pub region: String,
}

pub struct IdentityClientCreate {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IdentityClient {
    /// backend-assigned identifier, distinct from the client id
    pub uuid: String,
    pub client_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceAccount {
    pub uuid: String,
    pub username: String,
}

/// One compute partition of a cluster stack
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PartitionSpec {
    pub name: String,
    pub node_type: String,
    pub max_node_count: u32,
    pub is_default: bool,
}

/// Everything the infrastructure provider needs to apply a cluster stack
#[derive(Clone, Debug)]
pub struct StackApply {
    pub stack_name: String,
    pub cluster_name: String,
    pub client_id: String,
    pub client_secret: String,
    pub portal_token: String,
    pub head_node_instance_type: String,
    pub partitions: Vec<PartitionSpec>,
}

/// One deployed resource of a cluster stack
#[derive(Clone, Debug, PartialEq)]
pub struct StackResource {
    pub logical_id: String,
    pub resource_type: String,
    pub physical_id: String,
}

/// The stack resources mount and unmount operations need: the head node to
/// run commands on and the network to attach the file system to
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterStackInfo {
    pub head_node_instance_id: String,
    pub vpc_id: String,
    pub public_subnet_ids: Vec<String>,
    pub private_subnet_ids: Vec<String>,
}

impl ClusterStackInfo {
    /// Picks the head node, VPC, and subnets out of a stack's deployed
    /// resources.  A stack missing its head node or VPC has diverged from
    /// what the orchestrator deployed.
    pub fn from_resources(
        resources: &[StackResource],
    ) -> Result<ClusterStackInfo, Error> {
        let head_node_instance_id = resources
            .iter()
            .find(|r| r.logical_id == "HeadNodeInstance")
            .map(|r| r.physical_id.clone())
            .ok_or_else(|| {
                Error::invariant_violation(
                    "cluster stack has no head node instance",
                )
            })?;
        let vpc_id = resources
            .iter()
            .find(|r| r.resource_type == "AWS::EC2::VPC")
            .map(|r| r.physical_id.clone())
            .ok_or_else(|| {
                Error::invariant_violation("cluster stack has no VPC")
            })?;
        let public_subnet_ids = resources
            .iter()
            .filter(|r| r.logical_id.starts_with("PublicSubnet"))
            .map(|r| r.physical_id.clone())
            .collect();
        let private_subnet_ids = resources
            .iter()
            .filter(|r| r.logical_id.starts_with("PrivateSubnet"))
            .map(|r| r.physical_id.clone())
            .collect();
        Ok(ClusterStackInfo {
            head_node_instance_id,
            vpc_id,
            public_subnet_ids,
            private_subnet_ids,
        })
    }
}

#[derive(Clone, Debug)]
pub struct MountSpec {
    pub fs_id: String,
    pub path: String,
    pub instance_id: String,
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct UnmountSpec {
    pub fs_id: String,
    pub path: String,
    pub instance_id: String,
}

/// The identity provider where cluster clients are registered
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Registers a new client and returns its backend uuid
    async fn create_client(
        &self,
        params: &IdentityClientCreate,
    ) -> CreateResult<String>;

    async fn get_client(
        &self,
        client_id: &str,
    ) -> LookupResult<Option<IdentityClient>>;

    async fn get_service_account(
        &self,
        client_uuid: &str,
    ) -> LookupResult<ServiceAccount>;

    async fn delete_client(&self, client_uuid: &str) -> DeleteResult;
}

/// The infrastructure-as-code provider that deploys cluster stacks
#[async_trait]
pub trait InfraGateway: Send + Sync {
    async fn apply(
        &self,
        stack: &StackApply,
        credentials: &ProviderCredentials,
    ) -> Result<(), Error>;

    async fn destroy(
        &self,
        stack_name: &str,
        credentials: &ProviderCredentials,
    ) -> Result<(), Error>;

    /// Returns the deployed resources of a stack, or `None` if the stack
    /// does not exist
    async fn stack_resources(
        &self,
        stack_name: &str,
        credentials: &ProviderCredentials,
    ) -> LookupResult<Option<Vec<StackResource>>>;

    /// Returns the provider-reported status of a stack, or `None` if the
    /// stack does not exist
    async fn stack_status(
        &self,
        stack_name: &str,
        credentials: &ProviderCredentials,
    ) -> LookupResult<Option<String>>;
}

/// The network storage provider
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Creates a managed file system and returns its id
    async fn create_filesystem(
        &self,
        name: &str,
        credentials: &ProviderCredentials,
    ) -> CreateResult<String>;

    /// Reports whether a file system exists and is set up for import
    async fn check_filesystem(
        &self,
        fs_id: &str,
        credentials: &ProviderCredentials,
    ) -> LookupResult<bool>;

    async fn delete_filesystem(
        &self,
        fs_id: &str,
        credentials: &ProviderCredentials,
    ) -> DeleteResult;

    async fn mount(
        &self,
        spec: &MountSpec,
        credentials: &ProviderCredentials,
    ) -> Result<(), Error>;

    async fn unmount(
        &self,
        spec: &UnmountSpec,
        credentials: &ProviderCredentials,
    ) -> Result<(), Error>;

    /// Reports whether `path` is available for a new mount on the given
    /// instance
    async fn check_path(
        &self,
        path: &str,
        instance_id: &str,
        credentials: &ProviderCredentials,
    ) -> LookupResult<bool>;
}

/// The DNS provider holding per-cluster records
#[async_trait]
pub trait DnsGateway: Send + Sync {
    async fn release_record(&self, client_id: &str) -> DeleteResult;
}

/// The full set of providers an orchestrator is constructed with
#[derive(Clone)]
pub struct Providers {
    pub identity: Arc<dyn IdentityGateway>,
    pub infra: Arc<dyn InfraGateway>,
    pub storage: Arc<dyn StorageGateway>,
    pub dns: Arc<dyn DnsGateway>,
}

#[cfg(test)]
mod test {
    use super::ClusterStackInfo;
    use super::StackResource;
    use summit_common::Error;

    fn resource(
        logical_id: &str,
        resource_type: &str,
        physical_id: &str,
    ) -> StackResource {
        StackResource {
            logical_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
            physical_id: physical_id.to_string(),
        }
    }

    #[test]
    fn test_stack_info_from_resources() {
        let resources = vec![
            resource("HeadNodeInstance", "AWS::EC2::Instance", "i-0abc"),
            resource("Vpc", "AWS::EC2::VPC", "vpc-123"),
            resource("PublicSubnetA", "AWS::EC2::Subnet", "subnet-pub-a"),
            resource("PrivateSubnetA", "AWS::EC2::Subnet", "subnet-priv-a"),
            resource("PrivateSubnetB", "AWS::EC2::Subnet", "subnet-priv-b"),
        ];
        let info = ClusterStackInfo::from_resources(&resources).unwrap();
        assert_eq!(info.head_node_instance_id, "i-0abc");
        assert_eq!(info.vpc_id, "vpc-123");
        assert_eq!(info.public_subnet_ids, vec!["subnet-pub-a"]);
        assert_eq!(
            info.private_subnet_ids,
            vec!["subnet-priv-a", "subnet-priv-b"]
        );
    }

    #[test]
    fn test_stack_info_requires_head_node_and_vpc() {
        let no_head = vec![resource("Vpc", "AWS::EC2::VPC", "vpc-123")];
        assert!(matches!(
            ClusterStackInfo::from_resources(&no_head),
            Err(Error::InvariantViolation { .. })
        ));

        let no_vpc = vec![resource(
            "HeadNodeInstance",
            "AWS::EC2::Instance",
            "i-0abc",
        )];
        assert!(matches!(
            ClusterStackInfo::from_resources(&no_vpc),
            Err(Error::InvariantViolation { .. })
        ));
    }
}
