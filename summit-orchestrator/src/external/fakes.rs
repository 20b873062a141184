// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fake provider implementations
//!
//! These back the orchestrator in tests and in the developer harness.  Each
//! fake records the calls made against it and exposes accessors so tests can
//! assert on them, plus failure injection knobs for exercising compensation
//! and background error paths.

use crate::external::DnsGateway;
use crate::external::IdentityClient;
use crate::external::IdentityClientCreate;
use crate::external::IdentityGateway;
use crate::external::InfraGateway;
use crate::external::MountSpec;
use crate::external::ProviderCredentials;
use crate::external::Providers;
use crate::external::ServiceAccount;
use crate::external::StackApply;
use crate::external::StackResource;
use crate::external::StorageGateway;
use crate::external::UnmountSpec;
use crate::external::STACK_STATUS_CREATE_COMPLETE;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use summit_common::CreateResult;
use summit_common::DeleteResult;
use summit_common::Error;
use summit_common::LookupResult;
use summit_common::ProviderErrorKind;

/*
 * Identity
 */

#[derive(Default)]
struct FakeIdentityInner {
    /// keyed by backend uuid
    clients: BTreeMap<String, IdentityClient>,
    next_id: u64,
    fail_create: bool,
    delete_calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeIdentity {
    inner: Mutex<FakeIdentityInner>,
}

impl FakeIdentity {
    pub fn new() -> FakeIdentity {
        FakeIdentity::default()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.inner.lock().unwrap().fail_create = fail;
    }

    pub fn has_client(&self, client_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .clients
            .values()
            .any(|client| client.client_id == client_id)
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().unwrap().clients.len()
    }

    /// Every `delete_client` call seen, in order, whether or not it
    /// succeeded
    pub fn delete_calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().delete_calls.clone()
    }
}

#[async_trait]
impl IdentityGateway for FakeIdentity {
    async fn create_client(
        &self,
        params: &IdentityClientCreate,
    ) -> CreateResult<String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_create {
            return Err(Error::provider_error(
                ProviderErrorKind::Unknown,
                "injected client registration failure",
            ));
        }
        let uuid = format!("idp-{:08x}", inner.next_id);
        inner.next_id += 1;
        inner.clients.insert(
            uuid.clone(),
            IdentityClient {
                uuid: uuid.clone(),
                client_id: params.client_id.clone(),
            },
        );
        Ok(uuid)
    }

    async fn get_client(
        &self,
        client_id: &str,
    ) -> LookupResult<Option<IdentityClient>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .clients
            .values()
            .find(|client| client.client_id == client_id)
            .cloned())
    }

    async fn get_service_account(
        &self,
        client_uuid: &str,
    ) -> LookupResult<ServiceAccount> {
        let inner = self.inner.lock().unwrap();
        let client = inner.clients.get(client_uuid).ok_or_else(|| {
            Error::provider_error(
                ProviderErrorKind::Unknown,
                "no such identity client",
            )
        })?;
        Ok(ServiceAccount {
            uuid: format!("sa-{}", client_uuid),
            username: format!("service-account-{}", client.client_id),
        })
    }

    async fn delete_client(&self, client_uuid: &str) -> DeleteResult {
        let mut inner = self.inner.lock().unwrap();
        inner.delete_calls.push(client_uuid.to_string());
        if inner.clients.remove(client_uuid).is_none() {
            return Err(Error::provider_error(
                ProviderErrorKind::Unknown,
                "no such identity client",
            ));
        }
        Ok(())
    }
}

/*
 * Infrastructure
 */

struct FakeStack {
    status: String,
    resources: Vec<StackResource>,
}

#[derive(Default)]
struct FakeInfraInner {
    stacks: BTreeMap<String, FakeStack>,
    next_id: u64,
    fail_apply: bool,
    destroyed: Vec<String>,
}

#[derive(Default)]
pub struct FakeInfra {
    inner: Mutex<FakeInfraInner>,
}

impl FakeInfra {
    pub fn new() -> FakeInfra {
        FakeInfra::default()
    }

    pub fn set_fail_apply(&self, fail: bool) {
        self.inner.lock().unwrap().fail_apply = fail;
    }

    pub fn set_stack_status(&self, stack_name: &str, status: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(stack) = inner.stacks.get_mut(stack_name) {
            stack.status = status.to_string();
        }
    }

    pub fn has_stack(&self, stack_name: &str) -> bool {
        self.inner.lock().unwrap().stacks.contains_key(stack_name)
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.inner.lock().unwrap().destroyed.clone()
    }
}

#[async_trait]
impl InfraGateway for FakeInfra {
    async fn apply(
        &self,
        stack: &StackApply,
        _credentials: &ProviderCredentials,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_apply {
            return Err(Error::provider_error(
                ProviderErrorKind::Unknown,
                "injected stack apply failure",
            ));
        }
        let n = inner.next_id;
        inner.next_id += 1;
        let resources = vec![
            StackResource {
                logical_id: "HeadNodeInstance".to_string(),
                resource_type: "AWS::EC2::Instance".to_string(),
                physical_id: format!("i-{:08x}", n),
            },
            StackResource {
                logical_id: "Vpc".to_string(),
                resource_type: "AWS::EC2::VPC".to_string(),
                physical_id: format!("vpc-{:08x}", n),
            },
            StackResource {
                logical_id: "PublicSubnetA".to_string(),
                resource_type: "AWS::EC2::Subnet".to_string(),
                physical_id: format!("subnet-pub-{:08x}", n),
            },
            StackResource {
                logical_id: "PrivateSubnetA".to_string(),
                resource_type: "AWS::EC2::Subnet".to_string(),
                physical_id: format!("subnet-priv-{:08x}", n),
            },
        ];
        inner.stacks.insert(
            stack.stack_name.clone(),
            FakeStack {
                status: STACK_STATUS_CREATE_COMPLETE.to_string(),
                resources,
            },
        );
        Ok(())
    }

    async fn destroy(
        &self,
        stack_name: &str,
        _credentials: &ProviderCredentials,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.destroyed.push(stack_name.to_string());
        if inner.stacks.remove(stack_name).is_none() {
            return Err(Error::provider_error(
                ProviderErrorKind::Unknown,
                "no such stack",
            ));
        }
        Ok(())
    }

    async fn stack_resources(
        &self,
        stack_name: &str,
        _credentials: &ProviderCredentials,
    ) -> LookupResult<Option<Vec<StackResource>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .stacks
            .get(stack_name)
            .map(|stack| stack.resources.clone()))
    }

    async fn stack_status(
        &self,
        stack_name: &str,
        _credentials: &ProviderCredentials,
    ) -> LookupResult<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.stacks.get(stack_name).map(|stack| stack.status.clone()))
    }
}

/*
 * Storage
 */

#[derive(Clone, Debug, PartialEq)]
pub struct FakeMount {
    pub fs_id: String,
    pub path: String,
    pub instance_id: String,
}

#[derive(Default)]
struct FakeStorageInner {
    filesystems: BTreeSet<String>,
    next_id: u64,
    mounts: Vec<FakeMount>,
    unavailable_paths: BTreeSet<String>,
    fail_mount: bool,
    fail_unmount: bool,
}

#[derive(Default)]
pub struct FakeStorage {
    inner: Mutex<FakeStorageInner>,
}

impl FakeStorage {
    pub fn new() -> FakeStorage {
        FakeStorage::default()
    }

    /// Registers an existing file system, as for an import
    pub fn add_filesystem(&self, fs_id: &str) {
        self.inner.lock().unwrap().filesystems.insert(fs_id.to_string());
    }

    pub fn has_filesystem(&self, fs_id: &str) -> bool {
        self.inner.lock().unwrap().filesystems.contains(fs_id)
    }

    pub fn set_path_unavailable(&self, path: &str) {
        self.inner.lock().unwrap().unavailable_paths.insert(path.to_string());
    }

    pub fn set_fail_mount(&self, fail: bool) {
        self.inner.lock().unwrap().fail_mount = fail;
    }

    pub fn set_fail_unmount(&self, fail: bool) {
        self.inner.lock().unwrap().fail_unmount = fail;
    }

    pub fn mounts(&self) -> Vec<FakeMount> {
        self.inner.lock().unwrap().mounts.clone()
    }

    pub fn is_mounted(&self, fs_id: &str) -> bool {
        self.inner.lock().unwrap().mounts.iter().any(|m| m.fs_id == fs_id)
    }
}

#[async_trait]
impl StorageGateway for FakeStorage {
    async fn create_filesystem(
        &self,
        _name: &str,
        _credentials: &ProviderCredentials,
    ) -> CreateResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let fs_id = format!("fs-{:08x}", inner.next_id);
        inner.next_id += 1;
        inner.filesystems.insert(fs_id.clone());
        Ok(fs_id)
    }

    async fn check_filesystem(
        &self,
        fs_id: &str,
        _credentials: &ProviderCredentials,
    ) -> LookupResult<bool> {
        Ok(self.inner.lock().unwrap().filesystems.contains(fs_id))
    }

    async fn delete_filesystem(
        &self,
        fs_id: &str,
        _credentials: &ProviderCredentials,
    ) -> DeleteResult {
        let mut inner = self.inner.lock().unwrap();
        if !inner.filesystems.remove(fs_id) {
            return Err(Error::provider_error(
                ProviderErrorKind::Unknown,
                "no such file system",
            ));
        }
        Ok(())
    }

    async fn mount(
        &self,
        spec: &MountSpec,
        _credentials: &ProviderCredentials,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_mount {
            return Err(Error::provider_error(
                ProviderErrorKind::Unknown,
                "injected mount failure",
            ));
        }
        inner.mounts.push(FakeMount {
            fs_id: spec.fs_id.clone(),
            path: spec.path.clone(),
            instance_id: spec.instance_id.clone(),
        });
        Ok(())
    }

    async fn unmount(
        &self,
        spec: &UnmountSpec,
        _credentials: &ProviderCredentials,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_unmount {
            return Err(Error::provider_error(
                ProviderErrorKind::Unknown,
                "injected unmount failure",
            ));
        }
        inner.mounts.retain(|m| {
            !(m.fs_id == spec.fs_id && m.instance_id == spec.instance_id)
        });
        Ok(())
    }

    async fn check_path(
        &self,
        path: &str,
        instance_id: &str,
        _credentials: &ProviderCredentials,
    ) -> LookupResult<bool> {
        let inner = self.inner.lock().unwrap();
        if inner.unavailable_paths.contains(path) {
            return Ok(false);
        }
        Ok(!inner
            .mounts
            .iter()
            .any(|m| m.path == path && m.instance_id == instance_id))
    }
}

/*
 * DNS
 */

#[derive(Default)]
pub struct FakeDns {
    released: Mutex<Vec<String>>,
}

impl FakeDns {
    pub fn new() -> FakeDns {
        FakeDns::default()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl DnsGateway for FakeDns {
    async fn release_record(&self, client_id: &str) -> DeleteResult {
        self.released.lock().unwrap().push(client_id.to_string());
        Ok(())
    }
}

/// A full set of fakes, plus the concrete handles tests assert against
pub struct FakeProviderSet {
    pub identity: Arc<FakeIdentity>,
    pub infra: Arc<FakeInfra>,
    pub storage: Arc<FakeStorage>,
    pub dns: Arc<FakeDns>,
}

impl FakeProviderSet {
    pub fn new() -> FakeProviderSet {
        FakeProviderSet {
            identity: Arc::new(FakeIdentity::new()),
            infra: Arc::new(FakeInfra::new()),
            storage: Arc::new(FakeStorage::new()),
            dns: Arc::new(FakeDns::new()),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            identity: self.identity.clone(),
            infra: self.infra.clone(),
            storage: self.storage.clone(),
            dns: self.dns.clone(),
        }
    }
}

impl Default for FakeProviderSet {
    fn default() -> FakeProviderSet {
        FakeProviderSet::new()
    }
}
