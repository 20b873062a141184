// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Summit: lifecycle orchestration for HPC clusters and network storage
//!
//! This crate contains the orchestrator core: the resource store, the
//! provider gateway traits (with fakes for testing), the provisioning state
//! machine for clusters and storage mounts, compensation for partial
//! failures, and the background task executor.  Callers construct an
//! [`Orchestrator`] with an [`OrchestratorConfig`] and a set of providers and
//! invoke operations with an [`OpContext`] identifying the tenant and caller.

pub mod app;
pub mod config;
pub mod context;
pub mod db;
pub mod external;

pub use app::Orchestrator;
pub use config::OrchestratorConfig;
pub use context::OpContext;
