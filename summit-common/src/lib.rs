// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared across Summit control plane components
//!
//! This crate defines the API-level vocabulary of the control plane: validated
//! resource names, the closed error taxonomy, and the result aliases used by
//! every orchestrator operation.  Nothing here depends on how operations are
//! transported to callers.

pub mod error;
pub mod name;

pub use error::Error;
pub use error::InternalContext;
pub use error::LookupType;
pub use error::ProviderErrorKind;
pub use error::ResourceType;
pub use name::ClusterName;

/// Result of a create operation
pub type CreateResult<T> = Result<T, Error>;
/// Result of a delete operation
pub type DeleteResult = Result<(), Error>;
/// Result of a list operation
pub type ListResultVec<T> = Result<Vec<T>, Error>;
/// Result of a lookup operation
pub type LookupResult<T> = Result<T, Error>;
/// Result of an update operation
pub type UpdateResult<T> = Result<T, Error>;
