// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Validated cluster names and the identifiers derived from them

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// A cluster name, as provided by a caller
///
/// Names are between 1 and 128 characters, contain only ASCII alphanumeric
/// characters and hyphens, and must end in an alphanumeric character.  The
/// external identity client id and the infrastructure stack name are both pure
/// functions of the name (plus the tenant, for the client id) and are derived
/// here and nowhere else, so they can never be recomputed inconsistently.
#[derive(
    Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterName(String);

impl TryFrom<String> for ClusterName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err("name requires at least one character".to_string());
        }
        if value.len() > 128 {
            return Err("name may contain at most 128 characters".to_string());
        }

        let mut last = '-';
        for c in value.chars() {
            last = c;
            if !c.is_ascii_alphanumeric() && c != '-' {
                return Err(format!(
                    "name contains invalid character: {:?} (allowed \
                     characters are alphanumerics and \"-\")",
                    c
                ));
            }
        }

        if last == '-' {
            return Err("name cannot end with \"-\"".to_string());
        }

        Ok(ClusterName(value))
    }
}

impl TryFrom<&str> for ClusterName {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ClusterName::try_from(value.to_string())
    }
}

impl From<ClusterName> for String {
    fn from(name: ClusterName) -> String {
        name.0
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ClusterName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the infrastructure stack name for this cluster: lowercased,
    /// with runs of non-alphanumeric characters squeezed to single hyphens.
    pub fn stack_name(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut pending_hyphen = false;
        for c in self.0.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_hyphen && !out.is_empty() {
                    out.push('-');
                }
                pending_hyphen = false;
                out.push(c.to_ascii_lowercase());
            } else {
                pending_hyphen = true;
            }
        }
        out
    }

    /// Returns the external identity client id for this cluster within
    /// `tenant`.
    pub fn client_id(&self, tenant: &str) -> String {
        format!("{}-{}", self.stack_name(), tenant)
    }
}
