// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared state available to all operations

use slog::o;
use slog::Logger;

/// Provided to all orchestrator operations: identifies the tenant and the
/// caller and carries the logger for the operation
#[derive(Clone)]
pub struct OpContext {
    pub log: Logger,
    pub tenant: String,
    pub caller_email: String,
}

impl OpContext {
    pub fn new(log: &Logger, tenant: &str, caller_email: &str) -> OpContext {
        OpContext {
            log: log.new(o!("tenant" => tenant.to_string())),
            tenant: tenant.to_string(),
            caller_email: caller_email.to_string(),
        }
    }
}
