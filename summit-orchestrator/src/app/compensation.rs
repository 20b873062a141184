// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compensation for partially completed provisioning
//!
//! An operation records a [`CompensationStep`] immediately after each
//! externally-visible side effect succeeds.  If a later step fails, the
//! operation unwinds the recorded steps in reverse order and returns the
//! primary error.  A failed compensation is logged at `warn` and skipped; it
//! never masks the primary error and is never retried.

use crate::external::Providers;
use slog::warn;
use slog::Logger;

#[derive(Clone, Debug, PartialEq)]
pub enum CompensationStep {
    /// deregister an identity client that was registered this operation
    IdentityClient { client_uuid: String },
}

#[derive(Default)]
pub struct Compensations {
    steps: Vec<CompensationStep>,
}

impl Compensations {
    pub fn new() -> Compensations {
        Compensations { steps: Vec::new() }
    }

    pub fn record(&mut self, step: CompensationStep) {
        self.steps.push(step);
    }

    pub async fn unwind(self, log: &Logger, providers: &Providers) {
        for step in self.steps.into_iter().rev() {
            match step {
                CompensationStep::IdentityClient { client_uuid } => {
                    if let Err(error) =
                        providers.identity.delete_client(&client_uuid).await
                    {
                        warn!(
                            log,
                            "compensation failed to delete identity client";
                            "client_uuid" => &client_uuid,
                            "error" => %error,
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::CompensationStep;
    use super::Compensations;
    use crate::external::fakes::FakeProviderSet;
    use crate::external::IdentityClientCreate;
    use crate::external::IdentityGateway;
    use slog::o;
    use slog::Logger;

    #[tokio::test]
    async fn test_unwind_deletes_client_exactly_once() {
        let log = Logger::root(slog::Discard, o!());
        let fakes = FakeProviderSet::new();
        let client_uuid = fakes
            .identity
            .create_client(&IdentityClientCreate {
                client_id: "alpha-acme".to_string(),
                client_secret: "secret".to_string(),
            })
            .await
            .unwrap();

        let mut compensations = Compensations::new();
        compensations.record(CompensationStep::IdentityClient {
            client_uuid: client_uuid.clone(),
        });
        compensations.unwind(&log, &fakes.providers()).await;

        assert_eq!(fakes.identity.delete_calls(), vec![client_uuid]);
        assert_eq!(fakes.identity.client_count(), 0);
    }

    #[tokio::test]
    async fn test_unwind_continues_past_failures() {
        let log = Logger::root(slog::Discard, o!());
        let fakes = FakeProviderSet::new();
        let client_uuid = fakes
            .identity
            .create_client(&IdentityClientCreate {
                client_id: "alpha-acme".to_string(),
                client_secret: "secret".to_string(),
            })
            .await
            .unwrap();

        let mut compensations = Compensations::new();
        // This one does not exist and its deletion will fail.
        compensations.record(CompensationStep::IdentityClient {
            client_uuid: client_uuid.clone(),
        });
        compensations.record(CompensationStep::IdentityClient {
            client_uuid: "idp-missing".to_string(),
        });
        compensations.unwind(&log, &fakes.providers()).await;

        // Reverse order: the missing client first, then the real one, which
        // is still deleted despite the earlier failure.
        assert_eq!(
            fakes.identity.delete_calls(),
            vec!["idp-missing".to_string(), client_uuid]
        );
        assert_eq!(fakes.identity.client_count(), 0);
    }
}
