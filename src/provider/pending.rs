//! Requests waiting for an answer from the remote peer.

use std::collections::HashMap;

use super::PullOutcome;
use crate::{
    async_result::ProviderRequest,
    engine::{DeliveryId, LinkHandle},
    error::ProviderError,
    id::{ConsumerId, ProducerId, ResourceId, SessionId},
    meta::ResourceInfo,
};

/// Store `outcome` in `request`, logging a request that was already resolved.
pub(super) fn resolve<T>(request: &ProviderRequest<T>, outcome: Result<T, ProviderError>) {
    let result = match outcome {
        Ok(value) => request.complete(value),
        Err(cause) => request.fail(cause),
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "ignoring second resolution");
    }
}

pub(super) struct PendingCreate {
    pub(super) request: ProviderRequest<ResourceInfo>,
    pub(super) ticket: u64,
}

pub(super) struct PendingSend {
    pub(super) producer: ProducerId,
    pub(super) settled: bool,
    pub(super) request: ProviderRequest<()>,
}

pub(super) struct PendingPull {
    pub(super) ticket: u64,
    pub(super) request: ProviderRequest<PullOutcome>,
}

/// Every request the worker still owes an answer, keyed by what will
/// answer it.
#[derive(Default)]
pub(super) struct PendingRequests {
    pub(super) creates: HashMap<ResourceId, PendingCreate>,
    pub(super) destroys: HashMap<ResourceId, Vec<ProviderRequest<()>>>,
    pub(super) sends: HashMap<DeliveryId, PendingSend>,
    pub(super) pulls: HashMap<ConsumerId, PendingPull>,
    pub(super) discharges: HashMap<SessionId, ProviderRequest<()>>,
    pub(super) unsubscribes: HashMap<LinkHandle, ProviderRequest<()>>,
}

impl PendingRequests {
    /// Fail every pending request with `cause`. Returns how many were failed.
    pub(super) fn fail_all(&mut self, cause: &ProviderError) -> usize {
        let mut failed = 0;
        for (_, pending) in self.creates.drain() {
            resolve(&pending.request, Err(cause.clone()));
            failed += 1;
        }
        for (_, requests) in self.destroys.drain() {
            for request in requests {
                resolve(&request, Err(cause.clone()));
                failed += 1;
            }
        }
        for (_, pending) in self.sends.drain() {
            resolve(&pending.request, Err(cause.clone()));
            failed += 1;
        }
        for (_, pending) in self.pulls.drain() {
            resolve(&pending.request, Err(cause.clone()));
            failed += 1;
        }
        for (_, request) in self.discharges.drain() {
            resolve(&request, Err(cause.clone()));
            failed += 1;
        }
        for (_, request) in self.unsubscribes.drain() {
            resolve(&request, Err(cause.clone()));
            failed += 1;
        }
        failed
    }

    /// Fail in-flight work tied to `resource` or anything beneath it:
    /// sends, pulls, discharges, and creates of strict descendants.
    pub(super) fn fail_dependents(&mut self, resource: &ResourceId, cause: &ProviderError) {
        let within = |id: ResourceId| id.is_descendant_of(resource);

        self.sends.retain(|_, pending| {
            let hit = within(pending.producer.clone().into());
            if hit {
                resolve(&pending.request, Err(cause.clone()));
            }
            !hit
        });
        self.pulls.retain(|consumer, pending| {
            let hit = within(consumer.clone().into());
            if hit {
                resolve(&pending.request, Err(cause.clone()));
            }
            !hit
        });
        self.discharges.retain(|session, request| {
            let hit = within(session.clone().into());
            if hit {
                resolve(request, Err(cause.clone()));
            }
            !hit
        });
        self.creates.retain(|id, pending| {
            let hit = id != resource && id.is_descendant_of(resource);
            if hit {
                resolve(&pending.request, Err(cause.clone()));
            }
            !hit
        });
    }

    #[cfg(test)]
    pub(super) fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.destroys.is_empty()
            && self.sends.is_empty()
            && self.pulls.is_empty()
            && self.discharges.is_empty()
            && self.unsubscribes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{async_result::pair, id::ConnectionId};

    fn session(n: u64) -> SessionId { ConnectionId::new("c").expect("id").session(n) }

    #[test]
    fn dependents_of_a_session_fail_and_others_survive() {
        let mut pending = PendingRequests::default();
        let (hit, mut hit_future) = pair();
        let (miss, mut miss_future) = pair();
        pending.sends.insert(
            DeliveryId::new(1),
            PendingSend {
                producer: session(1).producer(1),
                settled: false,
                request: hit,
            },
        );
        pending.sends.insert(
            DeliveryId::new(2),
            PendingSend {
                producer: session(2).producer(1),
                settled: false,
                request: miss,
            },
        );

        let cause = ProviderError::ResourceClosed(session(1).into());
        pending.fail_dependents(&session(1).into(), &cause);

        assert!(matches!(
            hit_future.try_result(),
            Some(Err(ProviderError::ResourceClosed(_)))
        ));
        assert!(miss_future.try_result().is_none());
        assert_eq!(pending.sends.len(), 1);
    }

    #[test]
    fn fail_all_empties_every_table() {
        let mut pending = PendingRequests::default();
        let (create, _c) = pair();
        let (pull, _p) = pair();
        let (discharge, _d) = pair();
        pending.creates.insert(
            session(1).into(),
            PendingCreate {
                request: create,
                ticket: 0,
            },
        );
        pending.pulls.insert(session(1).consumer(1), PendingPull { ticket: 0, request: pull });
        pending.discharges.insert(session(1), discharge);

        assert_eq!(pending.fail_all(&ProviderError::Closed), 3);
        assert!(pending.is_empty());
    }
}
