//! Work items for the serial worker.
//!
//! Public operations, transport upcalls and timer expiries all become a
//! [`Command`] on one unbounded queue, which is the only way state owned by
//! the worker is ever touched.

use std::{io, time::Duration};

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use super::PullOutcome;
use crate::{
    async_result::ProviderRequest,
    engine::DeliveryId,
    id::{ConsumerId, ResourceId, SessionId},
    message::{AckType, OutboundMessage},
    meta::ResourceInfo,
    transport::{Transport, TransportListener},
};

pub(crate) enum Command {
    Attach(Box<dyn Transport>),
    Create(ResourceInfo, ProviderRequest<ResourceInfo>),
    Destroy(ResourceInfo, ProviderRequest<()>),
    Send(OutboundMessage, ProviderRequest<()>),
    Acknowledge {
        consumer: ConsumerId,
        delivery: DeliveryId,
        ack: AckType,
        request: ProviderRequest<()>,
    },
    Discharge {
        session: SessionId,
        commit: bool,
        request: ProviderRequest<()>,
    },
    Pull {
        consumer: ConsumerId,
        timeout: Duration,
        request: ProviderRequest<PullOutcome>,
    },
    Unsubscribe(String, ProviderRequest<()>),
    Inbound(Bytes),
    TransportFailed(io::Error),
    PullExpired {
        consumer: ConsumerId,
        ticket: u64,
    },
    RequestExpired {
        resource: ResourceId,
        ticket: u64,
        after: Duration,
    },
    Close(ProviderRequest<()>),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Attach(_) => "attach",
            Self::Create(..) => "create",
            Self::Destroy(..) => "destroy",
            Self::Send(..) => "send",
            Self::Acknowledge { .. } => "acknowledge",
            Self::Discharge { commit: true, .. } => "commit",
            Self::Discharge { commit: false, .. } => "rollback",
            Self::Pull { .. } => "pull",
            Self::Unsubscribe(..) => "unsubscribe",
            Self::Inbound(_) => "inbound",
            Self::TransportFailed(_) => "transport-failed",
            Self::PullExpired { .. } => "pull-expired",
            Self::RequestExpired { .. } => "request-expired",
            Self::Close(_) => "close",
        }
    }
}

/// Transport listener that turns upcalls into queued commands.
pub(crate) struct CommandSink(pub(crate) UnboundedSender<Command>);

impl TransportListener for CommandSink {
    fn on_data(&self, bytes: Bytes) {
        if self.0.send(Command::Inbound(bytes)).is_err() {
            tracing::trace!("dropping inbound bytes for stopped provider");
        }
    }

    fn on_error(&self, error: io::Error) {
        if self.0.send(Command::TransportFailed(error)).is_err() {
            tracing::trace!("dropping transport error for stopped provider");
        }
    }
}
