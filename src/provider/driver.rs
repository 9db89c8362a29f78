//! Worker-owned provider state.
//!
//! [`ProviderDriver`] holds the transport, the protocol engine and every
//! resource table. It is only ever touched from the worker task, one
//! [`Command`] at a time, so none of it needs locking.

use std::{
    collections::HashMap,
    ops::ControlFlow,
    sync::{
        Arc,
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::{
    ProviderConfig,
    ProviderListener,
    PullOutcome,
    command::Command,
    pending::{PendingCreate, PendingPull, PendingRequests, PendingSend, resolve},
    pump::{feed_engine, pump_to_engine},
};
use crate::{
    address::RemoteAddress,
    async_result::ProviderRequest,
    engine::{
        DeliveryId,
        DeliveryState,
        EngineEvent,
        ErrorCondition,
        LinkHandle,
        LinkSpec,
        Open,
        ProtocolEngine,
        Role,
        Source,
        Target,
    },
    error::ProviderError,
    id::{ConsumerId, ProducerId, ResourceId, SessionId},
    message::{AckType, InboundDelivery, JmsMessage, Message, OutboundMessage},
    meta::{ConnectionInfo, ConsumerInfo, ProducerInfo, ResourceInfo, ResourceVisitor, SessionInfo},
    metrics,
    transport::Transport,
};

/// State shared between the worker and the public provider handle.
pub(super) struct Shared {
    closed: AtomicBool,
    failed: AtomicBool,
    listener: RwLock<Option<Arc<dyn ProviderListener>>>,
    pub(super) shutdown: CancellationToken,
}

impl Shared {
    pub(super) fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            listener: RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Mark the provider closed. Returns `true` for the first caller only.
    pub(super) fn begin_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(super) fn is_usable(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.failed.load(Ordering::Acquire)
    }

    fn mark_failed(&self) { self.failed.store(true, Ordering::Release); }

    pub(super) fn listener(&self) -> Option<Arc<dyn ProviderListener>> {
        match self.listener.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(super) fn set_listener(&self, listener: Arc<dyn ProviderListener>) {
        match self.listener.write() {
            Ok(mut guard) => *guard = Some(listener),
            Err(poisoned) => *poisoned.into_inner() = Some(listener),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
    Failed,
}

struct SessionEntry {
    info: SessionInfo,
    channel: u16,
    open: bool,
}

struct LinkEntry<I> {
    info: I,
    handle: LinkHandle,
    open: bool,
    credit: u32,
}

impl<I> LinkEntry<I> {
    fn new(info: I, handle: LinkHandle) -> Self {
        Self {
            info,
            handle,
            open: false,
            credit: 0,
        }
    }
}

#[derive(Clone, Debug)]
enum LinkOwner {
    Producer(ProducerId),
    Consumer(ConsumerId),
    Unsubscribe,
}

pub(super) struct ProviderDriver {
    address: RemoteAddress,
    config: ProviderConfig,
    engine: Box<dyn ProtocolEngine>,
    transport: Option<Box<dyn Transport>>,
    shared: Arc<Shared>,
    commands: UnboundedSender<Command>,
    state: ConnectionState,
    connection: Option<ConnectionInfo>,
    sessions: HashMap<SessionId, SessionEntry>,
    channels: HashMap<u16, SessionId>,
    producers: HashMap<ProducerId, LinkEntry<ProducerInfo>>,
    consumers: HashMap<ConsumerId, LinkEntry<ConsumerInfo>>,
    links: HashMap<LinkHandle, LinkOwner>,
    pending: PendingRequests,
    closing_ticket: Option<u64>,
    next_ticket: u64,
    failure_reported: bool,
}

impl ProviderDriver {
    pub(super) fn new(
        address: RemoteAddress,
        config: ProviderConfig,
        engine: Box<dyn ProtocolEngine>,
        shared: Arc<Shared>,
        commands: UnboundedSender<Command>,
    ) -> Self {
        Self {
            address,
            config,
            engine,
            transport: None,
            shared,
            commands,
            state: ConnectionState::Disconnected,
            connection: None,
            sessions: HashMap::new(),
            channels: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
            links: HashMap::new(),
            pending: PendingRequests::default(),
            closing_ticket: None,
            next_ticket: 0,
            failure_reported: false,
        }
    }

    /// Apply one command, then flush engine output and dispatch events.
    ///
    /// Returns [`ControlFlow::Break`] once the provider has been closed.
    pub(super) fn handle(&mut self, command: Command) -> ControlFlow<()> {
        tracing::trace!(command = command.name(), "processing command");
        match command {
            Command::Close(request) => {
                self.shutdown(&request);
                return ControlFlow::Break(());
            }
            Command::Attach(transport) => self.attach(transport),
            Command::Create(info, request) => {
                let mut creation = Creation {
                    driver: &mut *self,
                    request: request.clone(),
                };
                if let Err(cause) = info.visit(&mut creation) {
                    resolve(&request, Err(cause));
                }
            }
            Command::Destroy(info, request) => {
                let mut destruction = Destruction {
                    driver: &mut *self,
                    request: request.clone(),
                };
                if let Err(cause) = info.visit(&mut destruction) {
                    resolve(&request, Err(cause));
                }
            }
            Command::Send(message, request) => {
                if let Err(cause) = self.send(message, &request) {
                    resolve(&request, Err(cause));
                }
            }
            Command::Acknowledge {
                consumer,
                delivery,
                ack,
                request,
            } => resolve(&request, self.acknowledge(&consumer, delivery, ack)),
            Command::Discharge {
                session,
                commit,
                request,
            } => {
                if let Err(cause) = self.discharge(session, commit, &request) {
                    resolve(&request, Err(cause));
                }
            }
            Command::Pull {
                consumer,
                timeout,
                request,
            } => {
                if let Err(cause) = self.pull(consumer, timeout, &request) {
                    resolve(&request, Err(cause));
                }
            }
            Command::Unsubscribe(name, request) => {
                if let Err(cause) = self.unsubscribe(&name, &request) {
                    resolve(&request, Err(cause));
                }
            }
            Command::Inbound(bytes) => self.inbound(&bytes),
            Command::TransportFailed(error) => {
                if self.is_terminated() {
                    tracing::debug!(error = %error, "ignoring transport error after shutdown");
                } else {
                    self.fail(ProviderError::transport(error));
                }
            }
            Command::PullExpired { consumer, ticket } => self.pull_expired(&consumer, ticket),
            Command::RequestExpired {
                resource,
                ticket,
                after,
            } => self.request_expired(&resource, ticket, after),
        }
        self.flush();
        ControlFlow::Continue(())
    }

    /// Fail everything still pending and release the transport. Used when
    /// the worker stops without an explicit close.
    pub(super) fn abandon(&mut self) {
        let failed = self.pending.fail_all(&ProviderError::Closed);
        if failed > 0 {
            tracing::debug!(failed, "failed pending requests on worker exit");
        }
        self.release_transport();
        if !matches!(self.state, ConnectionState::Failed) {
            self.state = ConnectionState::Closed;
        }
    }

    fn is_terminated(&self) -> bool {
        matches!(self.state, ConnectionState::Closed | ConnectionState::Failed)
    }

    fn ensure_running(&self) -> Result<(), ProviderError> {
        if self.is_terminated() {
            Err(ProviderError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_connected(&self) -> Result<(), ProviderError> {
        self.ensure_running()?;
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ProviderError::IllegalState("connection is not open".into()))
        }
    }

    fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn request_timeout(&self) -> Option<Duration> {
        self.connection
            .as_ref()
            .and_then(|info| info.request_timeout)
            .or(self.config.request_timeout())
    }

    /// Queue `command` after `delay`. Without a runtime the timer is skipped.
    fn schedule(&self, delay: Duration, command: Command) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(command = command.name(), "no runtime available for timer");
            return;
        };
        let commands = self.commands.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(command);
        });
    }

    fn track_create(&mut self, resource: ResourceId, request: ProviderRequest<ResourceInfo>) {
        let ticket = self.next_ticket();
        if let Some(after) = self.request_timeout() {
            self.schedule(
                after,
                Command::RequestExpired {
                    resource: resource.clone(),
                    ticket,
                    after,
                },
            );
        }
        self.pending
            .creates
            .insert(resource, PendingCreate { request, ticket });
    }

    fn complete_create(&mut self, resource: &ResourceId, info: ResourceInfo) {
        match self.pending.creates.remove(resource) {
            Some(pending) => resolve(&pending.request, Ok(info)),
            None => tracing::debug!(%resource, "remote open without pending create"),
        }
    }

    fn fail_create(&mut self, resource: &ResourceId, cause: ProviderError) {
        if let Some(pending) = self.pending.creates.remove(resource) {
            resolve(&pending.request, Err(cause));
        }
    }

    fn complete_destroys(&mut self, resource: &ResourceId) {
        for request in self.pending.destroys.remove(resource).unwrap_or_default() {
            resolve(&request, Ok(()));
        }
    }

    fn notify_remote_close(&self, resource: &ResourceId, cause: ProviderError) {
        if let Some(listener) = self.shared.listener() {
            listener.on_resource_remotely_closed(resource, cause);
        }
    }

    fn attach(&mut self, transport: Box<dyn Transport>) {
        if self.is_terminated() || self.transport.is_some() {
            tracing::debug!("discarding transport for provider that cannot use it");
            let mut transport = transport;
            if let Err(e) = transport.close() {
                tracing::debug!(error = %e, "closing discarded transport failed");
            }
            return;
        }
        log::info!("transport attached to {}", self.address);
        self.transport = Some(transport);
    }

    fn flush(&mut self) {
        self.pump();
        while let Some(event) = self.engine.poll_event() {
            self.on_event(event);
        }
        self.pump();
    }

    fn pump(&mut self) {
        let trace_bytes = self.config.trace_bytes();
        let result = match self.transport.as_mut() {
            Some(transport) => pump_to_engine(&mut *self.engine, &mut **transport, trace_bytes),
            None => return,
        };
        if let Err(e) = result {
            self.fail(ProviderError::transport(e));
        }
    }

    fn release_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                tracing::debug!(error = %e, "transport close failed");
            }
        }
    }

    /// Mark the provider failed, fail everything pending with `cause` and
    /// tell the listener once.
    fn fail(&mut self, cause: ProviderError) {
        if self.is_terminated() {
            return;
        }
        tracing::warn!(peer = %self.address, error = %cause, "provider failed");
        metrics::inc_errors();
        self.state = ConnectionState::Failed;
        self.shared.mark_failed();
        let failed = self.pending.fail_all(&cause);
        tracing::debug!(failed, "failed pending requests");
        self.release_transport();
        if !self.failure_reported {
            self.failure_reported = true;
            if let Some(listener) = self.shared.listener() {
                listener.on_connection_failure(cause);
            }
        }
    }

    fn shutdown(&mut self, request: &ProviderRequest<()>) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            if let Err(e) = self.engine.close(None) {
                tracing::debug!(error = %e, "engine close failed");
            }
            let trace_bytes = self.config.trace_bytes();
            if let Some(transport) = self.transport.as_mut() {
                if let Err(e) = pump_to_engine(&mut *self.engine, &mut **transport, trace_bytes) {
                    tracing::debug!(error = %e, "flushing close failed");
                }
            }
        }
        self.release_transport();
        self.state = ConnectionState::Closed;
        self.pending.fail_all(&ProviderError::Closed);
        log::info!("provider for {} closed", self.address);
        resolve(request, Ok(()));
    }

    fn inbound(&mut self, bytes: &Bytes) {
        if self.is_terminated() {
            tracing::trace!(len = bytes.len(), "ignoring input after shutdown");
            return;
        }
        if let Err(e) = feed_engine(&mut *self.engine, bytes, self.config.trace_bytes()) {
            self.fail(ProviderError::Protocol(e));
        }
    }

    fn create_connection(
        &mut self,
        info: ConnectionInfo,
        request: ProviderRequest<ResourceInfo>,
    ) -> Result<(), ProviderError> {
        self.ensure_running()?;
        if self.connection.is_some() || self.state != ConnectionState::Disconnected {
            return Err(ProviderError::IllegalState(
                "connection already created".into(),
            ));
        }
        if self.transport.is_none() {
            return Err(ProviderError::IllegalState(
                "provider is not connected".into(),
            ));
        }
        let open = Open {
            container_id: info.client_id.clone().unwrap_or_else(|| info.id.to_string()),
            hostname: info
                .hostname
                .clone()
                .or_else(|| Some(self.address.host().to_owned())),
            max_frame_size: info.max_frame_size,
            idle_timeout_ms: info
                .idle_timeout
                .map(|t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX)),
            username: info.username.clone(),
            password: info.password.clone(),
        };
        self.engine.bind(open)?;
        self.state = ConnectionState::Connecting;
        let id = info.id.clone().into();
        self.connection = Some(info);
        self.track_create(id, request);
        Ok(())
    }

    fn create_session(
        &mut self,
        info: SessionInfo,
        request: ProviderRequest<ResourceInfo>,
    ) -> Result<(), ProviderError> {
        self.ensure_connected()?;
        if self.connection.as_ref().map(|c| &c.id) != Some(info.id.connection()) {
            return Err(ProviderError::UnknownResource(
                info.id.connection().clone().into(),
            ));
        }
        if self.sessions.contains_key(&info.id) {
            return Err(ProviderError::IllegalState(format!(
                "session {} already exists",
                info.id
            )));
        }
        let channel = self.engine.begin_session()?;
        let id = info.id.clone();
        self.channels.insert(channel, id.clone());
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                info,
                channel,
                open: false,
            },
        );
        self.track_create(id.into(), request);
        Ok(())
    }

    /// Channel of an open session.
    fn open_channel(&self, session: &SessionId) -> Result<u16, ProviderError> {
        self.ensure_connected()?;
        let entry = self
            .sessions
            .get(session)
            .ok_or_else(|| ProviderError::UnknownResource(session.clone().into()))?;
        if entry.open {
            Ok(entry.channel)
        } else {
            Err(ProviderError::IllegalState(format!(
                "session {session} is not open"
            )))
        }
    }

    fn create_producer(
        &mut self,
        info: ProducerInfo,
        request: ProviderRequest<ResourceInfo>,
    ) -> Result<(), ProviderError> {
        let channel = self.open_channel(info.id.session())?;
        if self.producers.contains_key(&info.id) {
            return Err(ProviderError::IllegalState(format!(
                "producer {} already exists",
                info.id
            )));
        }
        let spec = LinkSpec {
            name: info.id.to_string(),
            role: Role::Sender,
            presettle: info.presettle,
            source: None,
            target: Some(Target {
                address: info.destination.as_ref().map(|d| d.address()),
                dynamic: false,
            }),
        };
        let handle = self.engine.attach_link(channel, spec)?;
        let id = info.id.clone();
        self.links.insert(handle, LinkOwner::Producer(id.clone()));
        self.producers.insert(id.clone(), LinkEntry::new(info, handle));
        self.track_create(id.into(), request);
        Ok(())
    }

    fn create_consumer(
        &mut self,
        info: ConsumerInfo,
        request: ProviderRequest<ResourceInfo>,
    ) -> Result<(), ProviderError> {
        let channel = self.open_channel(info.id.session())?;
        if self.consumers.contains_key(&info.id) {
            return Err(ProviderError::IllegalState(format!(
                "consumer {} already exists",
                info.id
            )));
        }
        let dynamic = info.destination.is_temporary() && info.destination.name().is_empty();
        let spec = LinkSpec {
            name: info
                .subscription_name
                .clone()
                .unwrap_or_else(|| info.id.to_string()),
            role: Role::Receiver,
            presettle: false,
            source: Some(Source {
                address: (!dynamic).then(|| info.destination.address()),
                dynamic,
                durable: info.subscription_name.is_some(),
                selector: info.selector.clone(),
                no_local: info.no_local,
                browse: info.browser,
            }),
            target: Some(Target::default()),
        };
        let handle = self.engine.attach_link(channel, spec)?;
        let id = info.id.clone();
        self.links.insert(handle, LinkOwner::Consumer(id.clone()));
        self.consumers.insert(id.clone(), LinkEntry::new(info, handle));
        self.track_create(id.into(), request);
        Ok(())
    }

    fn destroy_connection(
        &mut self,
        info: &ConnectionInfo,
        request: ProviderRequest<()>,
    ) -> Result<(), ProviderError> {
        let id: ResourceId = info.id.clone().into();
        if self.connection.as_ref().map(|c| &c.id) != Some(&info.id) {
            return Err(ProviderError::UnknownResource(id));
        }
        match self.state {
            ConnectionState::Closing => {
                self.pending.destroys.entry(id).or_default().push(request);
                return Ok(());
            }
            ConnectionState::Closed => {
                resolve(&request, Ok(()));
                return Ok(());
            }
            ConnectionState::Failed => return Err(ProviderError::Closed),
            ConnectionState::Disconnected | ConnectionState::Connecting | ConnectionState::Connected => {}
        }
        let cause = ProviderError::ResourceClosed(id.clone());
        self.fail_create(&id, cause.clone());
        self.pending.fail_dependents(&id, &cause);
        self.engine.close(None)?;
        self.state = ConnectionState::Closing;
        let ticket = self.next_ticket();
        self.closing_ticket = Some(ticket);
        self.schedule(
            info.close_timeout,
            Command::RequestExpired {
                resource: id.clone(),
                ticket,
                after: info.close_timeout,
            },
        );
        self.pending.destroys.entry(id).or_default().push(request);
        Ok(())
    }

    fn destroy_session(
        &mut self,
        info: &SessionInfo,
        request: ProviderRequest<()>,
    ) -> Result<(), ProviderError> {
        self.ensure_running()?;
        let id: ResourceId = info.id.clone().into();
        let channel = self
            .sessions
            .get(&info.id)
            .map(|entry| entry.channel)
            .ok_or_else(|| ProviderError::UnknownResource(id.clone()))?;
        if let Some(requests) = self.pending.destroys.get_mut(&id) {
            requests.push(request);
            return Ok(());
        }
        let cause = ProviderError::ResourceClosed(id.clone());
        self.fail_create(&id, cause.clone());
        self.pending.fail_dependents(&id, &cause);
        self.engine.end_session(channel)?;
        self.pending.destroys.insert(id, vec![request]);
        Ok(())
    }

    fn destroy_link(
        &mut self,
        id: ResourceId,
        handle: Option<LinkHandle>,
        request: ProviderRequest<()>,
    ) -> Result<(), ProviderError> {
        self.ensure_running()?;
        let handle = handle.ok_or_else(|| ProviderError::UnknownResource(id.clone()))?;
        if let Some(requests) = self.pending.destroys.get_mut(&id) {
            requests.push(request);
            return Ok(());
        }
        let cause = ProviderError::ResourceClosed(id.clone());
        self.fail_create(&id, cause.clone());
        self.pending.fail_dependents(&id, &cause);
        self.engine.detach_link(handle)?;
        self.pending.destroys.insert(id, vec![request]);
        Ok(())
    }

    fn send(
        &mut self,
        outbound: OutboundMessage,
        request: &ProviderRequest<()>,
    ) -> Result<(), ProviderError> {
        self.ensure_running()?;
        let OutboundMessage {
            producer,
            destination,
            mut message,
        } = outbound;
        let entry = self
            .producers
            .get(&producer)
            .ok_or_else(|| ProviderError::UnknownResource(producer.clone().into()))?;
        if !entry.open {
            return Err(ProviderError::IllegalState(format!(
                "producer {producer} is not attached"
            )));
        }
        let destination = entry.info.destination.clone().or(destination).ok_or_else(|| {
            ProviderError::IllegalState("anonymous producer needs a destination".into())
        })?;
        message.destination = Some(destination);
        let payload = Bytes::from(message.to_bytes()?);
        let (handle, settled) = (entry.handle, entry.info.presettle);
        let delivery = self.engine.transfer(handle, payload)?;
        self.pending.sends.insert(
            delivery,
            PendingSend {
                producer,
                settled,
                request: request.clone(),
            },
        );
        Ok(())
    }

    fn acknowledge(
        &mut self,
        consumer: &ConsumerId,
        delivery: DeliveryId,
        ack: AckType,
    ) -> Result<(), ProviderError> {
        self.ensure_running()?;
        let handle = self
            .consumers
            .get(consumer)
            .map(|entry| entry.handle)
            .ok_or_else(|| ProviderError::UnknownResource(consumer.clone().into()))?;
        self.engine.settle(handle, delivery, ack.into())?;
        self.replenish(consumer);
        Ok(())
    }

    /// Restore prefetch credit once half of it has been used.
    fn replenish(&mut self, consumer: &ConsumerId) {
        let Some(entry) = self.consumers.get_mut(consumer) else {
            return;
        };
        let prefetch = entry.info.prefetch;
        if !entry.open || prefetch == 0 || entry.credit > prefetch / 2 {
            return;
        }
        match self.engine.flow(entry.handle, prefetch, false) {
            Ok(()) => entry.credit = prefetch,
            Err(e) => tracing::debug!(%consumer, error = %e, "credit top-up failed"),
        }
    }

    fn discharge(
        &mut self,
        session: SessionId,
        commit: bool,
        request: &ProviderRequest<()>,
    ) -> Result<(), ProviderError> {
        self.ensure_running()?;
        let entry = self
            .sessions
            .get(&session)
            .ok_or_else(|| ProviderError::UnknownResource(session.clone().into()))?;
        if !entry.info.is_transacted() {
            return Err(ProviderError::IllegalState(format!(
                "session {session} is not transacted"
            )));
        }
        if self.pending.discharges.contains_key(&session) {
            return Err(ProviderError::IllegalState(format!(
                "session {session} already has a discharge in flight"
            )));
        }
        self.engine.discharge(entry.channel, !commit)?;
        self.pending.discharges.insert(session, request.clone());
        Ok(())
    }

    fn pull(
        &mut self,
        consumer: ConsumerId,
        timeout: Duration,
        request: &ProviderRequest<PullOutcome>,
    ) -> Result<(), ProviderError> {
        self.ensure_running()?;
        let entry = self
            .consumers
            .get_mut(&consumer)
            .ok_or_else(|| ProviderError::UnknownResource(consumer.clone().into()))?;
        if !entry.open {
            return Err(ProviderError::IllegalState(format!(
                "consumer {consumer} is not attached"
            )));
        }
        if self.pending.pulls.contains_key(&consumer) {
            return Err(ProviderError::IllegalState(format!(
                "consumer {consumer} already has a pull in flight"
            )));
        }
        let credit = entry.credit.max(1);
        self.engine.flow(entry.handle, credit, true)?;
        entry.credit = credit;
        let ticket = self.next_ticket();
        if !timeout.is_zero() {
            self.schedule(
                timeout,
                Command::PullExpired {
                    consumer: consumer.clone(),
                    ticket,
                },
            );
        }
        self.pending.pulls.insert(
            consumer,
            PendingPull {
                ticket,
                request: request.clone(),
            },
        );
        Ok(())
    }

    fn pull_expired(&mut self, consumer: &ConsumerId, ticket: u64) {
        if self
            .pending
            .pulls
            .get(consumer)
            .is_none_or(|pending| pending.ticket != ticket)
        {
            return;
        }
        if let Some(pending) = self.pending.pulls.remove(consumer) {
            resolve(&pending.request, Ok(PullOutcome::NoMessage));
        }
        if let Some(entry) = self.consumers.get_mut(consumer) {
            if entry.info.prefetch == 0 && entry.open {
                if let Err(e) = self.engine.flow(entry.handle, 0, false) {
                    tracing::debug!(%consumer, error = %e, "credit revoke failed");
                }
                entry.credit = 0;
            }
        }
    }

    fn unsubscribe(&mut self, name: &str, request: &ProviderRequest<()>) -> Result<(), ProviderError> {
        self.ensure_connected()?;
        if self
            .consumers
            .values()
            .any(|entry| entry.info.subscription_name.as_deref() == Some(name))
        {
            return Err(ProviderError::IllegalState(format!(
                "subscription {name} has an active consumer"
            )));
        }
        let channel = self
            .sessions
            .values()
            .filter(|entry| entry.open)
            .map(|entry| entry.channel)
            .min()
            .ok_or_else(|| ProviderError::IllegalState("unsubscribe needs an open session".into()))?;
        let spec = LinkSpec {
            name: name.to_owned(),
            role: Role::Receiver,
            presettle: false,
            source: Some(Source {
                durable: true,
                ..Source::default()
            }),
            target: None,
        };
        let handle = self.engine.attach_link(channel, spec)?;
        self.links.insert(handle, LinkOwner::Unsubscribe);
        self.pending.unsubscribes.insert(handle, request.clone());
        Ok(())
    }

    fn request_expired(&mut self, resource: &ResourceId, ticket: u64, after: Duration) {
        let expired = self
            .pending
            .creates
            .get(resource)
            .is_some_and(|pending| pending.ticket == ticket);
        if expired {
            tracing::debug!(%resource, ?after, "create timed out");
            self.rollback(resource);
            self.fail_create(resource, ProviderError::Timeout(after));
            return;
        }
        if matches!(resource, ResourceId::Connection(_))
            && self.state == ConnectionState::Closing
            && self.closing_ticket == Some(ticket)
        {
            tracing::debug!(%resource, ?after, "close timed out");
            for request in self.pending.destroys.remove(resource).unwrap_or_default() {
                resolve(&request, Err(ProviderError::Timeout(after)));
            }
            self.release_transport();
            self.state = ConnectionState::Closed;
            self.shared.mark_failed();
            self.pending.fail_all(&ProviderError::Closed);
        }
    }

    /// Undo a create that will never complete.
    fn rollback(&mut self, resource: &ResourceId) {
        let outcome = match resource {
            ResourceId::Connection(_) => {
                self.state = ConnectionState::Failed;
                self.shared.mark_failed();
                self.release_transport();
                Ok(())
            }
            ResourceId::Session(id) => match self.remove_session(id) {
                Some(channel) => self.engine.end_session(channel),
                None => Ok(()),
            },
            ResourceId::Producer(id) => match self.producers.remove(id) {
                Some(entry) => {
                    self.links.remove(&entry.handle);
                    self.engine.detach_link(entry.handle)
                }
                None => Ok(()),
            },
            ResourceId::Consumer(id) => match self.consumers.remove(id) {
                Some(entry) => {
                    self.links.remove(&entry.handle);
                    self.engine.detach_link(entry.handle)
                }
                None => Ok(()),
            },
        };
        if let Err(e) = outcome {
            tracing::debug!(%resource, error = %e, "rollback failed");
        }
    }

    /// Forget a session and every link on it. Returns its channel.
    fn remove_session(&mut self, id: &SessionId) -> Option<u16> {
        let entry = self.sessions.remove(id)?;
        self.channels.remove(&entry.channel);
        let producers: Vec<_> = self
            .producers
            .iter()
            .filter(|(producer, _)| producer.session() == id)
            .map(|(producer, entry)| (producer.clone(), entry.handle))
            .collect();
        for (producer, handle) in producers {
            self.producers.remove(&producer);
            self.links.remove(&handle);
        }
        let consumers: Vec<_> = self
            .consumers
            .iter()
            .filter(|(consumer, _)| consumer.session() == id)
            .map(|(consumer, entry)| (consumer.clone(), entry.handle))
            .collect();
        for (consumer, handle) in consumers {
            self.consumers.remove(&consumer);
            self.links.remove(&handle);
        }
        Some(entry.channel)
    }

    fn on_event(&mut self, event: EngineEvent) {
        tracing::trace!(?event, "engine event");
        match event {
            EngineEvent::ConnectionOpened { container_id } => self.connection_opened(&container_id),
            EngineEvent::ConnectionClosed { error } => self.connection_closed(error),
            EngineEvent::SessionOpened { channel } => self.session_opened(channel),
            EngineEvent::SessionClosed { channel, error } => self.session_closed(channel, error),
            EngineEvent::LinkOpened {
                handle,
                remote_address,
            } => self.link_opened(handle, remote_address),
            EngineEvent::LinkClosed { handle, error } => self.link_closed(handle, error),
            EngineEvent::LinkCredit { handle, credit } => {
                tracing::trace!(%handle, credit, "link credit");
            }
            EngineEvent::LinkDrained { handle } => self.link_drained(handle),
            EngineEvent::Delivery {
                handle,
                delivery,
                settled,
                payload,
            } => self.delivery(handle, delivery, settled, &payload),
            EngineEvent::DeliverySent {
                delivery, settled, ..
            } => {
                if settled {
                    if let Some(pending) = self.pending.sends.remove(&delivery) {
                        resolve(&pending.request, Ok(()));
                    }
                }
            }
            EngineEvent::DeliveryUpdated { delivery, state } => {
                let Some(pending) = self.pending.sends.remove(&delivery) else {
                    tracing::debug!(%delivery, "disposition for unknown delivery");
                    return;
                };
                debug_assert!(!pending.settled, "presettled send got a disposition");
                let outcome = match state {
                    DeliveryState::Accepted => Ok(()),
                    other => Err(ProviderError::DeliveryRejected(other)),
                };
                resolve(&pending.request, outcome);
            }
            EngineEvent::Discharged { channel, error } => {
                let Some(session) = self.channels.get(&channel) else {
                    return;
                };
                if let Some(request) = self.pending.discharges.remove(session) {
                    resolve(&request, error.map_or(Ok(()), |e| Err(ProviderError::Remote(e))));
                }
            }
        }
    }

    fn connection_opened(&mut self, container_id: &str) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        let Some(info) = self.connection.clone() else {
            return;
        };
        log::info!("connection {} opened to {} ({container_id})", info.id, self.address);
        self.state = ConnectionState::Connected;
        self.complete_create(&info.id.clone().into(), ResourceInfo::Connection(info));
    }

    fn connection_closed(&mut self, error: Option<ErrorCondition>) {
        let Some(id) = self.connection.as_ref().map(|c| ResourceId::from(c.id.clone())) else {
            return;
        };
        if self.state == ConnectionState::Closing {
            self.complete_destroys(&id);
            self.release_transport();
            self.state = ConnectionState::Closed;
            self.shared.mark_failed();
            self.pending.fail_all(&ProviderError::ResourceClosed(id));
            log::info!("connection to {} closed", self.address);
            return;
        }
        if let Err(e) = self.engine.close(None) {
            tracing::debug!(error = %e, "replying to remote close failed");
        }
        self.pump();
        self.fail(ProviderError::RemoteClosed {
            resource: id,
            condition: error,
        });
    }

    fn session_opened(&mut self, channel: u16) {
        let Some(id) = self.channels.get(&channel).cloned() else {
            tracing::debug!(channel, "begin for forgotten session");
            return;
        };
        let Some(entry) = self.sessions.get_mut(&id) else {
            return;
        };
        entry.open = true;
        let info = ResourceInfo::Session(entry.info.clone());
        self.complete_create(&id.into(), info);
    }

    fn session_closed(&mut self, channel: u16, error: Option<ErrorCondition>) {
        let Some(id) = self.channels.get(&channel).cloned() else {
            tracing::debug!(channel, "end for forgotten session");
            return;
        };
        let resource: ResourceId = id.clone().into();
        if self.pending.destroys.contains_key(&resource) {
            self.remove_session(&id);
            self.complete_destroys(&resource);
            return;
        }
        if let Err(e) = self.engine.end_session(channel) {
            tracing::debug!(channel, error = %e, "replying to remote end failed");
        }
        self.remove_session(&id);
        let cause = ProviderError::RemoteClosed {
            resource: resource.clone(),
            condition: error,
        };
        if self.pending.creates.contains_key(&resource) {
            self.fail_create(&resource, cause);
            return;
        }
        self.pending.fail_dependents(&resource, &cause);
        self.notify_remote_close(&resource, cause);
    }

    fn link_opened(&mut self, handle: LinkHandle, remote_address: Option<String>) {
        let Some(owner) = self.links.get(&handle).cloned() else {
            tracing::debug!(%handle, "attach for forgotten link");
            return;
        };
        match owner {
            LinkOwner::Producer(id) => {
                let Some(entry) = self.producers.get_mut(&id) else {
                    return;
                };
                entry.open = true;
                entry.info.remote_address = remote_address;
                let info = ResourceInfo::Producer(entry.info.clone());
                self.complete_create(&id.into(), info);
            }
            LinkOwner::Consumer(id) => {
                let Some(entry) = self.consumers.get_mut(&id) else {
                    return;
                };
                entry.open = true;
                entry.info.remote_address = remote_address;
                let prefetch = entry.info.prefetch;
                if prefetch > 0 {
                    match self.engine.flow(handle, prefetch, false) {
                        Ok(()) => entry.credit = prefetch,
                        Err(e) => tracing::debug!(%id, error = %e, "initial credit failed"),
                    }
                }
                let info = ResourceInfo::Consumer(entry.info.clone());
                self.complete_create(&id.into(), info);
            }
            LinkOwner::Unsubscribe => {
                if let Err(e) = self.engine.detach_link(handle) {
                    if let Some(request) = self.pending.unsubscribes.remove(&handle) {
                        resolve(&request, Err(e.into()));
                    }
                }
            }
        }
    }

    fn link_closed(&mut self, handle: LinkHandle, error: Option<ErrorCondition>) {
        let Some(owner) = self.links.remove(&handle) else {
            tracing::debug!(%handle, "detach for forgotten link");
            return;
        };
        let resource: ResourceId = match owner {
            LinkOwner::Unsubscribe => {
                if let Err(e) = self.engine.detach_link(handle) {
                    tracing::trace!(%handle, error = %e, "unsubscribe link already released");
                }
                if let Some(request) = self.pending.unsubscribes.remove(&handle) {
                    resolve(&request, error.map_or(Ok(()), |e| Err(ProviderError::Remote(e))));
                }
                return;
            }
            LinkOwner::Producer(id) => {
                self.producers.remove(&id);
                id.into()
            }
            LinkOwner::Consumer(id) => {
                self.consumers.remove(&id);
                id.into()
            }
        };
        if self.pending.destroys.contains_key(&resource) {
            self.complete_destroys(&resource);
            return;
        }
        if let Err(e) = self.engine.detach_link(handle) {
            tracing::debug!(%handle, error = %e, "replying to remote detach failed");
        }
        let cause = ProviderError::RemoteClosed {
            resource: resource.clone(),
            condition: error,
        };
        if self.pending.creates.contains_key(&resource) {
            self.fail_create(&resource, cause);
            return;
        }
        self.pending.fail_dependents(&resource, &cause);
        self.notify_remote_close(&resource, cause);
    }

    fn link_drained(&mut self, handle: LinkHandle) {
        let Some(LinkOwner::Consumer(id)) = self.links.get(&handle).cloned() else {
            return;
        };
        if let Some(entry) = self.consumers.get_mut(&id) {
            entry.credit = 0;
        }
        if let Some(pending) = self.pending.pulls.remove(&id) {
            resolve(&pending.request, Ok(PullOutcome::NoMessage));
        }
        self.replenish(&id);
    }

    fn delivery(&mut self, handle: LinkHandle, delivery: DeliveryId, settled: bool, payload: &[u8]) {
        let Some(LinkOwner::Consumer(id)) = self.links.get(&handle).cloned() else {
            tracing::debug!(%handle, "delivery on unknown link");
            return;
        };
        let message = match JmsMessage::from_bytes(payload) {
            Ok((message, _)) => message,
            Err(e) => {
                tracing::warn!(consumer = %id, error = %e, "undecodable message");
                if !settled {
                    let condition = ErrorCondition::new("jmswire:decode-error", e.to_string());
                    if let Err(e) = self.engine.settle(handle, delivery, DeliveryState::Rejected(Some(condition))) {
                        tracing::debug!(error = %e, "rejecting undecodable message failed");
                    }
                }
                return;
            }
        };
        if let Some(entry) = self.consumers.get_mut(&id) {
            entry.credit = entry.credit.saturating_sub(1);
        }
        let inbound = InboundDelivery {
            consumer: id.clone(),
            delivery,
            settled,
            message,
        };
        if let Some(pending) = self.pending.pulls.remove(&id) {
            resolve(
                &pending.request,
                Ok(PullOutcome::Delivered(Box::new(inbound.clone()))),
            );
        }
        if let Some(listener) = self.shared.listener() {
            listener.on_inbound_message(&id, inbound);
        }
        if settled {
            self.replenish(&id);
        }
    }
}

struct Creation<'a> {
    driver: &'a mut ProviderDriver,
    request: ProviderRequest<ResourceInfo>,
}

impl ResourceVisitor for Creation<'_> {
    type Output = ();
    type Error = ProviderError;

    fn process_connection(&mut self, info: ConnectionInfo) -> Result<(), ProviderError> {
        self.driver.create_connection(info, self.request.clone())
    }

    fn process_session(&mut self, info: SessionInfo) -> Result<(), ProviderError> {
        self.driver.create_session(info, self.request.clone())
    }

    fn process_producer(&mut self, info: ProducerInfo) -> Result<(), ProviderError> {
        self.driver.create_producer(info, self.request.clone())
    }

    fn process_consumer(&mut self, info: ConsumerInfo) -> Result<(), ProviderError> {
        self.driver.create_consumer(info, self.request.clone())
    }
}

struct Destruction<'a> {
    driver: &'a mut ProviderDriver,
    request: ProviderRequest<()>,
}

impl ResourceVisitor for Destruction<'_> {
    type Output = ();
    type Error = ProviderError;

    fn process_connection(&mut self, info: ConnectionInfo) -> Result<(), ProviderError> {
        self.driver.destroy_connection(&info, self.request.clone())
    }

    fn process_session(&mut self, info: SessionInfo) -> Result<(), ProviderError> {
        self.driver.destroy_session(&info, self.request.clone())
    }

    fn process_producer(&mut self, info: ProducerInfo) -> Result<(), ProviderError> {
        let handle = self.driver.producers.get(&info.id).map(|entry| entry.handle);
        self.driver
            .destroy_link(info.id.into(), handle, self.request.clone())
    }

    fn process_consumer(&mut self, info: ConsumerInfo) -> Result<(), ProviderError> {
        let handle = self.driver.consumers.get(&info.id).map(|entry| entry.handle);
        self.driver
            .destroy_link(info.id.into(), handle, self.request.clone())
    }
}
