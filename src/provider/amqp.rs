//! The bundled provider.
//!
//! [`AmqpProvider`] is a thin handle: each public operation creates a
//! request/future pair, queues a [`Command`] for the serial worker and
//! returns the future. All protocol work happens on the worker.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{runtime::Handle, sync::mpsc::UnboundedSender};

use super::{
    PullOutcome,
    Provider,
    ProviderConfig,
    ProviderListener,
    command::{Command, CommandSink},
    driver::{ProviderDriver, Shared},
    trace::TracingFrameTracer,
    worker,
};
use crate::{
    address::RemoteAddress,
    async_result::{ProviderFuture, ProviderRequest, pair},
    engine::{DeliveryId, ProtocolEngine, WireEngine},
    error::ProviderError,
    id::{ConsumerId, SessionId},
    message::{AckType, OutboundMessage},
    meta::ResourceInfo,
    transport::{SocketOptions, TransportEvents, TransportFactory, tcp_factory},
};

/// Builder for [`AmqpProvider`].
///
/// Options not set explicitly are read from the address query string.
pub struct AmqpProviderBuilder {
    address: RemoteAddress,
    config: Option<ProviderConfig>,
    socket_options: Option<SocketOptions>,
    engine: Option<Box<dyn ProtocolEngine>>,
    transport_factory: Option<TransportFactory>,
    runtime: Option<Handle>,
}

impl AmqpProviderBuilder {
    /// Override the configuration read from the address.
    #[must_use]
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the socket options read from the address.
    #[must_use]
    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = Some(options);
        self
    }

    /// Use `engine` instead of a fresh [`WireEngine`].
    #[must_use]
    pub fn engine(mut self, engine: Box<dyn ProtocolEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Build transports with `factory` instead of plain TCP.
    #[must_use]
    pub fn transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Run the worker on `runtime` instead of the current one.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Spawn the worker and return the provider handle.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidAddress`] for unparsable address
    /// options and [`ProviderError::IllegalState`] when no runtime was given
    /// and none is current.
    pub fn build(self) -> Result<AmqpProvider, ProviderError> {
        let address = self.address;
        let config = match self.config {
            Some(config) => config,
            None => ProviderConfig::from_address(&address)?,
        };
        let socket_options = match self.socket_options {
            Some(options) => options,
            None => SocketOptions::from_address(&address)?,
        };
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|_| ProviderError::IllegalState("no tokio runtime available".into()))?,
        };
        let mut engine = self
            .engine
            .unwrap_or_else(|| Box::new(WireEngine::new(config.engine_config())));
        if config.trace_frames() {
            engine.set_tracer(Some(Box::new(TracingFrameTracer::new(address.to_string()))));
        }

        let (commands, queue) = tokio::sync::mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let driver = ProviderDriver::new(
            address.clone(),
            config,
            engine,
            Arc::clone(&shared),
            commands.clone(),
        );
        runtime.spawn(worker::run(
            driver,
            queue,
            shared.shutdown.clone(),
            address.to_string(),
        ));

        Ok(AmqpProvider {
            shared,
            commands,
            address,
            runtime,
            transport_factory: self.transport_factory.unwrap_or_else(tcp_factory),
            socket_options,
            connected: AtomicBool::new(false),
        })
    }
}

/// Provider speaking the bundled wire protocol over a pluggable transport.
///
/// Dropping the handle stops the worker; requests still pending then fail
/// with [`ProviderError::Closed`].
pub struct AmqpProvider {
    shared: Arc<Shared>,
    commands: UnboundedSender<Command>,
    address: RemoteAddress,
    runtime: Handle,
    transport_factory: TransportFactory,
    socket_options: SocketOptions,
    connected: AtomicBool,
}

impl AmqpProvider {
    /// Start building a provider for `address`.
    #[must_use]
    pub fn builder(address: RemoteAddress) -> AmqpProviderBuilder {
        AmqpProviderBuilder {
            address,
            config: None,
            socket_options: None,
            engine: None,
            transport_factory: None,
            runtime: None,
        }
    }

    /// Build a provider for `address` with options read from the address.
    ///
    /// # Errors
    ///
    /// See [`AmqpProviderBuilder::build`].
    pub fn new(address: RemoteAddress) -> Result<Self, ProviderError> { Self::builder(address).build() }

    fn submit<T>(&self, command: impl FnOnce(ProviderRequest<T>) -> Command) -> ProviderFuture<T> {
        if !self.shared.is_usable() {
            return ProviderFuture::failed(ProviderError::Closed);
        }
        let (request, future) = pair();
        if self.commands.send(command(request)).is_err() {
            return ProviderFuture::failed(ProviderError::Closed);
        }
        future
    }
}

impl Drop for AmqpProvider {
    fn drop(&mut self) { self.shared.shutdown.cancel(); }
}

#[async_trait]
impl Provider for AmqpProvider {
    async fn connect(&self) -> Result<(), ProviderError> {
        if !self.shared.is_usable() {
            return Err(ProviderError::Closed);
        }
        if self.connected.swap(true, Ordering::AcqRel) {
            return Err(ProviderError::IllegalState("provider is already connected".into()));
        }
        let mut transport = (self.transport_factory)(&self.address, self.socket_options);
        let events: TransportEvents = Arc::new(CommandSink(self.commands.clone()));
        let connecting = self.runtime.spawn(async move {
            let connected = transport.connect(events).await;
            connected.map(|()| transport)
        });
        let outcome = match connecting.await {
            Ok(outcome) => outcome,
            Err(e) => Err(io::Error::other(e)),
        };
        match outcome {
            Ok(transport) => self
                .commands
                .send(Command::Attach(transport))
                .map_err(|_| ProviderError::Closed),
            Err(source) => {
                self.connected.store(false, Ordering::Release);
                log::warn!("connect to {} failed: {source}", self.address);
                Err(ProviderError::Connect {
                    address: self.address.to_string(),
                    source: Arc::new(source),
                })
            }
        }
    }

    fn close(&self) -> ProviderFuture<()> {
        if !self.shared.begin_close() {
            return ProviderFuture::ready(());
        }
        let (request, future) = pair();
        if self.commands.send(Command::Close(request)).is_err() {
            return ProviderFuture::ready(());
        }
        future
    }

    fn create(&self, resource: ResourceInfo) -> ProviderFuture<ResourceInfo> {
        self.submit(|request| Command::Create(resource, request))
    }

    fn destroy(&self, resource: ResourceInfo) -> ProviderFuture<()> {
        self.submit(|request| Command::Destroy(resource, request))
    }

    fn send(&self, message: OutboundMessage) -> ProviderFuture<()> {
        self.submit(|request| Command::Send(message, request))
    }

    fn acknowledge(&self, consumer: ConsumerId, delivery: DeliveryId, ack: AckType) -> ProviderFuture<()> {
        self.submit(|request| Command::Acknowledge {
            consumer,
            delivery,
            ack,
            request,
        })
    }

    fn commit(&self, session: SessionId) -> ProviderFuture<()> {
        self.submit(|request| Command::Discharge {
            session,
            commit: true,
            request,
        })
    }

    fn rollback(&self, session: SessionId) -> ProviderFuture<()> {
        self.submit(|request| Command::Discharge {
            session,
            commit: false,
            request,
        })
    }

    fn pull(&self, consumer: ConsumerId, timeout: Duration) -> ProviderFuture<PullOutcome> {
        self.submit(|request| Command::Pull {
            consumer,
            timeout,
            request,
        })
    }

    fn unsubscribe(&self, subscription: &str) -> ProviderFuture<()> {
        let name = subscription.to_owned();
        self.submit(|request| Command::Unsubscribe(name, request))
    }

    fn set_listener(&self, listener: Arc<dyn ProviderListener>) { self.shared.set_listener(listener); }

    fn listener(&self) -> Option<Arc<dyn ProviderListener>> { self.shared.listener() }

    fn remote_address(&self) -> &RemoteAddress { &self.address }
}
