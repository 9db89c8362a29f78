//! Resource descriptors and visit-by-kind dispatch.
//!
//! A [`ResourceInfo`] is what clients hand to `create` and `destroy`. The
//! provider never inspects the variant directly; it implements
//! [`ResourceVisitor`] and lets [`ResourceInfo::visit`] route to the handler
//! for the concrete kind.

use std::{fmt, time::Duration};

use bincode::{Decode, Encode};

use crate::id::{ConnectionId, ConsumerId, ProducerId, ResourceId, SessionId};

/// Where messages are sent or consumed from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Destination {
    /// A point-to-point queue.
    Queue(String),
    /// A publish/subscribe topic.
    Topic(String),
    /// A queue scoped to the owning connection.
    TemporaryQueue(String),
    /// A topic scoped to the owning connection.
    TemporaryTopic(String),
}

impl Destination {
    /// Destination name without the address prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Queue(name)
            | Self::Topic(name)
            | Self::TemporaryQueue(name)
            | Self::TemporaryTopic(name) => name,
        }
    }

    /// Address prefix used for link source and target addresses.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Queue(_) => "queue://",
            Self::Topic(_) => "topic://",
            Self::TemporaryQueue(_) => "temp-queue://",
            Self::TemporaryTopic(_) => "temp-topic://",
        }
    }

    /// Whether the destination only lives as long as its connection.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::TemporaryQueue(_) | Self::TemporaryTopic(_))
    }

    /// Full link address, e.g. `queue://orders`.
    #[must_use]
    pub fn address(&self) -> String { format!("{}{}", self.prefix(), self.name()) }

    /// Parse a prefixed link address. Unprefixed addresses are queues.
    #[must_use]
    pub fn from_address(address: &str) -> Self {
        let table: [(&str, fn(String) -> Self); 4] = [
            ("queue://", Self::Queue),
            ("topic://", Self::Topic),
            ("temp-queue://", Self::TemporaryQueue),
            ("temp-topic://", Self::TemporaryTopic),
        ];
        table
            .iter()
            .find_map(|(prefix, make)| address.strip_prefix(prefix).map(|n| make(n.to_owned())))
            .unwrap_or_else(|| Self::Queue(address.to_owned()))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix(), self.name())
    }
}

/// Acknowledgement mode of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AckMode {
    /// Deliveries are acknowledged as soon as they are handed over.
    #[default]
    Auto,
    /// The client acknowledges explicitly.
    Client,
    /// Lazy acknowledgement; duplicates are tolerated.
    DupsOk,
    /// Acknowledgement happens on commit.
    Transacted,
    /// Each delivery is acknowledged on its own.
    Individual,
}

/// Descriptor of a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection id.
    pub id: ConnectionId,
    /// JMS client id, sent as the container id when present.
    pub client_id: Option<String>,
    /// Optional user name.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Virtual host name announced in the open handshake.
    pub hostname: Option<String>,
    /// Per-request timeout, `None` for no timeout.
    pub request_timeout: Option<Duration>,
    /// How long to wait for the remote close.
    pub close_timeout: Duration,
    /// Largest frame the client accepts.
    pub max_frame_size: u32,
    /// Idle timeout advertised to the peer.
    pub idle_timeout: Option<Duration>,
}

impl ConnectionInfo {
    /// Descriptor with defaults for everything but the id.
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            client_id: None,
            username: None,
            password: None,
            hostname: None,
            request_timeout: None,
            close_timeout: Duration::from_secs(15),
            max_frame_size: 1024 * 1024,
            idle_timeout: None,
        }
    }
}

/// Descriptor of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id; its parent is the owning connection.
    pub id: SessionId,
    /// Acknowledgement mode.
    pub ack_mode: AckMode,
}

impl SessionInfo {
    /// Descriptor for a session with the given acknowledgement mode.
    #[must_use]
    pub fn new(id: SessionId, ack_mode: AckMode) -> Self { Self { id, ack_mode } }

    /// Whether commit and rollback apply to the session.
    #[must_use]
    pub fn is_transacted(&self) -> bool { self.ack_mode == AckMode::Transacted }
}

/// Descriptor of a producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerInfo {
    /// Producer id.
    pub id: ProducerId,
    /// Fixed destination, `None` for an anonymous producer.
    pub destination: Option<Destination>,
    /// Send transfers already settled.
    pub presettle: bool,
    /// Address assigned by the remote peer once attached.
    pub remote_address: Option<String>,
}

impl ProducerInfo {
    /// Descriptor for a producer bound to `destination`.
    #[must_use]
    pub fn new(id: ProducerId, destination: Option<Destination>) -> Self {
        Self {
            id,
            destination,
            presettle: false,
            remote_address: None,
        }
    }
}

/// Descriptor of a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerInfo {
    /// Consumer id.
    pub id: ConsumerId,
    /// Source destination.
    pub destination: Destination,
    /// Optional message selector.
    pub selector: Option<String>,
    /// Credit granted up front; zero means pull only.
    pub prefetch: u32,
    /// Skip messages published on the same connection.
    pub no_local: bool,
    /// Durable subscription name.
    pub subscription_name: Option<String>,
    /// Browse without consuming.
    pub browser: bool,
    /// Address assigned by the remote peer once attached.
    pub remote_address: Option<String>,
}

impl ConsumerInfo {
    /// Descriptor for a consumer with default prefetch.
    #[must_use]
    pub fn new(id: ConsumerId, destination: Destination) -> Self {
        Self {
            id,
            destination,
            selector: None,
            prefetch: 100,
            no_local: false,
            subscription_name: None,
            browser: false,
            remote_address: None,
        }
    }
}

/// Any resource descriptor.
#[derive(Clone, Debug, PartialEq, Eq, derive_more::From)]
pub enum ResourceInfo {
    /// Connection descriptor.
    Connection(ConnectionInfo),
    /// Session descriptor.
    Session(SessionInfo),
    /// Producer descriptor.
    Producer(ProducerInfo),
    /// Consumer descriptor.
    Consumer(ConsumerInfo),
}

impl ResourceInfo {
    /// Id of the described resource.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Connection(info) => info.id.clone().into(),
            Self::Session(info) => info.id.clone().into(),
            Self::Producer(info) => info.id.clone().into(),
            Self::Consumer(info) => info.id.clone().into(),
        }
    }

    /// Route to the visitor method matching this descriptor's kind.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by the selected handler.
    pub fn visit<V: ResourceVisitor + ?Sized>(self, visitor: &mut V) -> Result<V::Output, V::Error> {
        match self {
            Self::Connection(info) => visitor.process_connection(info),
            Self::Session(info) => visitor.process_session(info),
            Self::Producer(info) => visitor.process_producer(info),
            Self::Consumer(info) => visitor.process_consumer(info),
        }
    }
}

/// Kind-specific handlers selected by [`ResourceInfo::visit`].
pub trait ResourceVisitor {
    /// Value produced by a successful handler.
    type Output;
    /// Error produced by a failing handler.
    type Error;

    /// Handle a connection descriptor.
    ///
    /// # Errors
    ///
    /// Implementation defined.
    fn process_connection(&mut self, info: ConnectionInfo) -> Result<Self::Output, Self::Error>;

    /// Handle a session descriptor.
    ///
    /// # Errors
    ///
    /// Implementation defined.
    fn process_session(&mut self, info: SessionInfo) -> Result<Self::Output, Self::Error>;

    /// Handle a producer descriptor.
    ///
    /// # Errors
    ///
    /// Implementation defined.
    fn process_producer(&mut self, info: ProducerInfo) -> Result<Self::Output, Self::Error>;

    /// Handle a consumer descriptor.
    ///
    /// # Errors
    ///
    /// Implementation defined.
    fn process_consumer(&mut self, info: ConsumerInfo) -> Result<Self::Output, Self::Error>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    struct KindName;

    impl ResourceVisitor for KindName {
        type Output = &'static str;
        type Error = String;

        fn process_connection(&mut self, _: ConnectionInfo) -> Result<&'static str, String> {
            Ok("connection")
        }

        fn process_session(&mut self, _: SessionInfo) -> Result<&'static str, String> {
            Ok("session")
        }

        fn process_producer(&mut self, _: ProducerInfo) -> Result<&'static str, String> {
            Ok("producer")
        }

        fn process_consumer(&mut self, info: ConsumerInfo) -> Result<&'static str, String> {
            Err(format!("no consumers for {}", info.id))
        }
    }

    fn session() -> SessionId { ConnectionId::new("c").expect("id").session(1) }

    #[test]
    fn visit_routes_by_kind_and_propagates_errors() {
        let mut visitor = KindName;
        let info = ResourceInfo::from(SessionInfo::new(session(), AckMode::Auto));
        assert_eq!(info.visit(&mut visitor), Ok("session"));

        let producer = ResourceInfo::from(ProducerInfo::new(session().producer(1), None));
        assert_eq!(producer.visit(&mut visitor), Ok("producer"));

        let consumer = ResourceInfo::from(ConsumerInfo::new(
            session().consumer(2),
            Destination::Queue("q".into()),
        ));
        assert_eq!(consumer.visit(&mut visitor), Err("no consumers for c:1:2".into()));
    }

    #[rstest]
    #[case(Destination::Queue("orders".into()), "queue://orders")]
    #[case(Destination::Topic("prices".into()), "topic://prices")]
    #[case(Destination::TemporaryQueue("tmp-1".into()), "temp-queue://tmp-1")]
    #[case(Destination::TemporaryTopic("tmp-2".into()), "temp-topic://tmp-2")]
    fn destination_addresses_use_kind_prefixes(#[case] destination: Destination, #[case] address: &str) {
        assert_eq!(destination.address(), address);
        assert_eq!(Destination::from_address(address), destination);
    }

    #[test]
    fn bare_address_is_a_queue() {
        assert_eq!(Destination::from_address("orders"), Destination::Queue("orders".into()));
    }
}
