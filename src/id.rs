//! Composite hierarchical resource identifiers.
//!
//! Every resource a provider manages is named by the chain of its ancestors:
//! `<connection>:<session>` for sessions and `<connection>:<session>:<link>`
//! for producers and consumers. The connection value is an opaque string and
//! may itself contain colons, so parsing peels numeric segments off the right
//! hand side and treats whatever remains as the connection value.
//!
//! The canonical string is built once when an id is created and then shared,
//! which keeps hashing and comparison cheap when ids are used as table keys.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    process,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

/// Errors produced while parsing a canonical id string.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IdParseError {
    /// The input, or the connection value left after parsing, was empty.
    #[error("resource id is empty")]
    Empty,
    /// A segment between separators was empty.
    #[error("resource id `{0}` has an empty segment")]
    MissingSegment(String),
    /// A session or link segment was not an unsigned integer.
    #[error("resource id segment `{0}` is not a sequence number")]
    InvalidSequence(String),
}

/// Identifier of a provider connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// Wrap an opaque connection value.
    ///
    /// # Errors
    ///
    /// Returns [`IdParseError::Empty`] when `value` is empty.
    pub fn new(value: impl Into<String>) -> Result<Self, IdParseError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdParseError::Empty);
        }
        Ok(Self(Arc::from(value)))
    }

    /// Return the opaque connection value.
    #[must_use]
    pub fn value(&self) -> &str { &self.0 }

    /// Derive the id of session `value` under this connection.
    #[must_use]
    pub fn session(&self, value: u64) -> SessionId { SessionId::new(self.clone(), value) }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for ConnectionId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::new(s) }
}

/// Identifier of a session within a connection.
#[derive(Clone, Debug)]
pub struct SessionId {
    connection: ConnectionId,
    value: u64,
    key: Arc<str>,
}

impl SessionId {
    /// Build a session id from its parent and local sequence number.
    #[must_use]
    pub fn new(connection: ConnectionId, value: u64) -> Self {
        let key = Arc::from(format!("{connection}:{value}"));
        Self {
            connection,
            value,
            key,
        }
    }

    /// Owning connection.
    #[must_use]
    pub fn connection(&self) -> &ConnectionId { &self.connection }

    /// Local sequence number.
    #[must_use]
    pub fn value(&self) -> u64 { self.value }

    /// Derive the id of producer `value` under this session.
    #[must_use]
    pub fn producer(&self, value: u64) -> ProducerId { ProducerId::new(self.clone(), value) }

    /// Derive the id of consumer `value` under this session.
    #[must_use]
    pub fn consumer(&self, value: u64) -> ConsumerId { ConsumerId::new(self.clone(), value) }

    /// Canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.key }
}

macro_rules! link_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name {
            session: SessionId,
            value: u64,
            key: Arc<str>,
        }

        impl $name {
            /// Build the id from its parent session and local sequence number.
            #[must_use]
            pub fn new(session: SessionId, value: u64) -> Self {
                let key = Arc::from(format!("{session}:{value}"));
                Self { session, value, key }
            }

            /// Owning session.
            #[must_use]
            pub fn session(&self) -> &SessionId { &self.session }

            /// Owning connection.
            #[must_use]
            pub fn connection(&self) -> &ConnectionId { self.session.connection() }

            /// Local sequence number.
            #[must_use]
            pub fn value(&self) -> u64 { self.value }

            /// Canonical string form.
            #[must_use]
            pub fn as_str(&self) -> &str { &self.key }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let (parent, value) = split_sequence(s)?;
                Ok(Self::new(parent.parse()?, value))
            }
        }

        keyed_identity!($name);
    };
}

macro_rules! keyed_identity {
    ($name:ident) => {
        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool { self.key == other.key }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) { self.key.hash(state); }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering { self.key.cmp(&other.key) }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.key) }
        }
    };
}

keyed_identity!(SessionId);

impl FromStr for SessionId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (parent, value) = split_sequence(s)?;
        Ok(Self::new(parent.parse()?, value))
    }
}

link_id!(
    /// Identifier of a message producer.
    ProducerId
);

link_id!(
    /// Identifier of a message consumer.
    ConsumerId
);

fn split_sequence(s: &str) -> Result<(&str, u64), IdParseError> {
    if s.is_empty() {
        return Err(IdParseError::Empty);
    }
    let (parent, tail) = s
        .rsplit_once(':')
        .ok_or_else(|| IdParseError::MissingSegment(s.to_owned()))?;
    if parent.is_empty() || tail.is_empty() {
        return Err(IdParseError::MissingSegment(s.to_owned()));
    }
    let value = tail
        .parse()
        .map_err(|_| IdParseError::InvalidSequence(tail.to_owned()))?;
    Ok((parent, value))
}

/// Kind tag for a [`ResourceId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// A connection.
    Connection,
    /// A session.
    Session,
    /// A producer.
    Producer,
    /// A consumer.
    Consumer,
}

/// Any resource identifier.
///
/// Ids order by canonical string. A producer and a consumer with the same
/// string order by kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// Connection id.
    Connection(ConnectionId),
    /// Session id.
    Session(SessionId),
    /// Producer id.
    Producer(ProducerId),
    /// Consumer id.
    Consumer(ConsumerId),
}

impl PartialOrd for ResourceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ResourceId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str()
            .cmp(other.as_str())
            .then_with(|| self.kind().cmp(&other.kind()))
    }
}

impl ResourceId {
    /// Kind of resource this id names.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Connection(_) => ResourceKind::Connection,
            Self::Session(_) => ResourceKind::Session,
            Self::Producer(_) => ResourceKind::Producer,
            Self::Consumer(_) => ResourceKind::Consumer,
        }
    }

    /// Parent id, `None` for connections.
    #[must_use]
    pub fn parent(&self) -> Option<ResourceId> {
        match self {
            Self::Connection(_) => None,
            Self::Session(id) => Some(Self::Connection(id.connection().clone())),
            Self::Producer(id) => Some(Self::Session(id.session().clone())),
            Self::Consumer(id) => Some(Self::Session(id.session().clone())),
        }
    }

    /// Canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connection(id) => id.value(),
            Self::Session(id) => id.as_str(),
            Self::Producer(id) => id.as_str(),
            Self::Consumer(id) => id.as_str(),
        }
    }

    /// Whether `self` equals `ancestor` or lies beneath it.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &ResourceId) -> bool {
        let mut current = Some(self.clone());
        while let Some(id) = current {
            if &id == ancestor {
                return true;
            }
            current = id.parent();
        }
        false
    }

    /// Parse a canonical string as an id of `kind`.
    ///
    /// The kind is required because a connection value may contain colons,
    /// so the string alone cannot say how deep the id is.
    ///
    /// # Errors
    ///
    /// Returns an [`IdParseError`] if the string does not describe an id of
    /// the requested depth.
    pub fn parse(kind: ResourceKind, s: &str) -> Result<Self, IdParseError> {
        Ok(match kind {
            ResourceKind::Connection => Self::Connection(s.parse()?),
            ResourceKind::Session => Self::Session(s.parse()?),
            ResourceKind::Producer => Self::Producer(s.parse()?),
            ResourceKind::Consumer => Self::Consumer(s.parse()?),
        })
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl From<ConnectionId> for ResourceId {
    fn from(value: ConnectionId) -> Self { Self::Connection(value) }
}

impl From<SessionId> for ResourceId {
    fn from(value: SessionId) -> Self { Self::Session(value) }
}

impl From<ProducerId> for ResourceId {
    fn from(value: ProducerId) -> Self { Self::Producer(value) }
}

impl From<ConsumerId> for ResourceId {
    fn from(value: ConsumerId) -> Self { Self::Consumer(value) }
}

/// Mints process-unique connection ids.
///
/// Ids take the form `ID:<host>-<pid>-<epoch-ms>-<seq>`. The host is read
/// from the `HOSTNAME` environment variable and falls back to `localhost`.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    sequence: AtomicU64,
}

impl IdGenerator {
    /// Create a generator with a prefix fixed at construction time.
    #[must_use]
    pub fn new() -> Self {
        let host = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_owned());
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        Self {
            prefix: format!("ID:{host}-{}-{millis}", process::id()),
            sequence: AtomicU64::new(1),
        }
    }

    /// Return the next connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        let seq = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        ConnectionId(Arc::from(format!("{}-{seq}", self.prefix)))
    }
}

impl Default for IdGenerator {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn conn(value: &str) -> ConnectionId { ConnectionId::new(value).expect("non-empty") }

    #[test]
    fn resource_ids_sort_by_canonical_string() {
        let connection = conn("b");
        let mut ids: Vec<ResourceId> = vec![
            connection.session(2).into(),
            conn("a").session(9).consumer(1).into(),
            connection.clone().into(),
            connection.session(10).into(),
            connection.session(2).producer(1).into(),
        ];
        ids.sort();
        let strings: Vec<&str> = ids.iter().map(ResourceId::as_str).collect();
        assert_eq!(strings, ["a:9:1", "b", "b:10", "b:2", "b:2:1"]);

        let producer: ResourceId = connection.session(2).producer(1).into();
        let consumer: ResourceId = connection.session(2).consumer(1).into();
        assert_ne!(producer.cmp(&consumer), Ordering::Equal);
    }

    #[test]
    fn connection_value_may_contain_colons() {
        let producer = conn("ID:host-1:2").session(3).producer(4);
        assert_eq!(producer.as_str(), "ID:host-1:2:3:4");

        let parsed: ProducerId = "ID:host-1:2:3:4".parse().expect("parse producer");
        assert_eq!(parsed, producer);
        assert_eq!(parsed.connection().value(), "ID:host-1:2");
        assert_eq!(parsed.session().value(), 3);
    }

    #[rstest]
    #[case("", IdParseError::Empty)]
    #[case("abc", IdParseError::MissingSegment("abc".into()))]
    #[case(":1", IdParseError::MissingSegment(":1".into()))]
    #[case("abc:", IdParseError::MissingSegment("abc:".into()))]
    #[case("abc:x", IdParseError::InvalidSequence("x".into()))]
    fn malformed_session_ids_are_rejected(#[case] input: &str, #[case] expected: IdParseError) {
        assert_eq!(input.parse::<SessionId>(), Err(expected));
    }

    #[test]
    fn producer_and_consumer_with_same_path_share_canonical_form() {
        let session = conn("c").session(1);
        assert_eq!(session.producer(1).as_str(), session.consumer(1).as_str());
        assert_ne!(
            ResourceId::from(session.producer(1)),
            ResourceId::from(session.consumer(1))
        );
    }

    #[test]
    fn ordering_follows_canonical_string() {
        let session = conn("c").session(1);
        let mut ids = vec![session.producer(10), session.producer(2), session.producer(1)];
        ids.sort();
        let keys: Vec<_> = ids.iter().map(ProducerId::as_str).collect();
        assert_eq!(keys, ["c:1:1", "c:1:10", "c:1:2"]);
    }

    #[test]
    fn descendant_checks_walk_the_parent_chain() {
        let connection = conn("c");
        let session = connection.session(1);
        let consumer = ResourceId::from(session.consumer(7));

        assert!(consumer.is_descendant_of(&ResourceId::from(connection.clone())));
        assert!(consumer.is_descendant_of(&ResourceId::from(session)));
        assert!(!consumer.is_descendant_of(&ResourceId::from(connection.session(2))));
        assert_eq!(consumer.kind(), ResourceKind::Consumer);
    }

    #[test]
    fn generated_connection_ids_are_unique() {
        let generator = IdGenerator::new();
        let ids: HashSet<_> = (0..64).map(|_| generator.next_connection_id()).collect();
        assert_eq!(ids.len(), 64);
        assert!(ids.iter().all(|id| id.value().starts_with("ID:")));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            failure_persistence: None,
            ..ProptestConfig::default()
        })]

        #[test]
        fn canonical_strings_parse_back(
            connection in "[A-Za-z0-9.-][A-Za-z0-9:.-]{0,23}",
            session in any::<u64>(),
            link in any::<u64>(),
        ) {
            let connection = ConnectionId::new(connection).expect("non-empty");
            prop_assert_eq!(&connection.to_string().parse::<ConnectionId>().expect("depth 1"), &connection);

            let session = connection.session(session);
            let parsed: SessionId = session.as_str().parse().expect("depth 2");
            prop_assert_eq!(parsed.connection(), &connection);
            prop_assert_eq!(&parsed, &session);

            let consumer = session.consumer(link);
            let parsed = ResourceId::parse(ResourceKind::Consumer, consumer.as_str()).expect("depth 3");
            prop_assert_eq!(parsed, ResourceId::from(consumer));
        }
    }
}
