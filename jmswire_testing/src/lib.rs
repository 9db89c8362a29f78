//! Test doubles for exercising [`jmswire`] providers over real sockets.
//!
//! [`ScriptedBroker`] listens on a loopback port and answers the bundled
//! wire protocol with canned replies, so a provider can be driven end to
//! end without an external broker. The in-memory doubles from
//! `jmswire::test_support` are re-exported for tests that need no socket.
//!
//! ```rust,no_run
//! use jmswire_testing::ScriptedBroker;
//!
//! # async fn example() -> std::io::Result<()> {
//! let broker = ScriptedBroker::start().await?;
//! let uri = broker.uri();
//! # let _ = uri;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod logging;

pub use broker::{BrokerBehaviour, ScriptedBroker};
pub use jmswire::test_support::{ChannelTransport, ListenerEvent, RecordingListener, TransportProbe};
pub use logging::{LoggerHandle, logger};
