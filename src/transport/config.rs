//! Socket options for TCP transports.

use std::{io, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpSocket;

use crate::address::{AddressError, RemoteAddress, parse_option};

/// Socket options applied before connecting.
///
/// Unset options leave the operating system default in place.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use jmswire::transport::SocketOptions;
///
/// let options = SocketOptions::default()
///     .nodelay(true)
///     .keepalive(Some(Duration::from_secs(30)));
/// assert_ne!(options, SocketOptions::default());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    nodelay: Option<bool>,
    keepalive: Option<Option<Duration>>,
    linger: Option<Option<Duration>>,
    send_buffer_size: Option<u32>,
    recv_buffer_size: Option<u32>,
    reuseaddr: Option<bool>,
    connect_timeout: Option<Duration>,
}

impl SocketOptions {
    /// Read `transport.*` options from `address`.
    ///
    /// Recognised keys are `tcpNoDelay`, `tcpKeepAlive` (milliseconds, zero
    /// disables), `soLinger` (milliseconds, negative disables),
    /// `sendBufferSize`, `receiveBufferSize`, `reuseAddress` and
    /// `connectTimeout` (milliseconds). Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::InvalidOption`] for unparsable values.
    pub fn from_address(address: &RemoteAddress) -> Result<Self, AddressError> {
        const PREFIX: &str = "transport";
        let mut options = Self::default();
        for (key, value) in address.options_with_prefix(PREFIX) {
            options = match key {
                "tcpNoDelay" => options.nodelay(parse_option(PREFIX, key, value)?),
                "tcpKeepAlive" => {
                    let millis: u64 = parse_option(PREFIX, key, value)?;
                    options.keepalive((millis > 0).then(|| Duration::from_millis(millis)))
                }
                "soLinger" => {
                    let millis: i64 = parse_option(PREFIX, key, value)?;
                    options.linger(u64::try_from(millis).ok().map(Duration::from_millis))
                }
                "sendBufferSize" => options.send_buffer_size(parse_option(PREFIX, key, value)?),
                "receiveBufferSize" => options.recv_buffer_size(parse_option(PREFIX, key, value)?),
                "reuseAddress" => options.reuseaddr(parse_option(PREFIX, key, value)?),
                "connectTimeout" => {
                    options.connect_timeout(Duration::from_millis(parse_option(PREFIX, key, value)?))
                }
                other => {
                    tracing::debug!(option = other, "ignoring unknown transport option");
                    options
                }
            };
        }
        Ok(options)
    }

    /// Configure `TCP_NODELAY`.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = Some(enabled);
        self
    }

    /// Configure `SO_KEEPALIVE`; `None` disables it.
    #[must_use]
    pub fn keepalive(mut self, duration: Option<Duration>) -> Self {
        self.keepalive = Some(duration);
        self
    }

    /// Configure `SO_LINGER`; `None` disables it.
    #[must_use]
    pub fn linger(mut self, duration: Option<Duration>) -> Self {
        self.linger = Some(duration);
        self
    }

    /// Configure the socket send buffer size.
    #[must_use]
    pub fn send_buffer_size(mut self, size: u32) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Configure the socket receive buffer size.
    #[must_use]
    pub fn recv_buffer_size(mut self, size: u32) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Configure `SO_REUSEADDR`.
    #[must_use]
    pub fn reuseaddr(mut self, enabled: bool) -> Self {
        self.reuseaddr = Some(enabled);
        self
    }

    /// Bound the time spent establishing the connection.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Configured connect timeout, if any.
    #[must_use]
    pub fn connect_timeout_value(&self) -> Option<Duration> { self.connect_timeout }

    pub(crate) fn apply(&self, socket: &TcpSocket) -> io::Result<()> {
        if let Some(enabled) = self.nodelay {
            socket.set_nodelay(enabled)?;
        }
        if let Some(keepalive) = self.keepalive {
            match keepalive {
                Some(duration) => {
                    socket.set_keepalive(true)?;
                    let config = TcpKeepalive::new().with_time(duration);
                    SockRef::from(socket).set_tcp_keepalive(&config)?;
                }
                None => socket.set_keepalive(false)?,
            }
        }
        if let Some(linger) = self.linger {
            socket.set_linger(linger)?;
        }
        if let Some(size) = self.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(enabled) = self.reuseaddr {
            socket.set_reuseaddr(enabled)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn options(query: &str) -> Result<SocketOptions, AddressError> {
        SocketOptions::from_address(&RemoteAddress::parse(&format!("amqp://h?{query}")).expect("address"))
    }

    #[test]
    fn transport_options_are_read_from_the_address() {
        let parsed = options(
            "transport.tcpNoDelay=true&transport.tcpKeepAlive=30000&transport.soLinger=-1&transport.sendBufferSize=8192",
        )
        .expect("options");
        let expected = SocketOptions::default()
            .nodelay(true)
            .keepalive(Some(Duration::from_secs(30)))
            .linger(None)
            .send_buffer_size(8192);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn zero_keepalive_disables() {
        assert_eq!(
            options("transport.tcpKeepAlive=0").expect("options"),
            SocketOptions::default().keepalive(None)
        );
    }

    #[rstest]
    #[case("transport.tcpNoDelay=maybe", "transport.tcpNoDelay")]
    #[case("transport.sendBufferSize=-3", "transport.sendBufferSize")]
    fn bad_values_name_the_option(#[case] query: &str, #[case] key: &str) {
        match options(query) {
            Err(AddressError::InvalidOption { key: k, .. }) => assert_eq!(k, key),
            other => panic!("expected invalid option, got {other:?}"),
        }
    }
}
