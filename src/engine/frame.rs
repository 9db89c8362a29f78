//! Frame layout and performative bodies for [`super::WireEngine`].
//!
//! A frame is a 4-byte big-endian length prefix (handled by `tokio_util`'s
//! [`LengthDelimitedCodec`]), followed by a 2-byte big-endian channel number
//! and a bincode encoded [`Performative`].

use std::io;

use bincode::{Decode, Encode, config, decode_from_slice, encode_to_vec};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::{DeliveryState, ErrorCondition};
use crate::byte_order::{read_network_u16, write_network_u16};

/// Length prefix size in bytes.
pub const LENGTH_HEADER_SIZE: usize = 4;
/// Channel header size in bytes.
pub const CHANNEL_HEADER_SIZE: usize = 2;
/// Smallest accepted frame body limit.
pub const MIN_FRAME_LENGTH: usize = 512;
/// Largest accepted frame body limit (16 MiB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

/// Which end of a link a party plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Role {
    /// Sends transfers.
    Sender,
    /// Receives transfers.
    Receiver,
}

/// Connection open handshake.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Open {
    /// Container id of the sender.
    pub container_id: String,
    /// Virtual host requested by the client.
    pub hostname: Option<String>,
    /// Largest frame body the sender accepts.
    pub max_frame_size: u32,
    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: Option<u32>,
    /// Optional user name.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
}

/// Source terminus of a link.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Source {
    /// Node address; `None` with `dynamic` asks the peer to create one.
    pub address: Option<String>,
    /// Request a peer-created node.
    pub dynamic: bool,
    /// Keep the subscription after the link detaches.
    pub durable: bool,
    /// Message selector.
    pub selector: Option<String>,
    /// Skip messages published on the same connection.
    pub no_local: bool,
    /// Browse without consuming.
    pub browse: bool,
}

/// Target terminus of a link.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Target {
    /// Node address; `None` for an anonymous relay link.
    pub address: Option<String>,
    /// Request a peer-created node.
    pub dynamic: bool,
}

/// Link attach.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Attach {
    /// Link name, unique per connection.
    pub name: String,
    /// Link handle chosen by the client.
    pub handle: u32,
    /// Role of the frame's sender.
    pub role: Role,
    /// Whether transfers on the link are sent settled.
    pub snd_settled: bool,
    /// Source terminus.
    pub source: Option<Source>,
    /// Target terminus.
    pub target: Option<Target>,
}

/// Link credit update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Flow {
    /// Link handle.
    pub handle: u32,
    /// Absolute credit granted to the sender.
    pub link_credit: u32,
    /// Use or discard all credit, then report back.
    pub drain: bool,
}

/// Message transfer.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Transfer {
    /// Link handle.
    pub handle: u32,
    /// Delivery id assigned by the sender.
    pub delivery_id: u32,
    /// Whether the sender settled the delivery up front.
    pub settled: bool,
    /// Encoded message.
    pub payload: Vec<u8>,
}

/// Settlement of one or more deliveries.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Disposition {
    /// Role of the frame's sender.
    pub role: Role,
    /// First delivery id in the range.
    pub first: u32,
    /// Last delivery id in the range, inclusive.
    pub last: u32,
    /// Whether the deliveries are now settled.
    pub settled: bool,
    /// Outcome.
    pub state: Option<DeliveryState>,
}

/// One decoded frame body.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum Performative {
    /// Start the connection.
    Open(Open),
    /// Start a session; `remote_channel` echoes the initiator's channel.
    Begin {
        /// Channel of the session initiator.
        remote_channel: Option<u16>,
    },
    /// Attach a link.
    Attach(Attach),
    /// Update link credit.
    Flow(Flow),
    /// Transfer a message.
    Transfer(Transfer),
    /// Settle deliveries.
    Disposition(Disposition),
    /// Detach a link.
    Detach {
        /// Link handle.
        handle: u32,
        /// Close rather than suspend the link.
        closed: bool,
        /// Error condition, if the detach is abnormal.
        error: Option<ErrorCondition>,
    },
    /// End a session.
    End {
        /// Error condition, if the end is abnormal.
        error: Option<ErrorCondition>,
    },
    /// Close the connection.
    Close {
        /// Error condition, if the close is abnormal.
        error: Option<ErrorCondition>,
    },
    /// Finish the session's current transaction.
    Discharge {
        /// Roll back instead of committing.
        fail: bool,
    },
    /// Outcome of a discharge.
    Discharged {
        /// Error condition, if the discharge failed.
        error: Option<ErrorCondition>,
    },
}

impl Performative {
    /// Short name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Begin { .. } => "begin",
            Self::Attach(_) => "attach",
            Self::Flow(_) => "flow",
            Self::Transfer(_) => "transfer",
            Self::Disposition(_) => "disposition",
            Self::Detach { .. } => "detach",
            Self::End { .. } => "end",
            Self::Close { .. } => "close",
            Self::Discharge { .. } => "discharge",
            Self::Discharged { .. } => "discharged",
        }
    }
}

/// A performative addressed to a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Session channel; zero for connection-level frames.
    pub channel: u16,
    /// Frame body.
    pub body: Performative,
}

impl Frame {
    /// Build a frame.
    #[must_use]
    pub fn new(channel: u16, body: Performative) -> Self { Self { channel, body } }
}

/// Tokio codec for [`Frame`]s.
///
/// Used by the engine on its in-memory buffers and by test peers over real
/// sockets through `tokio_util::codec::Framed`.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    max_frame_length: usize,
}

impl FrameCodec {
    /// Codec accepting frame bodies up to `max_frame_length` bytes, clamped
    /// to [`MIN_FRAME_LENGTH`]..=[`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        let max_frame_length = clamp_frame_length(max_frame_length);
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_length)
                .new_codec(),
            max_frame_length,
        }
    }

    /// Largest frame body accepted.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for FrameCodec {
    fn default() -> Self { Self::new(64 * 1024) }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut body) = self.inner.decode(src)? else {
            return Ok(None);
        };
        if body.len() < CHANNEL_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes has no channel header", body.len()),
            ));
        }
        let channel = read_network_u16([body[0], body[1]]);
        body.advance(CHANNEL_HEADER_SIZE);
        let (performative, used) = decode_from_slice::<Performative, _>(&body, config::standard())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if used != body.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} trailing bytes after {}", body.len() - used, performative.name()),
            ));
        }
        Ok(Some(Frame::new(channel, performative)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = Self::frame_body(&item)?;
        self.seal(item.body.name(), body, dst)
    }
}

impl FrameCodec {
    /// Channel header followed by the encoded performative, unprefixed.
    pub(crate) fn frame_body(frame: &Frame) -> io::Result<BytesMut> {
        let encoded = encode_to_vec(&frame.body, config::standard())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut body = BytesMut::with_capacity(CHANNEL_HEADER_SIZE + encoded.len());
        body.put_slice(&write_network_u16(frame.channel));
        body.put_slice(&encoded);
        Ok(body)
    }

    /// Length-prefix `body` into `dst`, refusing bodies over the limit.
    pub(crate) fn seal(&mut self, name: &str, body: BytesMut, dst: &mut BytesMut) -> io::Result<()> {
        if body.len() > self.max_frame_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{name} frame of {} bytes exceeds limit of {}",
                    body.len(),
                    self.max_frame_length
                ),
            ));
        }
        self.inner.encode(body.freeze(), dst)
    }
}

/// Encode frames into one contiguous buffer.
///
/// # Errors
///
/// Returns an error if any frame fails to encode.
pub fn encode_frames<I>(frames: I, max_frame_length: usize) -> io::Result<Bytes>
where
    I: IntoIterator<Item = Frame>,
{
    let mut codec = FrameCodec::new(max_frame_length);
    let mut buf = BytesMut::new();
    for frame in frames {
        codec.encode(frame, &mut buf)?;
    }
    Ok(buf.freeze())
}

/// Decode every complete frame in `bytes`.
///
/// # Errors
///
/// Returns an error if a frame is malformed or trailing bytes remain.
pub fn decode_frames(bytes: &[u8], max_frame_length: usize) -> io::Result<Vec<Frame>> {
    let mut codec = FrameCodec::new(max_frame_length);
    let mut buf = BytesMut::from(bytes);
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(&mut buf)? {
        frames.push(frame);
    }
    if buf.is_empty() {
        Ok(frames)
    } else {
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{} bytes of partial frame left over", buf.len()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_frame() -> Frame { Frame::new(0, Performative::Close { error: None }) }

    #[test]
    fn frame_header_carries_length_and_channel() {
        let bytes = encode_frames([Frame::new(7, Performative::End { error: None })], 1024)
            .expect("encode");
        let length = crate::byte_order::read_network_u32([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(length as usize, bytes.len() - LENGTH_HEADER_SIZE);
        assert_eq!(&bytes[4..6], &[0, 7]);
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let bytes = encode_frames([close_frame()], 1024).expect("encode");
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 1]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        buf.extend_from_slice(&bytes[bytes.len() - 1..]);
        assert_eq!(codec.decode(&mut buf).expect("decode"), Some(close_frame()));
    }

    #[test]
    fn oversized_frames_are_rejected_on_both_sides() {
        let transfer = Frame::new(
            1,
            Performative::Transfer(Transfer {
                handle: 0,
                delivery_id: 0,
                settled: false,
                payload: vec![0; MIN_FRAME_LENGTH * 2],
            }),
        );
        let err = encode_frames([transfer.clone()], MIN_FRAME_LENGTH).expect_err("too large");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let bytes = encode_frames([transfer], MIN_FRAME_LENGTH * 4).expect("encode");
        let err = decode_frames(&bytes, MIN_FRAME_LENGTH).expect_err("too large");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn leftover_partial_frame_is_reported() {
        let bytes = encode_frames([close_frame()], 1024).expect("encode");
        let err = decode_frames(&bytes[..3], 1024).expect_err("partial");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
