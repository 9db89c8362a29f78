//! The bundled [`ProtocolEngine`] implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use super::{
    DeliveryId,
    DeliveryState,
    EngineError,
    EngineEvent,
    ErrorCondition,
    FrameDirection,
    FrameTracer,
    LinkHandle,
    LinkSpec,
    ProtocolEngine,
    frame::{Attach, Disposition, Flow, Frame, FrameCodec, LENGTH_HEADER_SIZE, Open, Performative, Role, Transfer},
};
use crate::metrics::{self, Direction};

/// Limits applied by a [`WireEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Largest frame body accepted or produced.
    pub max_frame_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Endpoint {
    #[default]
    Uninitialized,
    Active,
    Closed,
}

#[derive(Debug, Default)]
struct SessionState {
    local: Endpoint,
    remote: Endpoint,
    links: BTreeSet<u32>,
}

#[derive(Debug)]
struct LinkState {
    channel: u16,
    role: Role,
    presettle: bool,
    local: Endpoint,
    remote: Endpoint,
    credit: u32,
    held: VecDeque<HeldTransfer>,
    unsettled: HashSet<u32>,
}

/// A transfer waiting for credit, already encoded.
#[derive(Debug)]
struct HeldTransfer {
    delivery: DeliveryId,
    frame: Frame,
    encoded: Bytes,
}

/// Sans-I/O engine for the length-prefixed performative protocol.
///
/// Input is buffered until complete frames are available, so chunk
/// boundaries never matter. Transfers on a sender link wait in the engine
/// until the peer grants credit.
pub struct WireEngine {
    codec: FrameCodec,
    input: BytesMut,
    input_limit: usize,
    output: VecDeque<Bytes>,
    events: VecDeque<EngineEvent>,
    tracer: Option<Box<dyn FrameTracer>>,
    local: Endpoint,
    remote: Endpoint,
    sessions: BTreeMap<u16, SessionState>,
    links: BTreeMap<u32, LinkState>,
    next_handle: u32,
    next_delivery: u32,
    unsettled_out: HashMap<u32, LinkHandle>,
}

impl WireEngine {
    /// Create an engine with the given limits.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let codec = FrameCodec::new(config.max_frame_size);
        let input_limit = codec.max_frame_length() + LENGTH_HEADER_SIZE;
        Self {
            codec,
            input: BytesMut::with_capacity(input_limit),
            input_limit,
            output: VecDeque::new(),
            events: VecDeque::new(),
            tracer: None,
            local: Endpoint::Uninitialized,
            remote: Endpoint::Uninitialized,
            sessions: BTreeMap::new(),
            links: BTreeMap::new(),
            next_handle: 0,
            next_delivery: 0,
            unsettled_out: HashMap::new(),
        }
    }

    /// Number of transfers waiting for credit on `handle`.
    #[must_use]
    pub fn held_transfers(&self, handle: LinkHandle) -> usize {
        self.links.get(&handle.get()).map_or(0, |l| l.held.len())
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        match self.local {
            Endpoint::Uninitialized => Err(EngineError::NotBound),
            Endpoint::Closed => Err(EngineError::ConnectionClosed),
            Endpoint::Active => Ok(()),
        }
    }

    fn encode(&mut self, frame: &Frame) -> Result<Bytes, EngineError> {
        let framing = |e: std::io::Error| EngineError::Framing(e.to_string());
        let body = FrameCodec::frame_body(frame).map_err(framing)?;
        let mut buf = BytesMut::with_capacity(LENGTH_HEADER_SIZE + body.len());
        self.codec
            .seal(frame.body.name(), body, &mut buf)
            .map_err(framing)?;
        Ok(buf.freeze())
    }

    fn emit(&mut self, frame: &Frame, encoded: Bytes) {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.trace(FrameDirection::Sent, frame);
        }
        self.output.push_back(encoded);
        metrics::inc_frames(Direction::Outbound);
    }

    fn write(&mut self, channel: u16, body: Performative) -> Result<(), EngineError> {
        let frame = Frame::new(channel, body);
        let encoded = self.encode(&frame)?;
        self.emit(&frame, encoded);
        Ok(())
    }

    fn link_mut(&mut self, handle: LinkHandle) -> Result<&mut LinkState, EngineError> {
        self.links
            .get_mut(&handle.get())
            .ok_or(EngineError::UnknownLink(handle))
    }

    fn allocate_handle(&mut self) -> Result<u32, EngineError> {
        for _ in 0..=u32::MAX {
            let candidate = self.next_handle;
            self.next_handle = self.next_handle.wrapping_add(1);
            if !self.links.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(EngineError::Exhausted("link handles"))
    }

    fn release_held(&mut self, handle: LinkHandle) -> Result<(), EngineError> {
        loop {
            let link = self.link_mut(handle)?;
            if link.credit == 0 || link.remote != Endpoint::Active || link.local != Endpoint::Active {
                return Ok(());
            }
            let Some(held) = link.held.pop_front() else {
                return Ok(());
            };
            link.credit -= 1;
            let settled = link.presettle;
            let HeldTransfer {
                delivery,
                frame,
                encoded,
            } = held;
            self.emit(&frame, encoded);
            if !settled {
                self.unsettled_out.insert(delivery.get(), handle);
            }
            self.events.push_back(EngineEvent::DeliverySent {
                handle,
                delivery,
                settled,
            });
        }
    }

    fn forget_link(&mut self, handle: u32) {
        if let Some(link) = self.links.remove(&handle) {
            if let Some(session) = self.sessions.get_mut(&link.channel) {
                session.links.remove(&handle);
            }
        }
        self.unsettled_out.retain(|_, h| h.get() != handle);
    }

    fn forget_session(&mut self, channel: u16) {
        if let Some(session) = self.sessions.remove(&channel) {
            for handle in session.links {
                self.forget_link(handle);
            }
        }
    }

    fn apply(&mut self, frame: Frame) -> Result<(), EngineError> {
        let Frame { channel, body } = frame;
        let unexpected = |performative: &'static str| EngineError::Unexpected {
            performative,
            channel,
        };
        match body {
            Performative::Open(open) => {
                if self.local == Endpoint::Uninitialized || self.remote != Endpoint::Uninitialized {
                    return Err(unexpected("open"));
                }
                self.remote = Endpoint::Active;
                self.events.push_back(EngineEvent::ConnectionOpened {
                    container_id: open.container_id,
                });
            }
            Performative::Close { error } => {
                self.remote = Endpoint::Closed;
                self.events.push_back(EngineEvent::ConnectionClosed { error });
            }
            Performative::Begin { remote_channel } => {
                let local = remote_channel.unwrap_or(channel);
                let session = self
                    .sessions
                    .get_mut(&local)
                    .ok_or(EngineError::UnknownChannel(local))?;
                session.remote = Endpoint::Active;
                self.events.push_back(EngineEvent::SessionOpened { channel: local });
            }
            Performative::End { error } => {
                let session = self
                    .sessions
                    .get_mut(&channel)
                    .ok_or(EngineError::UnknownChannel(channel))?;
                session.remote = Endpoint::Closed;
                let done = session.local == Endpoint::Closed;
                self.events.push_back(EngineEvent::SessionClosed { channel, error });
                if done {
                    self.forget_session(channel);
                }
            }
            Performative::Attach(attach) => self.apply_attach(attach)?,
            Performative::Detach { handle, error, .. } => {
                let local = LinkHandle::new(handle);
                let link = self.link_mut(local)?;
                link.remote = Endpoint::Closed;
                link.held.clear();
                let done = link.local == Endpoint::Closed;
                self.events.push_back(EngineEvent::LinkClosed {
                    handle: local,
                    error,
                });
                if done {
                    self.forget_link(handle);
                }
            }
            Performative::Flow(flow) => self.apply_flow(flow)?,
            Performative::Transfer(transfer) => {
                let handle = LinkHandle::new(transfer.handle);
                let link = self.link_mut(handle)?;
                if link.role != Role::Receiver {
                    return Err(EngineError::WrongRole(handle));
                }
                link.credit = link.credit.saturating_sub(1);
                if !transfer.settled {
                    link.unsettled.insert(transfer.delivery_id);
                }
                self.events.push_back(EngineEvent::Delivery {
                    handle,
                    delivery: DeliveryId::new(transfer.delivery_id),
                    settled: transfer.settled,
                    payload: Bytes::from(transfer.payload),
                });
            }
            Performative::Disposition(disposition) => self.apply_disposition(disposition),
            Performative::Discharged { error } => {
                if !self.sessions.contains_key(&channel) {
                    return Err(EngineError::UnknownChannel(channel));
                }
                self.events.push_back(EngineEvent::Discharged { channel, error });
            }
            Performative::Discharge { .. } => return Err(unexpected("discharge")),
        }
        Ok(())
    }

    fn apply_attach(&mut self, attach: Attach) -> Result<(), EngineError> {
        let handle = LinkHandle::new(attach.handle);
        let link = self.link_mut(handle)?;
        link.remote = Endpoint::Active;
        let remote_address = match link.role {
            Role::Sender => attach.target.and_then(|t| t.address),
            Role::Receiver => attach.source.and_then(|s| s.address),
        };
        self.events.push_back(EngineEvent::LinkOpened {
            handle,
            remote_address,
        });
        Ok(())
    }

    fn apply_flow(&mut self, flow: Flow) -> Result<(), EngineError> {
        let handle = LinkHandle::new(flow.handle);
        let link = self.link_mut(handle)?;
        link.credit = flow.link_credit;
        let role = link.role;
        match role {
            Role::Receiver => {
                if flow.drain && flow.link_credit == 0 {
                    self.events.push_back(EngineEvent::LinkDrained { handle });
                }
            }
            Role::Sender => {
                self.release_held(handle)?;
                let link = self.link_mut(handle)?;
                let (channel, credit) = (link.channel, link.credit);
                if flow.drain && credit > 0 {
                    link.credit = 0;
                    self.write(
                        channel,
                        Performative::Flow(Flow {
                            handle: flow.handle,
                            link_credit: 0,
                            drain: true,
                        }),
                    )?;
                }
                let credit = self.link_mut(handle)?.credit;
                self.events.push_back(EngineEvent::LinkCredit { handle, credit });
            }
        }
        Ok(())
    }

    fn apply_disposition(&mut self, disposition: Disposition) {
        if disposition.role != Role::Receiver {
            return;
        }
        let state = disposition.state.unwrap_or(DeliveryState::Accepted);
        let range = disposition.first..=disposition.last;
        let mut settled: Vec<u32> = self
            .unsettled_out
            .keys()
            .copied()
            .filter(|id| range.contains(id))
            .collect();
        settled.sort_unstable();
        for id in settled {
            self.unsettled_out.remove(&id);
            self.events.push_back(EngineEvent::DeliveryUpdated {
                delivery: DeliveryId::new(id),
                state: state.clone(),
            });
        }
    }
}

impl Default for WireEngine {
    fn default() -> Self { Self::new(EngineConfig::default()) }
}

impl ProtocolEngine for WireEngine {
    fn bind(&mut self, open: Open) -> Result<(), EngineError> {
        if self.local != Endpoint::Uninitialized {
            return Err(EngineError::AlreadyBound);
        }
        self.local = Endpoint::Active;
        self.write(0, Performative::Open(open))
    }

    fn input_capacity(&self) -> usize { self.input_limit.saturating_sub(self.input.len()) }

    fn accept_input(&mut self, chunk: &[u8]) -> Result<(), EngineError> {
        let capacity = self.input_capacity();
        if chunk.len() > capacity {
            return Err(EngineError::InputOverflow {
                len: chunk.len(),
                capacity,
            });
        }
        self.input.extend_from_slice(chunk);
        Ok(())
    }

    fn process_input(&mut self) -> Result<(), EngineError> {
        loop {
            let frame = match self.codec.decode(&mut self.input) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => return Err(EngineError::Framing(e.to_string())),
            };
            metrics::inc_frames(Direction::Inbound);
            if let Some(tracer) = self.tracer.as_mut() {
                tracer.trace(FrameDirection::Received, &frame);
            }
            self.apply(frame)?;
        }
    }

    fn pending_output(&self) -> Option<Bytes> { self.output.front().cloned() }

    fn output_consumed(&mut self) { self.output.pop_front(); }

    fn set_tracer(&mut self, tracer: Option<Box<dyn FrameTracer>>) { self.tracer = tracer; }

    fn begin_session(&mut self) -> Result<u16, EngineError> {
        self.ensure_open()?;
        let channel = (1..=u16::MAX)
            .find(|c| !self.sessions.contains_key(c))
            .ok_or(EngineError::Exhausted("channels"))?;
        self.sessions.insert(
            channel,
            SessionState {
                local: Endpoint::Active,
                ..SessionState::default()
            },
        );
        self.write(channel, Performative::Begin { remote_channel: None })?;
        Ok(channel)
    }

    fn end_session(&mut self, channel: u16) -> Result<(), EngineError> {
        let session = self
            .sessions
            .get_mut(&channel)
            .ok_or(EngineError::UnknownChannel(channel))?;
        if session.local != Endpoint::Active {
            return Ok(());
        }
        session.local = Endpoint::Closed;
        let done = session.remote == Endpoint::Closed;
        let handles: Vec<u32> = session.links.iter().copied().collect();
        for handle in handles {
            if let Some(link) = self.links.get_mut(&handle) {
                link.local = Endpoint::Closed;
                link.held.clear();
            }
        }
        if self.local == Endpoint::Active {
            self.write(channel, Performative::End { error: None })?;
        }
        if done {
            self.forget_session(channel);
        }
        Ok(())
    }

    fn attach_link(&mut self, channel: u16, spec: LinkSpec) -> Result<LinkHandle, EngineError> {
        self.ensure_open()?;
        if !self
            .sessions
            .get(&channel)
            .is_some_and(|s| s.local == Endpoint::Active)
        {
            return Err(EngineError::UnknownChannel(channel));
        }
        let raw = self.allocate_handle()?;
        self.links.insert(
            raw,
            LinkState {
                channel,
                role: spec.role,
                presettle: spec.presettle,
                local: Endpoint::Active,
                remote: Endpoint::Uninitialized,
                credit: 0,
                held: VecDeque::new(),
                unsettled: HashSet::new(),
            },
        );
        if let Some(session) = self.sessions.get_mut(&channel) {
            session.links.insert(raw);
        }
        self.write(
            channel,
            Performative::Attach(Attach {
                name: spec.name,
                handle: raw,
                role: spec.role,
                snd_settled: spec.presettle,
                source: spec.source,
                target: spec.target,
            }),
        )?;
        Ok(LinkHandle::new(raw))
    }

    fn detach_link(&mut self, handle: LinkHandle) -> Result<(), EngineError> {
        let writable = self.local == Endpoint::Active;
        let link = self.link_mut(handle)?;
        let channel = link.channel;
        let was_active = link.local == Endpoint::Active;
        link.local = Endpoint::Closed;
        link.held.clear();
        let done = link.remote == Endpoint::Closed;
        if was_active && writable {
            self.write(
                channel,
                Performative::Detach {
                    handle: handle.get(),
                    closed: true,
                    error: None,
                },
            )?;
        }
        if done {
            self.forget_link(handle.get());
        }
        Ok(())
    }

    fn flow(&mut self, handle: LinkHandle, credit: u32, drain: bool) -> Result<(), EngineError> {
        self.ensure_open()?;
        let link = self.link_mut(handle)?;
        if link.role != Role::Receiver {
            return Err(EngineError::WrongRole(handle));
        }
        if link.local != Endpoint::Active {
            return Err(EngineError::UnknownLink(handle));
        }
        link.credit = credit;
        let channel = link.channel;
        self.write(
            channel,
            Performative::Flow(Flow {
                handle: handle.get(),
                link_credit: credit,
                drain,
            }),
        )
    }

    fn transfer(&mut self, handle: LinkHandle, payload: Bytes) -> Result<DeliveryId, EngineError> {
        self.ensure_open()?;
        let link = self.link_mut(handle)?;
        if link.role != Role::Sender {
            return Err(EngineError::WrongRole(handle));
        }
        if link.local != Endpoint::Active {
            return Err(EngineError::UnknownLink(handle));
        }
        let (channel, settled) = (link.channel, link.presettle);
        let delivery = DeliveryId::new(self.next_delivery);
        let frame = Frame::new(
            channel,
            Performative::Transfer(Transfer {
                handle: handle.get(),
                delivery_id: delivery.get(),
                settled,
                payload: payload.to_vec(),
            }),
        );
        let body = FrameCodec::frame_body(&frame).map_err(|e| EngineError::Framing(e.to_string()))?;
        let limit = self.codec.max_frame_length();
        if body.len() > limit {
            return Err(EngineError::PayloadTooLarge {
                len: body.len(),
                limit,
            });
        }
        let mut encoded = BytesMut::with_capacity(LENGTH_HEADER_SIZE + body.len());
        self.codec
            .seal(frame.body.name(), body, &mut encoded)
            .map_err(|e| EngineError::Framing(e.to_string()))?;
        self.next_delivery = self.next_delivery.wrapping_add(1);
        self.link_mut(handle)?.held.push_back(HeldTransfer {
            delivery,
            frame,
            encoded: encoded.freeze(),
        });
        self.release_held(handle)?;
        Ok(delivery)
    }

    fn settle(
        &mut self,
        handle: LinkHandle,
        delivery: DeliveryId,
        state: DeliveryState,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let link = self.link_mut(handle)?;
        if link.role != Role::Receiver {
            return Err(EngineError::WrongRole(handle));
        }
        if !link.unsettled.remove(&delivery.get()) {
            return Err(EngineError::UnknownDelivery(delivery));
        }
        let channel = link.channel;
        self.write(
            channel,
            Performative::Disposition(Disposition {
                role: Role::Receiver,
                first: delivery.get(),
                last: delivery.get(),
                settled: true,
                state: Some(state),
            }),
        )
    }

    fn discharge(&mut self, channel: u16, fail: bool) -> Result<(), EngineError> {
        self.ensure_open()?;
        if !self
            .sessions
            .get(&channel)
            .is_some_and(|s| s.local == Endpoint::Active)
        {
            return Err(EngineError::UnknownChannel(channel));
        }
        self.write(channel, Performative::Discharge { fail })
    }

    fn close(&mut self, error: Option<ErrorCondition>) -> Result<(), EngineError> {
        match self.local {
            Endpoint::Uninitialized => Err(EngineError::NotBound),
            Endpoint::Closed => Ok(()),
            Endpoint::Active => {
                self.local = Endpoint::Closed;
                self.write(0, Performative::Close { error })
            }
        }
    }

    fn poll_event(&mut self) -> Option<EngineEvent> { self.events.pop_front() }
}
