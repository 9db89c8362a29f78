//! A loopback peer that answers the bundled wire protocol.
//!
//! [`ScriptedBroker`] accepts connections on `127.0.0.1`, records every frame
//! it receives and replies with the frames a cooperative broker would send:
//! opens, begins and attaches are echoed, sender links are granted credit,
//! transfers are settled and stored per address, and stored messages are
//! delivered to receiver links as soon as they hold credit.

use std::{
    collections::{HashMap, VecDeque},
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use jmswire::{
    engine::{
        DeliveryState,
        ErrorCondition,
        Flow,
        Frame,
        FrameCodec,
        Open,
        Performative,
        Role,
        Source,
        Target,
        frame::{Attach, Disposition, MAX_FRAME_LENGTH, Transfer},
    },
    message::{JmsMessage, Message},
};
use tokio::{
    net::{TcpListener, TcpStream},
    time::Instant,
};
use tokio_util::{codec::Framed, sync::CancellationToken};

/// How the broker answers.
#[derive(Clone, Debug)]
pub struct BrokerBehaviour {
    credit: u32,
    reject_transfers: bool,
    refuse_address: Option<String>,
    preload: Vec<(String, Vec<u8>)>,
}

impl Default for BrokerBehaviour {
    fn default() -> Self {
        Self {
            credit: 100,
            reject_transfers: false,
            refuse_address: None,
            preload: Vec::new(),
        }
    }
}

impl BrokerBehaviour {
    /// Credit granted to each client sender link on attach.
    #[must_use]
    pub fn credit(mut self, credit: u32) -> Self {
        self.credit = credit;
        self
    }

    /// Settle every unsettled transfer as rejected.
    #[must_use]
    pub fn reject_transfers(mut self) -> Self {
        self.reject_transfers = true;
        self
    }

    /// Answer attaches to `address` with an immediate detach.
    #[must_use]
    pub fn refuse(mut self, address: impl Into<String>) -> Self {
        self.refuse_address = Some(address.into());
        self
    }

    /// Queue `message` on `address` before any client connects.
    ///
    /// # Panics
    ///
    /// Panics if the message cannot be encoded.
    #[must_use]
    pub fn with_message(mut self, address: impl Into<String>, message: &JmsMessage) -> Self {
        let payload = message.to_bytes().expect("encode preloaded message");
        self.preload.push((address.into(), payload));
        self
    }
}

/// Handle to a running broker. Dropping it stops the accept loop and every
/// connection it serves.
pub struct ScriptedBroker {
    address: SocketAddr,
    received: Arc<Mutex<Vec<Frame>>>,
    shutdown: CancellationToken,
}

impl ScriptedBroker {
    /// Start a broker with the default behaviour.
    ///
    /// # Errors
    ///
    /// Returns an error if the loopback listener cannot be bound.
    pub async fn start() -> io::Result<Self> { Self::with_behaviour(BrokerBehaviour::default()).await }

    /// Start a broker with `behaviour`.
    ///
    /// # Errors
    ///
    /// Returns an error if the loopback listener cannot be bound.
    pub async fn with_behaviour(behaviour: BrokerBehaviour) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let shutdown = CancellationToken::new();

        let frames = Arc::clone(&received);
        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    () = token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        let state = BrokerState::new(behaviour.clone());
                        let frames = Arc::clone(&frames);
                        let token = token.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, state, frames, token).await {
                                log::debug!("scripted broker connection from {peer} ended: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        log::warn!("scripted broker accept failed: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            address,
            received,
            shutdown,
        })
    }

    /// Socket address the broker listens on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr { self.address }

    /// `amqp://` URI pointing at the broker.
    #[must_use]
    pub fn uri(&self) -> String { format!("amqp://{}:{}", self.address.ip(), self.address.port()) }

    /// Every frame received so far, across all connections.
    #[must_use]
    pub fn received(&self) -> Vec<Frame> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of the performatives received so far.
    #[must_use]
    pub fn received_names(&self) -> Vec<&'static str> {
        self.received().iter().map(|frame| frame.body.name()).collect()
    }

    /// Wait until a frame named `performative` has been received.
    ///
    /// Returns `false` if none arrives within `limit`.
    pub async fn wait_for(&self, performative: &str, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.received_names().contains(&performative) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for ScriptedBroker {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

async fn serve(
    stream: TcpStream,
    mut state: BrokerState,
    received: Arc<Mutex<Vec<Frame>>>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let mut framed = Framed::new(stream, FrameCodec::new(MAX_FRAME_LENGTH));
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            next = framed.next() => next,
        };
        let Some(frame) = next.transpose()? else {
            return Ok(());
        };
        received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
        let closing = matches!(frame.body, Performative::Close { .. });
        for reply in state.respond(frame) {
            framed.send(reply).await?;
        }
        if closing {
            return Ok(());
        }
    }
}

struct BrokerLink {
    channel: u16,
    /// Role the client plays on this link.
    role: Role,
    address: Option<String>,
    credit: u32,
}

struct BrokerState {
    behaviour: BrokerBehaviour,
    links: HashMap<u32, BrokerLink>,
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    next_delivery: u32,
    next_temporary: u32,
}

impl BrokerState {
    fn new(behaviour: BrokerBehaviour) -> Self {
        let mut queues: HashMap<String, VecDeque<Vec<u8>>> = HashMap::new();
        for (address, payload) in &behaviour.preload {
            queues.entry(address.clone()).or_default().push_back(payload.clone());
        }
        Self {
            behaviour,
            links: HashMap::new(),
            queues,
            next_delivery: 0,
            next_temporary: 0,
        }
    }

    fn respond(&mut self, frame: Frame) -> Vec<Frame> {
        let Frame { channel, body } = frame;
        let mut out = Vec::new();
        match body {
            Performative::Open(_) => out.push(Frame::new(
                0,
                Performative::Open(Open {
                    container_id: "scripted-broker".into(),
                    hostname: None,
                    max_frame_size: 64 * 1024,
                    idle_timeout_ms: None,
                    username: None,
                    password: None,
                }),
            )),
            Performative::Begin { remote_channel: None } => out.push(Frame::new(
                channel,
                Performative::Begin {
                    remote_channel: Some(channel),
                },
            )),
            Performative::Attach(attach) => self.attach(channel, attach, &mut out),
            Performative::Flow(flow) => self.flow(flow, &mut out),
            Performative::Transfer(transfer) => self.transfer(transfer, &mut out),
            Performative::Detach { handle, .. } => {
                if self.links.remove(&handle).is_none() {
                    return out;
                }
                out.push(Frame::new(
                    channel,
                    Performative::Detach {
                        handle,
                        closed: true,
                        error: None,
                    },
                ));
            }
            Performative::End { .. } => {
                self.links.retain(|_, link| link.channel != channel);
                out.push(Frame::new(channel, Performative::End { error: None }));
            }
            Performative::Close { .. } => out.push(Frame::new(0, Performative::Close { error: None })),
            Performative::Discharge { .. } => {
                out.push(Frame::new(channel, Performative::Discharged { error: None }));
            }
            Performative::Begin { .. } | Performative::Disposition(_) | Performative::Discharged { .. } => {}
        }
        out
    }

    fn attach(&mut self, channel: u16, attach: Attach, out: &mut Vec<Frame>) {
        let address = match attach.role {
            Role::Sender => attach.target.as_ref().and_then(|t| t.address.clone()),
            Role::Receiver => match attach.source.as_ref() {
                Some(source) if source.dynamic => {
                    self.next_temporary += 1;
                    Some(format!("temp-queue://broker-{}", self.next_temporary))
                }
                Some(source) => source.address.clone(),
                None => None,
            },
        };
        if address.is_some() && address == self.behaviour.refuse_address {
            out.push(Frame::new(
                channel,
                Performative::Detach {
                    handle: attach.handle,
                    closed: true,
                    error: Some(ErrorCondition::new(
                        "amqp:not-found",
                        format!("no node {}", address.as_deref().unwrap_or_default()),
                    )),
                },
            ));
            return;
        }

        let (role, source, target) = match attach.role {
            Role::Sender => (
                Role::Receiver,
                attach.source,
                Some(Target {
                    address: address.clone(),
                    dynamic: false,
                }),
            ),
            Role::Receiver => (
                Role::Sender,
                Some(Source {
                    address: address.clone(),
                    ..attach.source.unwrap_or_default()
                }),
                attach.target,
            ),
        };
        out.push(Frame::new(
            channel,
            Performative::Attach(Attach {
                name: attach.name,
                handle: attach.handle,
                role,
                snd_settled: attach.snd_settled,
                source,
                target,
            }),
        ));
        self.links.insert(
            attach.handle,
            BrokerLink {
                channel,
                role: attach.role,
                address,
                credit: 0,
            },
        );
        if attach.role == Role::Sender {
            out.push(Frame::new(
                channel,
                Performative::Flow(Flow {
                    handle: attach.handle,
                    link_credit: self.behaviour.credit,
                    drain: false,
                }),
            ));
        }
    }

    fn flow(&mut self, flow: Flow, out: &mut Vec<Frame>) {
        let Some(link) = self.links.get_mut(&flow.handle) else {
            return;
        };
        if link.role != Role::Receiver {
            return;
        }
        link.credit = flow.link_credit;
        self.deliver(flow.handle, out);
        if !flow.drain {
            return;
        }
        let Some(link) = self.links.get_mut(&flow.handle) else {
            return;
        };
        if link.credit > 0 {
            link.credit = 0;
            out.push(Frame::new(
                link.channel,
                Performative::Flow(Flow {
                    handle: flow.handle,
                    link_credit: 0,
                    drain: true,
                }),
            ));
        }
    }

    fn transfer(&mut self, transfer: Transfer, out: &mut Vec<Frame>) {
        let Some(link) = self.links.get(&transfer.handle) else {
            return;
        };
        let channel = link.channel;
        let address = link.address.clone().or_else(|| {
            JmsMessage::from_bytes(&transfer.payload)
                .ok()
                .and_then(|(message, _)| message.destination.map(|d| d.address()))
        });
        let rejected = self.behaviour.reject_transfers;
        if !transfer.settled {
            let state = if rejected {
                DeliveryState::Rejected(Some(ErrorCondition::new(
                    "amqp:precondition-failed",
                    "rejected by scripted broker",
                )))
            } else {
                DeliveryState::Accepted
            };
            out.push(Frame::new(
                channel,
                Performative::Disposition(Disposition {
                    role: Role::Receiver,
                    first: transfer.delivery_id,
                    last: transfer.delivery_id,
                    settled: true,
                    state: Some(state),
                }),
            ));
        }
        if rejected {
            return;
        }
        let Some(address) = address else {
            return;
        };
        self.queues
            .entry(address.clone())
            .or_default()
            .push_back(transfer.payload);
        let mut receivers: Vec<u32> = self
            .links
            .iter()
            .filter(|(_, link)| link.role == Role::Receiver && link.address.as_deref() == Some(&address))
            .map(|(handle, _)| *handle)
            .collect();
        receivers.sort_unstable();
        for handle in receivers {
            self.deliver(handle, out);
        }
    }

    fn deliver(&mut self, handle: u32, out: &mut Vec<Frame>) {
        let Some(link) = self.links.get_mut(&handle) else {
            return;
        };
        let Some(queue) = link.address.as_ref().and_then(|a| self.queues.get_mut(a)) else {
            return;
        };
        while link.credit > 0 {
            let Some(payload) = queue.pop_front() else {
                break;
            };
            link.credit -= 1;
            let delivery_id = self.next_delivery;
            self.next_delivery = self.next_delivery.wrapping_add(1);
            out.push(Frame::new(
                link.channel,
                Performative::Transfer(Transfer {
                    handle,
                    delivery_id,
                    settled: false,
                    payload,
                }),
            ));
        }
    }
}
