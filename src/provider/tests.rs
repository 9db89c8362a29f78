//! Provider behaviour against an in-memory transport and a hand-driven peer.

use std::{io, sync::Arc, thread, time::Duration};

use rstest::rstest;
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};

use super::*;
use crate::{
    engine::{
        DeliveryState,
        ErrorCondition,
        Flow,
        Frame,
        Open,
        Performative,
        Role,
        Source,
        Target,
        frame::{Attach, Disposition, Transfer},
    },
    id::{ConnectionId, ProducerId},
    message::{JmsMessage, Message},
    meta::{AckMode, ConnectionInfo, ConsumerInfo, Destination, ProducerInfo, SessionInfo},
    test_support::{ChannelTransport, ListenerEvent, RecordingListener, TransportProbe},
};

const LIMIT: Duration = Duration::from_secs(5);

fn address() -> RemoteAddress { RemoteAddress::parse("amqp://broker.test:5672").expect("valid address") }

fn peer_open() -> Frame {
    Frame::new(
        0,
        Performative::Open(Open {
            container_id: "peer".into(),
            hostname: None,
            max_frame_size: 1 << 20,
            idle_timeout_ms: None,
            username: None,
            password: None,
        }),
    )
}

fn peer_begin(channel: u16) -> Frame {
    Frame::new(
        channel,
        Performative::Begin {
            remote_channel: Some(channel),
        },
    )
}

fn peer_attach(channel: u16, handle: u32, role: Role, address: &str) -> Frame {
    let (source, target) = match role {
        Role::Receiver => (
            None,
            Some(Target {
                address: Some(address.into()),
                dynamic: false,
            }),
        ),
        Role::Sender => (
            Some(Source {
                address: Some(address.into()),
                ..Source::default()
            }),
            None,
        ),
    };
    Frame::new(
        channel,
        Performative::Attach(Attach {
            name: format!("peer-{handle}"),
            handle,
            role,
            snd_settled: false,
            source,
            target,
        }),
    )
}

fn peer_flow(channel: u16, handle: u32, credit: u32) -> Frame {
    Frame::new(
        channel,
        Performative::Flow(Flow {
            handle,
            link_credit: credit,
            drain: false,
        }),
    )
}

fn peer_settle(channel: u16, delivery: u32, state: DeliveryState) -> Frame {
    Frame::new(
        channel,
        Performative::Disposition(Disposition {
            role: Role::Receiver,
            first: delivery,
            last: delivery,
            settled: true,
            state: Some(state),
        }),
    )
}

fn peer_detach(channel: u16, handle: u32, error: Option<ErrorCondition>) -> Frame {
    Frame::new(
        channel,
        Performative::Detach {
            handle,
            closed: true,
            error,
        },
    )
}

struct Harness {
    provider: AmqpProvider,
    probe: TransportProbe,
    events: UnboundedReceiver<ListenerEvent>,
    connection: ConnectionInfo,
    seen: usize,
}

impl Harness {
    async fn connected(config: ProviderConfig) -> Self {
        let (factory, probe) = ChannelTransport::factory();
        let provider = AmqpProvider::builder(address())
            .config(config)
            .transport_factory(factory)
            .build()
            .expect("provider builds");
        let (listener, events) = RecordingListener::new();
        provider.set_listener(listener);
        provider.connect().await.expect("connect succeeds");
        let connection = ConnectionInfo::new(ConnectionId::new("ID:test-1").expect("connection id"));
        Self {
            provider,
            probe,
            events,
            connection,
            seen: 0,
        }
    }

    async fn open(config: ProviderConfig) -> Self {
        let mut harness = Self::connected(config).await;
        let created = harness.provider.create(harness.connection.clone().into());
        let open = harness.next_frame().await;
        assert!(matches!(open.body, Performative::Open(_)));
        harness.probe.reply([peer_open()]).expect("peer open");
        created.await.expect("connection opens");
        harness
    }

    /// Wait for the next frame written by the provider.
    async fn next_frame(&mut self) -> Frame {
        let mut frames = self
            .probe
            .wait_for_frames(self.seen + 1, LIMIT)
            .await
            .expect("provider writes a frame");
        self.seen += 1;
        frames.swap_remove(self.seen - 1)
    }

    async fn session(&mut self, seq: u64, ack_mode: AckMode) -> SessionInfo {
        let info = SessionInfo::new(self.connection.id.session(seq), ack_mode);
        let created = self.provider.create(info.clone().into());
        let begin = self.next_frame().await;
        assert!(matches!(begin.body, Performative::Begin { remote_channel: None }));
        self.probe.reply([peer_begin(begin.channel)]).expect("peer begin");
        created.await.expect("session opens");
        info
    }

    /// Attach a producer and answer the attach. Returns the link handle.
    async fn producer(&mut self, info: ProducerInfo) -> (u16, u32) {
        let created = self.provider.create(info.into());
        let attach = self.next_frame().await;
        let Performative::Attach(ref body) = attach.body else {
            panic!("expected attach, got {:?}", attach.body);
        };
        self.probe
            .reply([peer_attach(attach.channel, body.handle, Role::Receiver, "queue://orders")])
            .expect("peer attach");
        let ResourceInfo::Producer(amended) = created.await.expect("producer attaches") else {
            panic!("producer create returned another kind");
        };
        assert_eq!(amended.remote_address.as_deref(), Some("queue://orders"));
        (attach.channel, body.handle)
    }

    /// Attach a consumer without prefetch. Returns the link handle.
    async fn consumer(&mut self, session: &SessionInfo, seq: u64) -> (ConsumerId, u16, u32) {
        let mut info = ConsumerInfo::new(session.id.consumer(seq), Destination::Queue("jobs".into()));
        info.prefetch = 0;
        let created = self.provider.create(info.clone().into());
        let attach = self.next_frame().await;
        let Performative::Attach(ref body) = attach.body else {
            panic!("expected attach, got {:?}", attach.body);
        };
        assert_eq!(body.role, Role::Receiver);
        self.probe
            .reply([peer_attach(attach.channel, body.handle, Role::Sender, "queue://jobs")])
            .expect("peer attach");
        created.await.expect("consumer attaches");
        (info.id, attach.channel, body.handle)
    }

    async fn quiet(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(self.probe.frames().expect("frames decode").len(), self.seen, "unexpected frames written");
    }
}

fn producer_info(session: &SessionInfo, seq: u64) -> ProducerInfo {
    ProducerInfo::new(session.id.producer(seq), Some(Destination::Queue("orders".into())))
}

fn message(producer: &ProducerId, body: &str) -> OutboundMessage {
    OutboundMessage::new(producer.clone(), JmsMessage::with_body(body.as_bytes()))
}

#[tokio::test]
async fn create_connection_session_producer_and_send() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Auto).await;
    let info = producer_info(&session, 1);
    let producer = info.id.clone();
    let (channel, handle) = h.producer(info).await;

    let sent = h.provider.send(message(&producer, "hello"));
    h.probe.reply([peer_flow(channel, handle, 10)]).expect("peer flow");
    let transfer = h.next_frame().await;
    let Performative::Transfer(Transfer {
        delivery_id,
        settled,
        ref payload,
        ..
    }) = transfer.body
    else {
        panic!("expected transfer, got {:?}", transfer.body);
    };
    assert!(!settled);
    let (decoded, _) = JmsMessage::from_bytes(payload).expect("payload decodes");
    assert_eq!(decoded.body, b"hello");
    assert_eq!(decoded.destination, Some(Destination::Queue("orders".into())));

    h.probe
        .reply([peer_settle(channel, delivery_id, DeliveryState::Accepted)])
        .expect("peer disposition");
    sent.await.expect("send accepted");
}

#[tokio::test]
async fn sends_wait_for_credit() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Auto).await;
    let mut info = producer_info(&session, 1);
    info.presettle = true;
    let producer = info.id.clone();
    let (channel, handle) = h.producer(info).await;

    let sent = h.provider.send(message(&producer, "held"));
    h.quiet().await;
    assert!(!sent.is_done());

    h.probe.reply([peer_flow(channel, handle, 1)]).expect("peer flow");
    let transfer = h.next_frame().await;
    assert!(matches!(transfer.body, Performative::Transfer(Transfer { settled: true, .. })));
    sent.await.expect("presettled send completes once written");
}

#[tokio::test]
async fn oversized_send_fails_alone() {
    let mut h = Harness::open(ProviderConfig::default().with_max_frame_size(4096)).await;
    let session = h.session(1, AckMode::Auto).await;
    let info = producer_info(&session, 1);
    let producer = info.id.clone();
    let (channel, handle) = h.producer(info).await;

    let big = "x".repeat(16 * 1024);
    let err = h
        .provider
        .send(message(&producer, &big))
        .await
        .expect_err("message cannot be framed");
    assert!(matches!(
        err,
        ProviderError::Protocol(crate::engine::EngineError::PayloadTooLarge { limit: 4096, .. })
    ));

    let sent = h.provider.send(message(&producer, "small"));
    h.probe.reply([peer_flow(channel, handle, 1)]).expect("peer flow");
    let transfer = h.next_frame().await;
    let Performative::Transfer(Transfer { delivery_id, .. }) = transfer.body else {
        panic!("expected transfer, got {:?}", transfer.body);
    };
    h.probe
        .reply([peer_settle(channel, delivery_id, DeliveryState::Accepted)])
        .expect("peer disposition");
    sent.await.expect("later send still goes through");
    assert!(matches!(h.events.try_recv(), Err(TryRecvError::Empty)));
    assert!(!h.probe.is_closed());
}

#[tokio::test]
async fn rejected_delivery_fails_the_send() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Auto).await;
    let info = producer_info(&session, 1);
    let producer = info.id.clone();
    let (channel, handle) = h.producer(info).await;

    let sent = h.provider.send(message(&producer, "bad"));
    h.probe.reply([peer_flow(channel, handle, 1)]).expect("peer flow");
    h.next_frame().await;
    let condition = ErrorCondition::new("amqp:invalid-field", "no thanks");
    h.probe
        .reply([peer_settle(channel, 0, DeliveryState::Rejected(Some(condition.clone())))])
        .expect("peer disposition");
    let err = sent.await.expect_err("send rejected");
    assert!(matches!(
        err,
        ProviderError::DeliveryRejected(DeliveryState::Rejected(Some(c))) if c == condition
    ));
}

#[tokio::test]
async fn transport_failure_fails_everything_pending_once() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Auto).await;
    let info = producer_info(&session, 1);
    let producer = info.id.clone();
    h.producer(info).await;

    let first = h.provider.send(message(&producer, "one"));
    let second = h.provider.send(message(&producer, "two"));
    let third = h
        .provider
        .create(SessionInfo::new(h.connection.id.session(2), AckMode::Auto).into());
    h.next_frame().await;

    h.probe
        .fail(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
        .expect("inject failure");

    let causes = [
        first.await.expect_err("first send fails"),
        second.await.expect_err("second send fails"),
        third.await.expect_err("session create fails"),
    ];
    let ProviderError::Transport(shared) = &causes[0] else {
        panic!("expected transport error, got {:?}", causes[0]);
    };
    for cause in &causes {
        let ProviderError::Transport(other) = cause else {
            panic!("expected transport error, got {cause:?}");
        };
        assert!(Arc::ptr_eq(shared, other), "every future sees the same cause");
    }

    let event = tokio::time::timeout(LIMIT, h.events.recv())
        .await
        .expect("listener notified")
        .expect("listener channel open");
    assert!(matches!(event, ListenerEvent::ConnectionFailure(ProviderError::Transport(_))));

    h.probe
        .fail(io::Error::new(io::ErrorKind::BrokenPipe, "again"))
        .expect("inject second failure");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(h.events.try_recv(), Err(TryRecvError::Empty)));
    assert!(h.probe.is_closed());

    let late = h.provider.send(message(&producer, "late"));
    assert!(matches!(late.await, Err(ProviderError::Closed)));
}

#[tokio::test]
async fn close_is_idempotent() {
    let mut h = Harness::open(ProviderConfig::default()).await;

    let first = h.provider.close();
    let second = h.provider.close();
    assert!(second.is_done());
    second.await.expect("second close is a no-op");
    first.await.expect("close completes");

    let close = h.next_frame().await;
    assert!(matches!(close.body, Performative::Close { error: None }));
    assert!(h.probe.is_closed());

    let after = h
        .provider
        .create(SessionInfo::new(h.connection.id.session(1), AckMode::Auto).into());
    assert!(matches!(after.await, Err(ProviderError::Closed)));
}

#[tokio::test]
async fn submissions_from_each_thread_keep_their_order() {
    const THREADS: u64 = 4;
    const PER_THREAD: u64 = 8;

    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Auto).await;

    let provider = &h.provider;
    let futures: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let session = &session;
                scope.spawn(move || {
                    (0..PER_THREAD)
                        .map(|i| provider.create(producer_info(session, t * 100 + i).into()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().expect("submitting thread"))
            .collect()
    });

    let total = usize::try_from(THREADS * PER_THREAD).expect("small count");
    let mut attached = Vec::new();
    for _ in 0..total {
        let frame = h.next_frame().await;
        let Performative::Attach(body) = frame.body else {
            panic!("expected attach");
        };
        attached.push(body.name.parse::<ProducerId>().expect("link named after producer"));
        h.probe
            .reply([peer_attach(frame.channel, body.handle, Role::Receiver, "queue://orders")])
            .expect("peer attach");
    }
    for t in 0..THREADS {
        let order: Vec<u64> = attached
            .iter()
            .map(ProducerId::value)
            .filter(|v| v / 100 == t)
            .collect();
        let expected: Vec<u64> = (0..PER_THREAD).map(|i| t * 100 + i).collect();
        assert_eq!(order, expected, "thread {t} order");
    }
    for future in futures {
        future.await.expect("producer attaches");
    }
}

#[tokio::test]
async fn remote_detach_fails_pull_and_notifies_listener() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Client).await;
    let (consumer, channel, handle) = h.consumer(&session, 1).await;

    let pulled = h.provider.pull(consumer.clone(), Duration::ZERO);
    let flow = h.next_frame().await;
    assert!(matches!(
        flow.body,
        Performative::Flow(Flow {
            link_credit: 1,
            drain: true,
            ..
        })
    ));

    let condition = ErrorCondition::new("amqp:resource-deleted", "queue removed");
    h.probe
        .reply([peer_detach(channel, handle, Some(condition.clone()))])
        .expect("peer detach");
    let err = pulled.await.expect_err("pull fails");
    assert!(matches!(
        err,
        ProviderError::RemoteClosed { ref resource, condition: Some(ref c) }
            if *resource == ResourceId::from(consumer.clone()) && *c == condition
    ));

    let event = tokio::time::timeout(LIMIT, h.events.recv())
        .await
        .expect("listener notified")
        .expect("listener channel open");
    let ListenerEvent::RemotelyClosed(resource, _) = event else {
        panic!("expected remote close, got {event:?}");
    };
    assert_eq!(resource, ResourceId::from(consumer));
    let reply = h.next_frame().await;
    assert!(matches!(reply.body, Performative::Detach { closed: true, .. }));
}

#[tokio::test]
async fn pull_expiry_resolves_no_message() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Client).await;
    let (consumer, _, _) = h.consumer(&session, 1).await;

    let outcome = h
        .provider
        .pull(consumer, Duration::from_millis(20))
        .await
        .expect("pull resolves");
    assert_eq!(outcome, PullOutcome::NoMessage);

    h.next_frame().await;
    let revoke = h.next_frame().await;
    assert!(matches!(
        revoke.body,
        Performative::Flow(Flow {
            link_credit: 0,
            drain: false,
            ..
        })
    ));
}

#[tokio::test]
async fn pull_delivers_to_caller_and_listener() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Client).await;
    let (consumer, channel, handle) = h.consumer(&session, 1).await;

    let pulled = h.provider.pull(consumer.clone(), Duration::ZERO);
    h.next_frame().await;
    let payload = JmsMessage::with_body(b"job".to_vec())
        .to_bytes()
        .expect("message encodes");
    h.probe
        .reply([Frame::new(
            channel,
            Performative::Transfer(Transfer {
                handle,
                delivery_id: 7,
                settled: false,
                payload,
            }),
        )])
        .expect("peer transfer");

    let PullOutcome::Delivered(delivery) = pulled.await.expect("pull resolves") else {
        panic!("expected a message");
    };
    assert_eq!(delivery.delivery, DeliveryId::new(7));
    assert_eq!(delivery.message.body, b"job");
    let event = tokio::time::timeout(LIMIT, h.events.recv())
        .await
        .expect("listener notified")
        .expect("listener channel open");
    assert!(matches!(event, ListenerEvent::Inbound(ref c, _) if *c == consumer));

    h.provider
        .acknowledge(consumer, DeliveryId::new(7), AckType::Accepted)
        .await
        .expect("acknowledge");
    let disposition = h.next_frame().await;
    assert!(matches!(
        disposition.body,
        Performative::Disposition(Disposition {
            first: 7,
            state: Some(DeliveryState::Accepted),
            ..
        })
    ));
}

#[rstest]
#[case::commit(true)]
#[case::rollback(false)]
#[tokio::test]
async fn discharge_needs_a_transacted_session(#[case] commit: bool) {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let plain = h.session(1, AckMode::Auto).await;
    let transacted = h.session(2, AckMode::Transacted).await;

    let refused = if commit {
        h.provider.commit(plain.id.clone())
    } else {
        h.provider.rollback(plain.id.clone())
    };
    assert!(matches!(refused.await, Err(ProviderError::IllegalState(_))));

    let discharged = if commit {
        h.provider.commit(transacted.id.clone())
    } else {
        h.provider.rollback(transacted.id.clone())
    };
    let frame = h.next_frame().await;
    assert_eq!(frame.body, Performative::Discharge { fail: !commit });
    h.probe
        .reply([Frame::new(frame.channel, Performative::Discharged { error: None })])
        .expect("peer discharged");
    discharged.await.expect("discharge completes");
}

#[tokio::test]
async fn unanswered_create_times_out_and_rolls_back() {
    let config = ProviderConfig::default().with_request_timeout(Some(Duration::from_millis(100)));
    let mut h = Harness::open(config).await;

    let created = h
        .provider
        .create(SessionInfo::new(h.connection.id.session(1), AckMode::Auto).into());
    h.next_frame().await;
    assert!(matches!(created.await, Err(ProviderError::Timeout(_))));
    let end = h.next_frame().await;
    assert!(matches!(end.body, Performative::End { error: None }));
}

#[tokio::test]
async fn destroy_fails_in_flight_sends() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Auto).await;
    let info = producer_info(&session, 1);
    let producer = info.id.clone();
    let (channel, handle) = h.producer(info.clone()).await;

    let sent = h.provider.send(message(&producer, "stranded"));
    let destroyed = h.provider.destroy(info.into());
    assert!(matches!(sent.await, Err(ProviderError::ResourceClosed(_))));

    let detach = h.next_frame().await;
    assert!(matches!(detach.body, Performative::Detach { closed: true, .. }));
    h.probe
        .reply([peer_detach(channel, handle, None)])
        .expect("peer detach");
    destroyed.await.expect("destroy completes");
}

#[tokio::test]
async fn refused_attach_fails_the_create() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    let session = h.session(1, AckMode::Auto).await;

    let info = producer_info(&session, 1);
    let created = h.provider.create(info.clone().into());
    let attach = h.next_frame().await;
    let Performative::Attach(body) = attach.body else {
        panic!("expected attach");
    };
    let condition = ErrorCondition::new("amqp:not-found", "no such queue");
    h.probe
        .reply([peer_detach(attach.channel, body.handle, Some(condition))])
        .expect("peer refusal");

    let err = created.await.expect_err("create fails");
    assert!(matches!(
        err,
        ProviderError::RemoteClosed { ref resource, condition: Some(_) }
            if *resource == ResourceId::from(info.id.clone())
    ));
    let reply = h.next_frame().await;
    assert!(matches!(reply.body, Performative::Detach { closed: true, .. }));

    let retried = h.provider.send(message(&info.id, "nowhere"));
    assert!(matches!(retried.await, Err(ProviderError::UnknownResource(_))));
}

#[tokio::test]
async fn unsubscribe_attaches_then_detaches() {
    let mut h = Harness::open(ProviderConfig::default()).await;
    h.session(1, AckMode::Auto).await;

    let removed = h.provider.unsubscribe("nightly");
    let attach = h.next_frame().await;
    let Performative::Attach(body) = attach.body else {
        panic!("expected attach");
    };
    assert_eq!(body.name, "nightly");
    assert!(body.source.as_ref().is_some_and(|s| s.durable));

    h.probe
        .reply([peer_attach(attach.channel, body.handle, Role::Sender, "topic://news")])
        .expect("peer attach");
    let detach = h.next_frame().await;
    assert!(matches!(detach.body, Performative::Detach { .. }));
    h.probe
        .reply([peer_detach(attach.channel, body.handle, None)])
        .expect("peer detach");
    removed.await.expect("unsubscribe completes");
}

#[tokio::test]
async fn refused_connect_reports_the_address() {
    let refusing: crate::transport::TransportFactory = Arc::new(|_: &RemoteAddress, _: crate::transport::SocketOptions| {
        Box::new(ChannelTransport::refusing(io::ErrorKind::ConnectionRefused).0)
            as Box<dyn crate::transport::Transport>
    });
    let provider = AmqpProvider::builder(address())
        .transport_factory(refusing)
        .build()
        .expect("provider builds");
    let err = provider.connect().await.expect_err("connect fails");
    assert!(matches!(
        err,
        ProviderError::Connect { ref address, .. } if address == "amqp://broker.test:5672"
    ));
}

#[tokio::test]
async fn operations_fail_before_the_connection_is_open() {
    let h = Harness::connected(ProviderConfig::default()).await;
    let session = SessionInfo::new(h.connection.id.session(1), AckMode::Auto);
    assert!(matches!(
        h.provider.create(session.into()).await,
        Err(ProviderError::IllegalState(_))
    ));
}

struct SendOnly;

#[async_trait]
impl Provider for SendOnly {
    async fn connect(&self) -> Result<(), ProviderError> { Ok(()) }

    fn close(&self) -> ProviderFuture<()> { ProviderFuture::ready(()) }

    fn create(&self, resource: ResourceInfo) -> ProviderFuture<ResourceInfo> { ProviderFuture::ready(resource) }

    fn destroy(&self, _resource: ResourceInfo) -> ProviderFuture<()> { ProviderFuture::ready(()) }

    fn send(&self, _message: OutboundMessage) -> ProviderFuture<()> { ProviderFuture::ready(()) }

    fn set_listener(&self, _listener: Arc<dyn ProviderListener>) {}

    fn listener(&self) -> Option<Arc<dyn ProviderListener>> { None }

    fn remote_address(&self) -> &RemoteAddress { unreachable!("not used by these tests") }
}

#[tokio::test]
async fn optional_operations_default_to_unsupported() {
    let session = ConnectionId::new("c").expect("connection id").session(1);
    let consumer = session.consumer(1);
    let provider = SendOnly;

    let outcomes = [
        provider
            .acknowledge(consumer.clone(), DeliveryId::new(0), AckType::Accepted)
            .await,
        provider.commit(session.clone()).await,
        provider.rollback(session).await,
        provider.unsubscribe("sub").await,
    ];
    for outcome in outcomes {
        assert!(matches!(outcome, Err(ProviderError::Unsupported(_))));
    }
    assert!(matches!(
        provider.pull(consumer, Duration::ZERO).await,
        Err(ProviderError::Unsupported("pull"))
    ));
}
