//! Moving bytes between a transport and a protocol engine.

use std::{fmt::Write as _, io};

use crate::{
    engine::{EngineError, ProtocolEngine},
    transport::Transport,
};

const PREVIEW_BYTES: usize = 32;

/// Drain every pending output chunk of `engine` into `transport`.
///
/// Each non-empty chunk is handed to the transport and then marked consumed.
/// The loop stops at the first empty answer, so `n` chunks cost exactly
/// `n + 1` calls to [`ProtocolEngine::pending_output`]. Calling it with
/// nothing pending is a no-op. Returns the number of chunks written.
///
/// # Errors
///
/// Returns the transport's error. The failed chunk stays pending.
pub fn pump_to_engine<E, T>(engine: &mut E, transport: &mut T, trace_bytes: bool) -> io::Result<usize>
where
    E: ProtocolEngine + ?Sized,
    T: Transport + ?Sized,
{
    let mut written = 0;
    loop {
        let chunk = match engine.pending_output() {
            Some(chunk) if !chunk.is_empty() => chunk,
            _ => return Ok(written),
        };
        if trace_bytes {
            tracing::trace!(
                target: "jmswire::bytes",
                direction = "out",
                len = chunk.len(),
                preview = %hex_preview(&chunk),
            );
        }
        transport.send(chunk)?;
        engine.output_consumed();
        written += 1;
    }
}

/// Copy `data` into `engine`, never offering more than its current capacity.
///
/// Capacity is asked afresh for every chunk and input is processed after each
/// one, so a frame larger than the first reported capacity still gets in.
///
/// # Errors
///
/// Returns the engine's error, or [`EngineError::InputOverflow`] if the
/// engine reports no capacity after processing.
pub fn feed_engine<E>(engine: &mut E, data: &[u8], trace_bytes: bool) -> Result<(), EngineError>
where
    E: ProtocolEngine + ?Sized,
{
    if trace_bytes {
        tracing::trace!(
            target: "jmswire::bytes",
            direction = "in",
            len = data.len(),
            preview = %hex_preview(data),
        );
    }
    let mut rest = data;
    while !rest.is_empty() {
        let capacity = engine.input_capacity();
        if capacity == 0 {
            return Err(EngineError::InputOverflow {
                len: rest.len(),
                capacity,
            });
        }
        let (chunk, tail) = rest.split_at(capacity.min(rest.len()));
        engine.accept_input(chunk)?;
        engine.process_input()?;
        rest = tail;
    }
    Ok(())
}

fn hex_preview(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(PREVIEW_BYTES * 2 + 3);
    for byte in bytes.iter().take(PREVIEW_BYTES) {
        let _ = write!(out, "{byte:02x}");
    }
    if bytes.len() > PREVIEW_BYTES {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::VecDeque};

    use bytes::Bytes;
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::{
        engine::{DeliveryId, DeliveryState, EngineEvent, ErrorCondition, FrameTracer, LinkHandle, LinkSpec, Open},
        test_support::ChannelTransport,
    };

    /// Engine double with scripted output and a small input window.
    #[derive(Default)]
    struct ScriptedEngine {
        output: VecDeque<Bytes>,
        output_checks: Cell<usize>,
        window: usize,
        buffered: Vec<u8>,
        chunks: Vec<usize>,
        processed: Vec<u8>,
    }

    impl ProtocolEngine for ScriptedEngine {
        fn bind(&mut self, _: Open) -> Result<(), EngineError> { Ok(()) }

        fn input_capacity(&self) -> usize { self.window.saturating_sub(self.buffered.len()) }

        fn accept_input(&mut self, chunk: &[u8]) -> Result<(), EngineError> {
            let capacity = self.input_capacity();
            if chunk.len() > capacity {
                return Err(EngineError::InputOverflow {
                    len: chunk.len(),
                    capacity,
                });
            }
            self.chunks.push(chunk.len());
            self.buffered.extend_from_slice(chunk);
            Ok(())
        }

        fn process_input(&mut self) -> Result<(), EngineError> {
            self.processed.append(&mut self.buffered);
            Ok(())
        }

        fn pending_output(&self) -> Option<Bytes> {
            self.output_checks.set(self.output_checks.get() + 1);
            self.output.front().cloned()
        }

        fn output_consumed(&mut self) { self.output.pop_front(); }

        fn set_tracer(&mut self, _: Option<Box<dyn FrameTracer>>) {}

        fn begin_session(&mut self) -> Result<u16, EngineError> { Err(EngineError::Unsupported("sessions")) }

        fn end_session(&mut self, _: u16) -> Result<(), EngineError> { Err(EngineError::Unsupported("sessions")) }

        fn attach_link(&mut self, _: u16, _: LinkSpec) -> Result<LinkHandle, EngineError> {
            Err(EngineError::Unsupported("links"))
        }

        fn detach_link(&mut self, _: LinkHandle) -> Result<(), EngineError> { Err(EngineError::Unsupported("links")) }

        fn flow(&mut self, _: LinkHandle, _: u32, _: bool) -> Result<(), EngineError> {
            Err(EngineError::Unsupported("links"))
        }

        fn transfer(&mut self, _: LinkHandle, _: Bytes) -> Result<DeliveryId, EngineError> {
            Err(EngineError::Unsupported("links"))
        }

        fn settle(&mut self, _: LinkHandle, _: DeliveryId, _: DeliveryState) -> Result<(), EngineError> {
            Err(EngineError::Unsupported("links"))
        }

        fn discharge(&mut self, _: u16, _: bool) -> Result<(), EngineError> {
            Err(EngineError::Unsupported("transactions"))
        }

        fn close(&mut self, _: Option<ErrorCondition>) -> Result<(), EngineError> { Ok(()) }

        fn poll_event(&mut self) -> Option<EngineEvent> { None }
    }

    fn scripted(chunks: &[&'static [u8]]) -> ScriptedEngine {
        ScriptedEngine {
            output: chunks.iter().map(|c| Bytes::from_static(c)).collect(),
            ..ScriptedEngine::default()
        }
    }

    #[rstest]
    #[case(&[])]
    #[case(&[b"a".as_slice()])]
    #[case(&[b"a".as_slice(), b"bc".as_slice(), b"def".as_slice()])]
    fn pump_checks_output_once_more_than_it_writes(#[case] chunks: &[&'static [u8]]) {
        let mut engine = scripted(chunks);
        let (mut transport, probe) = ChannelTransport::connected();
        let written = pump_to_engine(&mut engine, &mut transport, false).expect("pump");
        assert_eq!(written, chunks.len());
        assert_eq!(engine.output_checks.get(), chunks.len() + 1);
        let sent: Vec<Bytes> = probe.sent();
        assert_eq!(sent, chunks.iter().map(|c| Bytes::from_static(c)).collect::<Vec<_>>());

        let again = pump_to_engine(&mut engine, &mut transport, false).expect("second pump");
        assert_eq!(again, 0);
        assert_eq!(probe.sent().len(), chunks.len());
    }

    #[test]
    fn empty_chunk_ends_the_pump() {
        let mut engine = scripted(&[b"", b"never"]);
        let (mut transport, probe) = ChannelTransport::connected();
        assert_eq!(pump_to_engine(&mut engine, &mut transport, false).expect("pump"), 0);
        assert!(probe.sent().is_empty());
    }

    #[test]
    fn transport_failure_leaves_chunk_pending() {
        let mut engine = scripted(&[b"x"]);
        let (mut transport, _probe) = ChannelTransport::disconnected();
        let err = pump_to_engine(&mut engine, &mut transport, true).expect_err("not connected");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert_eq!(engine.output.len(), 1);
    }

    #[test]
    fn hex_preview_truncates_long_chunks() {
        assert_eq!(hex_preview(&[0xde, 0xad]), "dead");
        assert!(hex_preview(&[0; 40]).ends_with("..."));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            failure_persistence: None,
            ..ProptestConfig::default()
        })]

        #[test]
        fn feed_never_exceeds_capacity(window in 1usize..16, data in prop::collection::vec(any::<u8>(), 0..200)) {
            let mut engine = ScriptedEngine { window, ..ScriptedEngine::default() };
            feed_engine(&mut engine, &data, false).expect("feed");
            prop_assert!(engine.chunks.iter().all(|len| *len <= window));
            prop_assert_eq!(engine.processed, data);
        }
    }
}
