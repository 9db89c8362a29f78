//! Frame tracing for providers with `trace_frames` enabled.

use crate::engine::{Frame, FrameDirection, FrameTracer};

/// Logs every performative at `TRACE` under the `jmswire::frames` target.
pub(super) struct TracingFrameTracer {
    peer: String,
}

impl TracingFrameTracer {
    pub(super) fn new(peer: String) -> Self { Self { peer } }
}

impl FrameTracer for TracingFrameTracer {
    fn trace(&mut self, direction: FrameDirection, frame: &Frame) {
        let direction = match direction {
            FrameDirection::Sent => "SENT",
            FrameDirection::Received => "RECV",
        };
        tracing::trace!(
            target: "jmswire::frames",
            peer = %self.peer,
            direction,
            channel = frame.channel,
            performative = frame.body.name(),
            "{:?}",
            frame.body
        );
    }
}
