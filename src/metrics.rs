//! Metric helpers for `jmswire`.
//!
//! Thin wrappers around the [`metrics`](https://docs.rs/metrics) macros. With
//! the `metrics` feature disabled every helper compiles to nothing.

/// Name of the gauge tracking running provider workers.
pub const PROVIDERS_ACTIVE: &str = "jmswire_providers_active";
/// Name of the counter tracking frames written or decoded by engines.
pub const FRAMES_TOTAL: &str = "jmswire_frames_total";
/// Name of the counter tracking provider failures.
pub const ERRORS_TOTAL: &str = "jmswire_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames decoded from the peer.
    Inbound,
    /// Frames written for the peer.
    Outbound,
}

impl Direction {
    /// Label value used for the `direction` label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active providers gauge.
pub fn inc_providers() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(PROVIDERS_ACTIVE).increment(1.0);
}

/// Decrement the active providers gauge.
pub fn dec_providers() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(PROVIDERS_ACTIVE).decrement(1.0);
}

/// Record a frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    metrics::counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a provider failure.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    metrics::counter!(ERRORS_TOTAL).increment(1);
}
