//! Receiver-side RTCP feedback toward the publisher.
//!
//! # Components
//!
//! - [`RtcpNackGenerator`]: detects sequence gaps and builds Generic NACKs (RFC 4585).
//! - [`RtcpRrGenerator`]: accumulates loss and jitter and builds Receiver Reports
//!   (RFC 3550).
//! - [`RtcpFeedbackGenerationInterceptor`]: pairs both per bound remote SSRC and queues
//!   the resulting compound packets on the write path.

pub(crate) mod generation;
pub(crate) mod nack_generator;
pub(crate) mod rr_generator;

pub use generation::{RtcpFeedbackGenerationBuilder, RtcpFeedbackGenerationInterceptor};
pub use nack_generator::RtcpNackGenerator;
pub use rr_generator::RtcpRrGenerator;

use crate::stream_info::MediaKind;

/// Loss reported to the publisher in the last receiver report of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherRtpInfo {
    pub ssrc: u32,
    pub kind: MediaKind,
    /// Fraction lost as carried on the wire (loss ratio × 256).
    pub fraction_lost: u8,
}
