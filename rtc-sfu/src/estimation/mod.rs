//! Sender-side bandwidth estimation for one outbound leg.
//!
//! [`SenderBandwidthEstimationHandler`] correlates outgoing Sender Reports with the
//! Receiver Reports coming back, derives the round trip, and feeds loss, round trip and
//! REMB into the loss-based [`SendSideBandwidthEstimation`]. Every new estimate goes to
//! the registered [`BandwidthEstimationListener`] and into the leg's stats tree.

pub(crate) mod interceptor;
pub(crate) mod send_side;
pub(crate) mod sender_handler;

pub use interceptor::{SenderBandwidthEstimationBuilder, SenderBandwidthEstimationInterceptor};
pub use send_side::SendSideBandwidthEstimation;
pub use sender_handler::{
    BandwidthEstimationListener, SenderBandwidthEstimationHandler, SENDER_BITRATE_ESTIMATION_KEY,
};

/// Snapshot of the send-side estimate for one leg.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BandwidthEstimate {
    /// Video sink SSRC of the leg the estimate belongs to.
    pub ssrc: u32,
    /// Estimated available bitrate in bps.
    pub bitrate: u32,
    /// Fraction lost (out of 256) from the latest applied receiver report.
    pub fraction_lost: u8,
    pub round_trip_time_ms: i64,
}
