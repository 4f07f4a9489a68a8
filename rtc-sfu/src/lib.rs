//! RTC SFU - Adaptive bandwidth and RTCP feedback core of a WebRTC SFU.
//!
//! The crate sits between a publisher and its subscribers. Toward the publisher it
//! generates the feedback a receiver owes (Receiver Reports, Generic NACKs). Toward each
//! subscriber it estimates the available bandwidth from their reports, picks the
//! simulcast layer that fits and remaps sequence numbers so that dropped layers leave no
//! gaps. Between the two, a distributor splits the bandwidth the publisher can be asked
//! for across all of its subscribers.
//!
//! # Components
//!
//! ## Feedback toward the publisher
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RtcpRrGenerator`] | Loss and jitter accounting, Receiver Reports (RFC 3550) |
//! | [`RtcpNackGenerator`] | Gap detection with retry backoff, Generic NACK (RFC 4585) |
//! | [`RtcpFeedbackGenerationInterceptor`] | Pairs both per bound remote stream |
//!
//! ## Per subscriber leg
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`SenderBandwidthEstimationHandler`] | SR/RR round trip and REMB correlation into an estimate |
//! | [`SenderBandwidthEstimationInterceptor`] | Runs a handler per bound local video stream |
//! | [`QualityManager`] | Spatial/temporal layer selection against the estimate |
//! | [`SequenceNumberTranslator`] | Contiguous output sequence space over dropped packets |
//! | [`SubscriberLeg`] | All of the above for one subscriber |
//!
//! ## Per publisher
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BandwidthDistributor`] | MaxVideoBW, TargetVideoBW or StreamPriority split of a REMB |
//! | [`PaddingManager`] | Padding bitrate used to probe for more bandwidth |
//! | [`Publisher`] | Owns the legs and the distributor |
//! | [`Worker`] | Task queue and timers everything above runs on |
//!
//! # Pipeline stages
//!
//! The two interceptors are [`sansio::Protocol`] stages composed with [`Registry`], the
//! innermost layer being [`NoopInterceptor`]. Every stage processes `read`, `write`,
//! `event` and `timeout` in the same outer-to-inner order and drains its own queues
//! before its inner stage's.
//!
//! ```ignore
//! use rtc_sfu::{Registry, RtcpFeedbackGenerationBuilder, SenderBandwidthEstimationBuilder};
//!
//! let mut chain = Registry::new()
//!     .with(RtcpFeedbackGenerationBuilder::new().build())
//!     .with(SenderBandwidthEstimationBuilder::new().build())
//!     .build();
//!
//! chain.bind_remote_stream(&publisher_video);
//! chain.bind_local_stream(&subscriber_video);
//!
//! while let Some(event) = chain.poll_event() {
//!     if let InterceptorEvent::BandwidthEstimate(estimate) = event {
//!         publisher.on_remb(estimate.bitrate as u64, publisher.video_source_ssrc());
//!     }
//! }
//! ```
//!
//! # Stats
//!
//! Components report through a [`StatNode`] tree rendered as JSON, for example
//! `{"total":{"senderBitrateEstimation":300000},"qualityLayers":{"0":{"0":120000}}}`.

#![warn(rust_2018_idioms)]

use std::time::Instant;

pub mod bandwidth;
pub mod clock;
pub mod error;
pub mod estimation;
pub mod feedback;
pub mod leg;
pub mod publisher;
pub mod quality;
pub mod rtp_utils;
pub mod sequence;
pub mod stats;
pub mod worker;

mod noop;
mod registry;
pub(crate) mod stream_info;

pub use bandwidth::{
    BandwidthDistributor, BwDistributionConfig, DistributionAlgorithm, MaxVideoBwDistributor,
    PaddingManager, PriorityLevel, StreamPriorityBwDistributor, StreamPriorityStep,
    StreamPriorityStrategy, TargetVideoBwDistributor,
};
pub use clock::{Clock, SharedClock, SimulatedClock, SystemClock};
pub use error::{Error, Result};
pub use estimation::{
    BandwidthEstimate, BandwidthEstimationListener, SendSideBandwidthEstimation,
    SenderBandwidthEstimationBuilder, SenderBandwidthEstimationHandler,
    SenderBandwidthEstimationInterceptor,
};
pub use feedback::{
    PublisherRtpInfo, RtcpFeedbackGenerationBuilder, RtcpFeedbackGenerationInterceptor,
    RtcpNackGenerator, RtcpRrGenerator,
};
pub use leg::{LegConfig, MediaLeg, SubscriberLeg};
pub use noop::NoopInterceptor;
pub use publisher::{LegHandle, Publisher};
pub use quality::{Layer, LayerInfo, Override, QualityManager, VideoConstraints};
pub use registry::Registry;
pub use sequence::{SequenceNumber, SequenceNumberKind, SequenceNumberTranslator};
pub use stats::{
    CumulativeStat, MovingAverageStat, MovingIntervalRateStat, Stat, StatEntry, StatNode,
    StringStat,
};
pub use stream_info::{MediaKind, RTCPFeedback, StreamInfo};
pub use worker::{TaskId, Worker};

/// RTP/RTCP packet flowing through a pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Rtp(rtp::packet::Packet),
    /// A compound RTCP packet, one entry per block.
    Rtcp(Vec<rtp_utils::RtcpPacket>),
}

/// A [`Packet`] together with the time it was received or is due to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedPacket {
    pub now: Instant,
    pub message: Packet,
}

/// What a stage reports to the application through `poll_event`.
#[derive(Debug, Clone, PartialEq)]
pub enum InterceptorEvent {
    /// A subscriber leg's bandwidth estimate changed.
    BandwidthEstimate(BandwidthEstimate),
    /// A Receiver Report about a publisher stream was generated.
    PublisherRtpInfo(PublisherRtpInfo),
}

/// Pipeline stage with the [`sansio::Protocol`] types fixed to RTP/RTCP processing:
/// - `Rin`, `Win`, `Rout`, `Wout` = [`TaggedPacket`]
/// - `Ein`, `Eout` = [`InterceptorEvent`]
/// - `Time` = [`Instant`]
/// - `Error` = [`Error`]
pub trait Interceptor:
    sansio::Protocol<
        TaggedPacket,
        TaggedPacket,
        InterceptorEvent,
        Rout = TaggedPacket,
        Wout = TaggedPacket,
        Eout = InterceptorEvent,
        Time = Instant,
        Error = Error,
    > + Sized
{
    /// Wrap this stage with another layer.
    fn with<O, F>(self, f: F) -> O
    where
        F: FnOnce(Self) -> O,
        O: Interceptor,
    {
        f(self)
    }

    /// Called once per outgoing stream, before its first packet is written.
    fn bind_local_stream(&mut self, info: &StreamInfo);

    /// Called when an outgoing stream is removed.
    fn unbind_local_stream(&mut self, info: &StreamInfo);

    /// Called once per incoming stream, before its first packet is read.
    fn bind_remote_stream(&mut self, info: &StreamInfo);

    /// Called when an incoming stream is removed.
    fn unbind_remote_stream(&mut self, info: &StreamInfo);
}
