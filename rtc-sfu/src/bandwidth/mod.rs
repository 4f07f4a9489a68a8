//! Splitting one publisher-side REMB across the subscriber legs of that publisher.
//!
//! Every distributor ends the same way: each leg gets a REMB of its own, addressed to
//! its video sink SSRC, carrying the bitrate it was allotted. Allotments never exceed
//! the leg's hard maximum and all pool arithmetic saturates at zero.

mod config;
mod max_video;
mod padding;
mod stream_priority;
mod target_video;

pub use config::{
    BwDistributionConfig, DistributionAlgorithm, PriorityLevel, StreamPriorityStep,
    StreamPriorityStrategy,
};
pub use max_video::MaxVideoBwDistributor;
pub use padding::{
    INITIAL_TARGET_BITRATE, NUMBER_OF_STREAMS_KEY, PADDING_BITRATE_KEY, PaddingManager,
    TARGET_BITRATE_KEY,
};
pub use stream_priority::{StreamPriorityBwDistributor, UNASSIGNED_BITRATE_KEY};
pub use target_video::TargetVideoBwDistributor;

use crate::leg::MediaLeg;
use crate::rtp_utils::create_remb;
use crate::stats::StatNode;
use log::trace;

/// The distribution algorithm picked by a [`BwDistributionConfig`].
#[derive(Debug, Clone)]
pub enum BandwidthDistributor {
    MaxVideo(MaxVideoBwDistributor),
    TargetVideo(TargetVideoBwDistributor),
    StreamPriority(StreamPriorityBwDistributor),
}

impl Default for BandwidthDistributor {
    fn default() -> Self {
        BandwidthDistributor::TargetVideo(TargetVideoBwDistributor)
    }
}

impl BandwidthDistributor {
    pub fn from_config(config: &BwDistributionConfig) -> Self {
        match config.algorithm {
            DistributionAlgorithm::MaxVideoBw => {
                BandwidthDistributor::MaxVideo(MaxVideoBwDistributor)
            }
            DistributionAlgorithm::TargetVideoBw => {
                BandwidthDistributor::TargetVideo(TargetVideoBwDistributor)
            }
            DistributionAlgorithm::StreamPriority => {
                BandwidthDistributor::StreamPriority(StreamPriorityBwDistributor::new(
                    config.strategy.clone(),
                    config.strategy_id.clone(),
                ))
            }
        }
    }

    pub fn algorithm(&self) -> DistributionAlgorithm {
        match self {
            BandwidthDistributor::MaxVideo(_) => DistributionAlgorithm::MaxVideoBw,
            BandwidthDistributor::TargetVideo(_) => DistributionAlgorithm::TargetVideoBw,
            BandwidthDistributor::StreamPriority(_) => DistributionAlgorithm::StreamPriority,
        }
    }

    /// Splits `remb` over `legs` and delivers a REMB to each of them.
    ///
    /// Returns the allotted bitrates in the order of `legs`.
    pub fn distribute(
        &mut self,
        remb: u64,
        source_ssrc: u32,
        legs: &mut [&mut dyn MediaLeg],
        stats: &mut StatNode,
    ) -> Vec<u64> {
        match self {
            BandwidthDistributor::MaxVideo(distributor) => {
                distributor.distribute(remb, source_ssrc, legs)
            }
            BandwidthDistributor::TargetVideo(distributor) => {
                distributor.distribute(remb, source_ssrc, legs)
            }
            BandwidthDistributor::StreamPriority(distributor) => {
                distributor.distribute(remb, source_ssrc, legs, stats)
            }
        }
    }
}

/// Sends every leg a REMB with its allotment.
fn deliver(source_ssrc: u32, legs: &mut [&mut dyn MediaLeg], allotments: &[u64]) {
    for (leg, &bitrate) in legs.iter_mut().zip(allotments) {
        trace!("leg {} allotted {} bps", leg.id(), bitrate);
        let remb = create_remb(source_ssrc, vec![leg.video_sink_ssrc()], bitrate);
        leg.deliver_remb(remb);
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use crate::leg::MediaLeg;
    use crate::quality::Layer;
    use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;

    /// Leg with canned bitrates that records what distributors do to it.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct FakeLeg {
        pub id: String,
        pub priority: String,
        pub sink_ssrc: u32,
        pub max_video_bw: u64,
        pub video_bitrate: u64,
        pub max_quality_bitrate: u64,
        /// `layers[spatial][temporal]`
        pub layers: Vec<Vec<u64>>,
        pub slideshow: bool,
        pub simulcast: bool,

        pub target_is_max: bool,
        pub padding: Option<u64>,
        pub slideshow_below: Option<u8>,
        pub fallback: bool,
        pub delivered: Vec<ReceiverEstimatedMaximumBitrate>,
    }

    impl FakeLeg {
        pub(crate) fn new(index: u32, max_video_bw: u64) -> Self {
            Self {
                id: index.to_string(),
                priority: "default".to_owned(),
                sink_ssrc: index * 1000,
                max_video_bw,
                ..Default::default()
            }
        }

        pub(crate) fn delivered_bitrates(&self) -> Vec<u64> {
            self.delivered.iter().map(|remb| remb.bitrate as u64).collect()
        }
    }

    impl MediaLeg for FakeLeg {
        fn id(&self) -> &str {
            &self.id
        }

        fn priority(&self) -> &str {
            &self.priority
        }

        fn video_sink_ssrc(&self) -> u32 {
            self.sink_ssrc
        }

        fn max_video_bw(&self) -> u64 {
            self.max_video_bw
        }

        fn video_bitrate(&self) -> u64 {
            self.video_bitrate
        }

        fn is_simulcast(&self) -> bool {
            self.simulcast
        }

        fn is_slideshow_mode_enabled(&self) -> bool {
            self.slideshow
        }

        fn bitrate_for_layer(&self, layer: Layer) -> Option<u64> {
            self.layers
                .get(layer.spatial as usize)?
                .get(layer.temporal as usize)
                .copied()
        }

        fn bitrate_for_higher_temporal_in_spatial_layer(&self, spatial: u8) -> u64 {
            self.layers
                .get(spatial as usize)
                .and_then(|temporals| temporals.iter().rev().find(|&&b| b > 0))
                .copied()
                .unwrap_or(0)
        }

        fn bitrate_from_max_quality_layer(&self) -> u64 {
            self.max_quality_bitrate
        }

        fn is_target_max_video_bw(&self) -> bool {
            self.target_is_max
        }

        fn enable_slideshow_below_spatial_layer(&mut self, enabled: bool, spatial: u8) {
            self.slideshow_below = enabled.then_some(spatial);
        }

        fn enable_fallback_below_min_layer(&mut self, enabled: bool) {
            self.fallback = enabled;
        }

        fn set_target_is_max_video_bw(&mut self, enabled: bool) {
            self.target_is_max = enabled;
        }

        fn set_target_padding_bitrate(&mut self, bitrate: u64) {
            self.padding = Some(bitrate);
        }

        fn deliver_remb(&mut self, remb: ReceiverEstimatedMaximumBitrate) {
            self.delivered.push(remb);
        }
    }

    pub(crate) fn as_dyn(legs: &mut [FakeLeg]) -> Vec<&mut dyn MediaLeg> {
        legs.iter_mut().map(|leg| leg as &mut dyn MediaLeg).collect()
    }
}
