//! Subscriber legs as seen by the bandwidth distributors.

use crate::clock::SharedClock;
use crate::estimation::{BandwidthEstimate, SenderBandwidthEstimationHandler};
use crate::quality::{self, Layer, QUALITY_LAYERS_KEY, QualityManager};
use crate::rtp_utils::RtcpPacket;
use crate::sequence::{SequenceNumber, SequenceNumberTranslator};
use crate::stats::{CumulativeStat, MovingIntervalRateStat, StatNode};
use log::trace;
use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use std::time::Duration;

pub const VIDEO_BITRATE_KEY: &str = "videoBitrate";
pub const TARGET_PADDING_BITRATE_KEY: &str = "targetPaddingBitrate";
pub const DEFAULT_PRIORITY: &str = "default";

pub(crate) const RATE_STAT_INTERVAL: Duration = Duration::from_millis(100);
pub(crate) const RATE_STAT_INTERVALS: u32 = 30;
const LAYER_RATE_STAT_INTERVALS: u32 = 10;
const BITS_PER_BYTE: f64 = 8.0;

/// What a bandwidth distributor needs from a subscriber leg.
pub trait MediaLeg {
    fn id(&self) -> &str;

    /// Priority tier the leg belongs to in a stream priority strategy.
    fn priority(&self) -> &str;

    fn video_sink_ssrc(&self) -> u32;

    /// Hard bitrate cap of the leg. No distributor grants more than this.
    fn max_video_bw(&self) -> u64;

    /// Video bitrate currently forwarded to the subscriber.
    fn video_bitrate(&self) -> u64;

    fn is_simulcast(&self) -> bool;

    fn is_slideshow_mode_enabled(&self) -> bool;

    fn bitrate_for_layer(&self, layer: Layer) -> Option<u64>;

    fn bitrate_for_higher_temporal_in_spatial_layer(&self, spatial: u8) -> u64;

    fn bitrate_from_max_quality_layer(&self) -> u64;

    fn is_target_max_video_bw(&self) -> bool;

    fn enable_slideshow_below_spatial_layer(&mut self, enabled: bool, spatial: u8);

    fn enable_fallback_below_min_layer(&mut self, enabled: bool);

    fn set_target_is_max_video_bw(&mut self, enabled: bool);

    fn set_target_padding_bitrate(&mut self, bitrate: u64);

    /// Hands the leg the REMB synthesized for it by a distributor.
    fn deliver_remb(&mut self, remb: ReceiverEstimatedMaximumBitrate);

    /// Bitrate the leg would like to receive.
    ///
    /// The hard maximum by default, the top quality layer for simulcast legs and the
    /// current bitrate while in slideshow, never above the hard maximum.
    fn target_video_bitrate(&self) -> u64 {
        let max = self.max_video_bw();
        if self.is_target_max_video_bw() {
            return max;
        }
        if self.is_slideshow_mode_enabled() {
            return self.video_bitrate().min(max);
        }
        if self.is_simulcast() {
            return self.bitrate_from_max_quality_layer().min(max);
        }
        max
    }
}

/// Static description of a subscriber leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegConfig {
    pub id: String,
    pub priority: String,
    pub video_sink_ssrc: u32,
    pub max_video_bw: u64,
    pub simulcast: bool,
}

impl LegConfig {
    pub fn new(id: impl Into<String>, video_sink_ssrc: u32, max_video_bw: u64) -> Self {
        Self {
            id: id.into(),
            priority: DEFAULT_PRIORITY.to_owned(),
            video_sink_ssrc,
            max_video_bw,
            simulcast: false,
        }
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn with_simulcast(mut self, simulcast: bool) -> Self {
        self.simulcast = simulcast;
        self
    }
}

/// State the SFU keeps for one subscriber of a publisher's video.
///
/// Forwarded packets go through [`forward_video`](Self::forward_video), which feeds the
/// per-layer rate stats, drops layers above the selected one and rewrites sequence
/// numbers. Feedback from the subscriber and REMBs from the distributor both land in
/// the leg's [`SenderBandwidthEstimationHandler`] and re-run layer selection.
pub struct SubscriberLeg {
    config: LegConfig,
    clock: SharedClock,
    stats: StatNode,
    translator: SequenceNumberTranslator,
    estimation: SenderBandwidthEstimationHandler,
    quality_manager: QualityManager,
    slideshow_mode: bool,
    target_is_max_video_bw: bool,
    target_padding_bitrate: u64,
    pending_remb: Option<ReceiverEstimatedMaximumBitrate>,
}

impl SubscriberLeg {
    pub fn new(config: LegConfig, clock: SharedClock) -> Self {
        let mut stats = StatNode::new();
        stats.node("total").insert_stat(
            VIDEO_BITRATE_KEY,
            MovingIntervalRateStat::new(
                RATE_STAT_INTERVAL,
                RATE_STAT_INTERVALS,
                BITS_PER_BYTE,
                clock.clone(),
            ),
        );

        Self {
            estimation: SenderBandwidthEstimationHandler::new(config.video_sink_ssrc),
            quality_manager: QualityManager::new(clock.clone()),
            translator: SequenceNumberTranslator::new(),
            config,
            clock,
            stats,
            slideshow_mode: false,
            target_is_max_video_bw: false,
            target_padding_bitrate: 0,
            pending_remb: None,
        }
    }

    pub fn config(&self) -> &LegConfig {
        &self.config
    }

    pub fn stats(&self) -> &StatNode {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut StatNode {
        &mut self.stats
    }

    pub fn quality_manager(&self) -> &QualityManager {
        &self.quality_manager
    }

    pub fn quality_manager_mut(&mut self) -> &mut QualityManager {
        &mut self.quality_manager
    }

    pub fn estimation(&self) -> &SenderBandwidthEstimationHandler {
        &self.estimation
    }

    pub fn translator(&self) -> &SequenceNumberTranslator {
        &self.translator
    }

    pub fn target_padding_bitrate(&self) -> u64 {
        self.target_padding_bitrate
    }

    pub fn set_max_video_bw(&mut self, max_video_bw: u64) {
        self.config.max_video_bw = max_video_bw;
    }

    /// Slideshow requested through signaling, independent of the quality manager.
    pub fn set_slideshow_mode(&mut self, enabled: bool) {
        self.slideshow_mode = enabled;
    }

    /// Takes the last REMB delivered by a distributor, to be relayed to the publisher.
    pub fn take_remb(&mut self) -> Option<ReceiverEstimatedMaximumBitrate> {
        self.pending_remb.take()
    }

    /// Accounts a publisher packet of `layer` and decides whether it reaches the
    /// subscriber.
    ///
    /// Returns the rewritten sequence number for forwarded packets. Packets of layers
    /// that are not selected are recorded as skipped in the translator.
    pub fn forward_video(
        &mut self,
        layer: Layer,
        sequence_number: u16,
        bytes: u64,
    ) -> Option<SequenceNumber> {
        self.record_layer_bytes(layer, bytes);

        let selected = self.quality_manager.layer();
        let forward = !self.config.simulcast
            || (layer.spatial == selected.spatial && layer.temporal <= selected.temporal);

        let translated = self.translator.get(sequence_number, !forward);
        if !forward || !translated.is_valid() {
            trace!(
                "leg {} dropping {} of layer {} (selected {})",
                self.config.id, sequence_number, layer, selected
            );
            return None;
        }

        self.stats.node("total").add(VIDEO_BITRATE_KEY, bytes);
        Some(translated)
    }

    /// Maps a sequence number the subscriber reported back to the publisher's numbering.
    pub fn reverse_sequence_number(&self, output: u16) -> Option<u16> {
        let reversed = self.translator.reverse(output);
        reversed.is_valid().then_some(reversed.input)
    }

    fn record_layer_bytes(&mut self, layer: Layer, bytes: u64) {
        let spatial_key = layer.spatial.to_string();
        let temporal_key = layer.temporal.to_string();
        let clock = self.clock.clone();
        let node = self.stats.node(QUALITY_LAYERS_KEY).node(&spatial_key);
        if !node.add(&temporal_key, bytes) {
            let mut stat = MovingIntervalRateStat::new(
                RATE_STAT_INTERVAL,
                LAYER_RATE_STAT_INTERVALS,
                BITS_PER_BYTE,
                clock,
            );
            stat.add(bytes);
            node.insert_stat(&temporal_key, stat);
        }
    }

    /// Feedback read from the subscriber: Receiver Reports and its own REMBs.
    pub fn on_feedback(&mut self, packets: &[RtcpPacket]) -> Vec<BandwidthEstimate> {
        let now = self.clock.now();
        let estimates = self
            .estimation
            .on_rtcp_received(now, packets, &mut self.stats);
        if !estimates.is_empty() {
            self.quality_manager.notify_quality_update(&mut self.stats);
        }
        estimates
    }

    /// Sender Report written toward the subscriber.
    pub fn on_sender_report_sent(&mut self, sr: &rtcp::sender_report::SenderReport) {
        self.estimation.on_sender_report_sent(self.clock.now(), sr);
    }

    /// Re-runs layer selection against the current stats.
    pub fn notify_quality_update(&mut self) {
        self.quality_manager.notify_quality_update(&mut self.stats);
    }
}

impl MediaLeg for SubscriberLeg {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn priority(&self) -> &str {
        &self.config.priority
    }

    fn video_sink_ssrc(&self) -> u32 {
        self.config.video_sink_ssrc
    }

    fn max_video_bw(&self) -> u64 {
        self.config.max_video_bw
    }

    fn video_bitrate(&self) -> u64 {
        self.stats
            .child("total")
            .and_then(|total| total.value(VIDEO_BITRATE_KEY))
            .unwrap_or(0)
    }

    fn is_simulcast(&self) -> bool {
        self.config.simulcast
    }

    fn is_slideshow_mode_enabled(&self) -> bool {
        self.slideshow_mode || self.quality_manager.is_slideshow_active()
    }

    fn bitrate_for_layer(&self, layer: Layer) -> Option<u64> {
        quality::layer_bitrate(&self.stats, layer)
    }

    fn bitrate_for_higher_temporal_in_spatial_layer(&self, spatial: u8) -> u64 {
        quality::bitrate_for_higher_temporal_in_spatial_layer(&self.stats, spatial)
    }

    fn bitrate_from_max_quality_layer(&self) -> u64 {
        quality::bitrate_from_max_quality_layer(&self.stats)
    }

    fn is_target_max_video_bw(&self) -> bool {
        self.target_is_max_video_bw
    }

    fn enable_slideshow_below_spatial_layer(&mut self, enabled: bool, spatial: u8) {
        self.quality_manager
            .enable_slideshow_below_spatial_layer(enabled, spatial);
    }

    fn enable_fallback_below_min_layer(&mut self, enabled: bool) {
        self.quality_manager.enable_fallback_below_min_layer(enabled);
    }

    fn set_target_is_max_video_bw(&mut self, enabled: bool) {
        self.target_is_max_video_bw = enabled;
    }

    fn set_target_padding_bitrate(&mut self, bitrate: u64) {
        self.target_padding_bitrate = bitrate;
        self.stats
            .node("total")
            .insert_stat(TARGET_PADDING_BITRATE_KEY, CumulativeStat(bitrate));
    }

    fn deliver_remb(&mut self, remb: ReceiverEstimatedMaximumBitrate) {
        let now = self.clock.now();
        let packets: Vec<RtcpPacket> = vec![Box::new(remb.clone())];
        self.estimation
            .on_rtcp_received(now, &packets, &mut self.stats);
        self.quality_manager.notify_quality_update(&mut self.stats);
        self.pending_remb = Some(remb);
    }
}
