use crate::clock::SharedClock;
use crate::estimation::SENDER_BITRATE_ESTIMATION_KEY;
use crate::leg::{MediaLeg, RATE_STAT_INTERVAL, RATE_STAT_INTERVALS, VIDEO_BITRATE_KEY};
use crate::stats::{CumulativeStat, MovingIntervalRateStat, StatNode};
use log::debug;
use std::time::{Duration, Instant};

pub const PADDING_BITRATE_KEY: &str = "paddingBitrate";
pub const TARGET_BITRATE_KEY: &str = "targetBitrate";
pub const NUMBER_OF_STREAMS_KEY: &str = "numberOfStreams";

/// Target assumed while no leg reports one.
pub const INITIAL_TARGET_BITRATE: u64 = 300_000;

const STATS_PERIOD: Duration = Duration::from_millis(100);
const BITRATE_COMPARISON_MARGIN: f64 = 1.3;

/// Decides how much padding a connection sends to probe for more bandwidth.
///
/// Padding fills the gap between what the legs want and what is being sent, as long as
/// the estimate leaves room for it. Once the estimate is comfortably above the target
/// there is nothing left to probe for and padding stops.
///
/// Reads `total/senderBitrateEstimation` and `total/videoBitrate` from the connection
/// stats and writes `targetBitrate` and `numberOfStreams` next to them.
pub struct PaddingManager {
    clock: SharedClock,
    last_calculation: Instant,
    padding_bitrate: u64,
}

impl PaddingManager {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            last_calculation: clock.now(),
            clock,
            padding_bitrate: 0,
        }
    }

    /// Total padding bitrate of the last calculation.
    pub fn padding_bitrate(&self) -> u64 {
        self.padding_bitrate
    }

    /// Adds the sent-bitrate stats under `total` unless they are there already.
    pub fn init_stats(&self, stats: &mut StatNode) {
        let total = stats.node("total");
        for key in [PADDING_BITRATE_KEY, VIDEO_BITRATE_KEY] {
            if total.stat(key).is_none() {
                total.insert_stat(
                    key,
                    MovingIntervalRateStat::new(
                        RATE_STAT_INTERVAL,
                        RATE_STAT_INTERVALS,
                        8.0,
                        self.clock.clone(),
                    ),
                );
            }
        }
    }

    pub fn on_padding_sent(&mut self, stats: &mut StatNode, bytes: u64) {
        stats.node("total").add(PADDING_BITRATE_KEY, bytes);
    }

    pub fn on_video_sent(&mut self, stats: &mut StatNode, bytes: u64) {
        stats.node("total").add(VIDEO_BITRATE_KEY, bytes);
    }

    /// Recomputes the padding bitrate and splits it evenly over `legs`.
    ///
    /// Runs at most once per 100 ms and only once both the estimate and the video
    /// bitrate are known. Returns the per-leg padding when it ran.
    pub fn recalculate(
        &mut self,
        stats: &mut StatNode,
        legs: &mut [&mut dyn MediaLeg],
    ) -> Option<u64> {
        let now = self.clock.now();
        if now.saturating_duration_since(self.last_calculation) < STATS_PERIOD {
            return None;
        }

        let total = stats.node("total");
        let (Some(estimated_bandwidth), Some(media_bitrate)) = (
            total.value(SENDER_BITRATE_ESTIMATION_KEY),
            total.value(VIDEO_BITRATE_KEY),
        ) else {
            return None;
        };
        self.last_calculation = now;

        let mut target_bitrate: u64 = legs.iter().map(|leg| leg.target_video_bitrate()).sum();
        total.insert_stat(TARGET_BITRATE_KEY, CumulativeStat(target_bitrate));
        if target_bitrate == 0 {
            target_bitrate = INITIAL_TARGET_BITRATE;
        }

        let can_send_more_bitrate =
            BITRATE_COMPARISON_MARGIN * (media_bitrate as f64) < estimated_bandwidth as f64;
        let estimate_is_high_enough =
            estimated_bandwidth as f64 > target_bitrate as f64 * BITRATE_COMPARISON_MARGIN;
        self.padding_bitrate = if !can_send_more_bitrate || estimate_is_high_enough {
            0
        } else {
            target_bitrate
                .saturating_sub(media_bitrate)
                .min(estimated_bandwidth.saturating_sub(media_bitrate))
        };
        debug!(
            "padding {} (estimate {}, media {}, target {}, can send more {}, estimate high enough {})",
            self.padding_bitrate,
            estimated_bandwidth,
            media_bitrate,
            target_bitrate,
            can_send_more_bitrate,
            estimate_is_high_enough
        );

        total.insert_stat(NUMBER_OF_STREAMS_KEY, CumulativeStat(legs.len() as u64));
        if legs.is_empty() {
            return None;
        }
        let per_leg = self.padding_bitrate / legs.len() as u64;
        for leg in legs.iter_mut() {
            leg.set_target_padding_bitrate(per_leg);
        }
        Some(per_leg)
    }
}
