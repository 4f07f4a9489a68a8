use log::trace;
use std::time::{Duration, Instant};

const DEFAULT_START_BITRATE: u32 = 300_000;
const DEFAULT_MIN_BITRATE: u32 = 30_000;
const DEFAULT_MAX_BITRATE: u32 = 1_000_000_000;

/// Loss reports covering fewer packets than this are accumulated, not applied.
const LIMIT_NUM_PACKETS: u64 = 20;
/// While no loss has been reported within this time of the first report, the estimate
/// jumps straight to the receiver's REMB.
const START_PHASE: Duration = Duration::from_secs(2);
const INCREASE_INTERVAL: Duration = Duration::from_secs(1);
const DECREASE_INTERVAL: Duration = Duration::from_millis(300);

/// Fraction lost (out of 256) at or below which the estimate grows. About 2%.
const LOW_LOSS_THRESHOLD: u8 = 5;
/// Fraction lost (out of 256) above which the estimate shrinks. About 10%.
const HIGH_LOSS_THRESHOLD: u8 = 26;

/// Loss-based send-side bandwidth estimator.
///
/// Grows 8% per second while loss stays under 2%, holds between 2% and 10%, and above
/// 10% shrinks proportionally to the loss at most once per `300 ms + rtt`. The result is
/// always capped by the last REMB and clamped to the configured bounds.
#[derive(Debug, Clone)]
pub struct SendSideBandwidthEstimation {
    bitrate: u32,
    min_bitrate: u32,
    max_bitrate: u32,
    /// Latest REMB value, 0 until one is received.
    bwe_incoming: u32,

    last_fraction_loss: u8,
    last_round_trip_time_ms: i64,
    lost_packets_q8: u64,
    expected_packets: u64,
    has_decreased_since_last_fraction_loss: bool,

    first_report_time: Option<Instant>,
    last_packet_report: Option<Instant>,
    time_last_increase: Option<Instant>,
    time_last_decrease: Option<Instant>,
}

impl Default for SendSideBandwidthEstimation {
    fn default() -> Self {
        Self::new()
    }
}

impl SendSideBandwidthEstimation {
    pub fn new() -> Self {
        Self::with_bounds(DEFAULT_START_BITRATE, DEFAULT_MIN_BITRATE, DEFAULT_MAX_BITRATE)
    }

    pub fn with_bounds(start_bitrate: u32, min_bitrate: u32, max_bitrate: u32) -> Self {
        let max_bitrate = max_bitrate.max(min_bitrate);
        Self {
            bitrate: start_bitrate.clamp(min_bitrate, max_bitrate),
            min_bitrate,
            max_bitrate,
            bwe_incoming: 0,
            last_fraction_loss: 0,
            last_round_trip_time_ms: 0,
            lost_packets_q8: 0,
            expected_packets: 0,
            has_decreased_since_last_fraction_loss: false,
            first_report_time: None,
            last_packet_report: None,
            time_last_increase: None,
            time_last_decrease: None,
        }
    }

    /// `(bitrate, fraction_lost, round_trip_time_ms)`.
    pub fn current_estimate(&self) -> (u32, u8, i64) {
        (
            self.bitrate,
            self.last_fraction_loss,
            self.last_round_trip_time_ms,
        )
    }

    /// Applies a REMB received from the remote side.
    pub fn update_receiver_estimate(&mut self, _now: Instant, bandwidth: u32) {
        self.bwe_incoming = bandwidth;
        self.bitrate = self.capped(self.bitrate);
    }

    /// Applies the loss and round trip of one receiver report block.
    ///
    /// `packets` is the number of packets sent since the previous report.
    pub fn update_receiver_block(
        &mut self,
        fraction_lost: u8,
        rtt_ms: i64,
        packets: u32,
        now: Instant,
    ) {
        self.first_report_time.get_or_insert(now);
        self.last_round_trip_time_ms = rtt_ms;

        if packets == 0 {
            return;
        }
        self.lost_packets_q8 += fraction_lost as u64 * packets as u64;
        self.expected_packets += packets as u64;
        if self.expected_packets < LIMIT_NUM_PACKETS {
            return;
        }

        self.has_decreased_since_last_fraction_loss = false;
        self.last_fraction_loss = (self.lost_packets_q8 / self.expected_packets).min(255) as u8;
        self.lost_packets_q8 = 0;
        self.expected_packets = 0;
        self.last_packet_report = Some(now);
        self.update_estimate(now);
    }

    fn in_start_phase(&self, now: Instant) -> bool {
        match self.first_report_time {
            None => true,
            Some(first) => now.saturating_duration_since(first) < START_PHASE,
        }
    }

    pub fn update_estimate(&mut self, now: Instant) {
        if self.last_fraction_loss == 0 && self.in_start_phase(now) && self.bwe_incoming > self.bitrate
        {
            self.bitrate = self.capped(self.bwe_incoming);
            trace!("start phase: jumping to remb {}", self.bitrate);
            return;
        }

        if self.last_packet_report.is_none() {
            self.bitrate = self.capped(self.bitrate);
            return;
        }

        if self.last_fraction_loss <= LOW_LOSS_THRESHOLD {
            let due = self
                .time_last_increase
                .is_none_or(|last| now.saturating_duration_since(last) >= INCREASE_INTERVAL);
            if due {
                self.bitrate = (self.bitrate as f64 * 1.08 + 1000.0) as u32;
                self.time_last_increase = Some(now);
            }
        } else if self.last_fraction_loss > HIGH_LOSS_THRESHOLD {
            let interval = DECREASE_INTERVAL
                + Duration::from_millis(self.last_round_trip_time_ms.max(0) as u64);
            let due = self
                .time_last_decrease
                .is_none_or(|last| now.saturating_duration_since(last) >= interval);
            if !self.has_decreased_since_last_fraction_loss && due {
                self.bitrate = (self.bitrate as u64 * (512 - self.last_fraction_loss as u64) / 512)
                    as u32;
                self.has_decreased_since_last_fraction_loss = true;
                self.time_last_decrease = Some(now);
            }
        }

        self.bitrate = self.capped(self.bitrate);
    }

    fn capped(&self, bitrate: u32) -> u32 {
        let mut bitrate = bitrate;
        if self.bwe_incoming > 0 {
            bitrate = bitrate.min(self.bwe_incoming);
        }
        bitrate.clamp(self.min_bitrate, self.max_bitrate)
    }
}
