use crate::clock::ntp_middle;
use crate::rtp_utils::sequence_number_less_than;
use crate::stream_info::MediaKind;
use log::{debug, trace};
use std::time::{Duration, Instant};

/// Transit jumps at or above this many timestamp units are not counted as jitter.
const MAX_DELAY: i64 = 450_000;
const VIDEO_INTERVAL: Duration = Duration::from_millis(1000);
const AUDIO_INTERVAL: Duration = Duration::from_millis(5000);
const MAX_TOTAL_LOST: u32 = 0xFF_FFFF;

/// Receiver report synthesis for one inbound stream (RFC 3550 §6.4.1).
///
/// Loss is derived from the highest extended sequence number, so packets recovered
/// through retransmission never make the cumulative count go backwards.
#[derive(Debug, Clone)]
pub struct RtcpRrGenerator {
    sender_ssrc: u32,
    media_ssrc: u32,
    kind: MediaKind,
    clock_rate_khz: i64,

    packets_received: u32,
    base_seq: Option<u16>,
    max_seq: Option<u16>,
    cycles: u16,
    extended_seq: u32,
    lost: u32,
    expected_prior: u32,
    received_prior: u32,

    /// Reference point for arrival times expressed in ms.
    epoch: Option<Instant>,
    last_rtp_timestamp: u32,
    last_arrival_ms: i64,
    transit: Option<i64>,
    jitter: f64,

    last_sr_mid_ntp: u32,
    last_sr_time: Option<Instant>,
    next_report: Option<Instant>,
}

impl RtcpRrGenerator {
    /// `clock_rate` is the media clock in Hz; 0 picks the usual rate for `kind`.
    pub fn new(sender_ssrc: u32, media_ssrc: u32, kind: MediaKind, clock_rate: u32) -> Self {
        let clock_rate = if clock_rate == 0 {
            match kind {
                MediaKind::Video => 90_000,
                MediaKind::Audio => 48_000,
            }
        } else {
            clock_rate
        };
        Self {
            sender_ssrc,
            media_ssrc,
            kind,
            clock_rate_khz: (clock_rate as i64 / 1000).max(1),
            packets_received: 0,
            base_seq: None,
            max_seq: None,
            cycles: 0,
            extended_seq: 0,
            lost: 0,
            expected_prior: 0,
            received_prior: 0,
            epoch: None,
            last_rtp_timestamp: 0,
            last_arrival_ms: 0,
            transit: None,
            jitter: 0.0,
            last_sr_mid_ntp: 0,
            last_sr_time: None,
            next_report: None,
        }
    }

    pub fn media_ssrc(&self) -> u32 {
        self.media_ssrc
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Deadline of the next report, once the first packet has been seen.
    pub fn next_report(&self) -> Option<Instant> {
        self.next_report
    }

    fn interval(&self) -> Duration {
        match self.kind {
            MediaKind::Video => VIDEO_INTERVAL,
            MediaKind::Audio => AUDIO_INTERVAL,
        }
    }

    fn randomized_interval(&self) -> Duration {
        let interval = self.interval().as_millis() as u64;
        Duration::from_millis(rand::random_range(interval / 2..=interval * 3 / 2))
    }

    fn arrival_ms(&mut self, now: Instant) -> i64 {
        let epoch = *self.epoch.get_or_insert(now);
        now.saturating_duration_since(epoch).as_millis() as i64
    }

    /// A packet older than the highest one that arrived later than jitter can explain.
    fn is_retransmit_of_old_packet(&self, header: &rtp::header::Header, arrival_ms: i64) -> bool {
        let Some(max_seq) = self.max_seq else {
            return false;
        };
        if !sequence_number_less_than(header.sequence_number, max_seq) || self.jitter == 0.0 {
            return false;
        }
        let time_diff_ms = arrival_ms - self.last_arrival_ms;
        let timestamp_diff = header.timestamp.wrapping_sub(self.last_rtp_timestamp) as i32 as i64;
        let rtp_time_diff_ms = timestamp_diff / self.clock_rate_khz;
        let max_delay_ms = (2.0 * self.jitter / self.clock_rate_khz as f64) as i64;
        time_diff_ms > rtp_time_diff_ms + max_delay_ms
    }

    /// Accounts for `header` and reports whether a receiver report is due.
    pub fn handle_rtp_packet(&mut self, now: Instant, header: &rtp::header::Header) -> bool {
        if header.ssrc != self.media_ssrc {
            debug!(
                "rr generator for ssrc {} ignoring packet of ssrc {}",
                self.media_ssrc, header.ssrc
            );
            return false;
        }

        let seq = header.sequence_number;
        self.packets_received = self.packets_received.wrapping_add(1);
        if self.base_seq.is_none() {
            self.base_seq = Some(seq);
        }
        match self.max_seq {
            None => self.max_seq = Some(seq),
            Some(max_seq) if !sequence_number_less_than(seq, max_seq) => {
                if seq < max_seq {
                    self.cycles = self.cycles.wrapping_add(1);
                }
                self.max_seq = Some(seq);
            }
            Some(_) => {}
        }
        self.extended_seq =
            (self.cycles as u32) << 16 | self.max_seq.unwrap_or(seq) as u32;

        let arrival_ms = self.arrival_ms(now);
        if header.timestamp != self.last_rtp_timestamp
            && !self.is_retransmit_of_old_packet(header, arrival_ms)
        {
            let transit = arrival_ms * self.clock_rate_khz - header.timestamp as i64;
            if let Some(last_transit) = self.transit {
                let delta = (transit - last_transit).abs();
                if delta < MAX_DELAY {
                    self.jitter += (delta as f64 - self.jitter) / 16.0;
                }
            }
            self.transit = Some(transit);
        }
        self.last_rtp_timestamp = header.timestamp;
        self.last_arrival_ms = arrival_ms;

        match self.next_report {
            None => {
                self.next_report = Some(now + self.interval());
                false
            }
            Some(next_report) => {
                if now >= next_report {
                    trace!("receiver report due for ssrc {}", self.media_ssrc);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Remembers the NTP middle bits and arrival time of a sender report.
    pub fn handle_sr(&mut self, now: Instant, sr: &rtcp::sender_report::SenderReport) {
        if sr.ssrc != self.media_ssrc {
            debug!(
                "rr generator for ssrc {} ignoring sender report of ssrc {}",
                self.media_ssrc, sr.ssrc
            );
            return;
        }
        self.last_sr_mid_ntp = ntp_middle(sr.ntp_time);
        self.last_sr_time = Some(now);
    }

    /// Snapshots the counters into a receiver report and starts a new interval.
    pub fn generate_receiver_report(&mut self, now: Instant) -> rtcp::receiver_report::ReceiverReport {
        let delay = match self.last_sr_time {
            Some(sr_time) => {
                (now.saturating_duration_since(sr_time).as_millis() as u64 * 65536 / 1000) as u32
            }
            None => 0,
        };

        let base_seq = self.base_seq.unwrap_or(0) as u32;
        let expected = self.extended_seq.wrapping_sub(base_seq).wrapping_add(1);
        let expected_interval = expected.wrapping_sub(self.expected_prior);
        self.expected_prior = expected;
        let received_interval = self.packets_received.wrapping_sub(self.received_prior);
        self.received_prior = self.packets_received;

        let lost_interval = expected_interval as i64 - received_interval as i64;
        let mut fraction_lost = 0u8;
        if lost_interval > 0 {
            if expected_interval != 0 {
                fraction_lost = (((lost_interval as u64) << 8) / expected_interval as u64) as u8;
            }
            self.lost = (self.lost as u64 + lost_interval as u64).min(MAX_TOTAL_LOST as u64) as u32;
        }

        debug!(
            "receiver report for ssrc {}: lost {}, fraction {}, cycles {}, highest {}, jitter {}, dlsr {}, lsr {}",
            self.media_ssrc,
            self.lost,
            fraction_lost,
            self.cycles,
            self.extended_seq,
            self.jitter as u32,
            delay,
            self.last_sr_mid_ntp
        );

        self.next_report = Some(now + self.randomized_interval());

        rtcp::receiver_report::ReceiverReport {
            ssrc: self.sender_ssrc,
            reports: vec![rtcp::reception_report::ReceptionReport {
                ssrc: self.media_ssrc,
                fraction_lost,
                total_lost: self.lost,
                last_sequence_number: self.extended_seq,
                jitter: self.jitter as u32,
                last_sender_report: self.last_sr_mid_ntp,
                delay,
            }],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSRC: u32 = 2222;

    fn header(seq: u16, timestamp: u32) -> rtp::header::Header {
        rtp::header::Header {
            ssrc: SSRC,
            sequence_number: seq,
            timestamp,
            ..Default::default()
        }
    }

    fn report(generator: &mut RtcpRrGenerator, now: Instant) -> rtcp::reception_report::ReceptionReport {
        let rr = generator.generate_receiver_report(now);
        assert_eq!(rr.ssrc, 1);
        assert_eq!(rr.reports.len(), 1);
        rr.reports[0].clone()
    }

    #[test]
    fn test_first_packet_only_schedules() {
        let now = Instant::now();
        let mut generator = RtcpRrGenerator::new(1, SSRC, MediaKind::Video, 90_000);
        assert!(!generator.handle_rtp_packet(now, &header(1, 0)));
        assert_eq!(generator.next_report(), Some(now + VIDEO_INTERVAL));
        assert!(!generator.handle_rtp_packet(now + Duration::from_millis(500), &header(2, 0)));
        assert!(generator.handle_rtp_packet(now + Duration::from_millis(1000), &header(3, 0)));
    }

    #[test]
    fn test_audio_uses_longer_interval() {
        let now = Instant::now();
        let mut generator = RtcpRrGenerator::new(1, SSRC, MediaKind::Audio, 48_000);
        generator.handle_rtp_packet(now, &header(1, 0));
        assert_eq!(generator.next_report(), Some(now + AUDIO_INTERVAL));
    }

    #[test]
    fn test_next_interval_is_randomized_within_bounds() {
        let now = Instant::now();
        let mut generator = RtcpRrGenerator::new(1, SSRC, MediaKind::Video, 90_000);
        generator.handle_rtp_packet(now, &header(1, 0));
        for _ in 0..50 {
            generator.generate_receiver_report(now);
            let next = generator.next_report().unwrap();
            assert!(next >= now + Duration::from_millis(500));
            assert!(next <= now + Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_fraction_lost_in_interval() {
        let now = Instant::now();
        let mut generator = RtcpRrGenerator::new(1, SSRC, MediaKind::Video, 90_000);
        for seq in 1..=4 {
            generator.handle_rtp_packet(now, &header(seq, 0));
        }
        let first = report(&mut generator, now);
        assert_eq!(first.fraction_lost, 0);
        assert_eq!(first.total_lost, 0);

        generator.handle_rtp_packet(now, &header(7, 0));
        let second = report(&mut generator, now);
        assert_eq!(second.fraction_lost, 170, "2 lost out of 3 expected");
        assert_eq!(second.total_lost, 2);
        assert_eq!(second.last_sequence_number, 7);
    }

    #[test]
    fn test_recovered_packets_do_not_reduce_cumulative_loss() {
        let now = Instant::now();
        let mut generator = RtcpRrGenerator::new(1, SSRC, MediaKind::Video, 90_000);
        generator.handle_rtp_packet(now, &header(1, 0));
        generator.handle_rtp_packet(now, &header(4, 0));
        assert_eq!(report(&mut generator, now).total_lost, 2);

        generator.handle_rtp_packet(now, &header(2, 0));
        generator.handle_rtp_packet(now, &header(3, 0));
        let rr = report(&mut generator, now);
        assert_eq!(rr.total_lost, 2);
        assert_eq!(rr.fraction_lost, 0);
    }

    #[test]
    fn test_rollover_counts_cycles() {
        let now = Instant::now();
        let mut generator = RtcpRrGenerator::new(1, SSRC, MediaKind::Video, 90_000);
        generator.handle_rtp_packet(now, &header(65534, 0));
        generator.handle_rtp_packet(now, &header(65535, 0));
        generator.handle_rtp_packet(now, &header(0, 0));
        generator.handle_rtp_packet(now, &header(1, 0));

        let rr = report(&mut generator, now);
        assert_eq!(rr.last_sequence_number, 1 << 16 | 1);
        assert_eq!(rr.total_lost, 0);
    }

    #[test]
    fn test_jitter_from_late_arrival() {
        let now = Instant::now();
        let mut generator = RtcpRrGenerator::new(1, SSRC, MediaKind::Video, 90_000);
        generator.handle_rtp_packet(now, &header(1, 0));
        generator.handle_rtp_packet(now + Duration::from_millis(20), &header(2, 1800));
        // due at 40ms, arrives 10ms late: 900 timestamp units
        generator.handle_rtp_packet(now + Duration::from_millis(50), &header(3, 3600));

        assert_eq!(report(&mut generator, now).jitter, 56);
    }

    #[test]
    fn test_delay_since_last_sr() {
        let now = Instant::now();
        let mut generator = RtcpRrGenerator::new(1, SSRC, MediaKind::Video, 90_000);
        generator.handle_rtp_packet(now, &header(1, 0));
        assert_eq!(report(&mut generator, now).delay, 0);

        let sr = rtcp::sender_report::SenderReport {
            ssrc: SSRC,
            ntp_time: 0x1234_5678_9ABC_DEF0,
            ..Default::default()
        };
        generator.handle_sr(now, &sr);

        let rr = report(&mut generator, now + Duration::from_secs(1));
        assert_eq!(rr.last_sender_report, 0x5678_9ABC);
        assert_eq!(rr.delay, 65536);
    }

    #[test]
    fn test_foreign_sender_report_is_ignored() {
        let now = Instant::now();
        let mut generator = RtcpRrGenerator::new(1, SSRC, MediaKind::Video, 90_000);
        let sr = rtcp::sender_report::SenderReport {
            ssrc: SSRC + 1,
            ntp_time: 0x1234_5678_9ABC_DEF0,
            ..Default::default()
        };
        generator.handle_sr(now, &sr);
        assert_eq!(report(&mut generator, now).last_sender_report, 0);
    }
}
