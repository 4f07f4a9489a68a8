use super::{BandwidthEstimate, SendSideBandwidthEstimation};
use crate::clock::ntp_middle;
use crate::error::Result;
use crate::rtp_utils::{RtcpPacket, for_each_rtcp_block};
use crate::stats::{CumulativeStat, StatNode};
use log::{debug, trace};
use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use rtcp::receiver_report::ReceiverReport;
use rtcp::sender_report::SenderReport;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Stat under `stats["total"]` holding the latest estimate in bps.
pub const SENDER_BITRATE_ESTIMATION_KEY: &str = "senderBitrateEstimation";

const MAX_SR_LIST_SIZE: usize = 20;
const MIN_UPDATE_ESTIMATE_INTERVAL: Duration = Duration::from_millis(25);

/// Receives every estimate a [`SenderBandwidthEstimationHandler`] produces.
pub trait BandwidthEstimationListener {
    fn on_bandwidth_estimate(&mut self, bitrate: u32, fraction_lost: u8, round_trip_time_ms: i64);
}

impl<F> BandwidthEstimationListener for F
where
    F: FnMut(u32, u8, i64),
{
    fn on_bandwidth_estimate(&mut self, bitrate: u32, fraction_lost: u8, round_trip_time_ms: i64) {
        self(bitrate, fraction_lost, round_trip_time_ms)
    }
}

#[derive(Debug, Clone, Copy)]
struct SrDelayData {
    sr_ntp: u32,
    sr_send_time: Instant,
}

/// Per-leg correlation of SR/RR round trips and REMB into a bitrate estimate.
pub struct SenderBandwidthEstimationHandler {
    video_sink_ssrc: u32,
    sr_delay_data: VecDeque<SrDelayData>,
    period_packets_sent: u32,
    received_remb: bool,
    last_estimate_update: Option<Instant>,
    estimator: SendSideBandwidthEstimation,
    listener: Option<Box<dyn BandwidthEstimationListener + Send>>,
}

impl SenderBandwidthEstimationHandler {
    pub fn new(video_sink_ssrc: u32) -> Self {
        Self {
            video_sink_ssrc,
            sr_delay_data: VecDeque::with_capacity(MAX_SR_LIST_SIZE),
            period_packets_sent: 0,
            received_remb: false,
            last_estimate_update: None,
            estimator: SendSideBandwidthEstimation::new(),
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn BandwidthEstimationListener + Send>) {
        self.listener = Some(listener);
    }

    pub fn video_sink_ssrc(&self) -> u32 {
        self.video_sink_ssrc
    }

    pub fn set_video_sink_ssrc(&mut self, ssrc: u32) {
        if ssrc != self.video_sink_ssrc {
            self.sr_delay_data.clear();
        }
        self.video_sink_ssrc = ssrc;
    }

    pub fn estimate(&self) -> BandwidthEstimate {
        let (bitrate, fraction_lost, round_trip_time_ms) = self.estimator.current_estimate();
        BandwidthEstimate {
            ssrc: self.video_sink_ssrc,
            bitrate,
            fraction_lost,
            round_trip_time_ms,
        }
    }

    /// Records an outgoing Sender Report. Only reports on the video sink SSRC are kept.
    pub fn on_sender_report_sent(&mut self, now: Instant, sr: &SenderReport) {
        if sr.ssrc != self.video_sink_ssrc {
            return;
        }
        if self.sr_delay_data.len() == MAX_SR_LIST_SIZE {
            self.sr_delay_data.pop_front();
        }
        self.sr_delay_data.push_back(SrDelayData {
            sr_ntp: ntp_middle(sr.ntp_time),
            sr_send_time: now,
        });
    }

    /// Counts an outgoing video packet. Once a REMB has been received this re-emits the
    /// estimate, at most every 25 ms.
    pub fn on_rtp_sent(
        &mut self,
        now: Instant,
        header: &rtp::header::Header,
        stats: &mut StatNode,
    ) -> Option<BandwidthEstimate> {
        if header.ssrc != self.video_sink_ssrc {
            return None;
        }
        self.period_packets_sent = self.period_packets_sent.saturating_add(1);

        let due = self.last_estimate_update.is_none_or(|last| {
            now.saturating_duration_since(last) >= MIN_UPDATE_ESTIMATE_INTERVAL
        });
        if self.received_remb && due {
            self.estimator.update_estimate(now);
            return Some(self.publish_estimate(now, stats));
        }
        None
    }

    /// Processes feedback received from the subscriber and returns the estimates it
    /// produced, in order.
    pub fn on_rtcp_received(
        &mut self,
        now: Instant,
        packets: &[RtcpPacket],
        stats: &mut StatNode,
    ) -> Vec<BandwidthEstimate> {
        let mut estimates = vec![];
        for packet in packets {
            if let Some(estimate) = self.handle_rtcp_packet(now, packet, stats) {
                estimates.push(estimate);
            }
        }
        estimates
    }

    /// Same as [`on_rtcp_received`](Self::on_rtcp_received) on a raw compound buffer.
    /// Malformed blocks are skipped. A buffer whose framing is broken is an error, though
    /// the blocks ahead of the break have been processed.
    pub fn on_rtcp_bytes(
        &mut self,
        now: Instant,
        buf: &[u8],
        stats: &mut StatNode,
    ) -> Result<Vec<BandwidthEstimate>> {
        let mut estimates = vec![];
        for_each_rtcp_block(buf, |packet| {
            if let Some(estimate) = self.handle_rtcp_packet(now, &packet, stats) {
                estimates.push(estimate);
            }
        })?;
        Ok(estimates)
    }

    fn handle_rtcp_packet(
        &mut self,
        now: Instant,
        packet: &RtcpPacket,
        stats: &mut StatNode,
    ) -> Option<BandwidthEstimate> {
        let any = packet.as_any();
        if let Some(rr) = any.downcast_ref::<ReceiverReport>() {
            self.handle_receiver_report(now, rr, stats)
        } else if let Some(remb) = any.downcast_ref::<ReceiverEstimatedMaximumBitrate>() {
            self.handle_remb(now, remb, stats)
        } else {
            None
        }
    }

    fn handle_receiver_report(
        &mut self,
        now: Instant,
        rr: &ReceiverReport,
        stats: &mut StatNode,
    ) -> Option<BandwidthEstimate> {
        let report = rr.reports.iter().find(|r| r.ssrc == self.video_sink_ssrc)?;

        let Some(sr) = self
            .sr_delay_data
            .iter()
            .find(|sr| sr.sr_ntp == report.last_sender_report)
        else {
            debug!(
                "no sender report matches last sr {:#x} for ssrc {}",
                report.last_sender_report, self.video_sink_ssrc
            );
            return None;
        };

        let dlsr_ms = report.delay as i64 * 1000 / 65536;
        let since_sr_ms = now.saturating_duration_since(sr.sr_send_time).as_millis() as i64;
        let round_trip_time_ms = (since_sr_ms - dlsr_ms).max(0);
        trace!(
            "ssrc {}: rtt {} ms, fraction lost {}, packets {}",
            self.video_sink_ssrc, round_trip_time_ms, report.fraction_lost, self.period_packets_sent
        );

        self.estimator.update_receiver_block(
            report.fraction_lost,
            round_trip_time_ms,
            self.period_packets_sent,
            now,
        );
        self.period_packets_sent = 0;
        Some(self.publish_estimate(now, stats))
    }

    fn handle_remb(
        &mut self,
        now: Instant,
        remb: &ReceiverEstimatedMaximumBitrate,
        stats: &mut StatNode,
    ) -> Option<BandwidthEstimate> {
        if !remb.ssrcs.is_empty() && !remb.ssrcs.contains(&self.video_sink_ssrc) {
            return None;
        }
        self.received_remb = true;
        self.estimator
            .update_receiver_estimate(now, remb.bitrate.max(0.0) as u32);
        self.estimator.update_estimate(now);
        Some(self.publish_estimate(now, stats))
    }

    fn publish_estimate(&mut self, now: Instant, stats: &mut StatNode) -> BandwidthEstimate {
        self.last_estimate_update = Some(now);
        let estimate = self.estimate();
        stats.node("total").insert_stat(
            SENDER_BITRATE_ESTIMATION_KEY,
            CumulativeStat::new(estimate.bitrate as u64),
        );
        if let Some(listener) = self.listener.as_mut() {
            listener.on_bandwidth_estimate(
                estimate.bitrate,
                estimate.fraction_lost,
                estimate.round_trip_time_ms,
            );
        }
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp_utils::create_remb;
    use rtcp::reception_report::ReceptionReport;
    use std::sync::{Arc, Mutex};

    const SINK_SSRC: u32 = 0x3344;
    const SR_NTP: u64 = 0x1122_3344_5566_7788;

    fn handler_with_calls() -> (SenderBandwidthEstimationHandler, Arc<Mutex<Vec<u32>>>) {
        let calls = Arc::new(Mutex::new(vec![]));
        let mut handler = SenderBandwidthEstimationHandler::new(SINK_SSRC);
        let sink = calls.clone();
        handler.set_listener(Box::new(move |bitrate: u32, _lost: u8, _rtt: i64| {
            sink.lock().unwrap().push(bitrate);
        }));
        (handler, calls)
    }

    fn sr(ssrc: u32, ntp_time: u64) -> SenderReport {
        SenderReport {
            ssrc,
            ntp_time,
            ..Default::default()
        }
    }

    fn rr(last_sender_report: u32, delay: u32) -> RtcpPacket {
        Box::new(ReceiverReport {
            ssrc: 1,
            reports: vec![ReceptionReport {
                ssrc: SINK_SSRC,
                last_sender_report,
                delay,
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    fn video_header() -> rtp::header::Header {
        rtp::header::Header {
            ssrc: SINK_SSRC,
            ..Default::default()
        }
    }

    #[test]
    fn test_matching_rr_triggers_one_estimate() {
        let now = Instant::now();
        let mut stats = StatNode::new();
        let (mut handler, calls) = handler_with_calls();

        handler.on_sender_report_sent(now, &sr(SINK_SSRC, SR_NTP));
        let estimates = handler.on_rtcp_received(
            now + Duration::from_millis(600),
            &[rr(ntp_middle(SR_NTP), 32768)],
            &mut stats,
        );

        assert_eq!(estimates.len(), 1);
        assert_eq!(estimates[0].round_trip_time_ms, 100);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(
            stats
                .child("total")
                .and_then(|t| t.value(SENDER_BITRATE_ESTIMATION_KEY)),
            Some(estimates[0].bitrate as u64)
        );
    }

    #[test]
    fn test_unrelated_rr_triggers_nothing() {
        let now = Instant::now();
        let mut stats = StatNode::new();
        let (mut handler, calls) = handler_with_calls();

        handler.on_sender_report_sent(now, &sr(SINK_SSRC, SR_NTP));
        let estimates = handler.on_rtcp_received(now, &[rr(0xDEAD_BEEF, 0)], &mut stats);

        assert!(estimates.is_empty());
        assert!(calls.lock().unwrap().is_empty());
        assert!(stats.is_empty(), "no estimate, no stats");
    }

    #[test]
    fn test_sr_on_other_ssrc_is_not_recorded() {
        let now = Instant::now();
        let mut stats = StatNode::new();
        let (mut handler, calls) = handler_with_calls();

        handler.on_sender_report_sent(now, &sr(SINK_SSRC + 1, SR_NTP));
        handler.on_rtcp_received(now, &[rr(ntp_middle(SR_NTP), 0)], &mut stats);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sr_list_is_bounded() {
        let now = Instant::now();
        let mut stats = StatNode::new();
        let (mut handler, calls) = handler_with_calls();

        for i in 0..=MAX_SR_LIST_SIZE as u64 {
            handler.on_sender_report_sent(now, &sr(SINK_SSRC, i << 16));
        }
        assert_eq!(handler.sr_delay_data.len(), MAX_SR_LIST_SIZE);

        handler.on_rtcp_received(now, &[rr(0, 0)], &mut stats);
        assert!(calls.lock().unwrap().is_empty(), "oldest sr was evicted");
        handler.on_rtcp_received(now, &[rr(1, 0)], &mut stats);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remb_triggers_immediate_estimate() {
        let now = Instant::now();
        let mut stats = StatNode::new();
        let (mut handler, calls) = handler_with_calls();

        let remb: RtcpPacket = Box::new(create_remb(1, vec![SINK_SSRC], 1_000_000));
        let estimates = handler.on_rtcp_received(now, &[remb], &mut stats);

        assert_eq!(estimates.len(), 1);
        assert_eq!(estimates[0].bitrate, 1_000_000);
        assert_eq!(*calls.lock().unwrap(), vec![1_000_000]);
    }

    #[test]
    fn test_remb_for_other_ssrc_is_ignored() {
        let now = Instant::now();
        let mut stats = StatNode::new();
        let (mut handler, calls) = handler_with_calls();

        let remb: RtcpPacket = Box::new(create_remb(1, vec![SINK_SSRC + 1], 1_000_000));
        assert!(handler.on_rtcp_received(now, &[remb], &mut stats).is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sent_packets_reemit_after_remb() {
        let now = Instant::now();
        let mut stats = StatNode::new();
        let (mut handler, calls) = handler_with_calls();

        assert!(
            handler
                .on_rtp_sent(now, &video_header(), &mut stats)
                .is_none(),
            "no remb received yet"
        );

        let remb: RtcpPacket = Box::new(create_remb(1, vec![], 500_000));
        handler.on_rtcp_received(now, &[remb], &mut stats);
        assert!(
            handler
                .on_rtp_sent(now + Duration::from_millis(10), &video_header(), &mut stats)
                .is_none()
        );
        assert!(
            handler
                .on_rtp_sent(now + Duration::from_millis(525), &video_header(), &mut stats)
                .is_some()
        );
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_raw_compound_buffer() {
        let now = Instant::now();
        let mut stats = StatNode::new();
        let (mut handler, calls) = handler_with_calls();
        handler.on_sender_report_sent(now, &sr(SINK_SSRC, SR_NTP));

        let packets: Vec<RtcpPacket> = vec![
            rr(ntp_middle(SR_NTP), 0),
            Box::new(create_remb(1, vec![SINK_SSRC], 800_000)),
        ];
        let buf = rtcp::packet::marshal(&packets).unwrap();
        let estimates = handler.on_rtcp_bytes(now, &buf, &mut stats).unwrap();

        assert_eq!(estimates.len(), 2);
        assert_eq!(calls.lock().unwrap().len(), 2);

        // a truncated trailer fails the buffer after its complete blocks are handled
        let mut truncated = buf.to_vec();
        truncated.extend_from_slice(&[0x81]);
        let later = now + Duration::from_secs(1);
        assert_eq!(
            handler.on_rtcp_bytes(later, &truncated, &mut stats),
            Err(crate::error::Error::ErrRtcpHeaderTooShort)
        );
        assert_eq!(calls.lock().unwrap().len(), 4);
    }
}
