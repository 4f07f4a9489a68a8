use crate::rtp_utils::{RtcpPacket, sequence_number_less_than};
use log::{debug, trace};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A sequence number is dropped after this many NACKs.
const MAX_RETRANSMITS: u8 = 2;
/// Pending NACKs beyond this count push out the oldest ones.
const MAX_NACKS: usize = 150;
/// Minimum time between two NACKs for the same sequence number.
const MIN_NACK_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NackInfo {
    seq_num: u16,
    /// Queued numbers are due at once, sent ones [`MIN_NACK_DELAY`] later.
    next_send: Instant,
    retransmits: u8,
}

impl NackInfo {
    fn new(seq_num: u16, now: Instant) -> Self {
        Self {
            seq_num,
            next_send: now,
            retransmits: 0,
        }
    }

    fn is_time_to_retransmit(&self, now: Instant) -> bool {
        now >= self.next_send
    }

    fn is_exhausted(&self) -> bool {
        self.retransmits >= MAX_RETRANSMITS
    }
}

/// Gap detection for one inbound video stream.
///
/// Every sequence number skipped by a forward jump is queued as pending. Pending
/// numbers are NACKed at most [`MAX_RETRANSMITS`] times, no sooner than
/// [`MIN_NACK_DELAY`] apart, and removed as soon as the late packet shows up.
#[derive(Debug, Clone)]
pub struct RtcpNackGenerator {
    sender_ssrc: u32,
    media_ssrc: u32,
    initialized: bool,
    highest_seq_num: u16,
    nack_infos: VecDeque<NackInfo>,
}

impl RtcpNackGenerator {
    pub fn new(sender_ssrc: u32, media_ssrc: u32) -> Self {
        Self {
            sender_ssrc,
            media_ssrc,
            initialized: false,
            highest_seq_num: 0,
            nack_infos: VecDeque::new(),
        }
    }

    pub fn media_ssrc(&self) -> u32 {
        self.media_ssrc
    }

    /// Sequence numbers still waiting for a retransmission, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = u16> + '_ {
        self.nack_infos.iter().map(|info| info.seq_num)
    }

    /// Earliest time a pending sequence number is due for its next NACK.
    pub fn next_nack_time(&self) -> Option<Instant> {
        self.nack_infos
            .iter()
            .filter(|info| !info.is_exhausted())
            .map(|info| info.next_send)
            .min()
    }

    fn is_nack_due(&self, now: Instant) -> bool {
        self.next_nack_time().is_some_and(|next| next <= now)
    }

    /// Tracks `header` and reports whether a NACK is due, either for a gap it revealed
    /// or for a retry of an older one.
    pub fn handle_rtp_packet(&mut self, now: Instant, header: &rtp::header::Header) -> bool {
        if header.ssrc != self.media_ssrc {
            debug!(
                "nack generator for ssrc {} ignoring packet of ssrc {}",
                self.media_ssrc, header.ssrc
            );
            return false;
        }

        let seq_num = header.sequence_number;
        if !self.initialized {
            self.highest_seq_num = seq_num;
            self.initialized = true;
            return false;
        }
        if seq_num == self.highest_seq_num {
            return self.is_nack_due(now);
        }

        if sequence_number_less_than(seq_num, self.highest_seq_num) {
            trace!(
                "late packet {} for ssrc {}, highest {}",
                seq_num, self.media_ssrc, self.highest_seq_num
            );
            if let Some(pos) = self.nack_infos.iter().position(|i| i.seq_num == seq_num) {
                self.nack_infos.remove(pos);
            }
            return self.is_nack_due(now);
        }

        self.add_nacks(now, seq_num);
        self.highest_seq_num = seq_num;
        self.is_nack_due(now)
    }

    fn add_nacks(&mut self, now: Instant, seq_num: u16) {
        let mut current = self.highest_seq_num.wrapping_add(1);
        while current != seq_num {
            debug!(
                "queueing nack for ssrc {} seq_num {}",
                self.media_ssrc, current
            );
            self.nack_infos.push_back(NackInfo::new(current, now));
            current = current.wrapping_add(1);
        }
        while self.nack_infos.len() > MAX_NACKS {
            self.nack_infos.pop_front();
        }
    }

    /// Appends a Generic NACK for every pending sequence number that is due.
    ///
    /// Returns false, leaving `rtcp` untouched, when nothing is due.
    pub fn add_nack_packet_to_rr(&mut self, rtcp: &mut Vec<RtcpPacket>, now: Instant) -> bool {
        let mut due = Vec::new();
        let media_ssrc = self.media_ssrc;
        self.nack_infos.retain_mut(|info| {
            if !info.is_time_to_retransmit(now) {
                return true;
            }
            if info.is_exhausted() {
                debug!(
                    "dropping nack for ssrc {} seq_num {} after {} retransmits",
                    media_ssrc, info.seq_num, info.retransmits
                );
                return false;
            }
            info.next_send = now + MIN_NACK_DELAY;
            info.retransmits += 1;
            due.push(info.seq_num);
            true
        });

        if due.is_empty() {
            return false;
        }

        let nacks =
            rtcp::transport_feedbacks::transport_layer_nack::nack_pairs_from_sequence_numbers(
                &due,
            );
        trace!("nacking {} packets in {} pairs", due.len(), nacks.len());
        rtcp.push(Box::new(
            rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack {
                sender_ssrc: self.sender_ssrc,
                media_ssrc: self.media_ssrc,
                nacks,
            },
        ));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;

    const SSRC: u32 = 1111;

    fn header(seq: u16) -> rtp::header::Header {
        rtp::header::Header {
            ssrc: SSRC,
            sequence_number: seq,
            ..Default::default()
        }
    }

    fn nacked(generator: &mut RtcpNackGenerator, now: Instant) -> Vec<u16> {
        let mut rtcp: Vec<RtcpPacket> = vec![];
        generator.add_nack_packet_to_rr(&mut rtcp, now);
        rtcp.iter()
            .filter_map(|p| p.as_any().downcast_ref::<TransportLayerNack>())
            .flat_map(|nack| nack.nacks.iter().flat_map(|pair| pair.packet_list()))
            .collect()
    }

    #[test]
    fn test_consecutive_packets_do_not_nack() {
        let now = Instant::now();
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(100));
        assert!(!generator.handle_rtp_packet(now, &header(101)));

        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(65535));
        assert!(!generator.handle_rtp_packet(now, &header(0)));
    }

    #[test]
    fn test_gap_generates_nack() {
        let now = Instant::now();
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(100));
        assert!(generator.handle_rtp_packet(now, &header(104)));
        assert_eq!(generator.pending().collect::<Vec<_>>(), vec![101, 102, 103]);

        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(65534));
        assert!(generator.handle_rtp_packet(now, &header(2)));
        assert_eq!(
            generator.pending().collect::<Vec<_>>(),
            vec![65535, 0, 1]
        );
    }

    #[test]
    fn test_unknown_ssrc_is_ignored() {
        let now = Instant::now();
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(100));
        let mut other = header(110);
        other.ssrc = SSRC + 1;
        assert!(!generator.handle_rtp_packet(now, &other));
        assert_eq!(generator.pending().count(), 0);
    }

    #[test]
    fn test_late_packet_fills_gap() {
        let now = Instant::now();
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(100));
        generator.handle_rtp_packet(now, &header(104));
        nacked(&mut generator, now);
        assert!(!generator.handle_rtp_packet(now, &header(102)));
        assert_eq!(generator.pending().collect::<Vec<_>>(), vec![101, 103]);
    }

    #[test]
    fn test_nack_contains_lost_packets_across_blocks() {
        let now = Instant::now();
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(100));
        generator.handle_rtp_packet(now, &header(130));

        let lost = nacked(&mut generator, now);
        assert_eq!(lost, (101..130).collect::<Vec<u16>>());
    }

    #[test]
    fn test_nack_is_not_repeated_immediately() {
        let now = Instant::now();
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(100));
        generator.handle_rtp_packet(now, &header(104));

        assert!(nacked(&mut generator, now).contains(&101));
        assert!(nacked(&mut generator, now).is_empty());
        assert!(nacked(&mut generator, now + Duration::from_millis(19)).is_empty());
        assert!(nacked(&mut generator, now + Duration::from_millis(20)).contains(&101));
    }

    #[test]
    fn test_retry_deadline_follows_last_nack() {
        let now = Instant::now();
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        assert_eq!(generator.next_nack_time(), None);
        generator.handle_rtp_packet(now, &header(100));
        assert!(generator.handle_rtp_packet(now, &header(103)));
        assert_eq!(generator.next_nack_time(), Some(now));

        assert_eq!(nacked(&mut generator, now), vec![101, 102]);
        let retry = now + MIN_NACK_DELAY;
        assert_eq!(generator.next_nack_time(), Some(retry));

        // a packet arriving after the deadline asks for the retry too
        assert!(!generator.handle_rtp_packet(now + Duration::from_millis(5), &header(104)));
        assert!(generator.handle_rtp_packet(retry, &header(105)));
        assert_eq!(nacked(&mut generator, retry), vec![101, 102]);

        // no deadline once every pending number used its retransmits
        assert_eq!(generator.next_nack_time(), None);
        assert_eq!(generator.pending().count(), 2);
    }

    #[test]
    fn test_nack_is_retransmitted_at_most_twice() {
        let now = Instant::now();
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(100));
        generator.handle_rtp_packet(now, &header(104));

        assert!(nacked(&mut generator, now).contains(&101));
        assert!(nacked(&mut generator, now + Duration::from_millis(100)).contains(&101));
        assert!(nacked(&mut generator, now + Duration::from_millis(200)).is_empty());
        assert_eq!(generator.pending().count(), 0);
    }

    #[test]
    fn test_pending_list_is_bounded() {
        let now = Instant::now();
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        generator.handle_rtp_packet(now, &header(0));
        generator.handle_rtp_packet(now, &header(301));
        let pending: Vec<u16> = generator.pending().collect();
        assert_eq!(pending.len(), MAX_NACKS);
        assert_eq!(pending.first(), Some(&151));
        assert_eq!(pending.last(), Some(&300));
    }

    #[test]
    fn test_nothing_due_leaves_rtcp_untouched() {
        let mut generator = RtcpNackGenerator::new(1, SSRC);
        let mut rtcp: Vec<RtcpPacket> = vec![];
        assert!(!generator.add_nack_packet_to_rr(&mut rtcp, Instant::now()));
        assert!(rtcp.is_empty());
    }
}
