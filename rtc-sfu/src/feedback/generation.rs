//! Feedback Generation Interceptor - RR and NACK toward the publisher.

use super::{PublisherRtpInfo, RtcpNackGenerator, RtcpRrGenerator};
use crate::error::Error;
use crate::rtp_utils::RtcpPacket;
use crate::stream_info::{MediaKind, StreamInfo};
use crate::{Interceptor, InterceptorEvent, Packet, TaggedPacket};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::time::Instant;

/// Builder for the RtcpFeedbackGenerationInterceptor.
///
/// # Example
///
/// ```ignore
/// use rtc_sfu::{Registry, RtcpFeedbackGenerationBuilder};
///
/// let chain = Registry::new()
///     .with(RtcpFeedbackGenerationBuilder::new().with_nacks(true).build())
///     .build();
/// ```
pub struct RtcpFeedbackGenerationBuilder<P> {
    nacks_enabled: bool,
    _phantom: PhantomData<P>,
}

impl<P> Default for RtcpFeedbackGenerationBuilder<P> {
    fn default() -> Self {
        Self {
            nacks_enabled: true,
            _phantom: PhantomData,
        }
    }
}

impl<P> RtcpFeedbackGenerationBuilder<P> {
    /// Create a new builder. NACK generation for video is on by default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn NACK generation for video streams on or off.
    pub fn with_nacks(mut self, enabled: bool) -> Self {
        self.nacks_enabled = enabled;
        self
    }

    /// Create a builder function for use with Registry.
    pub fn build(self) -> impl FnOnce(P) -> RtcpFeedbackGenerationInterceptor<P> {
        move |inner| RtcpFeedbackGenerationInterceptor::new(inner, self.nacks_enabled)
    }
}

struct FeedbackStream {
    rr: RtcpRrGenerator,
    nack: Option<RtcpNackGenerator>,
}

impl FeedbackStream {
    fn next_feedback(&self) -> Option<Instant> {
        let next_nack = self.nack.as_ref().and_then(RtcpNackGenerator::next_nack_time);
        match (self.rr.next_report(), next_nack) {
            (Some(rr), Some(nack)) => Some(rr.min(nack)),
            (rr, nack) => rr.or(nack),
        }
    }
}

/// Interceptor that feeds inbound RTP into per-SSRC RR and NACK generators.
///
/// Whenever a generator asks for feedback, a compound `[RR, NACK?]` packet is queued on
/// the write path and a [`PublisherRtpInfo`] event carrying the reported fraction lost
/// is queued on the event path. The timer sends receiver reports when the publisher
/// stops sending and repeats NACKs that are still pending once their retry delay passed.
pub struct RtcpFeedbackGenerationInterceptor<P> {
    inner: P,

    enabled: bool,
    nacks_enabled: bool,
    sender_ssrc: u32,

    streams: HashMap<u32, FeedbackStream>,

    write_queue: VecDeque<TaggedPacket>,
    event_queue: VecDeque<InterceptorEvent>,
}

impl<P> RtcpFeedbackGenerationInterceptor<P> {
    fn new(inner: P, nacks_enabled: bool) -> Self {
        Self {
            inner,

            enabled: true,
            nacks_enabled,
            sender_ssrc: rand::random::<u32>(),

            streams: HashMap::new(),

            write_queue: VecDeque::new(),
            event_queue: VecDeque::new(),
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    fn queue_feedback(&mut self, now: Instant, ssrc: u32) {
        let Some(stream) = self.streams.get_mut(&ssrc) else {
            return;
        };

        let rr = stream.rr.generate_receiver_report(now);
        let fraction_lost = rr.reports.first().map_or(0, |r| r.fraction_lost);
        let mut rtcp: Vec<RtcpPacket> = vec![Box::new(rr)];
        if let Some(nack) = stream.nack.as_mut() {
            nack.add_nack_packet_to_rr(&mut rtcp, now);
        }

        debug!(
            "queueing feedback for ssrc {}: {} rtcp packets",
            ssrc,
            rtcp.len()
        );
        self.event_queue
            .push_back(InterceptorEvent::PublisherRtpInfo(PublisherRtpInfo {
                ssrc,
                kind: stream.rr.kind(),
                fraction_lost,
            }));
        self.write_queue.push_back(TaggedPacket {
            now,
            message: Packet::Rtcp(rtcp),
        });
    }

    /// Earliest receiver report or NACK retry of any stream.
    fn next_feedback(&self) -> Option<Instant> {
        self.streams
            .values()
            .filter_map(FeedbackStream::next_feedback)
            .min()
    }
}

impl<P: Interceptor> sansio::Protocol<TaggedPacket, TaggedPacket, InterceptorEvent>
    for RtcpFeedbackGenerationInterceptor<P>
{
    type Rout = TaggedPacket;
    type Wout = TaggedPacket;
    type Eout = InterceptorEvent;
    type Error = Error;
    type Time = Instant;

    fn handle_read(&mut self, msg: TaggedPacket) -> Result<(), Self::Error> {
        if self.enabled {
            match &msg.message {
                Packet::Rtcp(rtcp_packets) => {
                    for rtcp_packet in rtcp_packets {
                        if let Some(sr) = rtcp_packet
                            .as_any()
                            .downcast_ref::<rtcp::sender_report::SenderReport>()
                        {
                            match self.streams.get_mut(&sr.ssrc) {
                                Some(stream) => stream.rr.handle_sr(msg.now, sr),
                                None => debug!("no rr generator for ssrc {}", sr.ssrc),
                            }
                        }
                    }
                }
                Packet::Rtp(rtp_packet) => {
                    let ssrc = rtp_packet.header.ssrc;
                    let should_send = match self.streams.get_mut(&ssrc) {
                        Some(stream) => {
                            let rr_due = stream.rr.handle_rtp_packet(msg.now, &rtp_packet.header);
                            let nack_due = stream
                                .nack
                                .as_mut()
                                .is_some_and(|nack| {
                                    nack.handle_rtp_packet(msg.now, &rtp_packet.header)
                                });
                            rr_due || nack_due
                        }
                        None => {
                            debug!("no feedback generators for ssrc {}", ssrc);
                            false
                        }
                    };
                    if should_send {
                        self.queue_feedback(msg.now, ssrc);
                    }
                }
            }
        }

        self.inner.handle_read(msg)
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        self.inner.poll_read()
    }

    fn handle_write(&mut self, msg: TaggedPacket) -> Result<(), Self::Error> {
        self.inner.handle_write(msg)
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
        if let Some(pkt) = self.write_queue.pop_front() {
            return Some(pkt);
        }
        self.inner.poll_write()
    }

    fn handle_event(&mut self, evt: InterceptorEvent) -> Result<(), Self::Error> {
        self.inner.handle_event(evt)
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        if let Some(evt) = self.event_queue.pop_front() {
            return Some(evt);
        }
        self.inner.poll_event()
    }

    fn handle_timeout(&mut self, now: Self::Time) -> Result<(), Self::Error> {
        if self.enabled {
            let due: Vec<u32> = self
                .streams
                .iter()
                .filter(|(_, stream)| stream.next_feedback().is_some_and(|next| next <= now))
                .map(|(ssrc, _)| *ssrc)
                .collect();
            for ssrc in due {
                self.queue_feedback(now, ssrc);
            }
        }

        self.inner.handle_timeout(now)
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        match (self.next_feedback(), self.inner.poll_timeout()) {
            (Some(eto), Some(inner)) => Some(eto.min(inner)),
            (eto, inner) => eto.or(inner),
        }
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.streams.clear();
        self.write_queue.clear();
        self.event_queue.clear();
        self.inner.close()
    }
}

impl<P: Interceptor> Interceptor for RtcpFeedbackGenerationInterceptor<P> {
    fn bind_local_stream(&mut self, info: &StreamInfo) {
        self.inner.bind_local_stream(info);
    }

    fn unbind_local_stream(&mut self, info: &StreamInfo) {
        self.inner.unbind_local_stream(info);
    }

    fn bind_remote_stream(&mut self, info: &StreamInfo) {
        let kind = info.kind();
        let rr = RtcpRrGenerator::new(self.sender_ssrc, info.ssrc, kind, info.clock_rate);
        let nack = (self.nacks_enabled && kind == MediaKind::Video)
            .then(|| RtcpNackGenerator::new(self.sender_ssrc, info.ssrc));
        debug!(
            "feedback generators bound for ssrc {} ({:?}, nack: {})",
            info.ssrc,
            kind,
            nack.is_some()
        );
        self.streams.insert(info.ssrc, FeedbackStream { rr, nack });

        self.inner.bind_remote_stream(info);
    }

    fn unbind_remote_stream(&mut self, info: &StreamInfo) {
        self.streams.remove(&info.ssrc);

        self.inner.unbind_remote_stream(info);
    }
}
