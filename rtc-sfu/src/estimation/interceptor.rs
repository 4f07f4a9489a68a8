//! Sender Bandwidth Estimation Interceptor - RR/REMB driven estimates per local video stream.

use super::SenderBandwidthEstimationHandler;
use crate::error::Error;
use crate::stats::StatNode;
use crate::stream_info::StreamInfo;
use crate::{Interceptor, InterceptorEvent, Packet, TaggedPacket};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::time::Instant;

/// Builder for the SenderBandwidthEstimationInterceptor.
///
/// # Example
///
/// ```ignore
/// use rtc_sfu::{Registry, SenderBandwidthEstimationBuilder};
///
/// let chain = Registry::new()
///     .with(SenderBandwidthEstimationBuilder::new().build())
///     .build();
/// ```
pub struct SenderBandwidthEstimationBuilder<P> {
    _phantom: PhantomData<P>,
}

impl<P> Default for SenderBandwidthEstimationBuilder<P> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<P> SenderBandwidthEstimationBuilder<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder function for use with Registry.
    pub fn build(self) -> impl FnOnce(P) -> SenderBandwidthEstimationInterceptor<P> {
        move |inner| SenderBandwidthEstimationInterceptor::new(inner)
    }
}

struct LocalVideoStream {
    handler: SenderBandwidthEstimationHandler,
    stats: StatNode,
}

/// Interceptor that runs a [`SenderBandwidthEstimationHandler`] per bound local video
/// stream.
///
/// Sender Reports and RTP written toward the subscriber are recorded, and Receiver
/// Reports and REMBs read back from it are correlated. Each resulting estimate is
/// surfaced as [`InterceptorEvent::BandwidthEstimate`].
pub struct SenderBandwidthEstimationInterceptor<P> {
    inner: P,
    streams: HashMap<u32, LocalVideoStream>,
    event_queue: VecDeque<InterceptorEvent>,
}

impl<P> SenderBandwidthEstimationInterceptor<P> {
    fn new(inner: P) -> Self {
        Self {
            inner,
            streams: HashMap::new(),
            event_queue: VecDeque::new(),
        }
    }

    /// Stats tree of the local video stream `ssrc`.
    pub fn stats(&self, ssrc: u32) -> Option<&StatNode> {
        self.streams.get(&ssrc).map(|stream| &stream.stats)
    }
}

impl<P: Interceptor> sansio::Protocol<TaggedPacket, TaggedPacket, InterceptorEvent>
    for SenderBandwidthEstimationInterceptor<P>
{
    type Rout = TaggedPacket;
    type Wout = TaggedPacket;
    type Eout = InterceptorEvent;
    type Error = Error;
    type Time = Instant;

    fn handle_read(&mut self, msg: TaggedPacket) -> Result<(), Self::Error> {
        if let Packet::Rtcp(rtcp_packets) = &msg.message {
            for stream in self.streams.values_mut() {
                let estimates =
                    stream
                        .handler
                        .on_rtcp_received(msg.now, rtcp_packets, &mut stream.stats);
                self.event_queue.extend(
                    estimates
                        .into_iter()
                        .map(InterceptorEvent::BandwidthEstimate),
                );
            }
        }

        self.inner.handle_read(msg)
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        self.inner.poll_read()
    }

    fn handle_write(&mut self, msg: TaggedPacket) -> Result<(), Self::Error> {
        match &msg.message {
            Packet::Rtp(rtp_packet) => {
                let estimate = self
                    .streams
                    .get_mut(&rtp_packet.header.ssrc)
                    .and_then(|stream| {
                        stream
                            .handler
                            .on_rtp_sent(msg.now, &rtp_packet.header, &mut stream.stats)
                    });
                if let Some(estimate) = estimate {
                    self.event_queue
                        .push_back(InterceptorEvent::BandwidthEstimate(estimate));
                }
            }
            Packet::Rtcp(rtcp_packets) => {
                for rtcp_packet in rtcp_packets {
                    let Some(sr) = rtcp_packet
                        .as_any()
                        .downcast_ref::<rtcp::sender_report::SenderReport>()
                    else {
                        continue;
                    };
                    if let Some(stream) = self.streams.get_mut(&sr.ssrc) {
                        stream.handler.on_sender_report_sent(msg.now, sr);
                    }
                }
            }
        }

        self.inner.handle_write(msg)
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
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
        self.inner.handle_timeout(now)
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        self.inner.poll_timeout()
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.streams.clear();
        self.event_queue.clear();
        self.inner.close()
    }
}

impl<P: Interceptor> Interceptor for SenderBandwidthEstimationInterceptor<P> {
    fn bind_local_stream(&mut self, info: &StreamInfo) {
        if info.kind().is_video() {
            debug!("sender bandwidth estimation bound for ssrc {}", info.ssrc);
            self.streams.insert(
                info.ssrc,
                LocalVideoStream {
                    handler: SenderBandwidthEstimationHandler::new(info.ssrc),
                    stats: StatNode::new(),
                },
            );
        }

        self.inner.bind_local_stream(info);
    }

    fn unbind_local_stream(&mut self, info: &StreamInfo) {
        self.streams.remove(&info.ssrc);

        self.inner.unbind_local_stream(info);
    }

    fn bind_remote_stream(&mut self, info: &StreamInfo) {
        self.inner.bind_remote_stream(info);
    }

    fn unbind_remote_stream(&mut self, info: &StreamInfo) {
        self.inner.unbind_remote_stream(info);
    }
}
