//! Sequence arithmetic and RTCP helpers shared by the feedback components.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use log::{debug, warn};
use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;

/// Half of u16 max value, used for sequence number wraparound detection.
pub const UINT16_SIZE_HALF: u16 = 1 << 15;

const RTCP_HEADER_LENGTH: usize = 4;
const RTP_VERSION: u8 = 2;

/// Boxed RTCP packet as produced by `rtcp::packet::unmarshal`.
pub type RtcpPacket = Box<dyn rtcp::packet::Packet + Send + Sync>;

/// `first < second` in 16-bit sequence space.
pub fn sequence_number_less_than(first: u16, second: u16) -> bool {
    let diff = second.wrapping_sub(first);
    diff != 0 && diff < UINT16_SIZE_HALF
}

/// `first < second` in a `bits`-wide wrapping number space (1..=16 bits).
pub fn number_less_than(first: u16, second: u16, bits: u8) -> bool {
    let bits = bits.clamp(1, 16) as u32;
    let mask = (1u32 << bits) - 1;
    let diff = (second as u32).wrapping_sub(first as u32) & mask;
    diff != 0 && diff < (1u32 << (bits - 1))
}

/// Walks a compound RTCP buffer block by block, handing every parsed packet to `f`.
///
/// Each block is unmarshalled on its own. A block that fails to parse is skipped and
/// the walk continues with the next one. The walk fails at the first block whose
/// declared length overruns the buffer, or on trailing bytes too short for a header.
/// Blocks before the failure have already been handed to `f`.
pub fn for_each_rtcp_block<F>(buf: &[u8], mut f: F) -> Result<()>
where
    F: FnMut(RtcpPacket),
{
    let mut offset = 0;

    while offset + RTCP_HEADER_LENGTH <= buf.len() {
        let header = &buf[offset..offset + RTCP_HEADER_LENGTH];
        let length_words = BigEndian::read_u16(&header[2..4]) as usize;
        let block_len = (length_words + 1) * 4;
        if offset + block_len > buf.len() {
            warn!(
                "rtcp block of {} bytes overruns compound packet ({} bytes left)",
                block_len,
                buf.len() - offset
            );
            return Err(Error::ErrRtcpBlockOverrun(block_len, buf.len() - offset));
        }

        let version = header[0] >> 6;
        if version != RTP_VERSION {
            debug!("skipping rtcp block with version {}", version);
        } else {
            let mut block = Bytes::copy_from_slice(&buf[offset..offset + block_len]);
            match rtcp::packet::unmarshal(&mut block) {
                Ok(parsed) => parsed.into_iter().for_each(&mut f),
                Err(err) => debug!("skipping malformed rtcp block: {}", err),
            }
        }

        offset += block_len;
    }

    if offset < buf.len() {
        return Err(Error::ErrRtcpHeaderTooShort);
    }
    Ok(())
}

/// Collects every well-formed packet of a compound RTCP buffer.
pub fn unmarshal_compound(buf: &[u8]) -> Result<Vec<RtcpPacket>> {
    let mut packets = Vec::new();
    for_each_rtcp_block(buf, |packet| packets.push(packet))?;
    Ok(packets)
}

/// Builds a REMB for `ssrcs` announcing `bitrate` bps.
pub fn create_remb(
    sender_ssrc: u32,
    ssrcs: Vec<u32>,
    bitrate: u64,
) -> ReceiverEstimatedMaximumBitrate {
    ReceiverEstimatedMaximumBitrate {
        sender_ssrc,
        bitrate: bitrate as f32,
        ssrcs,
    }
}
