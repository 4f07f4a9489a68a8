use super::deliver;
use crate::leg::MediaLeg;
use log::debug;

/// Water-fills the REMB toward each leg's hard maximum, smallest maximum first.
///
/// Legs that cannot use their fair share leave the rest to the legs after them.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxVideoBwDistributor;

impl MaxVideoBwDistributor {
    pub fn distribute(
        &self,
        remb: u64,
        source_ssrc: u32,
        legs: &mut [&mut dyn MediaLeg],
    ) -> Vec<u64> {
        let mut order: Vec<usize> = (0..legs.len()).collect();
        order.sort_by_key(|&i| legs[i].max_video_bw());

        let mut allotments = vec![0; legs.len()];
        let mut remaining_bitrate = remb;
        let mut remaining_legs = legs.len() as u64;
        for i in order {
            let share = remaining_bitrate / remaining_legs;
            let bitrate = legs[i].max_video_bw().min(share);
            allotments[i] = bitrate;
            remaining_bitrate = remaining_bitrate.saturating_sub(bitrate);
            remaining_legs -= 1;
        }
        debug!(
            "max video distribution of {} over {} legs, {} left",
            remb,
            legs.len(),
            remaining_bitrate
        );

        deliver(source_ssrc, legs, &allotments);
        allotments
    }
}
