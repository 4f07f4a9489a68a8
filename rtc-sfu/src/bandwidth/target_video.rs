use super::deliver;
use crate::leg::MediaLeg;
use log::debug;

/// Splits the REMB evenly, charging each leg only what its target needs.
///
/// Legs in slideshow go first, the rest by ascending target. Each leg is offered the
/// fair share of what is left. The pool is charged `min(target, share)` but the leg is
/// told `min(max, share)`, so legs below target leave headroom for those after them
/// without being capped at their target themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetVideoBwDistributor;

impl TargetVideoBwDistributor {
    pub fn distribute(
        &self,
        remb: u64,
        source_ssrc: u32,
        legs: &mut [&mut dyn MediaLeg],
    ) -> Vec<u64> {
        let targets: Vec<u64> = legs.iter().map(|leg| target_video_bw(&**leg)).collect();
        let mut order: Vec<usize> = (0..legs.len()).collect();
        order.sort_by_key(|&i| (!legs[i].is_slideshow_mode_enabled(), targets[i]));

        let mut allotments = vec![0; legs.len()];
        let mut remaining_bitrate = remb;
        let mut remaining_legs = legs.len() as u64;
        for i in order {
            let share = remaining_bitrate / remaining_legs;
            let charged = targets[i].min(share);
            allotments[i] = legs[i].max_video_bw().min(share);
            remaining_bitrate = remaining_bitrate.saturating_sub(charged);
            remaining_legs -= 1;
        }
        debug!(
            "target video distribution of {} over {} legs, {} left",
            remb,
            legs.len(),
            remaining_bitrate
        );

        deliver(source_ssrc, legs, &allotments);
        allotments
    }
}

/// Same as [`MediaLeg::target_video_bitrate`] except that a target-is-max flag left
/// behind by a stream priority distribution is not honoured.
fn target_video_bw(leg: &dyn MediaLeg) -> u64 {
    let max = leg.max_video_bw();
    if leg.is_slideshow_mode_enabled() {
        leg.video_bitrate().min(max)
    } else if leg.is_simulcast() {
        leg.bitrate_from_max_quality_layer().min(max)
    } else {
        max
    }
}
