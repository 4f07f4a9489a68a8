use super::config::{PriorityLevel, StreamPriorityStrategy};
use super::deliver;
use crate::leg::MediaLeg;
use crate::quality::{INCREASE_LAYER_BITRATE_THRESHOLD, Layer};
use crate::stats::{CumulativeStat, StatNode};
use log::debug;
use std::collections::HashMap;

/// Stats key, under `total`, of the bitrate left over after a distribution.
pub const UNASSIGNED_BITRATE_KEY: &str = "unnasignedBitrate";

/// Grants bandwidth tier by tier following an ordered [`StreamPriorityStrategy`].
///
/// Each spatial step first returns to the pool what the tier got in its previous steps
/// and then re-grants the tier, so a tier's allotment grows step by step while tiers
/// listed earlier keep what they were given. A simulcast leg whose share falls short of
/// a spatial layer's upgrade threshold gets the exact bitrate of the highest temporal
/// layer of that spatial layer it can afford instead.
#[derive(Debug, Clone)]
pub struct StreamPriorityBwDistributor {
    strategy: StreamPriorityStrategy,
    strategy_id: Option<String>,
}

impl StreamPriorityBwDistributor {
    pub fn new(strategy: StreamPriorityStrategy, strategy_id: Option<String>) -> Self {
        Self {
            strategy,
            strategy_id,
        }
    }

    pub fn strategy_id(&self) -> Option<&str> {
        self.strategy_id.as_deref()
    }

    pub fn strategy(&self) -> &StreamPriorityStrategy {
        &self.strategy
    }

    pub fn distribute(
        &mut self,
        remb: u64,
        source_ssrc: u32,
        legs: &mut [&mut dyn MediaLeg],
        stats: &mut StatNode,
    ) -> Vec<u64> {
        let mut tiers: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, leg) in legs.iter().enumerate() {
            tiers.entry(leg.priority().to_owned()).or_default().push(i);
        }
        let mut granted_to_tier: HashMap<String, u64> = HashMap::new();
        let mut allotments = vec![0; legs.len()];
        let mut remaining_bitrate = remb;

        debug!(
            "stream priority distribution of {} with strategy {:?}",
            remb, self.strategy_id
        );
        self.strategy.reset();
        while let Some(step) = self.strategy.next_step() {
            let tier = tiers.get(&step.priority).map(Vec::as_slice).unwrap_or(&[]);

            match step.level {
                PriorityLevel::Slideshow => {
                    for &i in tier {
                        legs[i].enable_slideshow_below_spatial_layer(true, 0);
                        if legs[i].is_slideshow_mode_enabled() {
                            remaining_bitrate =
                                remaining_bitrate.saturating_sub(legs[i].video_bitrate());
                        }
                    }
                    continue;
                }
                PriorityLevel::Fallback => {
                    for &i in tier {
                        legs[i].enable_fallback_below_min_layer(true);
                    }
                    continue;
                }
                PriorityLevel::Max | PriorityLevel::Spatial(_) => {}
            }

            if remaining_bitrate == 0 {
                debug!("no bitrate left to distribute");
                break;
            }

            let granted = granted_to_tier.entry(step.priority.clone()).or_default();
            remaining_bitrate = remaining_bitrate.saturating_add(*granted);
            *granted = 0;
            let share = if tier.is_empty() {
                remaining_bitrate
            } else {
                remaining_bitrate / tier.len() as u64
            };

            for &i in tier {
                let leg = &mut *legs[i];
                let (needed, fitting) = match step.level {
                    PriorityLevel::Spatial(layer) => {
                        let needed = needed_for_layer(leg, &self.strategy, &step.priority, layer);
                        let fitting = if share < needed && leg.is_simulcast() {
                            affordable_temporal_bitrate(leg, layer, share)
                        } else {
                            None
                        };
                        (needed, fitting)
                    }
                    _ => {
                        leg.set_target_is_max_video_bw(true);
                        (leg.max_video_bw(), None)
                    }
                };
                let bitrate = fitting
                    .unwrap_or_else(|| needed.min(share))
                    .min(leg.max_video_bw());
                allotments[i] = bitrate;
                *granted += bitrate;
                remaining_bitrate = remaining_bitrate.saturating_sub(bitrate);
                debug!(
                    "step ({}, {}): leg {} needs {}, gets {}, {} left",
                    step.priority,
                    step.level,
                    leg.id(),
                    needed,
                    bitrate,
                    remaining_bitrate
                );
            }
        }

        stats
            .node("total")
            .insert_stat(UNASSIGNED_BITRATE_KEY, CumulativeStat(remaining_bitrate));
        deliver(source_ssrc, legs, &allotments);
        allotments
    }
}

/// Bitrate `leg` needs to receive spatial `layer`.
///
/// Simulcast legs need the top temporal layer of that spatial layer plus the growth
/// margin the quality manager asks for before switching up. Other legs get their
/// maximum split in as many parts as the tier has spatial steps.
fn needed_for_layer(
    leg: &dyn MediaLeg,
    strategy: &StreamPriorityStrategy,
    priority: &str,
    layer: u8,
) -> u64 {
    if !leg.is_simulcast() {
        return strategy
            .highest_layer_for_priority(priority)
            .map(|highest| leg.max_video_bw() / (highest as u64 + 1) * (layer as u64 + 1))
            .unwrap_or(0);
    }

    let top_of_layer = leg.bitrate_for_higher_temporal_in_spatial_layer(layer);
    let max_quality = leg.bitrate_from_max_quality_layer();
    let needed = if top_of_layer == 0 {
        max_quality
    } else {
        top_of_layer.min(max_quality)
    };
    (needed as f64 * (1.0 + INCREASE_LAYER_BITRATE_THRESHOLD)) as u64
}

/// Bitrate of the highest temporal layer of `spatial` that fits in `share`.
fn affordable_temporal_bitrate(leg: &dyn MediaLeg, spatial: u8, share: u64) -> Option<u64> {
    (0..=u8::MAX)
        .map_while(|temporal| leg.bitrate_for_layer(Layer::new(spatial, temporal)))
        .filter(|&bitrate| bitrate > 0 && bitrate <= share)
        .last()
}
