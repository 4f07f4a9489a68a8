use super::{
    Layer, LayerInfo, Override, QUALITY_LAYERS_KEY, SELECTED_SPATIAL_LAYER_KEY,
    SELECTED_TEMPORAL_LAYER_KEY, VideoConstraints, bitrate_for_higher_temporal_in_spatial_layer,
    layer_bitrates,
};
use crate::clock::SharedClock;
use crate::estimation::SENDER_BITRATE_ESTIMATION_KEY;
use crate::stats::{CumulativeStat, StatNode};
use log::debug;
use std::time::{Duration, Instant};

/// Minimum time between two upgrade attempts.
pub const MIN_LAYER_SWITCH_INTERVAL: Duration = Duration::from_secs(10);
/// Window over which a layer must carry traffic to count as active.
pub const ACTIVE_LAYER_INTERVAL: Duration = Duration::from_millis(500);
/// Headroom a layer needs over its bitrate before it is upgraded to.
pub const INCREASE_LAYER_BITRATE_THRESHOLD: f64 = 0.1;

/// Chooses the `(spatial, temporal)` layer a subscriber leg receives.
///
/// Downgrades happen as soon as the current layer stops fitting the estimate, vanishes
/// or goes inactive. Upgrades need [`INCREASE_LAYER_BITRATE_THRESHOLD`] of headroom and
/// are attempted at most once per [`MIN_LAYER_SWITCH_INTERVAL`].
///
/// The computed layer is always kept. A forced layer or the slideshow floor only
/// override what [`layer`](Self::layer) reports, so lifting them needs no recomputation.
pub struct QualityManager {
    clock: SharedClock,
    enabled: bool,

    computed: Layer,
    layer_override: Override,
    below_min_layer: bool,

    slideshow_below_spatial_layer: Option<u8>,
    fallback_below_min_layer: bool,
    freeze_fallback_active: bool,

    constraints: VideoConstraints,
    layer_info: LayerInfo,

    max_active_layer: Option<Layer>,
    current_estimated_bitrate: u64,
    last_quality_check: Instant,
    last_activity_check: Instant,
}

impl QualityManager {
    pub fn new(clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            clock,
            enabled: true,

            computed: Layer::BASE,
            layer_override: Override::Computed,
            below_min_layer: false,

            slideshow_below_spatial_layer: None,
            fallback_below_min_layer: false,
            freeze_fallback_active: false,

            constraints: VideoConstraints::default(),
            layer_info: LayerInfo::default(),

            max_active_layer: None,
            current_estimated_bitrate: 0,
            last_quality_check: now,
            last_activity_check: now,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Layer the leg should receive.
    pub fn layer(&self) -> Layer {
        match self.layer_override {
            Override::Computed => self.computed,
            Override::Forced(layer) | Override::Clamped(layer) => layer,
        }
    }

    pub fn spatial_layer(&self) -> u8 {
        self.layer().spatial
    }

    pub fn temporal_layer(&self) -> u8 {
        self.layer().temporal
    }

    /// Layer chosen from bandwidth alone, ignoring overrides.
    pub fn computed_layer(&self) -> Layer {
        self.computed
    }

    pub fn layer_override(&self) -> Override {
        self.layer_override
    }

    pub fn current_estimated_bitrate(&self) -> u64 {
        self.current_estimated_bitrate
    }

    pub fn is_fallback_freeze_enabled(&self) -> bool {
        self.freeze_fallback_active
    }

    pub fn is_slideshow_active(&self) -> bool {
        matches!(self.layer_override, Override::Clamped(_))
    }

    pub fn is_slideshow_below_spatial_layer_enabled(&self) -> bool {
        self.slideshow_below_spatial_layer.is_some()
    }

    pub fn is_fallback_below_min_layer_enabled(&self) -> bool {
        self.fallback_below_min_layer
    }

    /// Sets the computed spatial layer. A forced selection is left untouched.
    pub fn set_spatial_layer(&mut self, spatial: u8) {
        self.computed.spatial = spatial;
    }

    /// Sets the computed temporal layer. A forced selection is left untouched.
    pub fn set_temporal_layer(&mut self, temporal: u8) {
        self.computed.temporal = temporal;
    }

    /// Pins the selection until [`clear_forced_layers`](Self::clear_forced_layers).
    pub fn force_layers(&mut self, spatial: u8, temporal: u8) {
        debug!("forcing layer ({}, {})", spatial, temporal);
        self.layer_override = Override::Forced(Layer::new(spatial, temporal));
    }

    pub fn clear_forced_layers(&mut self) {
        if let Override::Forced(_) = self.layer_override {
            self.layer_override = Override::Computed;
        }
    }

    /// Below `spatial`, send the floor layer as a slideshow instead of a lower layer.
    pub fn enable_slideshow_below_spatial_layer(&mut self, enabled: bool, spatial: u8) {
        self.slideshow_below_spatial_layer = enabled.then_some(spatial);
        if !enabled && self.is_slideshow_active() {
            self.layer_override = Override::Computed;
        }
    }

    /// Freeze the leg when not even the lowest layer fits the estimate.
    pub fn enable_fallback_below_min_layer(&mut self, enabled: bool) {
        self.fallback_below_min_layer = enabled;
        if !enabled {
            self.freeze_fallback_active = false;
        }
    }

    pub fn set_video_constraints(&mut self, constraints: VideoConstraints) {
        self.constraints = constraints;
    }

    /// Resolution and frame rate per layer, from the publisher's layer info event.
    pub fn set_layer_info(&mut self, layer_info: LayerInfo) {
        self.layer_info = layer_info;
    }

    /// Re-evaluates the layer against the latest estimate and layer bitrates in `stats`.
    pub fn notify_quality_update(&mut self, stats: &mut StatNode) {
        if !self.enabled {
            return;
        }

        let now = self.clock.now();
        self.current_estimated_bitrate = stats
            .child("total")
            .and_then(|total| total.value(SENDER_BITRATE_ESTIMATION_KEY))
            .unwrap_or(0);

        if let Override::Forced(_) = self.layer_override {
            return;
        }

        if now.saturating_duration_since(self.last_activity_check) > ACTIVE_LAYER_INTERVAL {
            self.calculate_max_active_layer(stats);
            self.last_activity_check = now;
        }

        let instant_bitrate = layer_bitrates(stats, Some(ACTIVE_LAYER_INTERVAL))
            .into_iter()
            .find(|(layer, _)| *layer == self.computed)
            .map(|(_, bitrate)| bitrate)
            .unwrap_or(0);
        let layer_is_active = self
            .max_active_layer
            .is_none_or(|max| self.computed.spatial <= max.spatial);
        let estimate_is_under_layer_bitrate = self.current_estimated_bitrate < instant_bitrate;

        if self.computed != Layer::BASE
            && (!layer_is_active
                || instant_bitrate == 0
                || (estimate_is_under_layer_bitrate && !self.freeze_fallback_active))
        {
            debug!(
                "layer {} no longer fits (bitrate {}, estimate {}, active {}), going down",
                self.computed, instant_bitrate, self.current_estimated_bitrate, layer_is_active
            );
            self.select_layer(now, stats, false);
        } else if !self.is_in_max_layer()
            && now.saturating_duration_since(self.last_quality_check) > MIN_LAYER_SWITCH_INTERVAL
        {
            self.select_layer(now, stats, true);
        }

        self.apply_slideshow_floor(stats);
    }

    fn calculate_max_active_layer(&mut self, stats: &StatNode) {
        let active = layer_bitrates(stats, Some(ACTIVE_LAYER_INTERVAL))
            .into_iter()
            .filter(|(_, bitrate)| *bitrate > 0)
            .fold(Layer::BASE, |max, (layer, _)| {
                Layer::new(
                    max.spatial.max(layer.spatial),
                    max.temporal.max(layer.temporal),
                )
            });
        self.max_active_layer = Some(active);
    }

    fn is_in_max_layer(&self) -> bool {
        self.max_active_layer.is_some_and(|max| {
            self.computed.spatial >= max.spatial && self.computed.temporal >= max.temporal
        })
    }

    fn meets_constraints(&self, layer: Layer) -> bool {
        let info = &self.layer_info;
        let constraints = &self.constraints;
        let within = |limit: Option<u64>, value: Option<u64>| match (limit, value) {
            (Some(limit), Some(value)) => value <= limit,
            _ => true,
        };

        within(
            constraints.max_width.map(u64::from),
            info.widths.get(layer.spatial as usize).map(|&w| w as u64),
        ) && within(
            constraints.max_height.map(u64::from),
            info.heights.get(layer.spatial as usize).map(|&h| h as u64),
        ) && within(
            constraints.max_frame_rate,
            info.frame_rates.get(layer.temporal as usize).copied(),
        )
    }

    fn select_layer(&mut self, now: Instant, stats: &mut StatNode, try_higher_layers: bool) {
        self.last_quality_check = now;
        let margin = if try_higher_layers {
            INCREASE_LAYER_BITRATE_THRESHOLD
        } else {
            0.0
        };

        let estimate = self.current_estimated_bitrate as f64;
        let best = layer_bitrates(stats, None)
            .into_iter()
            .filter(|&(layer, bitrate)| {
                bitrate != 0
                    && (1.0 + margin) * bitrate as f64 <= estimate
                    && self.meets_constraints(layer)
            })
            .map(|(layer, _)| layer)
            .next_back();

        self.below_min_layer = best.is_none();
        self.freeze_fallback_active = self.below_min_layer && self.fallback_below_min_layer;

        let next = best.unwrap_or(Layer::BASE);
        if next != self.computed {
            debug!(
                "switching layer {} -> {} with estimate {}",
                self.computed, next, self.current_estimated_bitrate
            );
            let layers = stats.node(QUALITY_LAYERS_KEY);
            layers.insert_stat(
                SELECTED_SPATIAL_LAYER_KEY,
                CumulativeStat::new(next.spatial as u64),
            );
            layers.insert_stat(
                SELECTED_TEMPORAL_LAYER_KEY,
                CumulativeStat::new(next.temporal as u64),
            );
            self.computed = next;
        }
    }

    fn apply_slideshow_floor(&mut self, stats: &StatNode) {
        self.layer_override = match self.slideshow_below_spatial_layer {
            Some(floor)
                if (self.computed.spatial < floor || self.below_min_layer)
                    && bitrate_for_higher_temporal_in_spatial_layer(stats, floor) > 0 =>
            {
                Override::Clamped(Layer::new(floor, 0))
            }
            _ => Override::Computed,
        };
    }
}
