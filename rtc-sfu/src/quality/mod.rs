//! Per-subscriber spatial/temporal layer selection.
//!
//! Layer bitrates live in the leg's stats tree under
//! `qualityLayers/<spatial>/<temporal>`, each a [`MovingIntervalRateStat`] fed with the
//! bytes forwarded for that layer. [`QualityManager`] reads them together with
//! `total/senderBitrateEstimation` to pick the layer the leg can afford.
//!
//! [`MovingIntervalRateStat`]: crate::stats::MovingIntervalRateStat

mod manager;

pub use manager::{
    ACTIVE_LAYER_INTERVAL, INCREASE_LAYER_BITRATE_THRESHOLD, MIN_LAYER_SWITCH_INTERVAL,
    QualityManager,
};

use crate::stats::{Stat, StatNode};
use std::fmt;
use std::time::Duration;

pub const QUALITY_LAYERS_KEY: &str = "qualityLayers";
pub const SELECTED_SPATIAL_LAYER_KEY: &str = "selectedSpatialLayer";
pub const SELECTED_TEMPORAL_LAYER_KEY: &str = "selectedTemporalLayer";

/// `(spatial, temporal)` layer coordinate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Layer {
    pub spatial: u8,
    pub temporal: u8,
}

impl Layer {
    pub const BASE: Layer = Layer {
        spatial: 0,
        temporal: 0,
    };

    pub fn new(spatial: u8, temporal: u8) -> Self {
        Self { spatial, temporal }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.spatial, self.temporal)
    }
}

/// How the selected layer relates to the computed one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Override {
    /// The computed layer is used as is.
    #[default]
    Computed,
    /// Pinned by the application until cleared.
    Forced(Layer),
    /// Raised to the slideshow floor.
    Clamped(Layer),
}

/// Optional caps on what a subscriber wants to receive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub max_frame_rate: Option<u64>,
}

/// Resolution per spatial layer and frame rate per temporal layer, as announced by the
/// publisher.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub widths: Vec<u32>,
    pub heights: Vec<u32>,
    pub frame_rates: Vec<u64>,
}

fn layer_index(key: &str) -> Option<u8> {
    key.parse().ok()
}

/// Rate of every layer sample under `stats["qualityLayers"]`, sorted by layer.
///
/// `window` selects [`MovingIntervalRateStat::value_over`] instead of the full-window
/// value. Entries that are not numbered layer nodes are skipped.
///
/// [`MovingIntervalRateStat::value_over`]: crate::stats::MovingIntervalRateStat::value_over
pub fn layer_bitrates(stats: &StatNode, window: Option<Duration>) -> Vec<(Layer, u64)> {
    let Some(layers) = stats.child(QUALITY_LAYERS_KEY) else {
        return vec![];
    };

    let mut bitrates = vec![];
    for (spatial_key, spatial_node) in layers.children() {
        let Some(spatial) = layer_index(spatial_key) else {
            continue;
        };
        for (temporal_key, stat) in spatial_node.stats() {
            let Some(temporal) = layer_index(temporal_key) else {
                continue;
            };
            bitrates.push((Layer::new(spatial, temporal), stat_rate(stat, window)));
        }
    }
    bitrates.sort_by_key(|(layer, _)| *layer);
    bitrates
}

fn stat_rate(stat: &Stat, window: Option<Duration>) -> u64 {
    match (stat, window) {
        (Stat::MovingIntervalRate(rate), Some(window)) => rate.value_over(window),
        _ => stat.value(),
    }
}

/// Bitrate of one layer, `None` when there is no sample for it.
pub fn layer_bitrate(stats: &StatNode, layer: Layer) -> Option<u64> {
    stats
        .child(QUALITY_LAYERS_KEY)?
        .child(&layer.spatial.to_string())?
        .value(&layer.temporal.to_string())
}

/// Bitrate of the highest temporal layer of `spatial` that has a non-zero sample.
pub fn bitrate_for_higher_temporal_in_spatial_layer(stats: &StatNode, spatial: u8) -> u64 {
    layer_bitrates(stats, None)
        .into_iter()
        .filter(|(layer, bitrate)| layer.spatial == spatial && *bitrate > 0)
        .map(|(_, bitrate)| bitrate)
        .next_back()
        .unwrap_or(0)
}

/// Bitrate of the highest layer with a non-zero sample.
pub fn bitrate_from_max_quality_layer(stats: &StatNode) -> u64 {
    layer_bitrates(stats, None)
        .into_iter()
        .filter(|(_, bitrate)| *bitrate > 0)
        .map(|(_, bitrate)| bitrate)
        .next_back()
        .unwrap_or(0)
}
