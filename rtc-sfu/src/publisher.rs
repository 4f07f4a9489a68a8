use crate::bandwidth::{BandwidthDistributor, BwDistributionConfig, PaddingManager};
use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::estimation::SENDER_BITRATE_ESTIMATION_KEY;
use crate::leg::{MediaLeg, SubscriberLeg};
use crate::stats::{CumulativeStat, StatNode};
use crate::worker::{TaskId, Worker};
use log::{debug, info};
use std::cell::{RefCell, RefMut};
use std::rc::Rc;
use std::time::Duration;

/// Shared handle to a leg attached to a [`Publisher`].
pub type LegHandle = Rc<RefCell<SubscriberLeg>>;

/// A published video source and the subscriber legs receiving it.
///
/// REMBs aggregated from the subscribers' side are split over the legs by the
/// configured [`BandwidthDistributor`]. Each leg then runs its own quality selection
/// against the share it was given.
pub struct Publisher {
    id: String,
    video_source_ssrc: u32,
    config: BwDistributionConfig,
    distributor: BandwidthDistributor,
    legs: Vec<LegHandle>,
    padding: PaddingManager,
    stats: StatNode,
}

impl Publisher {
    pub fn new(id: impl Into<String>, video_source_ssrc: u32, clock: SharedClock) -> Self {
        let padding = PaddingManager::new(clock);
        let mut stats = StatNode::new();
        padding.init_stats(&mut stats);

        let config = BwDistributionConfig::default();
        Self {
            id: id.into(),
            video_source_ssrc,
            distributor: BandwidthDistributor::from_config(&config),
            config,
            legs: vec![],
            padding,
            stats,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn video_source_ssrc(&self) -> u32 {
        self.video_source_ssrc
    }

    pub fn distribution_config(&self) -> &BwDistributionConfig {
        &self.config
    }

    pub fn distributor(&self) -> &BandwidthDistributor {
        &self.distributor
    }

    /// Replaces the distributor with one built from `config`.
    pub fn set_distribution_config(&mut self, config: BwDistributionConfig) -> Result<()> {
        config.validate()?;
        info!(
            "publisher {} switches to {:?} distribution",
            self.id, config.algorithm
        );
        self.distributor = BandwidthDistributor::from_config(&config);
        self.config = config;
        Ok(())
    }

    pub fn set_distribution_config_json(&mut self, json: &str) -> Result<()> {
        self.set_distribution_config(BwDistributionConfig::from_json(json)?)
    }

    pub fn attach(&mut self, leg: SubscriberLeg) -> Result<LegHandle> {
        if self.leg(leg.id()).is_some() {
            return Err(Error::ErrLegAlreadyAttached(leg.id().to_owned()));
        }
        debug!("publisher {} attaches leg {}", self.id, leg.id());
        let handle = Rc::new(RefCell::new(leg));
        self.legs.push(handle.clone());
        Ok(handle)
    }

    /// Removes the leg. Timers scheduled against it become no-ops once the returned
    /// handle is dropped.
    pub fn detach(&mut self, id: &str) -> Result<LegHandle> {
        let index = self
            .legs
            .iter()
            .position(|leg| leg.borrow().id() == id)
            .ok_or_else(|| Error::ErrUnknownLeg(id.to_owned()))?;
        debug!("publisher {} detaches leg {}", self.id, id);
        Ok(self.legs.remove(index))
    }

    pub fn leg(&self, id: &str) -> Option<LegHandle> {
        self.legs
            .iter()
            .find(|leg| leg.borrow().id() == id)
            .cloned()
    }

    pub fn legs(&self) -> &[LegHandle] {
        &self.legs
    }

    pub fn stats(&self) -> &StatNode {
        &self.stats
    }

    /// Distributes an aggregated REMB of `remb` bps over the attached legs.
    ///
    /// Returns the allotments in attach order.
    pub fn on_remb(&mut self, remb: u64, source_ssrc: u32) -> Vec<u64> {
        self.stats
            .node("total")
            .insert_stat(SENDER_BITRATE_ESTIMATION_KEY, CumulativeStat(remb));

        let mut guards: Vec<RefMut<'_, SubscriberLeg>> =
            self.legs.iter().map(|leg| leg.borrow_mut()).collect();
        let mut legs: Vec<&mut dyn MediaLeg> = guards
            .iter_mut()
            .map(|leg| &mut **leg as &mut dyn MediaLeg)
            .collect();
        self.distributor
            .distribute(remb, source_ssrc, &mut legs, &mut self.stats)
    }

    pub fn on_video_sent(&mut self, bytes: u64) {
        self.padding.on_video_sent(&mut self.stats, bytes);
    }

    pub fn on_padding_sent(&mut self, bytes: u64) {
        self.padding.on_padding_sent(&mut self.stats, bytes);
    }

    /// Recomputes the padding each leg should send. See [`PaddingManager::recalculate`].
    pub fn update_padding(&mut self) -> Option<u64> {
        let mut guards: Vec<RefMut<'_, SubscriberLeg>> =
            self.legs.iter().map(|leg| leg.borrow_mut()).collect();
        let mut legs: Vec<&mut dyn MediaLeg> = guards
            .iter_mut()
            .map(|leg| &mut **leg as &mut dyn MediaLeg)
            .collect();
        self.padding.recalculate(&mut self.stats, &mut legs)
    }

    /// Schedules a periodic layer check on every attached leg.
    ///
    /// The tasks hold weak handles and stop once their leg is detached and dropped.
    pub fn schedule_quality_checks(&self, worker: &mut Worker, period: Duration) -> Vec<TaskId> {
        self.legs
            .iter()
            .map(|leg| {
                worker.schedule_every_for(Rc::downgrade(leg), period, |leg: &mut SubscriberLeg| {
                    leg.notify_quality_update()
                })
            })
            .collect()
    }
}
