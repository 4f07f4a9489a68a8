//! Single-threaded task queue with timers.
//!
//! One [`Worker`] runs everything that touches a publisher and its subscriber legs.
//! The owner drives it the sans-IO way: ask [`Worker::poll_timeout`] when to wake up,
//! then call [`Worker::run_due`]. Time comes from the injected [`Clock`](crate::clock::Clock),
//! so tests advance a [`SimulatedClock`](crate::clock::SimulatedClock) instead of sleeping.

use crate::clock::SharedClock;
use log::trace;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::rc::Weak;
use std::time::{Duration, Instant};

/// Handle of a scheduled task, used to cancel it.
pub type TaskId = u64;

const MIN_PERIOD: Duration = Duration::from_millis(1);

enum ScheduledTask {
    Once(Box<dyn FnOnce()>),
    /// Stops repeating once the task returns false.
    Every {
        period: Duration,
        task: Box<dyn FnMut() -> bool>,
    },
}

pub struct Worker {
    clock: SharedClock,
    posted: VecDeque<Box<dyn FnOnce()>>,
    deadlines: BinaryHeap<Reverse<(Instant, TaskId)>>,
    scheduled: HashMap<TaskId, ScheduledTask>,
    next_id: TaskId,
}

impl Worker {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            posted: VecDeque::new(),
            deadlines: BinaryHeap::new(),
            scheduled: HashMap::new(),
            next_id: 0,
        }
    }

    /// Queues `task` to run on the next [`run_due`](Self::run_due).
    pub fn post(&mut self, task: impl FnOnce() + 'static) {
        self.posted.push_back(Box::new(task));
    }

    pub fn schedule_once(&mut self, delay: Duration, task: impl FnOnce() + 'static) -> TaskId {
        self.schedule(delay, ScheduledTask::Once(Box::new(task)))
    }

    /// Runs `task` every `period`, the first time one period from now.
    pub fn schedule_every(&mut self, period: Duration, mut task: impl FnMut() + 'static) -> TaskId {
        let period = period.max(MIN_PERIOD);
        self.schedule(
            period,
            ScheduledTask::Every {
                period,
                task: Box::new(move || {
                    task();
                    true
                }),
            },
        )
    }

    /// Like [`schedule_once`](Self::schedule_once) against `target`, doing nothing if
    /// `target` is gone by then.
    pub fn schedule_for<T: 'static>(
        &mut self,
        target: Weak<RefCell<T>>,
        delay: Duration,
        task: impl FnOnce(&mut T) + 'static,
    ) -> TaskId {
        self.schedule_once(delay, move || {
            if let Some(target) = target.upgrade() {
                task(&mut target.borrow_mut());
            }
        })
    }

    /// Like [`schedule_every`](Self::schedule_every) against `target`. The task is
    /// dropped the first time it fires after `target` is gone.
    pub fn schedule_every_for<T: 'static>(
        &mut self,
        target: Weak<RefCell<T>>,
        period: Duration,
        mut task: impl FnMut(&mut T) + 'static,
    ) -> TaskId {
        let period = period.max(MIN_PERIOD);
        self.schedule(
            period,
            ScheduledTask::Every {
                period,
                task: Box::new(move || match target.upgrade() {
                    Some(target) => {
                        task(&mut target.borrow_mut());
                        true
                    }
                    None => false,
                }),
            },
        )
    }

    fn schedule(&mut self, delay: Duration, task: ScheduledTask) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.deadlines
            .push(Reverse((self.clock.now() + delay, id)));
        self.scheduled.insert(id, task);
        id
    }

    /// Returns false when `id` already ran or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.scheduled.remove(&id).is_some()
    }

    /// Number of posted and scheduled tasks still pending.
    pub fn pending(&self) -> usize {
        self.posted.len() + self.scheduled.len()
    }

    /// When the worker next has something to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if !self.posted.is_empty() {
            return Some(self.clock.now());
        }
        self.deadlines
            .iter()
            .filter(|Reverse((_, id))| self.scheduled.contains_key(id))
            .map(|Reverse((deadline, _))| *deadline)
            .min()
    }

    /// Runs posted tasks, then every scheduled task whose deadline has passed.
    ///
    /// Returns how many tasks ran.
    pub fn run_due(&mut self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.posted.pop_front() {
            task();
            ran += 1;
        }

        let now = self.clock.now();
        while let Some(&Reverse((deadline, id))) = self.deadlines.peek() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();

            match self.scheduled.remove(&id) {
                None => continue,
                Some(ScheduledTask::Once(task)) => task(),
                Some(ScheduledTask::Every { period, mut task }) => {
                    if task() {
                        self.deadlines.push(Reverse((now + period, id)));
                        self.scheduled
                            .insert(id, ScheduledTask::Every { period, task });
                    } else {
                        trace!("periodic task {} dropped, target is gone", id);
                    }
                }
            }
            ran += 1;
        }
        ran
    }
}
