// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine timer management.
//!
//! This module manages all protocol timers using a priority queue of pending
//! timers. Timers are processed in order, with the next timer to fire
//! determining the sleep duration. Cancellation is explicit: when a circuit,
//! level, or single timer owner goes away, a cancel command guarantees no
//! callback fires against state that no longer exists. Canceled entries are
//! dropped lazily when they reach the head of the queue.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use tokio::sync::mpsc;

use crate::logging::{Facility, Logger};
use crate::protocol::{ProtocolEvent, TimerCancel, TimerRequest, TimerType};
use crate::log_debug;

/// Commands accepted by the timer manager
#[derive(Debug)]
pub enum TimerCommand {
    Schedule(TimerRequest),
    Cancel(TimerCancel),
}

/// A scheduled timer with its fire time and type
#[derive(Debug, Clone)]
struct ScheduledTimer {
    fire_at: Instant,
    timer_type: TimerType,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.timer_type == other.timer_type
    }
}

impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at.cmp(&other.fire_at)
    }
}

/// Engine timer management
///
/// Keeps a heap of pending timers plus the authoritative fire time per timer
/// type; heap entries whose fire time no longer matches are stale and are
/// discarded instead of fired.
pub struct TimerManager {
    /// Pending timers sorted by fire time
    timers: BinaryHeap<std::cmp::Reverse<ScheduledTimer>>,
    /// Armed fire time per timer type
    active: HashMap<TimerType, Instant>,
    /// Channel to receive schedule/cancel commands
    command_rx: mpsc::Receiver<TimerCommand>,
    /// Channel to deliver expiry events
    event_tx: mpsc::Sender<ProtocolEvent>,
    /// Logger
    logger: Logger,
}

impl TimerManager {
    /// Create a new timer manager
    pub fn new(
        command_rx: mpsc::Receiver<TimerCommand>,
        event_tx: mpsc::Sender<ProtocolEvent>,
        logger: Logger,
    ) -> Self {
        Self {
            timers: BinaryHeap::new(),
            active: HashMap::new(),
            command_rx,
            event_tx,
            logger,
        }
    }

    /// Schedule a new timer
    fn schedule(&mut self, request: TimerRequest) {
        if !request.replace_existing && self.active.contains_key(&request.timer_type) {
            return;
        }
        self.active
            .insert(request.timer_type.clone(), request.fire_at);
        self.timers.push(std::cmp::Reverse(ScheduledTimer {
            fire_at: request.fire_at,
            timer_type: request.timer_type,
        }));

        log_debug!(
            self.logger,
            Facility::Timer,
            &format!("scheduled timer, {} pending", self.active.len())
        );
    }

    /// Cancel every armed timer the request covers
    fn cancel(&mut self, cancel: TimerCancel) {
        let before = self.active.len();
        self.active.retain(|timer_type, _| !timer_type.matches(&cancel));
        let removed = before - self.active.len();
        if removed > 0 {
            log_debug!(
                self.logger,
                Facility::Timer,
                &format!("canceled {removed} timer(s), {} pending", self.active.len())
            );
        }
    }

    /// Next genuine deadline, discarding stale heap heads.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(std::cmp::Reverse(head)) = self.timers.peek() {
            if self.active.get(&head.timer_type) == Some(&head.fire_at) {
                return Some(head.fire_at);
            }
            self.timers.pop();
        }
        None
    }

    /// Pop the next timer due at or before `now`, if any.
    fn pop_due(&mut self, now: Instant) -> Option<TimerType> {
        while let Some(std::cmp::Reverse(head)) = self.timers.peek() {
            if self.active.get(&head.timer_type) != Some(&head.fire_at) {
                self.timers.pop();
                continue;
            }
            if head.fire_at > now {
                return None;
            }
            let std::cmp::Reverse(timer) = self.timers.pop().unwrap();
            self.active.remove(&timer.timer_type);
            return Some(timer.timer_type);
        }
        None
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.active.len()
    }

    /// Run until the command channel closes, delivering expiries as events.
    pub async fn run(mut self) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(TimerCommand::Schedule(request)) => self.schedule(request),
                    Some(TimerCommand::Cancel(cancel)) => self.cancel(cancel),
                    None => break,
                },
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at.into()).await,
                        None => std::future::pending().await,
                    }
                } => {
                    let now = Instant::now();
                    while let Some(timer_type) = self.pop_due(now) {
                        if self
                            .event_tx
                            .send(ProtocolEvent::TimerExpired(timer_type))
                            .await
                            .is_err()
                        {
                            // Engine gone; nothing left to fire for
                            return;
                        }
                    }
                }
            }
        }
    }
}
