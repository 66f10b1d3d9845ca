use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::models::live_quiz::remaining_from_start;
use crate::models::{RoomId, ServerMessage, SessionSnapshot, TimerSnapshot};

/// Local countdown corrected by authoritative snapshots.
///
/// `startedAt` only seeds the value on join. After that it moves down one
/// second per local tick, and every snapshot overrides it with the server's
/// `remainingSeconds`, so local clock skew never outlives the next snapshot.
/// Reaching zero locally marks time up before the server's `ended` arrives.
#[derive(Debug, Clone)]
pub struct TimerSynchronizer {
    room: RoomId,
    total_seconds: Option<u32>,
    remaining_seconds: Option<u32>,
    time_up: bool,
    ended: bool,
}

impl TimerSynchronizer {
    pub fn new(room: RoomId) -> Self {
        Self {
            room,
            total_seconds: None,
            remaining_seconds: None,
            time_up: false,
            ended: false,
        }
    }

    /// Seeds from the join confirmation.
    pub fn on_joined(&mut self, session: &SessionSnapshot, now: DateTime<Utc>) {
        if self.ended {
            return;
        }
        self.total_seconds = session.time_limit.filter(|total| *total > 0);
        self.remaining_seconds = match (self.total_seconds, session.started_at) {
            (Some(total), Some(started_at)) if session.is_live => {
                Some(remaining_from_start(total, started_at, now))
            }
            (Some(total), _) => Some(total),
            (None, _) => None,
        };
        self.time_up = self.remaining_seconds == Some(0);
    }

    pub fn on_snapshot(&mut self, snapshot: &TimerSnapshot) {
        if self.ended {
            return;
        }
        if snapshot.total_seconds == 0 {
            self.total_seconds = None;
            self.remaining_seconds = None;
            return;
        }
        let remaining = snapshot.remaining_seconds.min(snapshot.total_seconds);
        self.total_seconds = Some(snapshot.total_seconds);
        self.remaining_seconds = Some(remaining);
        self.time_up = remaining == 0;
    }

    /// One local second elapsed. Returns true on the tick that reaches zero.
    pub fn tick(&mut self) -> bool {
        if self.ended || self.time_up {
            return false;
        }
        match self.remaining_seconds.as_mut() {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                if *remaining == 0 {
                    self.time_up = true;
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Dispatches a room event. Returns true when time became up.
    pub fn apply(&mut self, message: &ServerMessage, now: DateTime<Utc>) -> bool {
        if message.room() != Some(&self.room) {
            return false;
        }
        let was_up = self.time_up;
        match message {
            ServerMessage::Joined { session, .. } => self.on_joined(session, now),
            ServerMessage::TimerSnapshot { snapshot, .. } => self.on_snapshot(snapshot),
            ServerMessage::Ended { .. } => {
                self.ended = true;
                return false;
            }
            _ => {}
        }
        !was_up && self.time_up
    }

    pub fn is_timed(&self) -> bool {
        self.total_seconds.is_some()
    }

    pub fn remaining_seconds(&self) -> Option<u32> {
        self.remaining_seconds
    }

    pub fn total_seconds(&self) -> Option<u32> {
        self.total_seconds
    }

    pub fn is_time_up(&self) -> bool {
        self.time_up
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

/// Local one-second ticker. Dropping it stops the task.
pub struct Countdown {
    ticks: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

impl Countdown {
    pub async fn tick(&mut self) -> Option<()> {
        self.ticks.recv().await
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn spawn_countdown(period: Duration) -> Countdown {
    let (tx, ticks) = mpsc::channel(4);
    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    Countdown { ticks, handle }
}
