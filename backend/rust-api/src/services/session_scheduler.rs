use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::{metrics::SCHEDULER_TICKS_TOTAL, services::live_quiz_service::LiveQuizService};

/// Background loop that opens and closes scheduled windows, expires timers,
/// broadcasts periodic timer snapshots and prunes stale roster entries.
pub struct SessionScheduler {
    live_quizzes: Arc<LiveQuizService>,
    tick: Duration,
    timer_every: u64,
}

impl SessionScheduler {
    pub fn new(live_quizzes: Arc<LiveQuizService>) -> Self {
        let config = live_quizzes.config();
        let tick = config.scheduler_tick();
        let broadcast = config.timer_broadcast_interval();
        let timer_every = (broadcast.as_millis() / tick.as_millis().max(1)).max(1) as u64;
        Self {
            live_quizzes,
            tick,
            timer_every,
        }
    }

    pub async fn run(self) {
        info!(
            "Starting session scheduler loop (tick {}ms, timer snapshot every {} ticks)",
            self.tick.as_millis(),
            self.timer_every
        );

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut count: u64 = 0;

        loop {
            ticker.tick().await;
            let broadcast_timers = count % self.timer_every == 0;
            count = count.wrapping_add(1);

            let applied = self.live_quizzes.tick(Utc::now(), broadcast_timers).await;
            SCHEDULER_TICKS_TOTAL.with_label_values(&["success"]).inc();
            if applied > 0 {
                debug!(applied, "Scheduler applied due transitions");
            }
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
