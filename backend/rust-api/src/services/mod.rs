use std::sync::Arc;

use crate::config::Config;
use crate::middlewares::auth::JwtService;

use self::answer_service::AnswerService;
use self::live_quiz_service::LiveQuizService;

pub struct AppState {
    pub config: Config,
    pub jwt: JwtService,
    pub live_quizzes: Arc<LiveQuizService>,
    pub answers: AnswerService,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let live_quizzes = Arc::new(LiveQuizService::new(config.live.clone()));
        let answers = AnswerService::new(live_quizzes.clone());
        let jwt = JwtService::new(&config.jwt_secret);

        tracing::info!(
            scheduler_tick_ms = config.live.scheduler_tick_ms,
            disconnect_grace_secs = config.live.disconnect_grace_secs,
            "Live quiz state initialised"
        );

        Self {
            config,
            jwt,
            live_quizzes,
            answers,
        }
    }
}

pub mod answer_service;
pub mod live_quiz_service;
pub mod room_hub;
pub mod session_scheduler;
pub mod session_store;
