use serde::Deserialize;
use std::env;
use std::time::Duration;

const DEV_JWT_SECRET: &str = "dev-secret-only-for-local-testing";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub live: LiveConfig,
}

/// Tunables of the realtime coordinator.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// How often live, timed sessions broadcast an authoritative timer snapshot.
    pub timer_broadcast_interval_ms: u64,
    /// Scheduler resolution for window opening/closing and timer expiry.
    pub scheduler_tick_ms: u64,
    /// How long a disconnected participant stays on the roster awaiting a rejoin.
    pub disconnect_grace_secs: u64,
    pub room_channel_capacity: usize,
    /// Submissions are still accepted this long after a session completes.
    pub submission_grace_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            timer_broadcast_interval_ms: 5000,
            scheduler_tick_ms: 1000,
            disconnect_grace_secs: 30,
            room_channel_capacity: 64,
            submission_grace_secs: 30,
        }
    }
}

impl LiveConfig {
    pub fn timer_broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.timer_broadcast_interval_ms.max(1))
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms.max(1))
    }

    pub fn disconnect_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.disconnect_grace_secs as i64)
    }

    pub fn submission_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.submission_grace_secs as i64)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            Err(_) => {
                tracing::warn!("Using default JWT_SECRET (dev mode only!)");
                DEV_JWT_SECRET.to_string()
            }
        };

        let defaults = LiveConfig::default();
        let live = LiveConfig {
            timer_broadcast_interval_ms: setting_or_env(
                &settings,
                "live.timer_broadcast_interval_ms",
                "LIVE_TIMER_BROADCAST_MS",
            )
            .unwrap_or(defaults.timer_broadcast_interval_ms),
            scheduler_tick_ms: setting_or_env(&settings, "live.scheduler_tick_ms", "LIVE_SCHEDULER_TICK_MS")
                .unwrap_or(defaults.scheduler_tick_ms),
            disconnect_grace_secs: setting_or_env(
                &settings,
                "live.disconnect_grace_secs",
                "LIVE_DISCONNECT_GRACE_SECS",
            )
            .unwrap_or(defaults.disconnect_grace_secs),
            room_channel_capacity: setting_or_env(
                &settings,
                "live.room_channel_capacity",
                "LIVE_ROOM_CHANNEL_CAPACITY",
            )
            .map(|v: u64| v as usize)
            .filter(|v| *v > 0)
            .unwrap_or(defaults.room_channel_capacity),
            submission_grace_secs: setting_or_env(
                &settings,
                "live.submission_grace_secs",
                "LIVE_SUBMISSION_GRACE_SECS",
            )
            .unwrap_or(defaults.submission_grace_secs),
        };

        Ok(Config {
            bind_addr,
            jwt_secret,
            live,
        })
    }
}

fn setting_or_env(settings: &config::Config, key: &str, env_key: &str) -> Option<u64> {
    settings
        .get_int(key)
        .ok()
        .and_then(|v| u64::try_from(v).ok())
        .or_else(|| env::var(env_key).ok().and_then(|v| v.parse::<u64>().ok()))
}
