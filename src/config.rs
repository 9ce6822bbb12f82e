use ini::Ini;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use crate::game::session::SessionParams;
use crate::game::timing_windows::JUDGE_BIAS_MS;

const CONFIG_PATH: &str = "riftsync.ini";
const SECTION: &str = "Options";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Debug => "Debug",
            Self::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("'{other}' is not a valid LogLevel setting")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: LogLevel,
    pub content_path: PathBuf,
    pub lane_count: usize,
    pub lookahead_ms: f64,
    pub lane_traversal_ms: f64,
    pub hit_eligibility: f64,
    pub judge_bias_ms: i64,
    pub decision_travel_ms: f64,
    pub intro_delay_seconds: f64,
    pub tick_hz: u32,
    pub seed: u64,
    // Autoplay only
    pub autoplay_jitter_ms: f64,
    pub autoplay_miss_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            content_path: PathBuf::from("content/session.json"),
            lane_count: 4,
            lookahead_ms: 1000.0,
            lane_traversal_ms: 1000.0,
            hit_eligibility: 0.5,
            judge_bias_ms: JUDGE_BIAS_MS,
            decision_travel_ms: 1000.0,
            intro_delay_seconds: 2.0,
            tick_hz: 240,
            seed: 0,
            autoplay_jitter_ms: 40.0,
            autoplay_miss_rate: 0.1,
        }
    }
}

impl Config {
    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            lane_count: self.lane_count,
            lookahead_ms: self.lookahead_ms,
            lane_traversal_ms: self.lane_traversal_ms,
            hit_eligibility: self.hit_eligibility,
            judge_bias_ms: self.judge_bias_ms,
            decision_travel_ms: self.decision_travel_ms,
            intro_delay_seconds: self.intro_delay_seconds,
            seed: self.seed,
        }
    }

    /// Builds a config from a parsed INI, using defaults for any missing or
    /// malformed key.
    pub fn from_ini(conf: &Ini) -> Self {
        let default = Self::default();
        let get = |key: &str| conf.get_from(Some(SECTION), key).map(str::trim);
        let num = |key: &str, fallback: f64| {
            get(key)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(fallback)
        };

        Self {
            log_level: get("LogLevel")
                .and_then(|v| LogLevel::from_str(v).ok())
                .unwrap_or(default.log_level),
            content_path: get("ContentPath")
                .filter(|v| !v.is_empty())
                .map_or(default.content_path, PathBuf::from),
            lane_count: get("LaneCount")
                .and_then(|v| v.parse::<usize>().ok())
                .map_or(default.lane_count, |v| v.clamp(2, 16)),
            lookahead_ms: num("LookaheadMs", default.lookahead_ms).max(0.0),
            lane_traversal_ms: num("LaneTraversalMs", default.lane_traversal_ms).max(1.0),
            hit_eligibility: num("HitEligibility", default.hit_eligibility).clamp(0.0, 1.0),
            judge_bias_ms: get("JudgeBiasMs")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(default.judge_bias_ms),
            decision_travel_ms: num("DecisionTravelMs", default.decision_travel_ms).max(1.0),
            intro_delay_seconds: num("IntroDelaySeconds", default.intro_delay_seconds).max(0.0),
            tick_hz: get("TickHz")
                .and_then(|v| v.parse::<u32>().ok())
                .map_or(default.tick_hz, |v| v.clamp(30, 2000)),
            seed: get("Seed")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default.seed),
            autoplay_jitter_ms: num("AutoplayJitterMs", default.autoplay_jitter_ms).max(0.0),
            autoplay_miss_rate: num("AutoplayMissRate", default.autoplay_miss_rate)
                .clamp(0.0, 1.0),
        }
    }

    fn to_ini(&self) -> Ini {
        let mut conf = Ini::new();
        // Keys in alphabetical order
        conf.with_section(Some(SECTION))
            .set("AutoplayJitterMs", self.autoplay_jitter_ms.to_string())
            .set("AutoplayMissRate", self.autoplay_miss_rate.to_string())
            .set("ContentPath", self.content_path.display().to_string())
            .set("DecisionTravelMs", self.decision_travel_ms.to_string())
            .set("HitEligibility", self.hit_eligibility.to_string())
            .set("IntroDelaySeconds", self.intro_delay_seconds.to_string())
            .set("JudgeBiasMs", self.judge_bias_ms.to_string())
            .set("LaneCount", self.lane_count.to_string())
            .set("LaneTraversalMs", self.lane_traversal_ms.to_string())
            .set("LogLevel", self.log_level.as_str())
            .set("LookaheadMs", self.lookahead_ms.to_string())
            .set("Seed", self.seed.to_string())
            .set("TickHz", self.tick_hz.to_string());
        conf
    }
}

static CONFIG: std::sync::LazyLock<Mutex<Config>> =
    std::sync::LazyLock::new(|| Mutex::new(Config::default()));

// --- File I/O ---

fn create_default_config_file() -> Result<(), std::io::Error> {
    info!("'{CONFIG_PATH}' not found, creating with default values.");
    Config::default().to_ini().write_to_file(CONFIG_PATH)
}

pub fn load() {
    if !Path::new(CONFIG_PATH).exists()
        && let Err(e) = create_default_config_file()
    {
        warn!("Failed to create default config file: {e}");
    }

    let cfg = match Ini::load_from_file(CONFIG_PATH) {
        Ok(conf) => {
            info!("Configuration loaded from '{CONFIG_PATH}'.");
            Config::from_ini(&conf)
        }
        Err(e) => {
            warn!("Failed to load '{CONFIG_PATH}': {e}. Using default values.");
            Config::default()
        }
    };
    match CONFIG.lock() {
        Ok(mut guard) => *guard = cfg,
        Err(poisoned) => *poisoned.into_inner() = cfg,
    }
}

pub fn get() -> Config {
    match CONFIG.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}
