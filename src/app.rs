use log::{info, warn};
use rand::prelude::*;
use smallvec::SmallVec;

use crate::config::Config;
use crate::core::audio::{AudioBackend, VirtualAudio};
use crate::core::input::EdgeDetector;
use crate::game::events::SessionEvent;
use crate::game::judgment::TallyState;
use crate::game::parsing::content::{Content, load_content};
use crate::game::segment::VariantTag;
use crate::game::session::Session;

/* ============================== Autoplay ============================== */

/// Scripted player. Plans one press per spawned note in device time, keyed
/// off the judge point, and occasionally skips a note or a decision.
pub struct Autoplay {
    rng: StdRng,
    jitter_ms: f64,
    miss_rate: f64,
    bias_ms: f64,
    pending: Vec<(f64, usize)>,
    held: Vec<bool>,
}

impl Autoplay {
    pub fn new(config: &Config) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
            jitter_ms: config.autoplay_jitter_ms,
            miss_rate: config.autoplay_miss_rate,
            bias_ms: config.judge_bias_ms as f64,
            pending: Vec::new(),
            held: vec![false; config.lane_count.max(1)],
        }
    }

    /// Held-lane state for the tick at `now`. A lane is held for exactly one
    /// tick per press so every planned press produces its own edge.
    pub fn held(&mut self, now: f64) -> &[bool] {
        let was_held = std::mem::take(&mut self.held);
        self.held = vec![false; was_held.len()];
        let mut i = 0;
        while i < self.pending.len() {
            let (at, lane) = self.pending[i];
            if at <= now && lane < self.held.len() && !was_held[lane] && !self.held[lane] {
                self.held[lane] = true;
                self.pending.swap_remove(i);
            } else {
                i += 1;
            }
        }
        &self.held
    }

    /// Plans presses for whatever the session spawned this tick.
    /// `song_position_ms` is the position the spawns were stamped against.
    pub fn observe(&mut self, events: &[SessionEvent], now: f64, song_position_ms: f64) {
        let mut prompts: SmallVec<[(usize, f64); 2]> = SmallVec::new();
        for event in events {
            match event {
                SessionEvent::NoteSpawned {
                    lane,
                    visual_preset: None,
                    expected_hit_ms,
                    ..
                } => {
                    if self.rng.random::<f64>() < self.miss_rate {
                        continue;
                    }
                    let jitter = if self.jitter_ms > 0.0 {
                        self.rng.random_range(-self.jitter_ms..=self.jitter_ms)
                    } else {
                        0.0
                    };
                    let offset_ms = expected_hit_ms - song_position_ms - self.bias_ms + jitter;
                    self.pending.push((now + offset_ms.max(0.0) / 1000.0, *lane));
                }
                SessionEvent::NoteSpawned {
                    lane,
                    visual_preset: Some(_),
                    travel_ms,
                    ..
                } => prompts.push((*lane, *travel_ms)),
                _ => {}
            }
        }

        if prompts.is_empty() || self.rng.random::<f64>() < self.miss_rate {
            return;
        }
        let (lane, travel_ms) = prompts[self.rng.random_range(0..prompts.len())];
        self.pending.push((now + travel_ms * 0.75 / 1000.0, lane));
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.held.fill(false);
    }
}

/* ============================== Run summary ============================== */

#[derive(Debug, Default)]
struct RunSummary {
    path: Vec<VariantTag>,
    segment: TallyState,
    total: TallyState,
    decisions_locked: usize,
}

impl RunSummary {
    fn observe(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::SegmentStarted(start) => {
                if !self.path.is_empty() {
                    log_tally("Segment", &self.segment);
                }
                self.segment.reset();
                self.path.push(start.tag);
                info!(
                    "Segment {} started: {} at {:.3}s.",
                    start.segment_index,
                    start.tag.as_str(),
                    start.start_time
                );
            }
            SessionEvent::NoteJudged { tier, .. } => {
                self.segment.record(*tier);
                self.total.record(*tier);
            }
            SessionEvent::DecisionLocked { .. } => self.decisions_locked += 1,
            SessionEvent::Finished => log_tally("Segment", &self.segment),
            _ => {}
        }
    }

    fn path_string(&self) -> String {
        self.path
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

fn log_tally(label: &str, tally: &TallyState) {
    info!(
        "{label} tally: {} perfect, {} great, {} good, {} miss.",
        tally.perfect_hits, tally.great_hits, tally.good_hits, tally.misses
    );
}

/* ============================== Runner ============================== */

/// How long the device may sit silent with nothing queued before a run is
/// considered stuck. Covers the longest lane timeout.
const SILENCE_LIMIT_SECONDS: f64 = 5.0;

/// Tracks the last instant any scheduled clip was still audible.
struct SilenceGuard {
    audible_until: f64,
}

impl SilenceGuard {
    fn new(now: f64) -> Self {
        Self { audible_until: now }
    }

    /// True once the device has been drained for longer than the limit and
    /// no deferred work is left to schedule more audio.
    fn stalled(&mut self, audio: &VirtualAudio, pending_timers: usize) -> bool {
        let now = audio.now();
        let drained_at = audio.drained_at();
        if drained_at > now {
            self.audible_until = drained_at;
        }
        pending_timers == 0 && now - self.audible_until > SILENCE_LIMIT_SECONDS
    }
}

/// Upper bound on how long the authored content can play, plus slack.
fn time_limit(content: &Content, config: &Config) -> f64 {
    let longest: f64 = content
        .segments
        .iter()
        .map(|s| {
            s.variants
                .values()
                .map(|v| v.song.length_seconds)
                .fold(0.0, f64::max)
        })
        .sum();
    config.intro_delay_seconds + longest + 10.0
}

/// Plays `content` to completion on a virtual clock and returns the variant
/// path taken.
pub fn play(content: Content, config: &Config) -> Vec<VariantTag> {
    let limit = time_limit(&content, config);
    let dt = 1.0 / f64::from(config.tick_hz.max(1));

    let mut session = Session::new(VirtualAudio::new(), content, config.session_params());
    let mut detector = EdgeDetector::new(session.lanes().len());
    let mut autoplay = Autoplay::new(config);
    let mut summary = RunSummary::default();
    let mut silence = SilenceGuard::new(session.audio().now());

    session.start();
    while !session.is_finished() {
        session.audio_mut().advance(dt);
        let now = session.audio().now();
        if now > limit {
            warn!("Run exceeded {limit:.1}s without finishing; stopping.");
            break;
        }
        let edges = detector.update(autoplay.held(now), now);
        let events = session.tick(&edges);
        autoplay.observe(&events, now, session.conductor().song_position_ms());
        for event in &events {
            summary.observe(event);
        }
        if !session.is_finished() && silence.stalled(session.audio(), session.pending_timers()) {
            warn!("Nothing audible or queued since {:.1}s; stopping.", silence.audible_until);
            break;
        }
    }

    let stats = session.decision().timing_stats();
    info!(
        "Narrative path: {} ({} decisions locked).",
        summary.path_string(),
        summary.decisions_locked
    );
    log_tally("Run", &summary.total);
    info!(
        "Last segment offsets: mean {:.1}ms, mean abs {:.1}ms, stddev {:.1}ms over {} hits.",
        stats.mean_ms, stats.mean_abs_ms, stats.stddev_ms, stats.count
    );

    session.stop();
    autoplay.clear();
    detector.reset();
    summary.path
}

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = crate::config::get();
    let content = load_content(&config.content_path)?;
    let played = play(content, &config).len();
    info!("Run complete: {played} segments played.");
    Ok(())
}
