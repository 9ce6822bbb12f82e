use log::{debug, info};

use crate::game::segment::SongAsset;

/* ============================== Public API ============================== */

/// Number of playback buffers the conductor alternates between.
pub const BUFFER_COUNT: usize = 2;

/// The slice of an audio device the core depends on. Implementations must
/// start a scheduled clip on the exact device-clock instant requested.
pub trait AudioBackend {
    /// Monotonic device clock in seconds.
    fn now(&self) -> f64;
    /// True from the moment a clip is scheduled on `buffer` until it finishes.
    fn is_playing(&self, buffer: usize) -> bool;
    fn clip_duration(&self, song: &SongAsset) -> f64;
    fn schedule_playback(&mut self, buffer: usize, song: &SongAsset, start_time: f64);
    fn stop_all(&mut self);
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledClip {
    pub buffer: usize,
    pub song_id: String,
    pub start_time: f64,
    pub duration: f64,
}

impl ScheduledClip {
    #[inline(always)]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// A deterministic stand-in for a sound card: the clock only moves when told
/// to, and every scheduled clip is recorded. Drives the headless runner and
/// the tests.
#[derive(Debug, Default)]
pub struct VirtualAudio {
    now: f64,
    buffers: [Option<ScheduledClip>; BUFFER_COUNT],
    history: Vec<ScheduledClip>,
}

impl VirtualAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.now += seconds;
        }
    }

    /// Moves the clock to `time`; the clock never runs backwards.
    pub fn set_now(&mut self, time: f64) {
        if time.is_finite() && time > self.now {
            self.now = time;
        }
    }

    #[inline(always)]
    pub fn scheduled(&self, buffer: usize) -> Option<&ScheduledClip> {
        self.buffers.get(buffer).and_then(Option::as_ref)
    }

    #[inline(always)]
    pub fn history(&self) -> &[ScheduledClip] {
        &self.history
    }

    /// Device time at which every scheduled clip has finished.
    pub fn drained_at(&self) -> f64 {
        self.buffers
            .iter()
            .flatten()
            .map(ScheduledClip::end_time)
            .fold(self.now, f64::max)
    }
}

impl AudioBackend for VirtualAudio {
    #[inline(always)]
    fn now(&self) -> f64 {
        self.now
    }

    fn is_playing(&self, buffer: usize) -> bool {
        self.scheduled(buffer)
            .is_some_and(|clip| self.now < clip.end_time())
    }

    #[inline(always)]
    fn clip_duration(&self, song: &SongAsset) -> f64 {
        song.length_seconds.max(0.0)
    }

    fn schedule_playback(&mut self, buffer: usize, song: &SongAsset, start_time: f64) {
        let Some(slot) = self.buffers.get_mut(buffer) else {
            debug!("Ignoring playback request for unknown buffer {buffer}.");
            return;
        };
        let clip = ScheduledClip {
            buffer,
            song_id: song.id.clone(),
            start_time,
            duration: song.length_seconds.max(0.0),
        };
        info!(
            "Buffer {} armed with '{}' at {:.4}s ({:.3}s long).",
            buffer, clip.song_id, clip.start_time, clip.duration
        );
        *slot = Some(clip.clone());
        self.history.push(clip);
    }

    fn stop_all(&mut self) {
        self.buffers = Default::default();
    }
}
