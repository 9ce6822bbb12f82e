use log::{debug, info};

use crate::core::audio::{AudioBackend, BUFFER_COUNT};
use crate::core::timer::{TimerHandle, TimerQueue};
use crate::error::CoreError;
use crate::game::events::{Deferred, SegmentStart};
use crate::game::segment::{Segment, Variant, VariantTag};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlaybackSchedule {
    /// Absolute device time at which the next armed clip will start.
    pub next_start_time: f64,
    pub active_buffer: usize,
}

/// Owns the song timeline and the two alternating playback buffers.
///
/// Scheduling never waits on real playback: each armed clip starts exactly
/// where the previous one ends, so consecutive segments are gapless no matter
/// when `schedule_segment` is called relative to the audio.
#[derive(Debug)]
pub struct Conductor {
    schedule: PlaybackSchedule,
    segment_start_time: Option<f64>,
    first_beat_offset_ms: f64,
    sec_per_beat: f64,
    song_position_ms: f64,
    song_position_beats: f64,
    pending_starts: Vec<TimerHandle>,
}

impl Default for Conductor {
    fn default() -> Self {
        Self {
            schedule: PlaybackSchedule {
                next_start_time: 0.0,
                active_buffer: 0,
            },
            segment_start_time: None,
            first_beat_offset_ms: 0.0,
            sec_per_beat: 0.5,
            song_position_ms: 0.0,
            song_position_beats: 0.0,
            pending_starts: Vec::new(),
        }
    }
}

impl Conductor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms an idle buffer with `segment`'s `tag` variant and queues the
    /// matching start notification for the exact start instant.
    ///
    /// Returns `SchedulingBusy` without touching audio or timers when both
    /// buffers are occupied.
    pub fn schedule_segment<A: AudioBackend>(
        &mut self,
        audio: &mut A,
        timers: &mut TimerQueue<Deferred>,
        segment_index: usize,
        segment: &Segment,
        tag: VariantTag,
    ) -> Result<SegmentStart, CoreError> {
        let variant = segment.variant(tag).ok_or_else(|| {
            CoreError::ConfigurationMissing(format!(
                "segment {segment_index} has no {} variant",
                tag.as_str()
            ))
        })?;

        let buffer = (0..BUFFER_COUNT)
            .find(|&b| !audio.is_playing(b))
            .ok_or(CoreError::SchedulingBusy)?;

        let now = audio.now();
        if (0..BUFFER_COUNT).all(|b| !audio.is_playing(b)) {
            self.schedule.next_start_time = now;
        }

        let start_time = self.schedule.next_start_time;
        audio.schedule_playback(buffer, &variant.song, start_time);
        let start = SegmentStart {
            segment_index,
            tag,
            start_time,
        };
        self.pending_starts.retain(|h| timers.is_pending(*h));
        self.pending_starts
            .push(timers.schedule(start_time, Deferred::SegmentStarted(start)));

        self.schedule.next_start_time += audio.clip_duration(&variant.song);
        self.schedule.active_buffer = buffer;
        debug!(
            "Segment {} ({}) armed on buffer {} for {:.4}s (starts in {:.4}s); next slot at {:.4}s.",
            segment_index,
            tag.as_str(),
            buffer,
            start_time,
            start_time - now,
            self.schedule.next_start_time
        );
        Ok(start)
    }

    /// Switches the timeline to a segment that has just become audible.
    ///
    /// Returns how far the song position jumps at the boundary, in ms. Notes
    /// already in flight subtract this from their expected hit stamp so they
    /// stay anchored to the same physical instant.
    pub fn begin_segment(&mut self, start: &SegmentStart, variant: &Variant, now: f64) -> f64 {
        let new_position_at_start = -variant.first_beat_offset_ms;
        let shift_ms = match self.segment_start_time {
            Some(prev_start) => {
                let old_position_at_start =
                    (start.start_time - prev_start) * 1000.0 - self.first_beat_offset_ms;
                old_position_at_start - new_position_at_start
            }
            None => 0.0,
        };

        self.segment_start_time = Some(start.start_time);
        self.first_beat_offset_ms = variant.first_beat_offset_ms;
        self.sec_per_beat = variant.sec_per_beat();
        self.tick(now);
        info!(
            "Segment {} started as {} at {:.4}s ({:.1} BPM, offset {:.1}ms).",
            start.segment_index,
            start.tag.as_str(),
            start.start_time,
            60.0 / self.sec_per_beat,
            self.first_beat_offset_ms
        );
        shift_ms
    }

    pub fn tick(&mut self, now: f64) {
        let Some(start) = self.segment_start_time else {
            return;
        };
        self.song_position_ms = (now - start) * 1000.0 - self.first_beat_offset_ms;
        self.song_position_beats = self.song_position_ms / 1000.0 / self.sec_per_beat;
    }

    /// Silences both buffers and forgets every queued start notification.
    pub fn stop<A: AudioBackend>(&mut self, audio: &mut A, timers: &mut TimerQueue<Deferred>) {
        for handle in self.pending_starts.drain(..) {
            timers.cancel(handle);
        }
        audio.stop_all();
        *self = Self::default();
    }

    #[inline(always)]
    pub fn song_position_ms(&self) -> f64 {
        self.song_position_ms
    }

    #[inline(always)]
    pub fn song_position_beats(&self) -> f64 {
        self.song_position_beats
    }

    #[inline(always)]
    pub fn schedule(&self) -> PlaybackSchedule {
        self.schedule
    }

    #[inline(always)]
    pub fn segment_start_time(&self) -> Option<f64> {
        self.segment_start_time
    }

    #[inline(always)]
    pub fn has_pending_starts<T>(&self, timers: &TimerQueue<T>) -> bool {
        self.pending_starts.iter().any(|h| timers.is_pending(*h))
    }
}
