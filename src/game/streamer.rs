use smallvec::SmallVec;

use crate::error::CoreError;
use crate::game::chart::{Chart, NoteEvent};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SpawnCommand {
    pub lane: usize,
    pub note: NoteEvent,
    pub travel_ms: f64,
    pub expected_hit_ms: f64,
}

/// Walks the active chart with a single forward-only cursor and emits spawn
/// commands `lookahead_ms` ahead of each note's target time.
#[derive(Debug)]
pub struct ChartStreamer {
    chart: Option<Chart>,
    cursor: usize,
    lookahead_ms: f64,
    lane_traversal_ms: f64,
}

impl ChartStreamer {
    pub fn new(lookahead_ms: f64, lane_traversal_ms: f64) -> Self {
        Self {
            chart: None,
            cursor: 0,
            lookahead_ms,
            lane_traversal_ms,
        }
    }

    /// Replaces the active chart wholesale and rewinds the cursor.
    pub fn switch_chart(&mut self, chart: Chart) {
        self.chart = Some(chart);
        self.cursor = 0;
    }

    pub fn clear(&mut self) {
        self.chart = None;
        self.cursor = 0;
    }

    /// Emits every note that has become due, in chart order. Only the note at
    /// the cursor is ever compared, so a tick costs O(spawned) rather than
    /// O(chart). An empty or exhausted chart emits nothing.
    pub fn tick(&mut self, song_position_ms: f64, lane_count: usize) -> SmallVec<[SpawnCommand; 4]> {
        let mut out = SmallVec::new();
        if lane_count == 0 {
            return out;
        }
        while let Ok(note) = self.peek() {
            if note.target_time_ms - self.lookahead_ms > song_position_ms {
                break;
            }
            out.push(SpawnCommand {
                lane: note.lane % lane_count,
                note,
                travel_ms: self.lane_traversal_ms,
                expected_hit_ms: song_position_ms + self.lookahead_ms,
            });
            self.cursor += 1;
        }
        out
    }

    /// The note at the cursor. `EmptyChart` and `CursorExhausted` both mean
    /// there is nothing left to stream.
    pub fn peek(&self) -> Result<NoteEvent, CoreError> {
        let chart = self.chart.as_ref().ok_or(CoreError::EmptyChart)?;
        if chart.is_empty() {
            return Err(CoreError::EmptyChart);
        }
        chart.get(self.cursor).copied().ok_or(CoreError::CursorExhausted)
    }

    #[inline(always)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.chart
            .as_ref()
            .is_none_or(|chart| self.cursor >= chart.len())
    }
}
