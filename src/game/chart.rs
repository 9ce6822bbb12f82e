use std::sync::Arc;

use crate::error::CoreError;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NoteEvent {
    pub lane: usize,
    pub target_time_ms: f64,
    pub is_hold: bool,
    pub hold_length_ms: f64,
}

impl NoteEvent {
    pub const fn tap(lane: usize, target_time_ms: f64) -> Self {
        Self {
            lane,
            target_time_ms,
            is_hold: false,
            hold_length_ms: 0.0,
        }
    }
}

/// An immutable, time-ordered note sequence. Cloning shares the storage, so a
/// chart can be handed to the streamer on every segment start without copying.
#[derive(Clone, Debug, Default)]
pub struct Chart {
    notes: Arc<[NoteEvent]>,
}

impl Chart {
    /// Builds a chart, rejecting any sequence whose target times decrease.
    /// Ties keep their original order.
    pub fn new(notes: Vec<NoteEvent>) -> Result<Self, CoreError> {
        if let Some(i) = notes
            .windows(2)
            .position(|w| w[1].target_time_ms < w[0].target_time_ms)
        {
            return Err(CoreError::InvalidContent(format!(
                "note {} at {}ms precedes note {} at {}ms",
                i + 1,
                notes[i + 1].target_time_ms,
                i,
                notes[i].target_time_ms
            )));
        }
        if notes.iter().any(|n| !n.target_time_ms.is_finite()) {
            return Err(CoreError::InvalidContent(
                "note target time is not finite".to_string(),
            ));
        }
        Ok(Self {
            notes: notes.into(),
        })
    }

    #[inline(always)]
    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<&NoteEvent> {
        self.notes.get(index)
    }

    /// Time of the last note (plus hold tail), or 0 for an empty chart.
    pub fn last_second(&self) -> f64 {
        self.notes.iter().fold(0.0_f64, |acc, n| {
            let end = if n.is_hold {
                n.target_time_ms + n.hold_length_ms.max(0.0)
            } else {
                n.target_time_ms
            };
            acc.max(end / 1000.0)
        })
    }
}
