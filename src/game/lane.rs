use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::game::chart::NoteEvent;
use crate::game::judgment::Resolution;
use crate::game::segment::VariantTag;

#[derive(Clone, Debug, PartialEq)]
pub enum NoteKind {
    Chart(NoteEvent),
    /// One of the two branch choices offered while a decision window is open.
    DecisionPrompt {
        outcome: VariantTag,
        visual_preset: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct InFlightNote {
    pub kind: NoteKind,
    /// Device time (seconds) at which travel began.
    pub spawned_at: f64,
    pub travel_ms: f64,
    /// Song position (ms) the note was stamped to be hit at.
    pub expected_hit_ms: f64,
}

impl InFlightNote {
    /// Normalized travel progress in `0.0..=1.0`.
    #[inline(always)]
    pub fn progress(&self, now: f64) -> f64 {
        if self.travel_ms <= 0.0 {
            return 1.0;
        }
        ((now - self.spawned_at) * 1000.0 / self.travel_ms).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedNote {
    pub lane: usize,
    pub note: InFlightNote,
    pub resolution: Resolution,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputOutcome {
    Empty,
    /// Head note has not travelled far enough; it stays queued.
    TooEarly,
    Resolved(ResolvedNote),
}

/// One input column. Notes leave the queue exactly once, either through a
/// press or by finishing their travel unconsumed.
#[derive(Debug)]
pub struct Lane {
    index: usize,
    queue: VecDeque<InFlightNote>,
    hit_eligibility: f64,
}

impl Lane {
    pub fn new(index: usize, hit_eligibility: f64) -> Self {
        Self {
            index,
            queue: VecDeque::new(),
            hit_eligibility: hit_eligibility.clamp(0.0, 1.0),
        }
    }

    pub fn spawn_note(&mut self, kind: NoteKind, travel_ms: f64, expected_hit_ms: f64, now: f64) {
        self.queue.push_back(InFlightNote {
            kind,
            spawned_at: now,
            travel_ms,
            expected_hit_ms,
        });
    }

    pub fn on_input(&mut self, now: f64) -> InputOutcome {
        let Some(head) = self.queue.front() else {
            return InputOutcome::Empty;
        };
        if head.progress(now) < self.hit_eligibility {
            return InputOutcome::TooEarly;
        }
        match self.queue.pop_front() {
            Some(note) => InputOutcome::Resolved(ResolvedNote {
                lane: self.index,
                note,
                resolution: Resolution::Input,
            }),
            None => InputOutcome::Empty,
        }
    }

    /// Removes every note whose travel has completed, in queue order.
    pub fn tick(&mut self, now: f64) -> SmallVec<[ResolvedNote; 2]> {
        let mut out = SmallVec::new();
        while let Some(idx) = self.queue.iter().position(|n| n.progress(now) >= 1.0) {
            if let Some(note) = self.queue.remove(idx) {
                out.push(ResolvedNote {
                    lane: self.index,
                    note,
                    resolution: Resolution::Timeout,
                });
            }
        }
        out
    }

    /// Re-anchors in-flight notes after the song timeline jumps by `shift_ms`.
    pub fn rebase(&mut self, shift_ms: f64) {
        for note in &mut self.queue {
            note.expected_hit_ms -= shift_ms;
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    #[inline(always)]
    pub fn head(&self) -> Option<&InFlightNote> {
        self.queue.front()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
