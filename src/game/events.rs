use crate::game::judgment::{Resolution, Tier};
use crate::game::segment::VariantTag;

/// A segment whose audio has been armed to start at an exact device time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SegmentStart {
    pub segment_index: usize,
    pub tag: VariantTag,
    pub start_time: f64,
}

/// Work deferred onto the session's timer queue.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Deferred {
    IntroStart,
    SegmentStarted(SegmentStart),
    WindowEnter { segment_index: usize },
    WindowExit { segment_index: usize },
}

/// Outbound notifications for collaborators outside the core (rendering,
/// world theming, debug UI). Emitted after every internal state change for
/// the same tick has been applied.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    NoteSpawned {
        lane: usize,
        visual_preset: Option<String>,
        travel_ms: f64,
        expected_hit_ms: f64,
    },
    NoteJudged {
        lane: usize,
        tier: Tier,
        hit_difference_ms: i64,
        resolution: Resolution,
    },
    SegmentStarted(SegmentStart),
    DecisionWindowEntered { segment_index: usize },
    DecisionLocked { chosen_edge: VariantTag, selected: VariantTag },
    DecisionResolved { selected: VariantTag },
    Finished,
}
