use log::debug;

use crate::game::segment::{Segment, VariantTag};

/// Ordered list of authored segments plus the narrative position within it.
///
/// `current_segment_index` counts segments that have started, so while a
/// segment plays it names the segment that will be scheduled next.
#[derive(Debug)]
pub struct SegmentSequencer {
    segments: Vec<Segment>,
    current_segment_index: usize,
    current_variant: VariantTag,
    initial_variant: VariantTag,
}

impl SegmentSequencer {
    pub fn new(segments: Vec<Segment>, initial_variant: VariantTag) -> Self {
        Self {
            segments,
            current_segment_index: 0,
            current_variant: initial_variant,
            initial_variant,
        }
    }

    pub fn segment_started(&mut self) {
        self.current_segment_index += 1;
        debug!("Sequencer advanced to segment {}.", self.current_segment_index);
    }

    pub fn decision_resolved(&mut self, variant: VariantTag) {
        self.current_variant = variant;
    }

    /// Returns to the first segment. Called when the session ends so the
    /// next session starts from the intro.
    pub fn reset(&mut self) {
        self.current_segment_index = 0;
        self.current_variant = self.initial_variant;
    }

    #[inline(always)]
    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    #[inline(always)]
    pub fn current_segment(&self) -> Option<&Segment> {
        self.segments.get(self.current_segment_index)
    }

    #[inline(always)]
    pub fn current_segment_index(&self) -> usize {
        self.current_segment_index
    }

    #[inline(always)]
    pub fn current_variant(&self) -> VariantTag {
        self.current_variant
    }
}
