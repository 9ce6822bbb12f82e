use log::{debug, info, warn};
use rand::prelude::*;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use smallvec::SmallVec;

use crate::core::timer::{TimerHandle, TimerQueue};
use crate::error::CoreError;
use crate::game::events::{Deferred, SegmentStart};
use crate::game::judgment::{Judgment, Resolution, TallyState, Tier, classify_difference_ms};
use crate::game::segment::{Segment, Variant, VariantTag};
use crate::game::timing_stats::{TimingStats, compute_timing_stats};
use crate::game::timing_windows::hit_difference_ms;

/// Coarse classification of the performance inside one decision window.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum PlayStyle {
    /// Long unbroken hit streak.
    Flow,
    /// Long unbroken miss streak.
    Struggle,
    /// Many tight hits.
    Precision,
}

impl PlayStyle {
    pub const ALL: [PlayStyle; 3] = [PlayStyle::Flow, PlayStyle::Struggle, PlayStyle::Precision];

    /// Deterministic part of the classification; `None` when no rule fires.
    pub fn from_tally(tally: &TallyState) -> Option<Self> {
        if tally.hit_combo > 5 {
            Some(PlayStyle::Flow)
        } else if tally.miss_combo > 5 {
            Some(PlayStyle::Struggle)
        } else if tally.perfect_hits > 3 || tally.great_hits > 5 {
            Some(PlayStyle::Precision)
        } else {
            None
        }
    }

    pub fn classify(tally: &TallyState, rng: &mut StdRng) -> Self {
        Self::from_tally(tally)
            .unwrap_or_else(|| Self::ALL[rng.random_range(0..Self::ALL.len())])
    }
}

/// Authored lookup from `(segment index, chosen edge, play style)` to the
/// variant that will actually play. The segment index is the one the
/// decision leads into.
#[derive(Clone, Debug)]
pub struct DecisionMatrix {
    rows: FxHashMap<(usize, VariantTag, PlayStyle), VariantTag>,
    fallback: VariantTag,
}

impl Default for DecisionMatrix {
    fn default() -> Self {
        Self::new(VariantTag::Chaos)
    }
}

impl DecisionMatrix {
    pub fn new(fallback: VariantTag) -> Self {
        Self {
            rows: FxHashMap::default(),
            fallback,
        }
    }

    /// Adds a row; returns the previous target if the key was already listed.
    pub fn insert(
        &mut self,
        segment_index: usize,
        edge: VariantTag,
        style: PlayStyle,
        next: VariantTag,
    ) -> Option<VariantTag> {
        self.rows.insert((segment_index, edge, style), next)
    }

    pub fn lookup(
        &self,
        segment_index: usize,
        edge: VariantTag,
        style: PlayStyle,
    ) -> Result<VariantTag, CoreError> {
        self.rows
            .get(&(segment_index, edge, style))
            .copied()
            .ok_or(CoreError::UnhandledDecisionCombination {
                segment_index,
                edge,
                style,
            })
    }

    /// Like `lookup`, but an unlisted combination resolves to the fallback.
    pub fn resolve(&self, segment_index: usize, edge: VariantTag, style: PlayStyle) -> VariantTag {
        match self.lookup(segment_index, edge, style) {
            Ok(tag) => tag,
            Err(e) => {
                warn!("{e}; falling back to {}.", self.fallback.as_str());
                self.fallback
            }
        }
    }

    #[inline(always)]
    pub fn fallback(&self) -> VariantTag {
        self.fallback
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every combination reachable from the authored segment graph that has
    /// no explicit row. Segment `i`'s decision is keyed by `i + 1`.
    pub fn unlisted_combinations(
        &self,
        segments: &[Segment],
    ) -> Vec<(usize, VariantTag, PlayStyle)> {
        let mut out = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            let has_window = segment
                .variants
                .values()
                .any(|v| v.decision_window.is_some());
            if !has_window || segment.both_outcomes_terminal() {
                continue;
            }
            for outcome in segment.outcomes() {
                for style in PlayStyle::ALL {
                    let key = (i + 1, outcome.tag, style);
                    if !self.rows.contains_key(&key) && !out.contains(&key) {
                        out.push(key);
                    }
                }
            }
        }
        out.sort();
        out
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecisionState {
    Idle,
    WindowOpen,
    DecisionLocked,
}

/// A branch prompt the session must place on a lane.
#[derive(Clone, Debug, PartialEq)]
pub struct PromptSpawn {
    pub lane: usize,
    pub outcome: VariantTag,
    pub visual_preset: String,
    pub travel_ms: f64,
    pub expected_hit_ms: f64,
}

/// Scores the notes of the running segment and turns the player's branch
/// choice, weighted by how they played, into the next narrative variant.
#[derive(Debug)]
pub struct DecisionMaker {
    state: DecisionState,
    tally: TallyState,
    judgments: Vec<Judgment>,
    selected: VariantTag,
    default_variant: VariantTag,
    enter_timer: Option<TimerHandle>,
    exit_timer: Option<TimerHandle>,
    bias_ms: i64,
    prompt_travel_ms: f64,
}

impl DecisionMaker {
    pub fn new(default_variant: VariantTag, bias_ms: i64, prompt_travel_ms: f64) -> Self {
        Self {
            state: DecisionState::Idle,
            tally: TallyState::default(),
            judgments: Vec::new(),
            selected: default_variant,
            default_variant,
            enter_timer: None,
            exit_timer: None,
            bias_ms,
            prompt_travel_ms,
        }
    }

    /// Resets the tally and re-arms the decision window for the segment that
    /// just became audible. Timers left over from the previous segment are
    /// cancelled so they cannot act on stale state.
    pub fn segment_started(
        &mut self,
        start: &SegmentStart,
        variant: &Variant,
        timers: &mut TimerQueue<Deferred>,
    ) {
        self.reset_tally();
        self.cancel_timers(timers);
        self.state = DecisionState::Idle;

        let Some(window) = variant.decision_window else {
            return;
        };
        let segment_index = start.segment_index;
        self.enter_timer = Some(timers.schedule(
            start.start_time + window.start_ms / 1000.0,
            Deferred::WindowEnter { segment_index },
        ));
        self.exit_timer = Some(timers.schedule(
            start.start_time + window.end_ms / 1000.0,
            Deferred::WindowExit { segment_index },
        ));
        debug!(
            "Decision window for segment {} armed: {:.0}ms..{:.0}ms.",
            segment_index, window.start_ms, window.end_ms
        );
    }

    pub fn reset_tally(&mut self) {
        self.tally.reset();
        self.judgments.clear();
    }

    /// Opens the window and returns the two branch prompts to place on lanes
    /// 0 and 1. When both edges lead to the ending there is nothing to choose,
    /// so the terminal edge is locked in directly and no prompt is spawned.
    pub fn window_enter(
        &mut self,
        segment: &Segment,
        song_position_ms: f64,
        lane_count: usize,
    ) -> SmallVec<[PromptSpawn; 2]> {
        self.enter_timer = None;
        let mut prompts = SmallVec::new();
        if segment.both_outcomes_terminal() {
            self.selected = segment.outcome_a.tag;
            self.state = DecisionState::DecisionLocked;
            info!(
                "Both edges are terminal; locking {} without prompts.",
                self.selected.as_str()
            );
            return prompts;
        }
        if lane_count == 0 {
            return prompts;
        }
        for (lane, outcome) in segment.outcomes().into_iter().enumerate() {
            prompts.push(PromptSpawn {
                lane: lane % lane_count,
                outcome: outcome.tag,
                visual_preset: outcome.visual_preset.clone(),
                travel_ms: self.prompt_travel_ms,
                expected_hit_ms: song_position_ms + self.prompt_travel_ms,
            });
        }
        self.state = DecisionState::WindowOpen;
        info!(
            "Decision window open: {} or {}.",
            segment.outcome_a.tag.as_str(),
            segment.outcome_b.tag.as_str()
        );
        prompts
    }

    /// Judges a chart note that has left its lane. Timed-out notes are misses
    /// regardless of the clock.
    pub fn on_note_resolved(
        &mut self,
        expected_hit_ms: f64,
        resolution: Resolution,
        song_position_ms: f64,
    ) -> Judgment {
        let diff = hit_difference_ms(expected_hit_ms, song_position_ms, self.bias_ms);
        let tier = match resolution {
            Resolution::Input => classify_difference_ms(diff),
            Resolution::Timeout => Tier::Miss,
        };
        self.tally.record(tier);
        let judgment = Judgment {
            hit_difference_ms: diff,
            tier,
            resolution,
        };
        self.judgments.push(judgment.clone());
        judgment
    }

    /// Locks the branch for this window at most once. Returns the selected
    /// variant when the choice is accepted.
    pub fn on_decision_chosen(
        &mut self,
        edge: VariantTag,
        segment_index: usize,
        matrix: &DecisionMatrix,
        rng: &mut StdRng,
    ) -> Option<VariantTag> {
        match self.state {
            DecisionState::WindowOpen => {}
            DecisionState::DecisionLocked => {
                debug!("Decision already locked; ignoring {}.", edge.as_str());
                return None;
            }
            DecisionState::Idle => {
                debug!("No decision window open; ignoring {}.", edge.as_str());
                return None;
            }
        }
        let style = PlayStyle::classify(&self.tally, rng);
        self.selected = matrix.resolve(segment_index, edge, style);
        self.state = DecisionState::DecisionLocked;
        info!(
            "Decision locked: edge {} played as {:?} -> {}.",
            edge.as_str(),
            style,
            self.selected.as_str()
        );
        Some(self.selected)
    }

    /// Closes the window. With no explicit choice the previously selected
    /// variant stands.
    pub fn window_exit(&mut self) -> VariantTag {
        self.exit_timer = None;
        if self.state != DecisionState::DecisionLocked {
            info!(
                "Decision window closed without a choice; keeping {}.",
                self.selected.as_str()
            );
        }
        let stats = self.timing_stats();
        debug!(
            "Window tally {:?}; mean {:.1}ms, stddev {:.1}ms over {} hits.",
            self.tally, stats.mean_ms, stats.stddev_ms, stats.count
        );
        self.state = DecisionState::Idle;
        self.selected
    }

    pub fn reset(&mut self, timers: &mut TimerQueue<Deferred>) {
        self.cancel_timers(timers);
        self.reset_tally();
        self.state = DecisionState::Idle;
        self.selected = self.default_variant;
    }

    fn cancel_timers(&mut self, timers: &mut TimerQueue<Deferred>) {
        if let Some(h) = self.enter_timer.take() {
            timers.cancel(h);
        }
        if let Some(h) = self.exit_timer.take() {
            timers.cancel(h);
        }
    }

    #[inline(always)]
    pub fn state(&self) -> DecisionState {
        self.state
    }

    #[inline(always)]
    pub fn tally(&self) -> &TallyState {
        &self.tally
    }

    #[inline(always)]
    pub fn selected(&self) -> VariantTag {
        self.selected
    }

    pub fn timing_stats(&self) -> TimingStats {
        compute_timing_stats(&self.judgments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::conductor::tests::{segment, variant};
    use crate::game::segment::{DecisionWindow, Outcome};

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn windowed(start_ms: f64, end_ms: f64) -> Variant {
        let mut v = variant(VariantTag::Intro, 20.0, 120.0);
        v.decision_window = Some(DecisionWindow { start_ms, end_ms });
        v
    }

    fn start(segment_index: usize, start_time: f64) -> SegmentStart {
        SegmentStart {
            segment_index,
            tag: VariantTag::Intro,
            start_time,
        }
    }

    fn open_maker() -> (DecisionMaker, TimerQueue<Deferred>, Segment) {
        let mut maker = DecisionMaker::new(VariantTag::Anthropocene, 255, 1000.0);
        let mut timers = TimerQueue::new();
        let seg = segment(vec![windowed(1000.0, 3000.0)]);
        maker.segment_started(&start(0, 0.0), &seg.variants[&VariantTag::Intro], &mut timers);
        let prompts = maker.window_enter(&seg, 1000.0, 4);
        assert_eq!(prompts.len(), 2);
        (maker, timers, seg)
    }

    #[test]
    fn play_style_rules_apply_in_order() {
        let mut t = TallyState {
            hit_combo: 6,
            miss_combo: 0,
            perfect_hits: 9,
            ..Default::default()
        };
        assert_eq!(PlayStyle::from_tally(&t), Some(PlayStyle::Flow));
        t.hit_combo = 5;
        assert_eq!(PlayStyle::from_tally(&t), Some(PlayStyle::Precision));
        t.miss_combo = 6;
        assert_eq!(PlayStyle::from_tally(&t), Some(PlayStyle::Struggle));
        let quiet = TallyState {
            perfect_hits: 3,
            great_hits: 5,
            ..Default::default()
        };
        assert_eq!(PlayStyle::from_tally(&quiet), None);
        let mut r = rng();
        for _ in 0..16 {
            assert!(PlayStyle::ALL.contains(&PlayStyle::classify(&quiet, &mut r)));
        }
    }

    #[test]
    fn matrix_falls_back_on_unlisted_combinations() {
        let mut m = DecisionMatrix::new(VariantTag::Chaos);
        m.insert(1, VariantTag::Signal, PlayStyle::Flow, VariantTag::PostHumanBiome);
        assert_eq!(
            m.resolve(1, VariantTag::Signal, PlayStyle::Flow),
            VariantTag::PostHumanBiome
        );
        assert!(matches!(
            m.lookup(1, VariantTag::Signal, PlayStyle::Struggle),
            Err(CoreError::UnhandledDecisionCombination { segment_index: 1, .. })
        ));
        assert_eq!(
            m.resolve(2, VariantTag::Signal, PlayStyle::Flow),
            VariantTag::Chaos
        );
    }

    #[test]
    fn unlisted_combinations_cover_reachable_edges_only() {
        let mut with_window = segment(vec![windowed(0.0, 1.0)]);
        with_window.outcome_a.tag = VariantTag::Signal;
        with_window.outcome_b.tag = VariantTag::Chaos;
        let without_window = segment(vec![variant(VariantTag::Signal, 4.0, 120.0)]);
        let mut m = DecisionMatrix::default();
        for style in PlayStyle::ALL {
            m.insert(1, VariantTag::Signal, style, VariantTag::Signal);
        }
        m.insert(1, VariantTag::Chaos, PlayStyle::Flow, VariantTag::Chaos);
        let missing = m.unlisted_combinations(&[with_window, without_window]);
        assert_eq!(
            missing,
            vec![
                (1, VariantTag::Chaos, PlayStyle::Struggle),
                (1, VariantTag::Chaos, PlayStyle::Precision),
            ]
        );
    }

    #[test]
    fn segment_start_arms_window_timers_relative_to_start() {
        let mut maker = DecisionMaker::new(VariantTag::Anthropocene, 255, 1000.0);
        let mut timers = TimerQueue::new();
        let v = windowed(2000.0, 5000.0);
        maker.segment_started(&start(3, 10.0), &v, &mut timers);

        assert!(timers.pop_due(11.999).is_none());
        assert_eq!(
            timers.pop_due(12.0).map(|(_, d)| d),
            Some(Deferred::WindowEnter { segment_index: 3 })
        );
        assert!(timers.pop_due(14.999).is_none());
        assert_eq!(
            timers.pop_due(15.0).map(|(_, d)| d),
            Some(Deferred::WindowExit { segment_index: 3 })
        );
    }

    #[test]
    fn rearming_cancels_stale_window_timers() {
        let mut maker = DecisionMaker::new(VariantTag::Anthropocene, 255, 1000.0);
        let mut timers = TimerQueue::new();
        maker.segment_started(&start(0, 0.0), &windowed(1000.0, 2000.0), &mut timers);
        assert_eq!(timers.len(), 2);
        maker.segment_started(&start(1, 0.5), &windowed(1000.0, 2000.0), &mut timers);
        assert_eq!(timers.len(), 2, "stale timers must be cancelled");
        let fired: Vec<Deferred> =
            std::iter::from_fn(|| timers.pop_due(100.0).map(|(_, d)| d)).collect();
        assert_eq!(
            fired,
            vec![
                Deferred::WindowEnter { segment_index: 1 },
                Deferred::WindowExit { segment_index: 1 },
            ]
        );

        maker.segment_started(&start(2, 5.0), &variant(VariantTag::Intro, 4.0, 120.0), &mut timers);
        assert!(timers.is_empty(), "variant without window arms nothing");
    }

    #[test]
    fn prompts_target_lanes_zero_and_one() {
        let (maker, _, seg) = open_maker();
        assert_eq!(maker.state(), DecisionState::WindowOpen);
        let mut m = DecisionMaker::new(VariantTag::Anthropocene, 255, 800.0);
        let prompts = m.window_enter(&seg, 500.0, 4);
        assert_eq!(prompts[0].lane, 0);
        assert_eq!(prompts[0].outcome, seg.outcome_a.tag);
        assert_eq!(prompts[1].lane, 1);
        assert_eq!(prompts[1].outcome, seg.outcome_b.tag);
        assert!((prompts[1].expected_hit_ms - 1300.0).abs() < 1e-9);
        assert!((prompts[1].travel_ms - 800.0).abs() < 1e-9);
    }

    #[test]
    fn terminal_edges_lock_without_prompts() {
        let mut maker = DecisionMaker::new(VariantTag::Anthropocene, 255, 1000.0);
        let mut seg = segment(vec![windowed(0.0, 1.0)]);
        let outro = Outcome {
            tag: VariantTag::Outro,
            visual_preset: "end".into(),
        };
        seg.outcome_a = outro.clone();
        seg.outcome_b = outro;
        assert!(maker.window_enter(&seg, 0.0, 4).is_empty());
        assert_eq!(maker.state(), DecisionState::DecisionLocked);
        assert_eq!(maker.window_exit(), VariantTag::Outro);
    }

    #[test]
    fn decision_locks_at_most_once_per_window() {
        let (mut maker, _, _) = open_maker();
        let mut m = DecisionMatrix::new(VariantTag::Chaos);
        for style in PlayStyle::ALL {
            m.insert(1, VariantTag::Anthropocene, style, VariantTag::PostHumanBiome);
            m.insert(1, VariantTag::Signal, style, VariantTag::Signal);
        }
        let mut r = rng();
        assert_eq!(
            maker.on_decision_chosen(VariantTag::Anthropocene, 1, &m, &mut r),
            Some(VariantTag::PostHumanBiome)
        );
        assert_eq!(maker.on_decision_chosen(VariantTag::Signal, 1, &m, &mut r), None);
        assert_eq!(maker.selected(), VariantTag::PostHumanBiome);
        assert_eq!(maker.window_exit(), VariantTag::PostHumanBiome);
        assert_eq!(maker.state(), DecisionState::Idle);
    }

    #[test]
    fn silent_window_keeps_previous_selection() {
        let (mut maker, _, _) = open_maker();
        assert_eq!(maker.window_exit(), VariantTag::Anthropocene);
    }

    #[test]
    fn choice_outside_window_is_ignored() {
        let mut maker = DecisionMaker::new(VariantTag::Signal, 255, 1000.0);
        let m = DecisionMatrix::default();
        assert_eq!(
            maker.on_decision_chosen(VariantTag::Chaos, 1, &m, &mut rng()),
            None
        );
        assert_eq!(maker.selected(), VariantTag::Signal);
    }

    #[test]
    fn flow_tally_drives_matrix_lookup() {
        let (mut maker, _, _) = open_maker();
        // Input arriving exactly at the biased ideal point is perfect.
        for i in 0..6 {
            let expected = 2000.0 + f64::from(i) * 100.0;
            let j = maker.on_note_resolved(expected, Resolution::Input, expected - 255.0);
            assert_eq!(j.tier, Tier::Perfect);
        }
        assert_eq!(maker.tally().hit_combo, 6);
        let mut m = DecisionMatrix::new(VariantTag::Chaos);
        m.insert(1, VariantTag::Signal, PlayStyle::Flow, VariantTag::PostHumanBiome);
        assert_eq!(
            maker.on_decision_chosen(VariantTag::Signal, 1, &m, &mut rng()),
            Some(VariantTag::PostHumanBiome)
        );
    }

    #[test]
    fn timeout_is_always_a_miss() {
        let mut maker = DecisionMaker::new(VariantTag::Signal, 255, 1000.0);
        let j = maker.on_note_resolved(1255.0, Resolution::Timeout, 1000.0);
        assert_eq!(j.hit_difference_ms, 0);
        assert_eq!(j.tier, Tier::Miss);
        assert_eq!(maker.tally().miss_combo, 1);
    }

    #[test]
    fn segment_start_zeroes_tally() {
        let (mut maker, mut timers, seg) = open_maker();
        maker.on_note_resolved(1000.0, Resolution::Input, 745.0);
        assert_eq!(maker.tally().judged(), 1);
        maker.segment_started(&start(1, 4.0), &seg.variants[&VariantTag::Intro], &mut timers);
        assert_eq!(*maker.tally(), TallyState::default());
        assert_eq!(maker.timing_stats().count, 0);
        assert_eq!(maker.state(), DecisionState::Idle);
    }
}
