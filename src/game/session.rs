use log::{debug, info, warn};
use rand::prelude::*;

use crate::core::audio::{AudioBackend, BUFFER_COUNT};
use crate::core::input::{InputEdge, presses};
use crate::core::timer::{TimerHandle, TimerQueue};
use crate::error::CoreError;
use crate::game::conductor::Conductor;
use crate::game::decision::{DecisionMaker, DecisionMatrix, DecisionState};
use crate::game::events::{Deferred, SegmentStart, SessionEvent};
use crate::game::judgment::Resolution;
use crate::game::lane::{InputOutcome, Lane, NoteKind, ResolvedNote};
use crate::game::parsing::content::Content;
use crate::game::segment::VariantTag;
use crate::game::sequencer::SegmentSequencer;
use crate::game::streamer::ChartStreamer;
use crate::game::timing_windows::JUDGE_BIAS_MS;

/// Tuning knobs handed to a session at construction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SessionParams {
    pub lane_count: usize,
    pub lookahead_ms: f64,
    pub lane_traversal_ms: f64,
    /// Fraction of travel a head note must cover before a press can take it.
    pub hit_eligibility: f64,
    pub judge_bias_ms: i64,
    pub decision_travel_ms: f64,
    pub intro_delay_seconds: f64,
    pub seed: u64,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            lane_count: 4,
            lookahead_ms: 1000.0,
            lane_traversal_ms: 1000.0,
            hit_eligibility: 0.5,
            judge_bias_ms: JUDGE_BIAS_MS,
            decision_travel_ms: 1000.0,
            intro_delay_seconds: 2.0,
            seed: 0,
        }
    }
}

/// The process context for one play session. Owns every core component and
/// the timer queue; components never reference each other, the session
/// routes between them.
///
/// Lifecycle: built at session start, `start()` queues the intro, `tick()`
/// runs once per frame, `stop()` tears everything down and rewinds the
/// sequencer so the same session can be started again.
pub struct Session<A: AudioBackend> {
    audio: A,
    params: SessionParams,
    timers: TimerQueue<Deferred>,
    conductor: Conductor,
    streamer: ChartStreamer,
    lanes: Vec<Lane>,
    decision: DecisionMaker,
    sequencer: SegmentSequencer,
    matrix: DecisionMatrix,
    rng: StdRng,
    events: Vec<SessionEvent>,
    intro_timer: Option<TimerHandle>,
    started: bool,
    finished: bool,
    last_tick: Option<f64>,
    log_timer: f64,
}

impl<A: AudioBackend> Session<A> {
    pub fn new(audio: A, content: Content, params: SessionParams) -> Self {
        let lane_count = params.lane_count.max(1);
        Self {
            audio,
            params,
            timers: TimerQueue::new(),
            conductor: Conductor::new(),
            streamer: ChartStreamer::new(params.lookahead_ms, params.lane_traversal_ms),
            lanes: (0..lane_count)
                .map(|i| Lane::new(i, params.hit_eligibility))
                .collect(),
            decision: DecisionMaker::new(
                content.initial_variant,
                params.judge_bias_ms,
                params.decision_travel_ms,
            ),
            sequencer: SegmentSequencer::new(content.segments, content.initial_variant),
            matrix: content.matrix,
            rng: StdRng::seed_from_u64(params.seed),
            events: Vec::new(),
            intro_timer: None,
            started: false,
            finished: false,
            last_tick: None,
            log_timer: 0.0,
        }
    }

    /// Queues the intro segment after the configured lead-in. Calling it on a
    /// running session does nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        let deadline = self.audio.now() + self.params.intro_delay_seconds.max(0.0);
        self.intro_timer = Some(self.timers.schedule(deadline, Deferred::IntroStart));
        self.started = true;
        self.finished = false;
        info!("Session started; intro in {:.2}s.", self.params.intro_delay_seconds);
    }

    /// Cancels all deferred work, silences audio and rewinds to the intro.
    pub fn stop(&mut self) {
        self.conductor.stop(&mut self.audio, &mut self.timers);
        self.decision.reset(&mut self.timers);
        if let Some(h) = self.intro_timer.take() {
            self.timers.cancel(h);
        }
        self.timers.clear();
        self.streamer.clear();
        for lane in &mut self.lanes {
            lane.clear();
        }
        self.sequencer.reset();
        self.started = false;
        self.finished = false;
        self.last_tick = None;
        self.log_timer = 0.0;
        info!("Session stopped.");
    }

    /// Advances the core by one frame and returns what collaborators need to
    /// react to, in the order it happened.
    pub fn tick(&mut self, input: &[InputEdge]) -> Vec<SessionEvent> {
        let now = self.audio.now();

        self.fire_due_timers(now);
        self.conductor.tick(now);

        for edge in presses(input) {
            let Some(lane) = self.lanes.get_mut(edge.lane) else {
                continue;
            };
            match lane.on_input(now) {
                InputOutcome::Resolved(resolved) => self.handle_resolved(resolved),
                InputOutcome::TooEarly => debug!("Lane {} press too early; note kept.", edge.lane),
                InputOutcome::Empty => {}
            }
        }

        let song_position_ms = self.conductor.song_position_ms();
        for spawn in self.streamer.tick(song_position_ms, self.lanes.len()) {
            self.lanes[spawn.lane].spawn_note(
                NoteKind::Chart(spawn.note),
                spawn.travel_ms,
                spawn.expected_hit_ms,
                now,
            );
            self.events.push(SessionEvent::NoteSpawned {
                lane: spawn.lane,
                visual_preset: None,
                travel_ms: spawn.travel_ms,
                expected_hit_ms: spawn.expected_hit_ms,
            });
        }

        for i in 0..self.lanes.len() {
            for resolved in self.lanes[i].tick(now) {
                self.handle_resolved(resolved);
            }
        }

        self.check_finished();
        self.heartbeat(now);
        std::mem::take(&mut self.events)
    }

    fn fire_due_timers(&mut self, now: f64) {
        while let Some((handle, deferred)) = self.timers.pop_due(now) {
            match deferred {
                Deferred::IntroStart => {
                    if self.intro_timer == Some(handle) {
                        self.intro_timer = None;
                    }
                    self.schedule_next(VariantTag::Intro);
                }
                Deferred::SegmentStarted(start) => self.on_segment_started(start, now),
                Deferred::WindowEnter { segment_index } => self.on_window_enter(segment_index),
                Deferred::WindowExit { segment_index } => self.on_window_exit(segment_index),
            }
        }
    }

    fn schedule_next(&mut self, tag: VariantTag) {
        let index = self.sequencer.current_segment_index();
        let Some(segment) = self.sequencer.current_segment() else {
            info!("No segment {index}; content complete.");
            return;
        };
        match self.conductor.schedule_segment(
            &mut self.audio,
            &mut self.timers,
            index,
            segment,
            tag,
        ) {
            Ok(_) => {}
            Err(CoreError::SchedulingBusy) => {
                debug!("Dropped segment {index} ({}): both buffers busy.", tag.as_str());
            }
            Err(e) => warn!("Could not schedule segment {index}: {e}"),
        }
    }

    // Every component observes the new segment before anything is published.
    fn on_segment_started(&mut self, start: SegmentStart, now: f64) {
        let Some(variant) = self
            .sequencer
            .segment(start.segment_index)
            .and_then(|s| s.variant(start.tag))
        else {
            warn!(
                "Segment {} ({}) vanished before it started.",
                start.segment_index,
                start.tag.as_str()
            );
            return;
        };

        let shift_ms = self.conductor.begin_segment(&start, variant, now);
        for lane in &mut self.lanes {
            lane.rebase(shift_ms);
        }
        self.streamer.switch_chart(variant.chart.clone());
        self.decision
            .segment_started(&start, variant, &mut self.timers);
        self.sequencer.segment_started();

        self.events.push(SessionEvent::SegmentStarted(start));
    }

    fn on_window_enter(&mut self, segment_index: usize) {
        // Prompts are stamped against this tick's position, not the last one.
        let now = self.audio.now();
        self.conductor.tick(now);
        let Some(segment) = self.sequencer.segment(segment_index) else {
            return;
        };
        let prompts = self.decision.window_enter(
            segment,
            self.conductor.song_position_ms(),
            self.lanes.len(),
        );
        for prompt in prompts {
            self.lanes[prompt.lane].spawn_note(
                NoteKind::DecisionPrompt {
                    outcome: prompt.outcome,
                    visual_preset: prompt.visual_preset.clone(),
                },
                prompt.travel_ms,
                prompt.expected_hit_ms,
                now,
            );
            self.events.push(SessionEvent::NoteSpawned {
                lane: prompt.lane,
                visual_preset: Some(prompt.visual_preset),
                travel_ms: prompt.travel_ms,
                expected_hit_ms: prompt.expected_hit_ms,
            });
        }
        self.events
            .push(SessionEvent::DecisionWindowEntered { segment_index });
        if self.decision.state() == DecisionState::DecisionLocked {
            let selected = self.decision.selected();
            self.events.push(SessionEvent::DecisionLocked {
                chosen_edge: selected,
                selected,
            });
        }
    }

    fn on_window_exit(&mut self, segment_index: usize) {
        let selected = self.decision.window_exit();
        self.sequencer.decision_resolved(selected);
        info!(
            "Segment {segment_index} resolved to {}; scheduling segment {}.",
            selected.as_str(),
            self.sequencer.current_segment_index()
        );
        self.events.push(SessionEvent::DecisionResolved { selected });
        self.schedule_next(selected);
    }

    fn handle_resolved(&mut self, resolved: ResolvedNote) {
        match resolved.note.kind {
            NoteKind::Chart(_) => {
                let judgment = self.decision.on_note_resolved(
                    resolved.note.expected_hit_ms,
                    resolved.resolution,
                    self.conductor.song_position_ms(),
                );
                debug!(
                    "Lane {}: {:?} ({}ms, {:?}).",
                    resolved.lane, judgment.tier, judgment.hit_difference_ms, judgment.resolution
                );
                self.events.push(SessionEvent::NoteJudged {
                    lane: resolved.lane,
                    tier: judgment.tier,
                    hit_difference_ms: judgment.hit_difference_ms,
                    resolution: judgment.resolution,
                });
            }
            NoteKind::DecisionPrompt { outcome, .. } => {
                if resolved.resolution != Resolution::Input {
                    return;
                }
                let segment_index = self.sequencer.current_segment_index();
                if let Some(selected) = self.decision.on_decision_chosen(
                    outcome,
                    segment_index,
                    &self.matrix,
                    &mut self.rng,
                ) {
                    self.events.push(SessionEvent::DecisionLocked {
                        chosen_edge: outcome,
                        selected,
                    });
                }
            }
        }
    }

    fn check_finished(&mut self) {
        if !self.started || self.finished || self.conductor.segment_start_time().is_none() {
            return;
        }
        let audio_idle = (0..BUFFER_COUNT).all(|b| !self.audio.is_playing(b));
        let lanes_idle = self.lanes.iter().all(Lane::is_empty);
        if audio_idle && lanes_idle && self.timers.is_empty() {
            self.finished = true;
            info!(
                "Session finished after {} segments on {}.",
                self.sequencer.current_segment_index(),
                self.sequencer.current_variant().as_str()
            );
            self.events.push(SessionEvent::Finished);
        }
    }

    fn heartbeat(&mut self, now: f64) {
        let dt = self.last_tick.map_or(0.0, |t| (now - t).max(0.0));
        self.last_tick = Some(now);
        self.log_timer += dt;
        if self.log_timer >= 1.0 {
            let tally = self.decision.tally();
            info!(
                "Beat: {:.2}, Time: {:.0}ms, Combo: {}, Misses: {}, Active Notes: {}",
                self.conductor.song_position_beats(),
                self.conductor.song_position_ms(),
                tally.hit_combo,
                tally.misses,
                self.lanes.iter().map(Lane::len).sum::<usize>()
            );
            self.log_timer -= 1.0;
        }
    }

    #[inline(always)]
    pub fn audio(&self) -> &A {
        &self.audio
    }

    #[inline(always)]
    pub fn audio_mut(&mut self) -> &mut A {
        &mut self.audio
    }

    #[inline(always)]
    pub fn conductor(&self) -> &Conductor {
        &self.conductor
    }

    #[inline(always)]
    pub fn streamer(&self) -> &ChartStreamer {
        &self.streamer
    }

    #[inline(always)]
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    #[inline(always)]
    pub fn decision(&self) -> &DecisionMaker {
        &self.decision
    }

    #[inline(always)]
    pub fn sequencer(&self) -> &SegmentSequencer {
        &self.sequencer
    }

    #[inline(always)]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    #[inline(always)]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[inline(always)]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::VirtualAudio;
    use crate::game::chart::{Chart, NoteEvent};
    use crate::game::conductor::tests::{segment, variant};
    use crate::game::decision::PlayStyle;
    use crate::game::judgment::{TallyState, Tier};
    use crate::game::segment::DecisionWindow;

    const DT: f64 = 1.0 / 240.0;

    fn content() -> Content {
        let mut intro = variant(VariantTag::Intro, 4.0, 120.0);
        intro.chart = Chart::new(vec![NoteEvent::tap(2, 500.0), NoteEvent::tap(3, 1500.0)])
            .expect("sorted chart");
        intro.decision_window = Some(DecisionWindow {
            start_ms: 1000.0,
            end_ms: 3000.0,
        });
        let mut second = segment(vec![
            variant(VariantTag::Anthropocene, 2.0, 100.0),
            variant(VariantTag::Signal, 2.0, 140.0),
        ]);
        second.outcome_a.tag = VariantTag::Outro;
        second.outcome_b.tag = VariantTag::Outro;

        let mut matrix = DecisionMatrix::new(VariantTag::Chaos);
        for style in PlayStyle::ALL {
            matrix.insert(1, VariantTag::Anthropocene, style, VariantTag::Signal);
        }
        Content {
            segments: vec![segment(vec![intro]), second],
            matrix,
            initial_variant: VariantTag::Anthropocene,
        }
    }

    fn session(content: Content) -> Session<VirtualAudio> {
        let params = SessionParams {
            intro_delay_seconds: 1.0,
            ..SessionParams::default()
        };
        let mut s = Session::new(VirtualAudio::new(), content, params);
        s.start();
        s
    }

    fn step(s: &mut Session<VirtualAudio>, input: &[InputEdge]) -> Vec<SessionEvent> {
        s.audio_mut().advance(DT);
        s.tick(input)
    }

    fn run_until(s: &mut Session<VirtualAudio>, t: f64, log: &mut Vec<SessionEvent>) {
        while s.audio().now() < t {
            log.extend(step(s, &[]));
        }
    }

    fn press(s: &mut Session<VirtualAudio>, lane: usize, log: &mut Vec<SessionEvent>) {
        let edge = InputEdge {
            lane,
            pressed: true,
            timestamp: s.audio().now() + DT,
        };
        log.extend(step(s, &[edge]));
    }

    fn starts(log: &[SessionEvent]) -> Vec<SegmentStart> {
        log.iter()
            .filter_map(|e| match e {
                SessionEvent::SegmentStarted(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn window_without_choice_keeps_the_default_variant() {
        let mut s = session(content());
        let mut log = Vec::new();
        run_until(&mut s, 8.0, &mut log);

        assert!(log.contains(&SessionEvent::DecisionWindowEntered { segment_index: 0 }));
        assert!(
            !log.iter()
                .any(|e| matches!(e, SessionEvent::DecisionLocked { .. }))
        );
        assert!(log.contains(&SessionEvent::DecisionResolved {
            selected: VariantTag::Anthropocene
        }));

        let started = starts(&log);
        assert_eq!(started.len(), 2);
        assert_eq!((started[0].segment_index, started[0].tag), (0, VariantTag::Intro));
        assert_eq!(
            (started[1].segment_index, started[1].tag),
            (1, VariantTag::Anthropocene)
        );
        assert!((started[1].start_time - started[0].start_time - 4.0).abs() < 1e-9);

        let misses = log
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    SessionEvent::NoteJudged {
                        tier: Tier::Miss,
                        resolution: Resolution::Timeout,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(misses, 2);
        assert_eq!(
            log.iter().filter(|e| **e == SessionEvent::Finished).count(),
            1
        );
        assert!(s.is_finished());
    }

    #[test]
    fn prompt_press_routes_through_the_matrix() {
        let mut s = session(content());
        let mut log = Vec::new();
        run_until(&mut s, 2.6, &mut log);
        assert_eq!(s.decision().state(), DecisionState::WindowOpen);

        press(&mut s, 0, &mut log);
        assert!(log.contains(&SessionEvent::DecisionLocked {
            chosen_edge: VariantTag::Anthropocene,
            selected: VariantTag::Signal
        }));

        // A second prompt press in the same window is ignored.
        let before = log.len();
        press(&mut s, 1, &mut log);
        assert!(
            !log[before..]
                .iter()
                .any(|e| matches!(e, SessionEvent::DecisionLocked { .. }))
        );

        run_until(&mut s, 6.0, &mut log);
        assert!(log.contains(&SessionEvent::DecisionResolved {
            selected: VariantTag::Signal
        }));
        assert_eq!(starts(&log)[1].tag, VariantTag::Signal);
        assert_eq!(s.sequencer().current_variant(), VariantTag::Signal);
    }

    #[test]
    fn timely_press_on_a_chart_note_is_judged() {
        let mut s = session(content());
        let mut log = Vec::new();
        // First note spawns at the intro start, stamped one lookahead ahead.
        run_until(&mut s, 1.75, &mut log);
        press(&mut s, 2, &mut log);

        let judged = log.iter().find_map(|e| match e {
            SessionEvent::NoteJudged {
                lane: 2,
                tier,
                resolution: Resolution::Input,
                ..
            } => Some(*tier),
            _ => None,
        });
        assert_eq!(judged, Some(Tier::Perfect));
        assert_eq!(s.decision().tally().perfect_hits, 1);
        assert_eq!(s.decision().tally().hit_combo, 1);
    }

    #[test]
    fn early_press_leaves_the_note_in_flight() {
        let mut s = session(content());
        let mut log = Vec::new();
        run_until(&mut s, 1.2, &mut log);
        press(&mut s, 2, &mut log);
        assert_eq!(s.lanes()[2].len(), 1);
        assert!(
            !log.iter()
                .any(|e| matches!(e, SessionEvent::NoteJudged { .. }))
        );
    }

    #[test]
    fn terminal_edges_lock_without_prompts() {
        let mut intro = variant(VariantTag::Intro, 2.0, 120.0);
        intro.decision_window = Some(DecisionWindow {
            start_ms: 500.0,
            end_ms: 1500.0,
        });
        let mut first = segment(vec![intro]);
        first.outcome_a.tag = VariantTag::Outro;
        first.outcome_b.tag = VariantTag::Outro;
        let outro = segment(vec![variant(VariantTag::Outro, 1.0, 120.0)]);
        let mut s = session(Content {
            segments: vec![first, outro],
            matrix: DecisionMatrix::default(),
            initial_variant: VariantTag::Anthropocene,
        });

        let mut log = Vec::new();
        run_until(&mut s, 5.0, &mut log);
        assert!(
            !log.iter()
                .any(|e| matches!(e, SessionEvent::NoteSpawned { visual_preset: Some(_), .. }))
        );
        assert!(log.contains(&SessionEvent::DecisionLocked {
            chosen_edge: VariantTag::Outro,
            selected: VariantTag::Outro
        }));
        let started = starts(&log);
        assert_eq!(started.last().map(|s| s.tag), Some(VariantTag::Outro));
        assert!(log.contains(&SessionEvent::Finished));
    }

    #[test]
    fn stop_cancels_everything_and_allows_restart() {
        let mut s = session(content());
        let mut log = Vec::new();
        run_until(&mut s, 2.2, &mut log);
        assert!(s.pending_timers() > 0);

        s.stop();
        assert_eq!(s.pending_timers(), 0);
        assert!(s.lanes().iter().all(Lane::is_empty));
        assert_eq!(s.sequencer().current_segment_index(), 0);
        assert!(!s.is_started());

        log.clear();
        s.start();
        run_until(&mut s, 4.0, &mut log);
        let started = starts(&log);
        assert_eq!(started.first().map(|s| s.segment_index), Some(0));
    }

    #[test]
    fn nothing_happens_before_start() {
        let mut s = Session::new(VirtualAudio::new(), content(), SessionParams::default());
        let mut log = Vec::new();
        run_until(&mut s, 3.0, &mut log);
        assert!(log.is_empty());
        assert!(!s.is_finished());
    }

    #[test]
    fn segment_start_is_observed_by_every_component_in_the_same_tick() {
        let mut s = session(content());
        let mut log = Vec::new();
        let start = loop {
            assert!(s.audio().now() < 8.0, "second segment never started");
            let events = step(&mut s, &[]);
            let second = starts(&events).into_iter().find(|st| st.segment_index == 1);
            log.extend(events);
            if let Some(start) = second {
                break start;
            }
        };

        assert_eq!(s.conductor().segment_start_time(), Some(start.start_time));
        assert_eq!(s.streamer().cursor(), 0);
        assert_eq!(s.decision().tally(), &TallyState::default());
        assert_eq!(s.decision().state(), DecisionState::Idle);
        assert_eq!(s.sequencer().current_segment_index(), start.segment_index + 1);
        assert!(log.contains(&SessionEvent::DecisionResolved {
            selected: VariantTag::Anthropocene
        }));
    }

    #[test]
    fn prompts_are_stamped_against_the_current_tick_position() {
        let mut s = session(content());
        let prompts = loop {
            assert!(s.audio().now() < 4.0, "decision window never opened");
            let prompts: Vec<f64> = step(&mut s, &[])
                .into_iter()
                .filter_map(|e| match e {
                    SessionEvent::NoteSpawned {
                        visual_preset: Some(_),
                        expected_hit_ms,
                        ..
                    } => Some(expected_hit_ms),
                    _ => None,
                })
                .collect();
            if !prompts.is_empty() {
                break prompts;
            }
        };

        let expected = s.conductor().song_position_ms() + 1000.0;
        assert_eq!(prompts.len(), 2);
        for hit in prompts {
            assert!((hit - expected).abs() < 1e-9, "{hit} vs {expected}");
        }
    }
}
