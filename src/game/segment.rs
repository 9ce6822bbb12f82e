use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::game::chart::Chart;

/// Narrative branch identifier. Closed at authoring time; used both as a
/// variant key and as a decision outcome.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum VariantTag {
    Intro,
    Anthropocene,
    PostHumanBiome,
    Signal,
    Chaos,
    Outro,
}

impl VariantTag {
    pub const ALL: [VariantTag; 6] = [
        VariantTag::Intro,
        VariantTag::Anthropocene,
        VariantTag::PostHumanBiome,
        VariantTag::Signal,
        VariantTag::Chaos,
        VariantTag::Outro,
    ];

    #[inline(always)]
    pub const fn is_terminal(self) -> bool {
        matches!(self, VariantTag::Outro)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intro => "Intro",
            Self::Anthropocene => "Anthropocene",
            Self::PostHumanBiome => "PostHumanBiome",
            Self::Signal => "Signal",
            Self::Chaos => "Chaos",
            Self::Outro => "Outro",
        }
    }
}

/// Audio asset reference. Loading and decoding belong to the audio backend;
/// the core only needs an identifier and the exact clip length.
#[derive(Clone, Debug, PartialEq)]
pub struct SongAsset {
    pub id: String,
    pub length_seconds: f64,
}

/// Time range, relative to the variant's start, during which the player picks
/// the next narrative edge.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DecisionWindow {
    pub start_ms: f64,
    pub end_ms: f64,
}

#[derive(Clone, Debug)]
pub struct Variant {
    pub tag: VariantTag,
    pub song: SongAsset,
    pub chart: Chart,
    pub bpm: f64,
    pub first_beat_offset_ms: f64,
    pub decision_window: Option<DecisionWindow>,
}

impl Variant {
    /// Seconds per beat, falling back to 120 BPM for a non-positive tempo.
    #[inline(always)]
    pub fn sec_per_beat(&self) -> f64 {
        let bpm = if self.bpm.is_finite() && self.bpm > 0.0 {
            self.bpm
        } else {
            120.0
        };
        60.0 / bpm
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub tag: VariantTag,
    pub visual_preset: String,
}

#[derive(Clone, Debug)]
pub struct Segment {
    pub variants: FxHashMap<VariantTag, Variant>,
    pub outcome_a: Outcome,
    pub outcome_b: Outcome,
}

impl Segment {
    #[inline(always)]
    pub fn variant(&self, tag: VariantTag) -> Option<&Variant> {
        self.variants.get(&tag)
    }

    #[inline(always)]
    pub fn outcomes(&self) -> [&Outcome; 2] {
        [&self.outcome_a, &self.outcome_b]
    }

    pub fn both_outcomes_terminal(&self) -> bool {
        self.outcome_a.tag.is_terminal() && self.outcome_b.tag.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sec_per_beat_guards_against_zero_bpm() {
        let mut v = Variant {
            tag: VariantTag::Intro,
            song: SongAsset {
                id: "intro".into(),
                length_seconds: 4.0,
            },
            chart: Chart::default(),
            bpm: 120.0,
            first_beat_offset_ms: 0.0,
            decision_window: None,
        };
        assert!((v.sec_per_beat() - 0.5).abs() < 1e-12);
        v.bpm = 0.0;
        assert!((v.sec_per_beat() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn only_outro_is_terminal() {
        for tag in VariantTag::ALL {
            assert_eq!(tag.is_terminal(), tag == VariantTag::Outro, "{tag:?}");
        }
    }
}
