use std::fs;
use std::path::Path;

use log::{info, warn};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::CoreError;
use crate::game::chart::Chart;
use crate::game::decision::{DecisionMatrix, PlayStyle};
use crate::game::parsing::chart_json::load_chart;
use crate::game::segment::{DecisionWindow, Outcome, Segment, SongAsset, Variant, VariantTag};

/// Everything a session needs that is authored ahead of time.
#[derive(Clone, Debug)]
pub struct Content {
    pub segments: Vec<Segment>,
    pub matrix: DecisionMatrix,
    pub initial_variant: VariantTag,
}

// --- SERIALIZABLE MIRROR STRUCTS ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContent {
    #[serde(default = "default_initial_variant")]
    initial_variant: VariantTag,
    #[serde(default = "default_fallback")]
    fallback: VariantTag,
    segments: Vec<RawSegment>,
    #[serde(default)]
    decision_matrix: Vec<RawMatrixRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSegment {
    variants: Vec<RawVariant>,
    outcome_a: RawOutcome,
    outcome_b: RawOutcome,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVariant {
    tag: VariantTag,
    song: String,
    length_seconds: f64,
    chart: String,
    bpm: f64,
    #[serde(default)]
    first_beat_offset_ms: f64,
    #[serde(default)]
    decision_window: Option<RawWindow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWindow {
    start_ms: f64,
    end_ms: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutcome {
    tag: VariantTag,
    #[serde(default)]
    visual_preset: String,
}

#[derive(Deserialize)]
struct RawMatrixRow {
    segment: usize,
    edge: VariantTag,
    style: PlayStyle,
    next: VariantTag,
}

const fn default_initial_variant() -> VariantTag {
    VariantTag::Anthropocene
}

const fn default_fallback() -> VariantTag {
    VariantTag::Chaos
}

fn invalid(msg: String) -> CoreError {
    CoreError::InvalidContent(msg)
}

fn build_variant<F>(seg_idx: usize, raw: RawVariant, resolve_chart: &mut F) -> Result<Variant, CoreError>
where
    F: FnMut(&str) -> Result<Chart, CoreError>,
{
    let name = raw.tag.as_str();
    if !raw.bpm.is_finite() || raw.bpm <= 0.0 {
        return Err(invalid(format!("segment {seg_idx} {name}: bpm {} must be positive", raw.bpm)));
    }
    if !raw.length_seconds.is_finite() || raw.length_seconds <= 0.0 {
        return Err(invalid(format!(
            "segment {seg_idx} {name}: song length {} must be positive",
            raw.length_seconds
        )));
    }
    let decision_window = match raw.decision_window {
        Some(w) if !(0.0..=w.end_ms).contains(&w.start_ms) => {
            return Err(invalid(format!(
                "segment {seg_idx} {name}: decision window {}..{} is inverted or negative",
                w.start_ms, w.end_ms
            )));
        }
        Some(w) => {
            if w.end_ms > raw.length_seconds * 1000.0 {
                warn!(
                    "Segment {seg_idx} {name}: decision window ends after the song ({}ms > {}ms).",
                    w.end_ms,
                    raw.length_seconds * 1000.0
                );
            }
            Some(DecisionWindow {
                start_ms: w.start_ms,
                end_ms: w.end_ms,
            })
        }
        None => None,
    };
    Ok(Variant {
        tag: raw.tag,
        song: SongAsset {
            id: raw.song,
            length_seconds: raw.length_seconds,
        },
        chart: resolve_chart(&raw.chart)?,
        bpm: raw.bpm,
        first_beat_offset_ms: raw.first_beat_offset_ms,
        decision_window,
    })
}

/// Parses a content description. `resolve_chart` maps each variant's chart
/// reference to a loaded chart.
pub fn parse_content<F>(json: &str, mut resolve_chart: F) -> Result<Content, CoreError>
where
    F: FnMut(&str) -> Result<Chart, CoreError>,
{
    let raw: RawContent = serde_json::from_str(json)?;
    if raw.segments.is_empty() {
        return Err(invalid("content has no segments".to_string()));
    }

    let mut segments = Vec::with_capacity(raw.segments.len());
    for (seg_idx, raw_seg) in raw.segments.into_iter().enumerate() {
        let mut variants = FxHashMap::default();
        for raw_variant in raw_seg.variants {
            let tag = raw_variant.tag;
            let variant = build_variant(seg_idx, raw_variant, &mut resolve_chart)?;
            if variants.insert(tag, variant).is_some() {
                return Err(invalid(format!(
                    "segment {seg_idx} lists {} more than once",
                    tag.as_str()
                )));
            }
        }
        segments.push(Segment {
            variants,
            outcome_a: Outcome {
                tag: raw_seg.outcome_a.tag,
                visual_preset: raw_seg.outcome_a.visual_preset,
            },
            outcome_b: Outcome {
                tag: raw_seg.outcome_b.tag,
                visual_preset: raw_seg.outcome_b.visual_preset,
            },
        });
    }

    if segments[0].variant(VariantTag::Intro).is_none() {
        return Err(CoreError::ConfigurationMissing(
            "first segment has no Intro variant".to_string(),
        ));
    }

    let mut matrix = DecisionMatrix::new(raw.fallback);
    for row in raw.decision_matrix {
        if matrix
            .insert(row.segment, row.edge, row.style, row.next)
            .is_some()
        {
            return Err(invalid(format!(
                "decision matrix lists segment {} / {} / {:?} twice",
                row.segment,
                row.edge.as_str(),
                row.style
            )));
        }
    }

    let content = Content {
        segments,
        matrix,
        initial_variant: raw.initial_variant,
    };
    audit_matrix(&content);
    Ok(content)
}

/// Logs every reachable decision combination the matrix does not list, so
/// authors can see where the fallback will be used. Returns how many.
pub fn audit_matrix(content: &Content) -> usize {
    let unlisted = content.matrix.unlisted_combinations(&content.segments);
    for (segment_index, edge, style) in &unlisted {
        warn!(
            "Decision matrix has no row for segment {segment_index}, edge {}, style {style:?}; {} will be used.",
            edge.as_str(),
            content.matrix.fallback().as_str()
        );
    }
    unlisted.len()
}

/// Loads a content file; chart references are resolved relative to it and
/// each chart file is read once even when several variants share it.
pub fn load_content(path: &Path) -> Result<Content, CoreError> {
    let text = fs::read_to_string(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut cache: FxHashMap<String, Chart> = FxHashMap::default();
    let content = parse_content(&text, |reference| {
        if let Some(chart) = cache.get(reference) {
            return Ok(chart.clone());
        }
        let chart = load_chart(&base.join(reference))?;
        cache.insert(reference.to_string(), chart.clone());
        Ok(chart)
    })?;
    info!(
        "Loaded content '{}' ({} segments, {} matrix rows).",
        path.display(),
        content.segments.len(),
        content.matrix.len()
    );
    Ok(content)
}
