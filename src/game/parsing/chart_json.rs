use std::fs;
use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::error::CoreError;
use crate::game::chart::{Chart, NoteEvent};

// On-disk chart layout:
// { "notes": [ { "lane": 0.0, "songPosition": 44218, "isHold": false, "holdLength": 0 }, ... ] }

#[derive(Deserialize)]
struct RawChart {
    notes: Vec<RawNote>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNote {
    lane: f64,
    song_position: f64,
    #[serde(default)]
    is_hold: bool,
    #[serde(default)]
    hold_length: f64,
}

impl TryFrom<RawNote> for NoteEvent {
    type Error = CoreError;

    fn try_from(raw: RawNote) -> Result<Self, Self::Error> {
        if !raw.lane.is_finite() || raw.lane < 0.0 {
            return Err(CoreError::InvalidContent(format!(
                "note lane {} is not a column index",
                raw.lane
            )));
        }
        Ok(Self {
            lane: raw.lane.trunc() as usize,
            target_time_ms: raw.song_position,
            is_hold: raw.is_hold,
            hold_length_ms: raw.hold_length.max(0.0),
        })
    }
}

pub fn parse_chart(json: &str) -> Result<Chart, CoreError> {
    let raw: RawChart = serde_json::from_str(json)?;
    let notes = raw
        .notes
        .into_iter()
        .map(NoteEvent::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Chart::new(notes)
}

pub fn load_chart(path: &Path) -> Result<Chart, CoreError> {
    let text = fs::read_to_string(path)?;
    let chart = parse_chart(&text).map_err(|e| match e {
        CoreError::InvalidContent(msg) => {
            CoreError::InvalidContent(format!("{}: {msg}", path.display()))
        }
        other => other,
    })?;
    info!(
        "Loaded chart '{}' ({} notes, {:.1}s).",
        path.display(),
        chart.len(),
        chart.last_second()
    );
    Ok(chart)
}
