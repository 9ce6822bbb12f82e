use crate::game::decision::PlayStyle;
use crate::game::segment::VariantTag;

/// Errors raised by the core and its content loaders.
///
/// Nothing here crosses the per-tick boundary: the session degrades
/// scheduling and lookup failures to no-ops or defaults and only logs them.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),
    #[error("both playback buffers are busy")]
    SchedulingBusy,
    #[error("chart has no notes")]
    EmptyChart,
    #[error("chart cursor is exhausted")]
    CursorExhausted,
    #[error("no decision for segment {segment_index}, edge {edge:?}, style {style:?}")]
    UnhandledDecisionCombination {
        segment_index: usize,
        edge: VariantTag,
        style: PlayStyle,
    },
    #[error("invalid content: {0}")]
    InvalidContent(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
