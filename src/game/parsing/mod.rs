pub mod chart_json;
pub mod content;
