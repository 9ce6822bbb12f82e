pub mod chart;
pub mod conductor;
pub mod decision;
pub mod events;
pub mod judgment;
pub mod lane;
pub mod parsing;
pub mod segment;
pub mod sequencer;
pub mod session;
pub mod streamer;
pub mod timing_stats;
pub mod timing_windows;
