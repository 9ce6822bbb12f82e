// Shared judgment window definitions to keep the tally and debug views in sync.

// All windows are in milliseconds and symmetric around zero.
pub const WINDOW_PERFECT_MS: i64 = 75;
pub const WINDOW_GREAT_MS: i64 = 150;
pub const WINDOW_GOOD_MS: i64 = 250;

// Fixed latency between the expected-hit stamp taken at spawn and the moment
// the note visually reaches the judge point.
pub const JUDGE_BIAS_MS: i64 = 255;

#[inline(always)]
pub const fn effective_windows_ms() -> [i64; 3] {
    [WINDOW_PERFECT_MS, WINDOW_GREAT_MS, WINDOW_GOOD_MS]
}

/// Signed distance between the expected hit stamp and the current song
/// position, corrected by the judge bias. Negative means the input came in
/// after the ideal point.
#[inline(always)]
pub fn hit_difference_ms(expected_hit_ms: f64, song_position_ms: f64, bias_ms: i64) -> i64 {
    (expected_hit_ms - song_position_ms).floor() as i64 - bias_ms
}
