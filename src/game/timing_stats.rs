use crate::game::judgment::{Judgment, Tier};

/// Offset summary over the hits of one decision window. Misses carry no
/// meaningful offset and are left out.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TimingStats {
    pub mean_abs_ms: f32,
    pub mean_ms: f32,
    pub stddev_ms: f32,
    pub max_abs_ms: f32,
    pub count: usize,
}

#[inline(always)]
fn hit_offsets(judgments: &[Judgment]) -> impl Iterator<Item = f32> + '_ {
    judgments
        .iter()
        .filter(|j| j.tier != Tier::Miss)
        .map(|j| j.hit_difference_ms as f32)
}

pub fn compute_timing_stats(judgments: &[Judgment]) -> TimingStats {
    let (count, sum, sum_abs, max_abs) = hit_offsets(judgments).fold(
        (0usize, 0.0_f32, 0.0_f32, 0.0_f32),
        |(n, s, sa, m), e| (n + 1, s + e, sa + e.abs(), m.max(e.abs())),
    );
    if count == 0 {
        return TimingStats::default();
    }

    let n = count as f32;
    let mean_ms = sum / n;
    // Sample deviation; a single hit has none.
    let stddev_ms = if count > 1 {
        let sq: f32 = hit_offsets(judgments).map(|e| (e - mean_ms).powi(2)).sum();
        (sq / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    TimingStats {
        mean_abs_ms: sum_abs / n,
        mean_ms,
        stddev_ms,
        max_abs_ms: max_abs,
        count,
    }
}
