use crate::game::timing_windows::effective_windows_ms;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Perfect,
    Great,
    Good,
    Miss,
}

impl Tier {
    #[inline(always)]
    pub const fn is_hit(self) -> bool {
        !matches!(self, Tier::Miss)
    }
}

/// How a lane note left its queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Input,
    Timeout,
}

#[derive(Clone, Debug)]
pub struct Judgment {
    pub hit_difference_ms: i64,
    pub tier: Tier,
    pub resolution: Resolution,
}

/// Classify a bias-corrected hit difference. Each boundary value belongs to
/// the tighter tier, on both the early and the late side.
#[inline(always)]
pub fn classify_difference_ms(hit_difference_ms: i64) -> Tier {
    let [perfect, great, good] = effective_windows_ms();
    let abs = hit_difference_ms.abs();
    if abs <= perfect {
        Tier::Perfect
    } else if abs <= great {
        Tier::Great
    } else if abs <= good {
        Tier::Good
    } else {
        Tier::Miss
    }
}

/// Per-decision-window counters. Zeroed whenever a window is (re)armed and
/// never carried from one window into the next.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TallyState {
    pub perfect_hits: u32,
    pub great_hits: u32,
    pub good_hits: u32,
    pub misses: u32,
    pub hit_combo: u32,
    pub miss_combo: u32,
}

impl TallyState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record(&mut self, tier: Tier) {
        match tier {
            Tier::Perfect => self.perfect_hits = self.perfect_hits.saturating_add(1),
            Tier::Great => self.great_hits = self.great_hits.saturating_add(1),
            Tier::Good => self.good_hits = self.good_hits.saturating_add(1),
            Tier::Miss => self.misses = self.misses.saturating_add(1),
        }
        if tier.is_hit() {
            self.hit_combo = self.hit_combo.saturating_add(1);
            self.miss_combo = 0;
        } else {
            self.miss_combo = self.miss_combo.saturating_add(1);
            self.hit_combo = 0;
        }
    }

    #[inline(always)]
    pub const fn judged(&self) -> u32 {
        self.perfect_hits + self.great_hits + self.good_hits + self.misses
    }
}
