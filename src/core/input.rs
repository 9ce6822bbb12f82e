use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputEdge {
    pub lane: usize,
    pub pressed: bool,
    /// Device-clock time at which the edge was observed.
    pub timestamp: f64,
}

/// Turns per-tick held-key state into press/release edges. The core only
/// reacts to press edges; releases are reported for completeness.
#[derive(Clone, Debug)]
pub struct EdgeDetector {
    prev: Vec<bool>,
}

impl EdgeDetector {
    pub fn new(lane_count: usize) -> Self {
        Self {
            prev: vec![false; lane_count],
        }
    }

    pub fn update(&mut self, held: &[bool], now: f64) -> SmallVec<[InputEdge; 8]> {
        let mut edges = SmallVec::new();
        for (lane, (was_down, now_down)) in self.prev.iter_mut().zip(held).enumerate() {
            if *was_down != *now_down {
                edges.push(InputEdge {
                    lane,
                    pressed: *now_down,
                    timestamp: now,
                });
                *was_down = *now_down;
            }
        }
        edges
    }

    pub fn reset(&mut self) {
        self.prev.fill(false);
    }
}

#[inline(always)]
pub fn presses(edges: &[InputEdge]) -> impl Iterator<Item = &InputEdge> {
    edges.iter().filter(|e| e.pressed)
}
