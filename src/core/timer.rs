//! One-shot deferred callbacks keyed on device-clock deadlines.
//!
//! Timers fire from the session tick, never from another thread. A handle
//! can be cancelled at any time before it fires; cancelling a handle that has
//! already fired or been cancelled is a no-op.

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug)]
struct Pending<T> {
    id: u64,
    deadline: f64,
    payload: T,
}

#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    pending: Vec<Pending<T>>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: Vec::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: f64, payload: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push(Pending {
            id,
            deadline,
            payload,
        });
        TimerHandle(id)
    }

    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.pending.iter().position(|p| p.id == handle.0) {
            Some(idx) => {
                self.pending.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    #[inline(always)]
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.iter().any(|p| p.id == handle.0)
    }

    /// Removes and returns the earliest timer whose deadline is at or before
    /// `now`. Equal deadlines fire in scheduling order.
    pub fn pop_due(&mut self, now: f64) -> Option<(TimerHandle, T)> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.deadline <= now)
            .min_by(|(_, a), (_, b)| {
                a.deadline
                    .total_cmp(&b.deadline)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|(idx, _)| idx)?;
        let fired = self.pending.swap_remove(idx);
        Some((TimerHandle(fired.id), fired.payload))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
