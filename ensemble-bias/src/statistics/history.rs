/// Fixed-capacity ring of per-window histograms.
///
/// Holds at most `capacity` grids of `n_bins` values each. Once full, every
/// [`push`](Self::push) overwrites the oldest slot. Iteration runs oldest to
/// newest.
///
/// ```text
///   slots: [w3, w1, w2]   cursor: 1  (next write overwrites w1)
///   iter  => w1, w2, w3
/// ```
#[derive(Debug, Clone)]
pub struct WindowHistory {
    n_bins: usize,
    capacity: usize,
    /// Grows to `capacity`, then slots are reused in place.
    slots: Vec<Vec<f64>>,
    /// Next slot to write once full.
    cursor: usize,
}

impl WindowHistory {
    pub fn new(capacity: usize, n_bins: usize) -> Self {
        Self {
            n_bins,
            capacity,
            slots: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// Append a window, returning the evicted oldest window if the ring was full.
    ///
    /// With zero capacity nothing is stored and `histogram` comes straight back.
    pub fn push(&mut self, histogram: Vec<f64>) -> Option<Vec<f64>> {
        debug_assert_eq!(histogram.len(), self.n_bins);
        if self.capacity == 0 {
            return Some(histogram);
        }
        let evicted = if self.is_full() {
            Some(std::mem::replace(&mut self.slots[self.cursor], histogram))
        } else {
            self.slots.push(histogram);
            None
        };
        self.cursor = (self.cursor + 1) % self.capacity;
        evicted
    }

    /// Windows from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &[f64]> + '_ {
        let len = self.slots.len();
        let start = if self.is_full() { self.cursor } else { 0 };
        (0..len).map(move |k| self.slots[(start + k) % len].as_slice())
    }

    pub fn oldest(&self) -> Option<&[f64]> {
        self.iter().next()
    }

    pub fn newest(&self) -> Option<&[f64]> {
        self.iter().last()
    }

    /// Per-bin mean of `window[i] - reference[i]` over every stored window.
    ///
    /// `out` is cleared first, so the result depends only on the current
    /// contents. An empty history gives all zeros.
    pub fn average_difference(&self, reference: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        if self.is_empty() {
            return;
        }
        let n = self.len() as f64;
        for window in self.iter() {
            for ((o, &w), &e) in out.iter_mut().zip(window).zip(reference) {
                *o += (w - e) / n;
            }
        }
    }
}
