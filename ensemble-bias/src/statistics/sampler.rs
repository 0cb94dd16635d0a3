use crate::error::BiasError;

/// Snapshot of the sampling-window clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowTimers {
    pub window_start_time: f64,
    pub next_sample_time: f64,
    pub next_window_update_time: f64,
    pub current_sample_count: usize,
}

/// Collects one distance every `sample_period` into a fixed-size window.
///
/// The window closes when simulation time reaches
/// `window_start_time + n_samples * sample_period`, independently of how many
/// samples were actually taken; [`finish_window`](Self::finish_window) then
/// insists that exactly `n_samples` were recorded.
///
/// Times come from the host and are compared against thresholds derived from
/// `sample_period` alone, so a host calling at irregular intervals sees
/// windows fire whenever the threshold is crossed.
pub struct WindowSampler {
    n_samples: usize,
    sample_period: f64,
    /// Distances recorded in the current window.
    samples: Vec<f64>,
    window_start_time: f64,
    next_sample_time: f64,
    next_window_update_time: f64,
}

impl WindowSampler {
    pub fn new(n_samples: usize, sample_period: f64) -> Self {
        // The first sample lands one period in; the host's own timestep is
        // not known here, so there is no attempt to sample at t = 0.
        Self {
            n_samples,
            sample_period,
            samples: Vec::with_capacity(n_samples),
            window_start_time: 0.0,
            next_sample_time: sample_period,
            next_window_update_time: n_samples as f64 * sample_period,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn sample_period(&self) -> f64 {
        self.sample_period
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn timers(&self) -> WindowTimers {
        WindowTimers {
            window_start_time: self.window_start_time,
            next_sample_time: self.next_sample_time,
            next_window_update_time: self.next_window_update_time,
            current_sample_count: self.samples.len(),
        }
    }

    /// Store `distance` if a sample is due at time `t`. Returns whether it was stored.
    pub fn record(&mut self, distance: f64, t: f64) -> Result<bool, BiasError> {
        if t < self.next_sample_time {
            return Ok(false);
        }
        if self.samples.len() == self.n_samples {
            return Err(BiasError::calling_contract(format!(
                "sample due at t = {t} but the window of {} samples is already full \
                 (window update was due at t = {})",
                self.n_samples, self.next_window_update_time
            )));
        }

        self.samples.push(distance);
        self.next_sample_time =
            (self.samples.len() + 1) as f64 * self.sample_period + self.window_start_time;
        log::trace!(
            "sample {}/{} at t = {t}: R = {distance}",
            self.samples.len(),
            self.n_samples
        );
        Ok(true)
    }

    pub fn window_elapsed(&self, t: f64) -> bool {
        t >= self.next_window_update_time
    }

    /// The completed window's samples.
    ///
    /// Errors if the window closed with a sample count other than `n_samples`,
    /// which means the host did not call often enough (or called with a
    /// stalled clock).
    pub fn finish_window(&self) -> Result<&[f64], BiasError> {
        if self.samples.len() != self.n_samples {
            return Err(BiasError::calling_contract(format!(
                "window closing at t = {} holds {} samples, expected {}",
                self.next_window_update_time,
                self.samples.len(),
                self.n_samples
            )));
        }
        Ok(&self.samples)
    }

    /// Start a new window at time `t`.
    pub fn reset(&mut self, t: f64) {
        self.samples.clear();
        self.window_start_time = t;
        self.next_window_update_time = self.n_samples as f64 * self.sample_period + t;
        self.next_sample_time = t + self.sample_period;
    }
}
