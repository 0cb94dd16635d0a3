use std::f64::consts::PI;

use nalgebra::Vector3;
use validator::Validate;

use super::{BiasPotential, PotentialPointData};
use crate::blur::BlurToGrid;
use crate::config::EnsembleParams;
use crate::ensemble::EnsembleResources;
use crate::error::BiasError;
use crate::statistics::{WindowHistory, WindowSampler, WindowTimers};

/// Pair bias driving the sampled distance distribution toward an
/// experimental one.
///
/// Distances are sampled every `sample_period`. Each window of `n_samples`
/// samples is blurred onto the grid, summed over the ensemble, and kept in a
/// history of the last `n_windows` windows. The working histogram is the
/// average of `window - experimental` over that history; between rollovers
/// the force is the analytic gradient of the Gaussian-smoothed working
/// histogram at the current distance. Outside `[min_dist, max_dist]` a
/// harmonic wall takes over.
///
/// The force always uses the last finished working histogram, so it lags
/// the trajectory by up to one window.
pub struct EnsembleHarmonic {
    bin_width: f64,
    min_dist: f64,
    max_dist: f64,
    k: f64,
    sigma: f64,
    experimental: Vec<f64>,
    /// Working histogram, `n_bins` long.
    histogram: Vec<f64>,
    sampler: WindowSampler,
    windows: WindowHistory,
    blur: BlurToGrid,
    last_time: Option<f64>,
    windows_completed: usize,
    /// Set by the first failed update; the restraint refuses all later ones.
    failed: Option<String>,
}

impl EnsembleHarmonic {
    pub fn new(params: EnsembleParams) -> Result<Self, BiasError> {
        params.validate()?;
        log::info!(
            "ensemble restraint: {} bins of {} on [{}, {}], {} samples every {} per window, \
             averaging {} windows, k = {}, sigma = {}",
            params.n_bins,
            params.bin_width,
            params.min_dist,
            params.max_dist,
            params.n_samples,
            params.sample_period,
            params.n_windows,
            params.k,
            params.sigma
        );

        Ok(Self {
            bin_width: params.bin_width,
            min_dist: params.min_dist,
            max_dist: params.max_dist,
            k: params.k,
            sigma: params.sigma,
            histogram: vec![0.0; params.n_bins],
            sampler: WindowSampler::new(params.n_samples, params.sample_period),
            windows: WindowHistory::new(params.n_windows, params.n_bins),
            blur: BlurToGrid::new(0.0, params.bin_width, params.sigma),
            experimental: params.experimental,
            last_time: None,
            windows_completed: 0,
            failed: None,
        })
    }

    pub fn n_bins(&self) -> usize {
        self.histogram.len()
    }

    pub fn histogram(&self) -> &[f64] {
        &self.histogram
    }

    pub fn experimental(&self) -> &[f64] {
        &self.experimental
    }

    pub fn windows(&self) -> &WindowHistory {
        &self.windows
    }

    pub fn timers(&self) -> WindowTimers {
        self.sampler.timers()
    }

    /// Rollovers completed since construction.
    pub fn windows_completed(&self) -> usize {
        self.windows_completed
    }

    /// Instantaneous force on `v` relative to `v0`.
    pub fn calculate(&self, v: &Vector3<f64>, v0: &Vector3<f64>) -> PotentialPointData {
        // rdiff is the position of v relative to the origin v0, not v0 - v.
        let rdiff = v - v0;
        let r = rdiff.norm();

        // Direction is undefined when the sites coincide.
        if r == 0.0 {
            return PotentialPointData::default();
        }

        let (f, energy) = if r > self.max_dist {
            let dr = r - self.max_dist;
            (self.k * (self.max_dist - r), 0.5 * self.k * dr * dr)
        } else if r < self.min_dist {
            let dr = self.min_dist - r;
            (self.k * (self.min_dist - r), 0.5 * self.k * dr * dr)
        } else {
            self.histogram_force(r)
        };

        PotentialPointData::along(&rdiff, r, f, energy)
    }

    /// Scalar force and energy from the Gaussian-smoothed working histogram.
    fn histogram_force(&self, r: f64) -> (f64, f64) {
        let sigma2 = self.sigma * self.sigma;
        let norm_energy = (2.0 * PI).sqrt() * self.sigma;
        let norm_force = norm_energy * sigma2;

        let mut f_scal = 0.0;
        let mut u = 0.0;
        for (n, &h) in self.histogram.iter().enumerate() {
            let x = n as f64 * self.bin_width - r;
            let weight = h * (-0.5 * x * x / sigma2).exp();
            f_scal += weight * x / norm_force;
            u += weight / norm_energy;
        }
        (-self.k * f_scal, self.k * u)
    }

    /// Why the restraint stopped accepting updates, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.failed.as_deref()
    }

    /// Record a sample if one is due and close the window if it has elapsed.
    ///
    /// Any error is fatal. Every later call fails before reaching the
    /// sampler or the ensemble.
    pub fn update(
        &mut self,
        v: &Vector3<f64>,
        v0: &Vector3<f64>,
        t: f64,
        resources: &EnsembleResources,
    ) -> Result<(), BiasError> {
        if let Some(reason) = &self.failed {
            return Err(BiasError::CallingContract(format!(
                "update at t = {t} after an earlier failure: {reason}"
            )));
        }
        let result = self.step(v, v0, t, resources);
        if let Err(e) = &result {
            self.failed = Some(e.to_string());
        }
        result
    }

    fn step(
        &mut self,
        v: &Vector3<f64>,
        v0: &Vector3<f64>,
        t: f64,
        resources: &EnsembleResources,
    ) -> Result<(), BiasError> {
        match self.last_time {
            Some(last) if t < last => {
                return Err(BiasError::calling_contract(format!(
                    "time moved backwards from {last} to {t}"
                )));
            }
            // A host resuming past the first due sample starts its first
            // window at the time of its first call.
            None if t > self.sampler.timers().next_sample_time => {
                log::info!("first update at t = {t}, sampling windows start there");
                self.sampler.reset(t);
            }
            _ => {}
        }
        self.last_time = Some(t);

        let r = (v - v0).norm();
        self.sampler.record(r, t)?;

        if self.sampler.window_elapsed(t) {
            self.roll_over(t, resources)?;
        }
        Ok(())
    }

    /// Blur the finished window, reduce it over the ensemble, push it into the
    /// history and rebuild the working histogram from scratch.
    ///
    /// On error nothing past the sampler is touched.
    fn roll_over(&mut self, t: f64, resources: &EnsembleResources) -> Result<(), BiasError> {
        let n_bins = self.n_bins();
        let samples = self.sampler.finish_window()?;

        let mut local = vec![0.0; n_bins];
        self.blur.blur(samples, &mut local);

        let mut reduced = vec![0.0; n_bins];
        resources.handle().reduce(&local, &mut reduced)?;

        self.windows.push(reduced);
        self.windows
            .average_difference(&self.experimental, &mut self.histogram);

        // Window boundaries follow the host's time stamps rather than an
        // integer step count, so sample_period should be exactly
        // representable in binary to avoid slow drift.
        self.sampler.reset(t);
        self.windows_completed += 1;

        log::debug!(
            "window {} closed at t = {t}: history holds {}/{} windows",
            self.windows_completed,
            self.windows.len(),
            self.windows.capacity()
        );
        Ok(())
    }
}

impl BiasPotential for EnsembleHarmonic {
    fn compute_force(&self, v: &Vector3<f64>, v0: &Vector3<f64>, _t: f64) -> PotentialPointData {
        self.calculate(v, v0)
    }

    fn on_periodic_update(
        &mut self,
        v: &Vector3<f64>,
        v0: &Vector3<f64>,
        t: f64,
        resources: &EnsembleResources,
    ) -> Result<(), BiasError> {
        self.update(v, v0, t, resources)
    }
}
