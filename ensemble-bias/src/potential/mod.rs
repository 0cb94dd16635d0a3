pub mod ensemble_harmonic;
pub mod harmonic;

pub use ensemble_harmonic::EnsembleHarmonic;
pub use harmonic::HarmonicPotential;

use nalgebra::Vector3;

use crate::ensemble::EnsembleResources;
use crate::error::BiasError;

/// Force on the biased site and the energy of the bias at one configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PotentialPointData {
    pub force: Vector3<f64>,
    pub energy: f64,
}

impl Default for PotentialPointData {
    fn default() -> Self {
        Self {
            force: Vector3::zeros(),
            energy: 0.0,
        }
    }
}

impl PotentialPointData {
    /// Project the scalar force `f` (positive pushes the sites apart) onto
    /// the separation `rdiff` of length `r`.
    pub(crate) fn along(rdiff: &Vector3<f64>, r: f64, f: f64, energy: f64) -> Self {
        Self {
            force: rdiff * (f / r),
            energy,
        }
    }
}

/// A pair bias strategy.
///
/// `v` is the biased site and `v0` the reference site; the returned force
/// acts on `v` (the host applies the opposite force to `v0`).
pub trait BiasPotential: Send + Sync {
    /// Force at time `t`. Never mutates long-lived state.
    fn compute_force(&self, v: &Vector3<f64>, v0: &Vector3<f64>, t: f64) -> PotentialPointData;

    /// Periodic bookkeeping at time `t`; the only mutating entry point.
    fn on_periodic_update(
        &mut self,
        _v: &Vector3<f64>,
        _v0: &Vector3<f64>,
        _t: f64,
        _resources: &EnsembleResources,
    ) -> Result<(), BiasError> {
        Ok(())
    }
}
