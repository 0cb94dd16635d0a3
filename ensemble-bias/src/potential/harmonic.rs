use nalgebra::Vector3;
use validator::Validate;

use super::{BiasPotential, PotentialPointData};
use crate::config::HarmonicParams;
use crate::error::BiasError;

/// `U = k/2 (R - r0)^2` between the two sites. Holds no history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicPotential {
    r0: f64,
    k: f64,
}

impl HarmonicPotential {
    pub fn new(params: HarmonicParams) -> Result<Self, BiasError> {
        params.validate()?;
        Ok(Self {
            r0: params.r0,
            k: params.k,
        })
    }
}

impl BiasPotential for HarmonicPotential {
    fn compute_force(&self, v: &Vector3<f64>, v0: &Vector3<f64>, _t: f64) -> PotentialPointData {
        let rdiff = v - v0;
        let r = rdiff.norm();
        if r == 0.0 {
            return PotentialPointData::default();
        }
        let dr = r - self.r0;
        PotentialPointData::along(&rdiff, r, -self.k * dr, 0.5 * self.k * dr * dr)
    }
}
