use nalgebra::Vector3;

use crate::ensemble::EnsembleResources;
use crate::error::BiasError;
use crate::parallel::par_map;
use crate::potential::{BiasPotential, PotentialPointData};

/// A bias potential bound to a pair of sites and to its ensemble resources.
///
/// `sites[0]` is the reference site and `sites[1]` the biased site. The host
/// calls [`evaluate`](Self::evaluate) every step and [`update`](Self::update)
/// at least as often as the potential samples; `update` forwards to the
/// potential whenever `t` reaches [`next_update_time`](Self::next_update_time).
pub struct Restraint<P: BiasPotential + ?Sized = dyn BiasPotential> {
    sites: [usize; 2],
    /// Zero means every call to `update` is forwarded.
    update_period: f64,
    next_update: f64,
    last_time: Option<f64>,
    resources: EnsembleResources,
    potential: Box<P>,
}

impl<P: BiasPotential> Restraint<P> {
    pub fn new(sites: [usize; 2], potential: P, resources: EnsembleResources) -> Self {
        Self::from_boxed(sites, Box::new(potential), resources)
    }

    /// Erase the potential type so restraints of different kinds can share a
    /// [`RestraintSet`].
    pub fn into_dyn(self) -> Restraint
    where
        P: 'static,
    {
        Restraint {
            sites: self.sites,
            update_period: self.update_period,
            next_update: self.next_update,
            last_time: self.last_time,
            resources: self.resources,
            potential: self.potential,
        }
    }
}

impl<P: BiasPotential + ?Sized> Restraint<P> {
    pub fn from_boxed(sites: [usize; 2], potential: Box<P>, resources: EnsembleResources) -> Self {
        Self {
            sites,
            update_period: 0.0,
            next_update: 0.0,
            last_time: None,
            resources,
            potential,
        }
    }

    /// Forward updates only every `period` time units. Negative periods count as zero.
    pub fn with_update_period(mut self, period: f64) -> Self {
        self.update_period = period.max(0.0);
        self
    }

    pub fn sites(&self) -> [usize; 2] {
        self.sites
    }

    pub fn potential(&self) -> &P {
        &self.potential
    }

    pub fn next_update_time(&self) -> f64 {
        self.next_update
    }

    pub fn evaluate(&self, r1: &Vector3<f64>, r2: &Vector3<f64>, t: f64) -> PotentialPointData {
        self.potential.compute_force(r1, r2, t)
    }

    /// Checks that `t` never decreases, including on calls that are not
    /// forwarded.
    pub fn update(&mut self, r1: &Vector3<f64>, r2: &Vector3<f64>, t: f64) -> Result<(), BiasError> {
        if let Some(last) = self.last_time {
            if t < last {
                return Err(BiasError::calling_contract(format!(
                    "restraint on sites {:?}: time moved backwards from {last} to {t}",
                    self.sites
                )));
            }
        }
        self.last_time = Some(t);
        if t >= self.next_update {
            self.potential
                .on_periodic_update(r1, r2, t, &self.resources)?;
            self.next_update += self.update_period;
        }
        Ok(())
    }

    /// Ask the host, through the ensemble, to stop the run.
    pub fn request_stop(&self) {
        self.resources.handle().stop();
    }

    fn positions<'a>(
        &self,
        positions: &'a [Vector3<f64>],
    ) -> Result<(&'a Vector3<f64>, &'a Vector3<f64>), BiasError> {
        let [reference, site] = self.sites;
        match (positions.get(site), positions.get(reference)) {
            (Some(v), Some(v0)) => Ok((v, v0)),
            _ => Err(BiasError::calling_contract(format!(
                "restraint on sites {:?} but only {} positions were supplied",
                self.sites,
                positions.len()
            ))),
        }
    }
}

/// Independent restraints of one replica, driven together.
///
/// Force queries may run in parallel. Updates always run sequentially in
/// insertion order so every replica issues its ensemble collectives in the
/// same order.
pub struct RestraintSet {
    restraints: Vec<Restraint>,
    sequential: bool,
}

impl RestraintSet {
    pub fn new(sequential: bool) -> Self {
        Self {
            restraints: Vec::new(),
            sequential,
        }
    }

    pub fn push(&mut self, restraint: Restraint) {
        self.restraints.push(restraint);
    }

    pub fn len(&self) -> usize {
        self.restraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.restraints.is_empty()
    }

    /// Force and energy of every restraint, in insertion order.
    pub fn evaluate_all(
        &self,
        positions: &[Vector3<f64>],
        t: f64,
    ) -> Result<Vec<PotentialPointData>, BiasError> {
        par_map(&self.restraints, self.sequential, |restraint| -> Result<_, BiasError> {
            let (v, v0) = restraint.positions(positions)?;
            Ok(restraint.evaluate(v, v0, t))
        })
        .into_iter()
        .collect()
    }

    /// Add every restraint's force into `forces` (the biased site gets `+F`,
    /// the reference site `-F`) and return the total bias energy.
    pub fn accumulate_forces(
        &self,
        positions: &[Vector3<f64>],
        t: f64,
        forces: &mut [Vector3<f64>],
    ) -> Result<f64, BiasError> {
        let outputs = self.evaluate_all(positions, t)?;
        let mut energy = 0.0;
        for (restraint, out) in self.restraints.iter().zip(&outputs) {
            let [reference, site] = restraint.sites();
            if site >= forces.len() || reference >= forces.len() {
                return Err(BiasError::calling_contract(format!(
                    "force buffer of {} entries too short for sites {:?}",
                    forces.len(),
                    restraint.sites()
                )));
            }
            forces[site] += out.force;
            forces[reference] -= out.force;
            energy += out.energy;
        }
        Ok(energy)
    }

    pub fn update_all(&mut self, positions: &[Vector3<f64>], t: f64) -> Result<(), BiasError> {
        for restraint in self.restraints.iter_mut() {
            let (v, v0) = restraint.positions(positions)?;
            restraint.update(v, v0, t)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnsembleParams, HarmonicParams, PotentialConfig};
    use crate::ensemble::SingleReplica;
    use crate::potential::{EnsembleHarmonic, HarmonicPotential};
    use std::sync::Arc;

    fn ensemble_params() -> EnsembleParams {
        EnsembleParams {
            n_bins: 10,
            bin_width: 0.5,
            min_dist: 0.5,
            max_dist: 4.0,
            experimental: vec![0.0, 0.0, 0.1, 0.3, 0.6, 0.6, 0.3, 0.1, 0.0, 0.0],
            n_samples: 2,
            sample_period: 1.0,
            n_windows: 2,
            k: 2.0,
            sigma: 0.5,
        }
    }

    fn harmonic(r0: f64, k: f64) -> HarmonicPotential {
        HarmonicPotential::new(HarmonicParams { r0, k }).unwrap()
    }

    #[test]
    fn test_update_period() {
        let resources = EnsembleResources::single_replica();
        let pot = EnsembleHarmonic::new(ensemble_params()).unwrap();
        let mut restraint = Restraint::new([0, 1], pot, resources).with_update_period(1.0);
        let v = Vector3::new(2.0, 0.0, 0.0);
        let v0 = Vector3::zeros();

        assert_eq!(restraint.next_update_time(), 0.0);
        restraint.update(&v, &v0, 0.0).unwrap();
        assert_eq!(restraint.next_update_time(), 1.0);
        // not forwarded: next update stays put
        restraint.update(&v, &v0, 0.5).unwrap();
        assert_eq!(restraint.next_update_time(), 1.0);
        restraint.update(&v, &v0, 1.0).unwrap();
        restraint.update(&v, &v0, 2.0).unwrap();
        assert_eq!(restraint.next_update_time(), 3.0);
        assert_eq!(restraint.potential().windows_completed(), 1);
    }

    #[test]
    fn test_backwards_time_caught_between_updates() {
        let resources = EnsembleResources::single_replica();
        let pot = EnsembleHarmonic::new(ensemble_params()).unwrap();
        let mut restraint = Restraint::new([0, 1], pot, resources).with_update_period(1.0);
        let v = Vector3::new(2.0, 0.0, 0.0);
        let v0 = Vector3::zeros();

        restraint.update(&v, &v0, 0.0).unwrap();
        restraint.update(&v, &v0, 0.6).unwrap();
        // below next_update, so the potential never sees this call
        assert!(matches!(
            restraint.update(&v, &v0, 0.3),
            Err(BiasError::CallingContract(_))
        ));
        assert_eq!(restraint.next_update_time(), 1.0);
    }

    #[test]
    fn test_request_stop_reaches_ensemble() {
        let ensemble = Arc::new(SingleReplica::default());
        let resources = EnsembleResources::new(ensemble.clone());
        let restraint = Restraint::new([0, 1], harmonic(1.0, 1.0), resources);
        assert!(!ensemble.stop_requested());
        restraint.request_stop();
        assert!(ensemble.stop_requested());
    }

    #[test]
    fn test_zero_period_forwards_every_call() {
        let resources = EnsembleResources::single_replica();
        let pot = EnsembleHarmonic::new(ensemble_params()).unwrap();
        let mut restraint = Restraint::new([0, 1], pot, resources);
        let v = Vector3::new(2.0, 0.0, 0.0);
        let v0 = Vector3::zeros();
        for step in 1..=4 {
            restraint.update(&v, &v0, step as f64).unwrap();
        }
        assert_eq!(restraint.next_update_time(), 0.0);
        assert_eq!(restraint.potential().windows_completed(), 2);
    }

    #[test]
    fn test_set_sequential_and_parallel_agree() {
        let positions: Vec<Vector3<f64>> = (0..8)
            .map(|i| Vector3::new(i as f64 * 0.7, (i % 3) as f64, 0.5 * i as f64))
            .collect();

        let build = |sequential| {
            let mut set = RestraintSet::new(sequential);
            for i in 0..7 {
                let resources = EnsembleResources::single_replica();
                let pot = harmonic(1.0 + 0.1 * i as f64, 3.0);
                set.push(Restraint::new([i, i + 1], pot, resources).into_dyn());
            }
            set
        };
        let a = build(true).evaluate_all(&positions, 0.0).unwrap();
        let b = build(false).evaluate_all(&positions, 0.0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 7);
    }

    #[test]
    fn test_mixed_kinds_from_config() {
        let resources = EnsembleResources::single_replica();
        let mut set = RestraintSet::new(true);
        let configs = vec![
            PotentialConfig::Harmonic(HarmonicParams { r0: 1.0, k: 1.0 }),
            PotentialConfig::Ensemble(ensemble_params()),
        ];
        for (i, cfg) in configs.into_iter().enumerate() {
            let pot = cfg.build().unwrap();
            set.push(Restraint::from_boxed([0, i + 1], pot, resources.clone()));
        }
        assert_eq!(set.len(), 2);

        let positions = vec![
            Vector3::zeros(),
            Vector3::new(3.0, 0.0, 0.0),
            Vector3::new(0.0, 6.0, 0.0),
        ];
        for step in 1..=2 {
            set.update_all(&positions, step as f64).unwrap();
        }

        let mut forces = vec![Vector3::zeros(); 3];
        let energy = set.accumulate_forces(&positions, 2.0, &mut forces).unwrap();
        // harmonic: R = 3, r0 = 1 -> f = -2 along +x
        assert!((forces[1] - Vector3::new(-2.0, 0.0, 0.0)).norm() < 1e-12);
        // ensemble: R = 6 beyond max_dist 4 -> f = 2 * (4 - 6) = -4 along +y
        assert!((forces[2] - Vector3::new(0.0, -4.0, 0.0)).norm() < 1e-12);
        assert!((forces[0] - Vector3::new(2.0, 4.0, 0.0)).norm() < 1e-12);
        assert!((energy - (2.0 + 4.0)).abs() < 1e-12);
    }

    #[test]
    fn test_missing_site_is_reported() {
        let mut set = RestraintSet::new(true);
        set.push(
            Restraint::new([0, 5], harmonic(1.0, 1.0), EnsembleResources::single_replica())
                .into_dyn(),
        );
        let positions = vec![Vector3::zeros(); 3];
        assert!(matches!(
            set.evaluate_all(&positions, 0.0),
            Err(BiasError::CallingContract(_))
        ));
        assert!(matches!(
            set.update_all(&positions, 0.0),
            Err(BiasError::CallingContract(_))
        ));
    }
}
