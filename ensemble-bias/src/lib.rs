pub mod blur;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod potential;
pub mod restraint;
pub mod statistics;

mod parallel;

pub use blur::BlurToGrid;
pub use config::{EnsembleParams, HarmonicParams, PotentialConfig, PotentialKind};
pub use ensemble::{Ensemble, EnsembleHandle, EnsembleResources, LocalEnsemble, SingleReplica};
pub use error::{BiasError, ReductionError};
pub use potential::{BiasPotential, EnsembleHarmonic, HarmonicPotential, PotentialPointData};
pub use restraint::{Restraint, RestraintSet};
pub use statistics::{WindowHistory, WindowSampler, WindowTimers};
