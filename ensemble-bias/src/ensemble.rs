//! Ensemble collaborator: the all-reduce-sum shared by every replica, and the
//! termination side channel.
//!
//! The core only consumes [`Ensemble`]; how grids travel between replicas is
//! the collaborator's business. Two implementations live here for hosts that
//! run everything in one process: [`SingleReplica`] (identity) and
//! [`LocalEnsemble`] (replicas on threads of the same process).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};

use crate::error::ReductionError;

/// Collective operations available to every replica of the ensemble.
///
/// `reduce` is a blocking all-reduce-sum: every replica must call it with
/// grids of the same length, in the same order, once per window rollover,
/// or the collective stalls or diverges. There is no timeout on this side.
pub trait Ensemble: Send + Sync {
    /// Sum `send` over all replicas into `receive`.
    fn reduce(&self, send: &[f64], receive: &mut [f64]) -> Result<(), ReductionError>;

    /// Ask the host to stop after the current step. Fire and forget.
    fn stop(&self);
}

/// Shared ownership of the ensemble collaborator, handed to each restraint
/// at construction.
///
/// Must not outlive the session that provides the collaborator.
#[derive(Clone)]
pub struct EnsembleResources {
    ensemble: Arc<dyn Ensemble>,
}

impl EnsembleResources {
    pub fn new(ensemble: Arc<dyn Ensemble>) -> Self {
        Self { ensemble }
    }

    /// Resources for a run without peers.
    pub fn single_replica() -> Self {
        Self::new(Arc::new(SingleReplica::default()))
    }

    /// Borrow the collaborator for one call site. Keep the handle short-lived.
    pub fn handle(&self) -> EnsembleHandle<'_> {
        EnsembleHandle {
            ensemble: self.ensemble.as_ref(),
        }
    }
}

impl fmt::Debug for EnsembleResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsembleResources").finish_non_exhaustive()
    }
}

pub struct EnsembleHandle<'a> {
    ensemble: &'a dyn Ensemble,
}

impl EnsembleHandle<'_> {
    pub fn reduce(&self, send: &[f64], receive: &mut [f64]) -> Result<(), ReductionError> {
        if send.len() != receive.len() {
            return Err(ReductionError::ShapeMismatch {
                expected: send.len(),
                actual: receive.len(),
            });
        }
        self.ensemble.reduce(send, receive)
    }

    pub fn stop(&self) {
        self.ensemble.stop();
    }
}

/// An ensemble of one: reduce copies input to output.
#[derive(Debug, Default)]
pub struct SingleReplica {
    stop_requested: AtomicBool,
}

impl SingleReplica {
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Relaxed)
    }
}

impl Ensemble for SingleReplica {
    fn reduce(&self, send: &[f64], receive: &mut [f64]) -> Result<(), ReductionError> {
        if send.len() != receive.len() {
            return Err(ReductionError::ShapeMismatch {
                expected: send.len(),
                actual: receive.len(),
            });
        }
        receive.copy_from_slice(send);
        Ok(())
    }

    fn stop(&self) {
        log::info!("stop requested");
        self.stop_requested.store(true, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct ReduceRound {
    sum: Vec<f64>,
    /// Length contributed by the first replica to arrive.
    shape: Option<usize>,
    /// Length of the first contribution that disagreed with `shape`.
    mismatch: Option<usize>,
}

/// All-reduce-sum across `n_replicas` threads of one process.
///
/// Every replica thread shares the same `Arc<LocalEnsemble>` and calls
/// [`Ensemble::reduce`] once per rollover. A call blocks until all replicas
/// have contributed, then each one receives the same sum. A length mismatch
/// between replicas fails the round on every participant.
pub struct LocalEnsemble {
    n_replicas: usize,
    barrier: Barrier,
    round: Mutex<ReduceRound>,
    stop_requested: AtomicBool,
}

impl LocalEnsemble {
    pub fn new(n_replicas: usize) -> Self {
        Self {
            n_replicas,
            barrier: Barrier::new(n_replicas),
            round: Mutex::new(ReduceRound::default()),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn n_replicas(&self) -> usize {
        self.n_replicas
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Relaxed)
    }

    // Poisoning is ignored so surviving replicas still reach the barrier.
    fn lock_round(&self) -> MutexGuard<'_, ReduceRound> {
        self.round.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Ensemble for LocalEnsemble {
    fn reduce(&self, send: &[f64], receive: &mut [f64]) -> Result<(), ReductionError> {
        {
            let mut round = self.lock_round();
            let shape = round.shape;
            match shape {
                None => {
                    round.shape = Some(send.len());
                    round.sum = send.to_vec();
                }
                Some(n) if n == send.len() => {
                    for (a, &b) in round.sum.iter_mut().zip(send) {
                        *a += b;
                    }
                }
                Some(_) => {
                    round.mismatch.get_or_insert(send.len());
                }
            }
        }

        self.barrier.wait();

        let result = {
            let round = self.lock_round();
            match (round.shape, round.mismatch) {
                (Some(expected), Some(actual)) => {
                    Err(ReductionError::ShapeMismatch { expected, actual })
                }
                _ if round.sum.len() != receive.len() => Err(ReductionError::ShapeMismatch {
                    expected: round.sum.len(),
                    actual: receive.len(),
                }),
                _ => {
                    receive.copy_from_slice(&round.sum);
                    Ok(())
                }
            }
        };

        // Everyone has read the sum before the leader clears it, and nobody
        // starts the next round before it is cleared.
        if self.barrier.wait().is_leader() {
            *self.lock_round() = ReduceRound::default();
        }
        self.barrier.wait();

        result
    }

    fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::Relaxed) {
            log::info!("stop requested for ensemble of {}", self.n_replicas);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_replica_is_identity() {
        let resources = EnsembleResources::single_replica();
        let send = [0.25, 1.5, -3.0];
        let mut receive = [0.0; 3];
        resources.handle().reduce(&send, &mut receive).unwrap();
        assert_eq!(send, receive);
    }

    #[test]
    fn test_handle_rejects_mismatched_grids() {
        let resources = EnsembleResources::single_replica();
        let mut receive = [0.0; 2];
        assert_eq!(
            resources.handle().reduce(&[1.0, 2.0, 3.0], &mut receive),
            Err(ReductionError::ShapeMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_stop_is_recorded() {
        let single = Arc::new(SingleReplica::default());
        let resources = EnsembleResources::new(single.clone());
        assert!(!single.stop_requested());
        resources.handle().stop();
        assert!(single.stop_requested());
    }

    #[test]
    fn test_local_ensemble_sums_over_threads() {
        let n = 4;
        let ensemble = Arc::new(LocalEnsemble::new(n));
        let results: Vec<Vec<f64>> = thread::scope(|s| {
            let handles: Vec<_> = (0..n)
                .map(|r| {
                    let resources = EnsembleResources::new(ensemble.clone());
                    s.spawn(move || {
                        let mut out = Vec::new();
                        // several consecutive rounds must not bleed into each other
                        for round in 0..3 {
                            let send = vec![r as f64, 1.0, round as f64];
                            let mut receive = vec![0.0; 3];
                            resources.handle().reduce(&send, &mut receive).unwrap();
                            out.extend(receive);
                        }
                        out
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let expected = vec![6.0, 4.0, 0.0, 6.0, 4.0, 4.0, 6.0, 4.0, 8.0];
        for r in results {
            assert_eq!(r, expected);
        }
    }

    #[test]
    fn test_local_ensemble_shape_mismatch_fails_everyone() {
        let ensemble = Arc::new(LocalEnsemble::new(2));
        let results: Vec<Result<(), ReductionError>> = thread::scope(|s| {
            let handles: Vec<_> = [2usize, 3]
                .into_iter()
                .map(|len| {
                    let ensemble = ensemble.clone();
                    s.spawn(move || {
                        let send = vec![1.0; len];
                        let mut receive = vec![0.0; len];
                        ensemble.reduce(&send, &mut receive)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for r in results {
            assert!(matches!(r, Err(ReductionError::ShapeMismatch { .. })));
        }
    }

    #[test]
    fn test_local_ensemble_of_one() {
        let ensemble = LocalEnsemble::new(1);
        let mut receive = [0.0; 2];
        ensemble.reduce(&[2.0, 3.0], &mut receive).unwrap();
        assert_eq!(receive, [2.0, 3.0]);
        ensemble.stop();
        assert!(ensemble.stop_requested());
    }
}
