use ensemble_bias::{
    BiasError, Ensemble, EnsembleHarmonic, EnsembleParams, EnsembleResources, ReductionError,
    Restraint,
};
use nalgebra::Vector3;
use numpy::ndarray::Array1;
use numpy::{IntoPyArray, PyArray1, PyArrayMethods, PyReadonlyArray1};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::sync::Arc;

fn to_py_err(err: BiasError) -> PyErr {
    match err {
        BiasError::Configuration(_) => PyValueError::new_err(err.to_string()),
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

fn vector(a: &PyReadonlyArray1<f64>) -> PyResult<Vector3<f64>> {
    match a.as_slice()? {
        &[x, y, z] => Ok(Vector3::new(x, y, z)),
        other => Err(PyValueError::new_err(format!(
            "expected a position of length 3, got {}",
            other.len()
        ))),
    }
}

/// Ensemble collaborator backed by Python callables.
///
/// `reduce(send, receive)` must sum `send` over all replicas into the
/// `receive` numpy array in place, e.g. with `mpi4py`'s `Allreduce`.
struct PyEnsemble {
    reduce: Py<PyAny>,
    stop: Option<Py<PyAny>>,
}

impl Ensemble for PyEnsemble {
    fn reduce(&self, send: &[f64], receive: &mut [f64]) -> Result<(), ReductionError> {
        Python::with_gil(|py| {
            let send_arr = PyArray1::from_slice(py, send);
            let recv_arr = PyArray1::<f64>::zeros(py, receive.len(), false);
            self.reduce
                .bind(py)
                .call1((send_arr, recv_arr.clone()))
                .map_err(|e| ReductionError::Collaborator(e.to_string()))?;

            let readonly = recv_arr.readonly();
            let out = readonly
                .as_slice()
                .map_err(|e| ReductionError::Collaborator(e.to_string()))?;
            if out.len() != receive.len() {
                return Err(ReductionError::ShapeMismatch {
                    expected: receive.len(),
                    actual: out.len(),
                });
            }
            receive.copy_from_slice(out);
            Ok(())
        })
    }

    fn stop(&self) {
        let Some(stop) = &self.stop else {
            log::warn!("stop requested but no stop callable was given");
            return;
        };
        Python::with_gil(|py| {
            if let Err(e) = stop.bind(py).call0() {
                log::warn!("stop callable failed: {e}");
            }
        });
    }
}

#[pyclass]
struct EnsembleRestraint {
    restraint: Restraint<EnsembleHarmonic>,
}

#[pymethods]
impl EnsembleRestraint {
    /// Create a histogram-matching restraint between two sites.
    ///
    /// Arguments:
    ///   sites: [reference, biased] site indices in the host's numbering
    ///   n_bins, bin_width: histogram grid starting at distance 0
    ///   min_dist, max_dist: flat-bottom wall bounds
    ///   experimental: numpy array of shape (n_bins,), float64
    ///   n_samples, sample_period: samples per window and their spacing in time
    ///   n_windows: windows averaged into the working histogram
    ///   k, sigma: force constant and Gaussian smoothing width
    ///   reduce: callable reduce(send, receive) summing over replicas
    ///   stop: optional callable asking the host to stop
    ///   update_period: forward update() only every this many time units (default 0)
    #[new]
    #[pyo3(signature = (sites, n_bins, bin_width, min_dist, max_dist, experimental, n_samples, sample_period, n_windows, k, sigma, reduce, stop=None, update_period=None))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        sites: [usize; 2],
        n_bins: usize,
        bin_width: f64,
        min_dist: f64,
        max_dist: f64,
        experimental: PyReadonlyArray1<f64>,
        n_samples: usize,
        sample_period: f64,
        n_windows: usize,
        k: f64,
        sigma: f64,
        reduce: Py<PyAny>,
        stop: Option<Py<PyAny>>,
        update_period: Option<f64>,
    ) -> PyResult<Self> {
        let params = EnsembleParams {
            n_bins,
            bin_width,
            min_dist,
            max_dist,
            experimental: experimental.as_slice()?.to_vec(),
            n_samples,
            sample_period,
            n_windows,
            k,
            sigma,
        };
        let potential = EnsembleHarmonic::new(params).map_err(to_py_err)?;
        let resources = EnsembleResources::new(Arc::new(PyEnsemble { reduce, stop }));
        let restraint = Restraint::new(sites, potential, resources)
            .with_update_period(update_period.unwrap_or(0.0));
        Ok(Self { restraint })
    }

    /// Force on the biased site and bias energy.
    ///
    /// Returns: (force, energy) with force a numpy array of shape (3,).
    fn calculate<'py>(
        &self,
        py: Python<'py>,
        v: PyReadonlyArray1<f64>,
        v0: PyReadonlyArray1<f64>,
        t: f64,
    ) -> PyResult<(Bound<'py, PyArray1<f64>>, f64)> {
        let out = self.restraint.evaluate(&vector(&v)?, &vector(&v0)?, t);
        Ok((PyArray1::from_slice(py, out.force.as_slice()), out.energy))
    }

    /// Periodic update. May block on the ensemble reduction.
    fn update(
        &mut self,
        v: PyReadonlyArray1<f64>,
        v0: PyReadonlyArray1<f64>,
        t: f64,
    ) -> PyResult<()> {
        let (v, v0) = (vector(&v)?, vector(&v0)?);
        self.restraint.update(&v, &v0, t).map_err(to_py_err)
    }

    /// Current working histogram, shape (n_bins,).
    fn histogram<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        Array1::from(self.restraint.potential().histogram().to_vec()).into_pyarray(py)
    }

    /// Number of windows currently held in the history.
    fn window_count(&self) -> usize {
        self.restraint.potential().windows().len()
    }

    /// Ask the host to stop through the `stop` callable given at construction.
    fn stop(&self) {
        self.restraint.request_stop();
    }

    fn next_update_time(&self) -> f64 {
        self.restraint.next_update_time()
    }

    /// Sampling timers as a dict.
    fn timers<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let timers = self.restraint.potential().timers();
        let dict = PyDict::new(py);
        dict.set_item("window_start_time", timers.window_start_time)?;
        dict.set_item("next_sample_time", timers.next_sample_time)?;
        dict.set_item("next_window_update_time", timers.next_window_update_time)?;
        dict.set_item("current_sample_count", timers.current_sample_count)?;
        Ok(dict)
    }

    #[getter]
    fn sites(&self) -> [usize; 2] {
        self.restraint.sites()
    }
}

#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<EnsembleRestraint>()?;
    Ok(())
}
