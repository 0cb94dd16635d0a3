use std::error::Error;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use ensemble_bias::{
    BlurToGrid, EnsembleHarmonic, EnsembleParams, EnsembleResources, LocalEnsemble, Restraint,
};
use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

const N_REPLICAS: usize = 4;
const N_STEPS: usize = 20_000;
const DT: f64 = 0.002;
const DIFFUSION: f64 = 1.0;
const N_BINS: usize = 40;
const BIN_WIDTH: f64 = 0.2;
const TARGET: [f64; 2] = [2.5, 5.0];

/// Standard normal deviate by Box-Muller.
fn normal(rng: &mut Xoshiro256StarStar) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Overdamped Langevin dynamics of one site around a fixed reference site,
/// driven only by the bias.
fn run_replica(
    replica: usize,
    params: EnsembleParams,
    resources: EnsembleResources,
    pb: ProgressBar,
) -> Result<Vec<f64>, String> {
    let mut rng = Xoshiro256StarStar::seed_from_u64(42 + replica as u64);
    let pot = EnsembleHarmonic::new(params).map_err(|e| e.to_string())?;
    let mut restraint = Restraint::new([0, 1], pot, resources);

    let v0 = Vector3::zeros();
    let mut v = Vector3::new(1.5 + 0.5 * replica as f64, 0.0, 0.0);
    let noise = (2.0 * DIFFUSION * DT).sqrt();

    for step in 1..=N_STEPS {
        let t = step as f64 * DT;
        let out = restraint.evaluate(&v, &v0, t);
        let kick = Vector3::new(normal(&mut rng), normal(&mut rng), normal(&mut rng));
        v += out.force * (DIFFUSION * DT) + kick * noise;
        restraint
            .update(&v, &v0, t)
            .map_err(|e| format!("replica {replica}: {e}"))?;
        if replica == 0 {
            pb.inc(1);
        }
    }

    Ok(restraint.potential().histogram().to_vec())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Two-state target distribution.
    let experimental = BlurToGrid::new(0.0, BIN_WIDTH, 0.4).to_grid(&TARGET, N_BINS);
    let params = EnsembleParams {
        n_bins: N_BINS,
        bin_width: BIN_WIDTH,
        min_dist: 1.0,
        max_dist: 7.0,
        experimental,
        n_samples: 50,
        sample_period: 0.01,
        n_windows: 4,
        k: 20.0,
        sigma: 0.3,
    };

    println!(
        "Replicas: {}  |  Steps: {}  |  Bins: {} x {}  |  Window: {} samples every {}",
        N_REPLICAS, N_STEPS, N_BINS, BIN_WIDTH, params.n_samples, params.sample_period
    );
    println!("{}", "-".repeat(70));

    let pb = ProgressBar::new(N_STEPS as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{msg} [{bar:40}] {pos}/{len} [{elapsed_precise} < {eta_precise}, {per_sec}]",
        )?
        .progress_chars("=> "),
    );
    pb.set_message("steps");

    let ensemble = Arc::new(LocalEnsemble::new(N_REPLICAS));
    let t0 = Instant::now();
    let results: Vec<Result<Vec<f64>, String>> = thread::scope(|s| {
        let handles: Vec<_> = (0..N_REPLICAS)
            .map(|replica| {
                let resources = EnsembleResources::new(ensemble.clone());
                let params = params.clone();
                let pb = pb.clone();
                s.spawn(move || run_replica(replica, params, resources, pb))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err("replica panicked".into())))
            .collect()
    });
    pb.finish();

    let histograms = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    let elapsed = t0.elapsed().as_secs_f64();

    println!("Total: {:.3} s  |  {:.3} us/step/replica", elapsed, elapsed / N_STEPS as f64 * 1e6);
    println!("{:>6}  {:>10}  {:>10}", "R", "reference", "working");
    for (i, (e, h)) in params.experimental.iter().zip(&histograms[0]).enumerate() {
        println!("{:>6.2}  {:>10.4}  {:>10.4}", i as f64 * BIN_WIDTH, e, h);
    }
    Ok(())
}
