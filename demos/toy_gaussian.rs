use std::env;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_rand::{rand_distr::StandardNormal, RandomExt};
use pyke_ddpm::{reduce_losses, DDPMConfig, DDPMSamplingOptions, LossReduction, NoisePredictor, NoiseSchedule, PredictorInput, DDPM};
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exact noise predictor for standard Gaussian data.
struct GaussianOracle {
	schedule: NoiseSchedule
}

impl NoisePredictor for GaussianOracle {
	fn predict(&self, z_t: ArrayView2<'_, f32>, t: ArrayView1<'_, f32>, _: &PredictorInput<'_>) -> anyhow::Result<Array2<f32>> {
		let n = self.schedule.len() as f32;
		let t = t.mapv(|t| (t * n).round() as usize);
		let coef = self.schedule.alpha_bars_at(t.view())?.mapv(|alpha_bar| (1.0 - alpha_bar).sqrt());
		Ok(&z_t * &coef.insert_axis(Axis(1)))
	}
}

fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

	// optionally pass a JSON config, e.g. `{ "steps": 500, "noise-schedule": "cosine" }`
	let config = match env::args().nth(1) {
		Some(path) => DDPMConfig::from_file(path)?,
		None => DDPMConfig::default()
	};
	let schedule = config.build_schedule()?;
	let ddpm = DDPM::with_schedule(GaussianOracle { schedule: schedule.clone() }, schedule);
	info!(steps = ddpm.steps(), schedule = %config.noise_schedule, "built DDPM");

	let mut rng = StdRng::seed_from_u64(42);
	let x = Array2::<f32>::random_using((256, 2), StandardNormal, &mut rng);
	let batch = Array1::from_iter(0..256_usize);
	let losses = ddpm.losses(x.view(), Some(batch.view()), None, None, None, &mut rng)?;
	let loss = reduce_losses(losses.view(), Some(batch.view()), LossReduction::MeanPerSample)?;
	info!(loss = loss.mean().unwrap_or_default(), "oracle training loss");

	let samples = ddpm.sample((1024, 2), &PredictorInput::default(), &DDPMSamplingOptions::default().with_seed(7).callback_progress(100, |step, t| info!(step, t, "denoising")))?;
	let mean = samples.mean_axis(Axis(0)).unwrap_or_default();
	let std = samples.std_axis(Axis(0), 0.0);
	info!(?mean, ?std, "generated samples");

	Ok(())
}
