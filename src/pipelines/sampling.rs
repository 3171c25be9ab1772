// Copyright 2022-2023 pyke.io
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// 	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::Debug;

use ndarray::{Array1, Array2, ArrayView2};
use ndarray_rand::{rand_distr::StandardNormal, RandomExt};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, trace};

use super::DDPM;
use crate::{NoisePredictor, PredictorInput, Result};

/// Describes a function to be called on steps of the reverse chain. Callbacks observe the chain; they cannot alter or
/// stop it.
pub enum DDPMSamplingCallback {
	/// A simple callback to be used for e.g. reporting progress updates.
	Progress {
		/// Describes how frequently to call this callback (3 = every 3 steps).
		frequency: usize,
		/// Function Parameters:
		/// - **`step`** (usize): The number of reverse steps taken so far, minus one.
		/// - **`timestep`** (usize): The diffusion step that was just denoised.
		cb: Box<dyn Fn(usize, usize)>
	},
	/// A callback to receive the state after a step.
	State {
		/// Describes how frequently to call this callback (3 = every 3 steps).
		frequency: usize,
		/// Function Parameters:
		/// - **`step`** (usize): The number of reverse steps taken so far, minus one.
		/// - **`timestep`** (usize): The diffusion step that was just denoised.
		/// - **`state`** (`ArrayView2<f32>`): `z_{t-1}`.
		cb: Box<dyn Fn(usize, usize, ArrayView2<'_, f32>)>
	}
}

impl Debug for DDPMSamplingCallback {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("<DDPMSamplingCallback>")
	}
}

impl DDPMSamplingCallback {
	fn call(&self, step: usize, timestep: usize, state: ArrayView2<'_, f32>) {
		// a frequency of 0 set through the public fields means every step
		match self {
			Self::Progress { frequency, cb } if step % frequency.max(&1) == 0 => cb(step, timestep),
			Self::State { frequency, cb } if step % frequency.max(&1) == 0 => cb(step, timestep, state),
			_ => {}
		}
	}
}

/// Options for [`DDPM::sample`].
#[derive(Debug, Default)]
pub struct DDPMSamplingOptions {
	/// The seed of the random source. A fixed seed reproduces the same samples for the same schedule & predictor.
	pub seed: Option<u64>,
	/// An optional callback to call on every `frequency` steps of the reverse chain.
	pub callback: Option<DDPMSamplingCallback>
}

impl DDPMSamplingOptions {
	/// Set the seed to use when drawing noise.
	pub fn with_seed(mut self, seed: u64) -> Self {
		self.seed = Some(seed);
		self
	}

	/// Use a random seed, so that each run generates different samples.
	pub fn with_random_seed(mut self) -> Self {
		self.seed = None;
		self
	}

	/// Call `callback` with the step number & timestep every `frequency` steps.
	pub fn callback_progress<F>(mut self, frequency: usize, callback: F) -> Self
	where
		F: Fn(usize, usize) + 'static
	{
		self.callback = Some(DDPMSamplingCallback::Progress {
			frequency: frequency.max(1),
			cb: Box::new(callback)
		});
		self
	}

	/// Call `callback` with the step number, timestep & current state every `frequency` steps.
	pub fn callback_state<F>(mut self, frequency: usize, callback: F) -> Self
	where
		F: Fn(usize, usize, ArrayView2<'_, f32>) + 'static
	{
		self.callback = Some(DDPMSamplingCallback::State {
			frequency: frequency.max(1),
			cb: Box::new(callback)
		});
		self
	}
}

impl<P: NoisePredictor> DDPM<P> {
	/// Generates `shape.0` rows of `shape.1` features by ancestral sampling: starting from `z ~ N(0, I)`, the reverse
	/// process is applied for `t = N-1` down to `t = 1`, then `z_1` is mapped to the final sample with
	/// [`NoisePredictor::sample_x0_given_x1`].
	///
	/// # Errors
	/// Can error if the predictor fails or returns noise of the wrong shape, or if `input.batch` does not have
	/// `shape.0` entries.
	pub fn sample(&self, shape: (usize, usize), input: &PredictorInput<'_>, options: &DDPMSamplingOptions) -> Result<Array2<f32>> {
		let seed = options.seed.unwrap_or_else(|| rand::thread_rng().gen::<u64>());
		let mut rng = StdRng::seed_from_u64(seed);
		self.sample_using(shape, input, &mut rng, options.callback.as_ref())
	}

	/// Like [`DDPM::sample`], drawing noise from `rng`.
	///
	/// # Errors
	/// See [`DDPM::sample`].
	pub fn sample_using<R: Rng + ?Sized>(
		&self,
		shape: (usize, usize),
		input: &PredictorInput<'_>,
		rng: &mut R,
		callback: Option<&DDPMSamplingCallback>
	) -> Result<Array2<f32>> {
		let steps = self.steps();
		debug!(rows = shape.0, dims = shape.1, steps, "sampling from prior");

		let mut z_t = Array2::<f32>::random_using(shape, StandardNormal, rng);
		for (i, t) in (1..steps).rev().enumerate() {
			let t_discrete = Array1::from_elem(shape.0, t);
			z_t = self.p_sample(z_t.view(), t_discrete.view(), input, rng)?;
			trace!(t, "reverse step");

			if let Some(callback) = callback {
				callback.call(i, t, z_t.view());
			}
		}

		debug!(rows = shape.0, "finished reverse chain");
		Ok(self.model().sample_x0_given_x1(z_t, input.context))
	}
}

#[cfg(test)]
mod tests {
	use std::{cell::RefCell, rc::Rc};

	use ndarray::{ArrayView1, Axis};

	use super::*;
	use crate::{pipelines::tests::Recording, DDPMConfig, NoiseScheduleKind};

	struct Shifted;

	impl NoisePredictor for Shifted {
		fn predict(&self, z_t: ArrayView2<'_, f32>, _: ArrayView1<'_, f32>, _: &PredictorInput<'_>) -> anyhow::Result<Array2<f32>> {
			Ok(Array2::zeros(z_t.raw_dim()))
		}

		fn sample_x0_given_x1(&self, z_1: Array2<f32>, _: Option<ArrayView2<'_, f32>>) -> Array2<f32> {
			z_1 + 100.0
		}
	}

	#[test]
	fn visits_every_timestep_in_decreasing_order() {
		let ddpm = DDPM::new(Recording::default(), &DDPMConfig::default().with_steps(20)).unwrap();
		let samples = ddpm.sample((3, 2), &PredictorInput::default(), &DDPMSamplingOptions::default().with_seed(0)).unwrap();
		assert_eq!(samples.shape(), &[3, 2]);

		let seen = ddpm.model().seen.borrow();
		assert_eq!(seen.len(), 19);
		for (i, t) in seen.iter().enumerate() {
			let expected = (19 - i) as f32 / 20.0;
			assert!(t.iter().all(|&t| t == expected), "step {i}: {t:?}");
		}
	}

	#[test]
	fn same_seed_same_samples() {
		let ddpm = DDPM::new(Recording { value: 0.1, ..Default::default() }, &DDPMConfig::default().with_noise_schedule(NoiseScheduleKind::Cosine)).unwrap();
		let options = DDPMSamplingOptions::default().with_seed(1234);
		let a = ddpm.sample((8, 3), &PredictorInput::default(), &options).unwrap();
		let b = ddpm.sample((8, 3), &PredictorInput::default(), &options).unwrap();
		assert_eq!(a, b);

		let c = ddpm.sample((8, 3), &PredictorInput::default(), &DDPMSamplingOptions::default().with_seed(4321)).unwrap();
		assert_ne!(a, c);
	}

	#[test]
	fn terminal_projection_is_applied() {
		let ddpm = DDPM::new(Shifted, &DDPMConfig::default().with_steps(10)).unwrap();
		let samples = ddpm.sample((64, 1), &PredictorInput::default(), &DDPMSamplingOptions::default().with_seed(3)).unwrap();
		let mean = samples.mean_axis(Axis(0)).unwrap()[0];
		assert!(mean > 90.0, "{mean}");
	}

	#[test]
	fn single_step_schedule_returns_the_prior_draw() {
		let schedule = crate::NoiseSchedule::new(1, NoiseScheduleKind::Linear).unwrap();
		let ddpm = DDPM::with_schedule(Recording::default(), schedule);
		let mut rng = StdRng::seed_from_u64(8);
		let samples = ddpm.sample_using((2, 2), &PredictorInput::default(), &mut rng, None).unwrap();
		let prior = Array2::<f32>::random_using((2, 2), StandardNormal, &mut StdRng::seed_from_u64(8));
		assert_eq!(samples, prior);
		assert!(ddpm.model().seen.borrow().is_empty());
	}

	#[test]
	fn zero_frequency_callback_fires_every_step() {
		let calls = Rc::new(RefCell::new(0));
		let recorded = Rc::clone(&calls);
		let options = DDPMSamplingOptions {
			seed: Some(1),
			callback: Some(DDPMSamplingCallback::Progress {
				frequency: 0,
				cb: Box::new(move |_, _| *recorded.borrow_mut() += 1)
			})
		};

		let ddpm = DDPM::new(Recording::default(), &DDPMConfig::default().with_steps(6)).unwrap();
		ddpm.sample((1, 1), &PredictorInput::default(), &options).unwrap();
		assert_eq!(*calls.borrow(), 5);
	}

	#[test]
	fn callbacks_observe_the_chain() {
		let calls = Rc::new(RefCell::new(Vec::new()));
		let recorded = Rc::clone(&calls);
		let options = DDPMSamplingOptions::default()
			.with_seed(5)
			.callback_progress(4, move |step, t| recorded.borrow_mut().push((step, t)));

		let ddpm = DDPM::new(Recording::default(), &DDPMConfig::default().with_steps(10)).unwrap();
		ddpm.sample((1, 1), &PredictorInput::default(), &options).unwrap();
		assert_eq!(*calls.borrow(), vec![(0, 9), (4, 5), (8, 1)]);

		let shapes = Rc::new(RefCell::new(Vec::new()));
		let recorded = Rc::clone(&shapes);
		let options = DDPMSamplingOptions::default().callback_state(0, move |_, _, state| recorded.borrow_mut().push(state.shape().to_vec()));
		ddpm.sample((2, 3), &PredictorInput::default(), &options).unwrap();
		assert_eq!(shapes.borrow().len(), 9);
		assert!(shapes.borrow().iter().all(|s| s == &[2, 3]));
	}
}
