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

//! Diffusion pipelines: a [`DDPM`] ties a [`NoiseSchedule`] to a [`NoisePredictor`] for training and sampling.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;

use crate::{util::check_rows, DDPMConfig, DDPMError, NoisePredictor, NoiseSchedule, PredictorInput, Result, ScheduleError, ShapeError};

mod sampling;
mod training;

pub use self::sampling::{DDPMSamplingCallback, DDPMSamplingOptions};
pub use self::training::{reduce_losses, squared_error, LossReduction, TrainingSample};

/// A [denoising diffusion probabilistic model][ddpm].
///
/// The model owns its noise schedule for its whole lifetime; the schedule is built once at construction and never
/// recomputed.
///
/// ```
/// # use ndarray::{Array2, ArrayView1, ArrayView2};
/// # use pyke_ddpm::{DDPMConfig, DDPMSamplingOptions, NoisePredictor, NoiseScheduleKind, PredictorInput, DDPM};
/// struct Zero;
///
/// impl NoisePredictor for Zero {
/// 	fn predict(&self, z_t: ArrayView2<'_, f32>, _: ArrayView1<'_, f32>, _: &PredictorInput<'_>) -> anyhow::Result<Array2<f32>> {
/// 		Ok(Array2::zeros(z_t.raw_dim()))
/// 	}
/// }
///
/// let ddpm = DDPM::new(Zero, &DDPMConfig::default().with_steps(50).with_noise_schedule(NoiseScheduleKind::Cosine))?;
/// let samples = ddpm.sample((16, 2), &PredictorInput::default(), &DDPMSamplingOptions::default().with_seed(42))?;
/// assert_eq!(samples.shape(), &[16, 2]);
/// # Ok::<(), pyke_ddpm::DDPMError>(())
/// ```
///
/// [ddpm]: https://arxiv.org/abs/2006.11239
#[derive(Debug, Clone)]
pub struct DDPM<P> {
	model: P,
	schedule: NoiseSchedule,
	t_epsilon: f32
}

impl<P: NoisePredictor> DDPM<P> {
	/// Creates a new DDPM around `model`, building the noise schedule described by `config`.
	///
	/// # Errors
	/// Returns a [`ScheduleError`] if the schedule cannot be built; see [`NoiseSchedule::new`].
	pub fn new(model: P, config: &DDPMConfig) -> Result<Self, ScheduleError> {
		Ok(Self {
			model,
			schedule: config.build_schedule()?,
			t_epsilon: config.t_epsilon
		})
	}

	/// Creates a new DDPM around `model` with a pre-built schedule.
	pub fn with_schedule(model: P, schedule: NoiseSchedule) -> Self {
		Self {
			model,
			schedule,
			t_epsilon: DDPMConfig::default().t_epsilon
		}
	}

	/// Number of diffusion steps `N`.
	pub fn steps(&self) -> usize {
		self.schedule.len()
	}

	/// The noise schedule.
	pub fn schedule(&self) -> &NoiseSchedule {
		&self.schedule
	}

	/// The noise predictor.
	pub fn model(&self) -> &P {
		&self.model
	}

	/// Numerical floor reserved for continuous-time variants.
	pub fn t_epsilon(&self) -> f32 {
		self.t_epsilon
	}

	/// Queries the predictor with `t / N`, checking that the prediction lines up with `z`.
	pub(crate) fn predict(&self, z: ArrayView2<'_, f32>, t: ArrayView1<'_, usize>, input: &PredictorInput<'_>) -> Result<Array2<f32>> {
		check_rows("t", z.nrows(), t.len())?;
		if let Some(batch) = input.batch {
			check_rows("batch", z.nrows(), batch.len())?;
		}

		let n = self.steps() as f32;
		let t_normalized = t.mapv(|t| t as f32 / n);
		let epsilon_pred = self.model.predict(z, t_normalized.view(), input).map_err(DDPMError::Predictor)?;
		if epsilon_pred.shape() != z.shape() {
			return Err(ShapeError::PredictorOutput {
				expected: z.shape().to_vec(),
				actual: epsilon_pred.shape().to_vec()
			}
			.into());
		}
		Ok(epsilon_pred)
	}

	/// Mean of `p(z_{t-1} | z_t)`, using the predictor's noise estimate for `z`.
	///
	/// # Errors
	/// Can error if the predictor fails, or if `t`, `input.batch` or the prediction do not line up with `z`.
	pub fn p_mean(&self, z: ArrayView2<'_, f32>, t: ArrayView1<'_, usize>, input: &PredictorInput<'_>) -> Result<Array2<f32>> {
		let epsilon_pred = self.predict(z, t, input)?;
		Ok(self.schedule.posterior_mean(z, t, epsilon_pred.view())?)
	}

	/// Standard deviation of `p(z_{t-1} | z_t)`, of shape `[rows, 1]`.
	///
	/// # Errors
	/// Can error if `t` does not line up with `z`.
	pub fn p_std(&self, z: ArrayView2<'_, f32>, t: ArrayView1<'_, usize>) -> Result<Array2<f32>> {
		Ok(self.schedule.posterior_std(z, t)?)
	}

	/// Draws `z_{t-1} ~ p(z_{t-1} | z_t)`.
	///
	/// # Errors
	/// Can error if the predictor fails, or if `t`, `input.batch` or the prediction do not line up with `z`.
	pub fn p_sample<R: Rng + ?Sized>(&self, z: ArrayView2<'_, f32>, t: ArrayView1<'_, usize>, input: &PredictorInput<'_>, rng: &mut R) -> Result<Array2<f32>> {
		let epsilon_pred = self.predict(z, t, input)?;
		Ok(self.schedule.reverse_step(z, t, epsilon_pred.view(), rng)?)
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use std::cell::RefCell;

	use approx::assert_relative_eq;
	use ndarray::{array, Array1};
	use rand::{rngs::StdRng, SeedableRng};

	use super::*;
	use crate::NoiseScheduleKind;

	/// Predicts a constant noise and remembers every normalized timestep it was queried with.
	#[derive(Default)]
	pub(crate) struct Recording {
		pub value: f32,
		pub seen: RefCell<Vec<Array1<f32>>>
	}

	impl NoisePredictor for Recording {
		fn predict(&self, z_t: ArrayView2<'_, f32>, t: ArrayView1<'_, f32>, _: &PredictorInput<'_>) -> anyhow::Result<Array2<f32>> {
			self.seen.borrow_mut().push(t.to_owned());
			Ok(Array2::from_elem(z_t.raw_dim(), self.value))
		}
	}

	struct WrongShape;

	impl NoisePredictor for WrongShape {
		fn predict(&self, z_t: ArrayView2<'_, f32>, _: ArrayView1<'_, f32>, _: &PredictorInput<'_>) -> anyhow::Result<Array2<f32>> {
			Ok(Array2::zeros((z_t.nrows(), z_t.ncols() + 1)))
		}
	}

	struct Failing;

	impl NoisePredictor for Failing {
		fn predict(&self, _: ArrayView2<'_, f32>, _: ArrayView1<'_, f32>, _: &PredictorInput<'_>) -> anyhow::Result<Array2<f32>> {
			anyhow::bail!("out of memory")
		}
	}

	#[test]
	fn predictor_sees_normalized_timesteps() {
		let ddpm = DDPM::new(Recording::default(), &DDPMConfig::default()).unwrap();
		let z = Array2::<f32>::zeros((3, 2));
		ddpm.p_mean(z.view(), array![1, 500, 999].view(), &PredictorInput::default()).unwrap();

		let seen = ddpm.model().seen.borrow();
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0], array![0.001_f32, 0.5, 0.999]);
	}

	#[test]
	fn p_mean_uses_the_prediction() {
		let model = Recording { value: 0.5, ..Default::default() };
		let ddpm = DDPM::new(&model, &DDPMConfig::default().with_steps(100)).unwrap();
		let z = array![[1.0_f32, 2.0]];
		let t = array![40];
		let mean = ddpm.p_mean(z.view(), t.view(), &PredictorInput::default()).unwrap();
		let expected = ddpm.schedule().posterior_mean(z.view(), t.view(), Array2::from_elem((1, 2), 0.5).view()).unwrap();
		assert_eq!(mean, expected);
		assert_eq!(model.seen.borrow().len(), 1);
	}

	#[test]
	fn p_std_is_sqrt_beta() {
		let ddpm = DDPM::new(Recording::default(), &DDPMConfig::default()).unwrap();
		let std = ddpm.p_std(Array2::<f32>::zeros((2, 5)).view(), array![3, 900].view()).unwrap();
		assert_eq!(std.shape(), &[2, 1]);
		assert_relative_eq!(std[[1, 0]], ddpm.schedule().betas()[900].sqrt(), max_relative = 1e-6);
	}

	#[test]
	fn p_sample_is_reproducible_for_a_seed() {
		let ddpm = DDPM::new(Recording::default(), &DDPMConfig::default()).unwrap();
		let z = Array2::<f32>::ones((4, 3));
		let t = Array1::from_elem(4, 10);
		let a = ddpm.p_sample(z.view(), t.view(), &PredictorInput::default(), &mut StdRng::seed_from_u64(11)).unwrap();
		let b = ddpm.p_sample(z.view(), t.view(), &PredictorInput::default(), &mut StdRng::seed_from_u64(11)).unwrap();
		assert_eq!(a, b);
		assert_eq!(a.shape(), &[4, 3]);
	}

	#[test]
	fn wrong_prediction_shape_is_an_error() {
		let ddpm = DDPM::new(WrongShape, &DDPMConfig::default()).unwrap();
		let err = ddpm.p_mean(Array2::<f32>::zeros((2, 2)).view(), array![1, 1].view(), &PredictorInput::default()).unwrap_err();
		assert!(matches!(err, DDPMError::Shape(ShapeError::PredictorOutput { .. })));
	}

	#[test]
	fn predictor_failure_is_propagated() {
		let ddpm = DDPM::new(Failing, &DDPMConfig::default()).unwrap();
		let err = ddpm.p_mean(Array2::<f32>::zeros((1, 1)).view(), array![1].view(), &PredictorInput::default()).unwrap_err();
		assert!(matches!(err, DDPMError::Predictor(_)));
		assert!(err.to_string().contains("out of memory"));
	}

	#[test]
	fn batch_must_cover_every_row() {
		let ddpm = DDPM::new(Recording::default(), &DDPMConfig::default()).unwrap();
		let batch = array![0, 0];
		let err = ddpm
			.p_mean(Array2::<f32>::zeros((3, 1)).view(), array![1, 1, 1].view(), &PredictorInput::default().with_batch(batch.view()))
			.unwrap_err();
		assert!(matches!(err, DDPMError::Shape(ShapeError::RowMismatch { what: "batch", expected: 3, actual: 2 })));
	}

	#[test]
	fn cosine_config_builds_cosine_schedule() {
		let ddpm = DDPM::new(Recording::default(), &DDPMConfig::default().with_noise_schedule(NoiseScheduleKind::Cosine)).unwrap();
		assert_eq!(ddpm.steps(), 1000);
		assert_relative_eq!(ddpm.schedule().alpha_bars()[0], 1.0);
	}

	#[test]
	fn zero_steps_fail_construction() {
		assert!(matches!(DDPM::new(Recording::default(), &DDPMConfig::default().with_steps(0)), Err(ScheduleError::NoSteps)));
	}
}
