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

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use ndarray_rand::{rand_distr::StandardNormal, RandomExt};
use rand::Rng;

use super::{forward::per_row, gather, NoiseSchedule};
use crate::{util::check_rows, ShapeError};

impl NoiseSchedule {
	/// Mean of `p(z_{t-1} | z_t)` given the predicted noise:
	///
	/// `(z - betas[t] / sqrt(1 - alpha_bars[t]) * epsilon_pred) / sqrt(alphas[t])`
	///
	/// # Errors
	/// Can error if `t` or `epsilon_pred` do not line up with `z`, or if a timestep is out of this schedule's bounds.
	pub fn posterior_mean(&self, z: ArrayView2<'_, f32>, t: ArrayView1<'_, usize>, epsilon_pred: ArrayView2<'_, f32>) -> Result<Array2<f32>, ShapeError> {
		check_rows("t", z.nrows(), t.len())?;
		if epsilon_pred.shape() != z.shape() {
			return Err(ShapeError::PredictorOutput {
				expected: z.shape().to_vec(),
				actual: epsilon_pred.shape().to_vec()
			});
		}

		let betas = gather(&self.betas, t)?;
		let sqrt_one_minus_alpha_bars = gather(&self.sqrt_one_minus_alpha_bars, t)?;
		// a step that carries no noise (beta = 0, alpha_bar = 1) has nothing to remove
		let mut epsilon_coef = Array1::<f32>::zeros(t.len());
		Zip::from(&mut epsilon_coef)
			.and(&betas)
			.and(&sqrt_one_minus_alpha_bars)
			.for_each(|c, &beta, &s| {
				*c = if s > 0.0 { beta / s } else { 0.0 };
			});

		let epsilon_coef = per_row(epsilon_coef, &z)?;
		let sqrt_alphas = per_row(gather(&self.sqrt_alphas, t)?, &z)?;
		Ok(&(&z - &(&epsilon_coef * &epsilon_pred)) / &sqrt_alphas)
	}

	/// Standard deviation of `p(z_{t-1} | z_t)`: the fixed `sqrt(betas[t])`, of shape `[rows, 1]`.
	///
	/// # Errors
	/// Can error if `t` does not have one entry per row of `z`, or if a timestep is out of this schedule's bounds.
	pub fn posterior_std(&self, z: ArrayView2<'_, f32>, t: ArrayView1<'_, usize>) -> Result<Array2<f32>, ShapeError> {
		check_rows("t", z.nrows(), t.len())?;
		per_row(gather(&self.sqrt_betas, t)?, &z)
	}

	/// Draws `z_{t-1} ~ p(z_{t-1} | z_t)` given the model's noise prediction for `z_t`.
	///
	/// # Errors
	/// Can error if `t` or `epsilon_pred` do not line up with `z`, or if a timestep is out of this schedule's bounds.
	pub fn reverse_step<R: Rng + ?Sized>(
		&self,
		z: ArrayView2<'_, f32>,
		t: ArrayView1<'_, usize>,
		epsilon_pred: ArrayView2<'_, f32>,
		rng: &mut R
	) -> Result<Array2<f32>, ShapeError> {
		let mean = self.posterior_mean(z, t, epsilon_pred)?;
		let std = self.posterior_std(z, t)?;
		let epsilon = Array2::<f32>::random_using(z.raw_dim(), StandardNormal, rng);
		Ok(&epsilon * &std + &mean)
	}
}

#[cfg(test)]
mod tests {
	use approx::assert_relative_eq;
	use ndarray::{array, Array1};
	use rand::{rngs::StdRng, SeedableRng};

	use super::*;
	use crate::NoiseScheduleKind;

	#[test]
	fn posterior_mean_matches_formula() {
		let schedule = NoiseSchedule::new(1000, NoiseScheduleKind::Linear).unwrap();
		let z = array![[0.3_f32, -1.2], [2.0, 0.7]];
		let epsilon_pred = array![[0.1_f32, 0.4], [-0.5, 1.5]];
		let t = array![1, 640];
		let mean = schedule.posterior_mean(z.view(), t.view(), epsilon_pred.view()).unwrap();
		assert_eq!(mean.shape(), &[2, 2]);

		for row in 0..2 {
			let beta = f64::from(schedule.betas()[t[row]]);
			let alpha = f64::from(schedule.alphas()[t[row]]);
			let alpha_bar = f64::from(schedule.alpha_bars()[t[row]]);
			for col in 0..2 {
				let expected = (f64::from(z[[row, col]]) - beta / (1.0 - alpha_bar).sqrt() * f64::from(epsilon_pred[[row, col]])) / alpha.sqrt();
				assert_relative_eq!(f64::from(mean[[row, col]]), expected, max_relative = 1e-3);
			}
		}
	}

	#[test]
	fn posterior_std_is_sqrt_beta() {
		let schedule = NoiseSchedule::new(100, NoiseScheduleKind::Cosine).unwrap();
		let z = Array2::<f32>::zeros((3, 4));
		let t = array![1, 50, 99];
		let std = schedule.posterior_std(z.view(), t.view()).unwrap();
		assert_eq!(std.shape(), &[3, 1]);
		for (row, &t) in t.iter().enumerate() {
			assert_relative_eq!(std[[row, 0]], schedule.betas()[t].sqrt(), max_relative = 1e-5);
		}
	}

	#[test]
	fn noiseless_reverse_mean_keeps_the_state() {
		let schedule = NoiseSchedule::from_betas(Array1::from_elem(10, 1e-6_f32).view()).unwrap();
		let z = array![[1.0_f32, -2.0], [0.5, 4.0]];
		let epsilon_pred = array![[0.3_f32, -0.1], [1.0, 0.2]];
		let mean = schedule.posterior_mean(z.view(), array![5, 5].view(), epsilon_pred.view()).unwrap();
		for (a, b) in mean.iter().zip(z.iter()) {
			assert!((a - b).abs() < 1e-2, "{a} vs {b}");
		}
	}

	#[test]
	fn step_without_noise_component_is_the_mean() {
		// betas[0] of a cosine schedule is exactly 0
		let schedule = NoiseSchedule::new(10, NoiseScheduleKind::Cosine).unwrap();
		let z = array![[1.5_f32, -0.5]];
		let next = schedule.reverse_step(z.view(), array![0].view(), array![[9.0_f32, 9.0]].view(), &mut StdRng::seed_from_u64(0)).unwrap();
		assert_eq!(next, z);
	}

	#[test]
	fn prediction_shape_is_checked() {
		let schedule = NoiseSchedule::new(10, NoiseScheduleKind::Linear).unwrap();
		let z = Array2::<f32>::zeros((2, 3));
		let err = schedule.posterior_mean(z.view(), array![1, 1].view(), Array2::<f32>::zeros((2, 2)).view()).unwrap_err();
		assert!(matches!(err, ShapeError::PredictorOutput { .. }));
	}
}
