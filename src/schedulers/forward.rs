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

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Ix2};
use ndarray_rand::{rand_distr::StandardNormal, RandomExt};
use rand::Rng;

use super::{gather, NoiseSchedule};
use crate::{broadcast_like, util::check_rows, ShapeError};

/// A draw from `q(z_t | z_0)`.
#[derive(Debug, Clone)]
pub struct ForwardSample {
	/// The noised state `z_t`.
	pub z_t: Array2<f32>,
	/// The exact noise mixed into `z_t`; the regression target of the noise predictor.
	pub epsilon: Array2<f32>
}

/// Broadcasts a per-row coefficient to `[rows, 1]` so it scales every column of `z` alike.
pub(crate) fn per_row(coef: Array1<f32>, z: &ArrayView2<'_, f32>) -> Result<Array2<f32>, ShapeError> {
	Ok(broadcast_like(coef.view(), Some(z))?.into_dimensionality::<Ix2>()?)
}

impl NoiseSchedule {
	/// Mean of `q(z_t | z_0)`: `sqrt(alpha_bars[t]) * z`, of shape `[rows, dims]`.
	///
	/// # Errors
	/// Can error if `t` does not have one entry per row of `z`, or if a timestep is out of this schedule's bounds.
	pub fn q_mean(&self, z: ArrayView2<'_, f32>, t: ArrayView1<'_, usize>) -> Result<Array2<f32>, ShapeError> {
		check_rows("t", z.nrows(), t.len())?;
		let sqrt_alpha_bars = per_row(gather(&self.sqrt_alpha_bars, t)?, &z)?;
		Ok(&sqrt_alpha_bars * &z)
	}

	/// Standard deviation of `q(z_t | z_0)`: `sqrt(1 - alpha_bars[t])`, of shape `[rows, 1]`. The noise is isotropic,
	/// so one value per row suffices.
	///
	/// # Errors
	/// Can error if `t` does not have one entry per row of `z`, or if a timestep is out of this schedule's bounds.
	pub fn q_std(&self, z: ArrayView2<'_, f32>, t: ArrayView1<'_, usize>) -> Result<Array2<f32>, ShapeError> {
		check_rows("t", z.nrows(), t.len())?;
		per_row(gather(&self.sqrt_one_minus_alpha_bars, t)?, &z)
	}

	/// Samples `z_t ~ q(z_t | z_0)`, returning the noised state along with the noise used to produce it.
	///
	/// ```
	/// # use ndarray::{array, Array2};
	/// # use rand::{rngs::StdRng, SeedableRng};
	/// # use pyke_ddpm::{NoiseSchedule, NoiseScheduleKind};
	/// let schedule = NoiseSchedule::new(1000, NoiseScheduleKind::Linear)?;
	/// let z = Array2::<f32>::zeros((3, 2));
	/// let sample = schedule.q_sample(z.view(), array![1, 500, 999].view(), &mut StdRng::seed_from_u64(42))?;
	/// assert_eq!(sample.z_t.shape(), &[3, 2]);
	/// assert_eq!(sample.epsilon.shape(), &[3, 2]);
	/// # Ok::<(), Box<dyn std::error::Error>>(())
	/// ```
	///
	/// # Errors
	/// Can error if `t` does not have one entry per row of `z`, or if a timestep is out of this schedule's bounds.
	pub fn q_sample<R: Rng + ?Sized>(&self, z: ArrayView2<'_, f32>, t: ArrayView1<'_, usize>, rng: &mut R) -> Result<ForwardSample, ShapeError> {
		let mean = self.q_mean(z, t)?;
		let std = self.q_std(z, t)?;
		let epsilon = Array2::<f32>::random_using(z.raw_dim(), StandardNormal, rng);
		let z_t = &epsilon * &std + &mean;
		Ok(ForwardSample { z_t, epsilon })
	}
}
