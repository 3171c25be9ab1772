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

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use num_traits::{Float, FromPrimitive};
use rand::Rng;
use tracing::trace;

use super::DDPM;
use crate::{util::check_rows, ForwardSample, NoisePredictor, PredictorInput, Result, ScheduleError, ShapeError};

/// A training example drawn from the forward process.
#[derive(Debug, Clone)]
pub struct TrainingSample {
	/// The noised state `z_t`, `[rows, dims]`.
	pub z_t: Array2<f32>,
	/// The noise mixed into `z_t`; the regression target.
	pub epsilon: Array2<f32>,
	/// The diffusion step of every row.
	pub t: Array1<usize>,
	/// The diffusion step drawn for every sample id; `t[i] == t_per_sample[batch[i]]`.
	pub t_per_sample: Array1<usize>
}

/// How per-row losses are reduced. [`DDPM::losses`] never reduces on its own; pass its output through
/// [`reduce_losses`] to pick a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossReduction {
	/// Keep one loss per row.
	#[default]
	None,
	/// Average over all rows (e.g. over all atoms in the batch). Produces a single value.
	Mean,
	/// Sum the rows of every sample, producing one loss per sample id.
	SumPerSample,
	/// Average the rows of every sample, producing one loss per sample id.
	MeanPerSample
}

/// Squared error between predicted & true noise, summed over the feature axis. Produces one value per row.
///
/// # Errors
/// Returns [`ShapeError::PredictorOutput`] if the arrays differ in shape.
pub fn squared_error(epsilon_pred: ArrayView2<'_, f32>, epsilon: ArrayView2<'_, f32>) -> Result<Array1<f32>, ShapeError> {
	if epsilon_pred.shape() != epsilon.shape() {
		return Err(ShapeError::PredictorOutput {
			expected: epsilon.shape().to_vec(),
			actual: epsilon_pred.shape().to_vec()
		});
	}

	let mut losses = Array1::<f32>::zeros(epsilon.nrows());
	Zip::from(&mut losses)
		.and(epsilon_pred.rows())
		.and(epsilon.rows())
		.par_for_each(|loss, pred, target| {
			*loss = pred.iter().zip(target).map(|(p, e)| (p - e).powi(2)).sum();
		});
	Ok(losses)
}

/// Reduces per-row losses according to `reduction`.
///
/// ```
/// # use ndarray::array;
/// # use pyke_ddpm::{reduce_losses, LossReduction};
/// let losses = array![1.0_f32, 3.0, 5.0];
/// let batch = array![0, 0, 1];
/// assert_eq!(reduce_losses(losses.view(), Some(batch.view()), LossReduction::SumPerSample)?, array![4.0_f32, 5.0]);
/// assert_eq!(reduce_losses(losses.view(), Some(batch.view()), LossReduction::MeanPerSample)?, array![2.0_f32, 5.0]);
/// assert_eq!(reduce_losses(losses.view(), None, LossReduction::Mean)?, array![3.0_f32]);
/// # Ok::<(), pyke_ddpm::ShapeError>(())
/// ```
///
/// # Errors
/// Per-sample reductions fail if `batch` is missing or does not have one entry per loss.
pub fn reduce_losses<A>(losses: ArrayView1<'_, A>, batch: Option<ArrayView1<'_, usize>>, reduction: LossReduction) -> Result<Array1<A>, ShapeError>
where
	A: Float + FromPrimitive
{
	match reduction {
		LossReduction::None => Ok(losses.to_owned()),
		LossReduction::Mean => Ok(Array1::from_elem(1, losses.mean().unwrap_or_else(A::zero))),
		LossReduction::SumPerSample | LossReduction::MeanPerSample => {
			let batch = batch.ok_or(ShapeError::MissingBatch)?;
			check_rows("batch", losses.len(), batch.len())?;

			let num_samples = num_samples(batch);
			let mut sums = Array1::<A>::zeros(num_samples);
			let mut counts = vec![0_usize; num_samples];
			for (&loss, &sample) in losses.iter().zip(batch) {
				sums[sample] = sums[sample] + loss;
				counts[sample] += 1;
			}

			if reduction == LossReduction::MeanPerSample {
				for (sum, &count) in sums.iter_mut().zip(&counts) {
					if count > 0 {
						*sum = *sum / A::from_usize(count).unwrap_or_else(A::one);
					}
				}
			}
			Ok(sums)
		}
	}
}

pub(crate) fn num_samples(batch: ArrayView1<'_, usize>) -> usize {
	batch.iter().max().map_or(0, |&max| max + 1)
}

impl<P: NoisePredictor> DDPM<P> {
	/// Draws one timestep uniformly from `[1, N-1]` per sample id in `batch`, returning `(per_row, per_sample)`.
	fn sample_timesteps<R: Rng + ?Sized>(&self, batch: ArrayView1<'_, usize>, rng: &mut R) -> Result<(Array1<usize>, Array1<usize>), ScheduleError> {
		let steps = self.steps();
		if steps < 2 {
			return Err(ScheduleError::TooShort(steps));
		}

		let t_per_sample = (0..num_samples(batch)).map(|_| rng.gen_range(1..steps)).collect::<Array1<_>>();
		let t = batch.mapv(|sample| t_per_sample[sample]);
		Ok((t, t_per_sample))
	}

	/// Draws a training example: concatenates `x` and `h` (if given) column-wise into `z`, draws one timestep per
	/// sample in `batch`, and diffuses `z` to those timesteps.
	///
	/// # Errors
	/// Can error if:
	/// - `batch` is missing, or `batch` or `h` do not have one entry per row of `x`
	/// - the schedule has fewer than 2 steps
	pub fn training_sample<R: Rng + ?Sized>(
		&self,
		x: ArrayView2<'_, f32>,
		batch: Option<ArrayView1<'_, usize>>,
		h: Option<ArrayView2<'_, f32>>,
		rng: &mut R
	) -> Result<TrainingSample> {
		let z = match h {
			Some(h) => {
				check_rows("h", x.nrows(), h.nrows())?;
				concatenate![Axis(1), x, h]
			}
			None => x.to_owned()
		};

		let batch = batch.ok_or(ShapeError::MissingBatch)?;
		check_rows("batch", z.nrows(), batch.len())?;
		let (t, t_per_sample) = self.sample_timesteps(batch, rng)?;
		trace!(rows = z.nrows(), samples = t_per_sample.len(), "drew training timesteps");

		let ForwardSample { z_t, epsilon } = self.schedule().q_sample(z.view(), t.view(), rng)?;
		Ok(TrainingSample { z_t, epsilon, t, t_per_sample })
	}

	/// Computes the uniformly weighted DDPM loss for a batch of samples.
	///
	/// - **`x`**: data to diffuse, `[rows, dims]`.
	/// - **`batch`**: sample id of every row; rows of one sample share a timestep.
	/// - **`h`**: additional per-row features to diffuse alongside `x` (e.g. one-hot atom types).
	/// - **`context`**: additional context for conditioning, forwarded to the predictor.
	/// - **`edge_index`**: graph connectivity, forwarded to the predictor.
	///
	/// Returns the squared noise-prediction error of every row, **unreduced**: whether to average over rows or over
	/// samples is up to the caller; see [`reduce_losses`].
	///
	/// # Errors
	/// Can error if:
	/// - `batch` is missing, or `batch` or `h` do not have one entry per row of `x`
	/// - the schedule has fewer than 2 steps
	/// - the predictor fails, or returns noise of the wrong shape
	pub fn losses<'a, R: Rng + ?Sized>(
		&self,
		x: ArrayView2<'_, f32>,
		batch: Option<ArrayView1<'a, usize>>,
		h: Option<ArrayView2<'_, f32>>,
		context: Option<ArrayView2<'a, f32>>,
		edge_index: Option<ArrayView2<'a, usize>>,
		rng: &mut R
	) -> Result<Array1<f32>> {
		let TrainingSample { z_t, epsilon, t, .. } = self.training_sample(x, batch, h, rng)?;

		let input = PredictorInput { edge_index, batch, context };
		let epsilon_pred = self.predict(z_t.view(), t.view(), &input)?;

		Ok(squared_error(epsilon_pred.view(), epsilon.view())?)
	}
}
