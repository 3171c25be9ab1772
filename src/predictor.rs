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

use ndarray::{Array2, ArrayView1, ArrayView2};

/// Optional structural & conditioning inputs forwarded untouched to a [`NoisePredictor`]. Any or none of these may be
/// present.
#[derive(Debug, Default, Clone, Copy)]
pub struct PredictorInput<'a> {
	/// Graph connectivity as a `[2, num_edges]` array of row indices.
	pub edge_index: Option<ArrayView2<'a, usize>>,
	/// Sample id of every row; rows with the same id belong to the same sample (e.g. the atoms of one molecule).
	pub batch: Option<ArrayView1<'a, usize>>,
	/// Additional context to condition on.
	pub context: Option<ArrayView2<'a, f32>>
}

impl<'a> PredictorInput<'a> {
	/// Set the graph connectivity.
	pub fn with_edge_index(mut self, edge_index: ArrayView2<'a, usize>) -> Self {
		self.edge_index = Some(edge_index);
		self
	}

	/// Set the batch indices.
	pub fn with_batch(mut self, batch: ArrayView1<'a, usize>) -> Self {
		self.batch = Some(batch);
		self
	}

	/// Set the conditioning context.
	pub fn with_context(mut self, context: ArrayView2<'a, f32>) -> Self {
		self.context = Some(context);
		self
	}
}

/// A learned function predicting the noise that was mixed into a diffused state.
///
/// The diffusion core never inspects the predictor; it only relies on this contract.
pub trait NoisePredictor {
	/// Predicts the noise in `z_t`.
	///
	/// - **`z_t`**: the noisy state, `[rows, dims]`.
	/// - **`t`**: the diffusion step of every row, normalized to `t / N`.
	/// - **`input`**: optional edges, batch indices & context.
	///
	/// The returned array must have the same shape as `z_t`.
	fn predict(&self, z_t: ArrayView2<'_, f32>, t: ArrayView1<'_, f32>, input: &PredictorInput<'_>) -> anyhow::Result<Array2<f32>>;

	/// Maps `z_1` to the final sample `z_0`. Approximates `p(z_0 | z_1)` with a Dirac delta by default; override to
	/// apply additional projections.
	fn sample_x0_given_x1(&self, z_1: Array2<f32>, _context: Option<ArrayView2<'_, f32>>) -> Array2<f32> {
		z_1
	}
}

impl<P: NoisePredictor + ?Sized> NoisePredictor for &P {
	fn predict(&self, z_t: ArrayView2<'_, f32>, t: ArrayView1<'_, f32>, input: &PredictorInput<'_>) -> anyhow::Result<Array2<f32>> {
		(**self).predict(z_t, t, input)
	}

	fn sample_x0_given_x1(&self, z_1: Array2<f32>, context: Option<ArrayView2<'_, f32>>) -> Array2<f32> {
		(**self).sample_x0_given_x1(z_1, context)
	}
}

impl<P: NoisePredictor + ?Sized> NoisePredictor for Box<P> {
	fn predict(&self, z_t: ArrayView2<'_, f32>, t: ArrayView1<'_, f32>, input: &PredictorInput<'_>) -> anyhow::Result<Array2<f32>> {
		(**self).predict(z_t, t, input)
	}

	fn sample_x0_given_x1(&self, z_1: Array2<f32>, context: Option<ArrayView2<'_, f32>>) -> Array2<f32> {
		(**self).sample_x0_given_x1(z_1, context)
	}
}
