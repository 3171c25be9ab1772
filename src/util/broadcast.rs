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

use ndarray::{ArrayBase, ArrayD, ArrayView, Axis, Data, Dimension};

use crate::ShapeError;

/// Appends trailing axes of length 1 to `coef` so that it can be broadcast over `like`.
///
/// A per-row coefficient of shape `[rows]` broadcast like a `[rows, dims]` state becomes `[rows, 1]`. If `like` is
/// `None`, `coef` is returned with its shape untouched.
///
/// ```
/// # use ndarray::{array, Array2};
/// # use pyke_ddpm::broadcast_like;
/// let coef = array![0.5_f32, 2.0];
/// let state = Array2::<f32>::ones((2, 3));
/// let coef = broadcast_like(coef.view(), Some(&state))?;
/// assert_eq!(coef.shape(), &[2, 1]);
/// assert_eq!(&coef * &state.into_dyn(), array![[0.5_f32, 0.5, 0.5], [2.0, 2.0, 2.0]].into_dyn());
/// # Ok::<(), pyke_ddpm::ShapeError>(())
/// ```
///
/// # Errors
/// Returns [`ShapeError::RankMismatch`] if `like` has a lower rank than `coef`.
pub fn broadcast_like<A, D, S, E>(coef: ArrayView<'_, A, D>, like: Option<&ArrayBase<S, E>>) -> Result<ArrayD<A>, ShapeError>
where
	A: Clone,
	D: Dimension,
	S: Data,
	E: Dimension
{
	let mut coef = coef.to_owned().into_dyn();
	let Some(like) = like else {
		return Ok(coef);
	};
	if like.ndim() < coef.ndim() {
		return Err(ShapeError::RankMismatch {
			coef: coef.ndim(),
			reference: like.ndim()
		});
	}
	while coef.ndim() < like.ndim() {
		let axis = Axis(coef.ndim());
		coef = coef.insert_axis(axis);
	}
	Ok(coef)
}

#[cfg(test)]
mod tests {
	use ndarray::{array, Array1, Array2, Array3};

	use super::*;

	#[test]
	fn none_is_identity() {
		let coef = array![1.0_f32, 2.0, 3.0];
		let out = broadcast_like::<_, _, ndarray::OwnedRepr<f32>, ndarray::Ix2>(coef.view(), None).unwrap();
		assert_eq!(out, coef.into_dyn());
	}

	#[test]
	fn rank_one_against_rank_two() {
		let coef = Array1::<f32>::ones(4);
		let like = Array2::<f32>::zeros((4, 7));
		let out = broadcast_like(coef.view(), Some(&like)).unwrap();
		assert_eq!(out.shape(), &[4, 1]);
	}

	#[test]
	fn rank_one_against_rank_three() {
		let coef = array![1.0_f32, 2.0];
		let like = Array3::<f32>::zeros((2, 3, 5));
		let out = broadcast_like(coef.view(), Some(&like)).unwrap();
		assert_eq!(out.shape(), &[2, 1, 1]);
		assert_eq!(out[[1, 0, 0]], 2.0);
	}

	#[test]
	fn lower_rank_reference_is_rejected() {
		let coef = Array2::<f32>::ones((2, 2));
		let like = Array1::<f32>::ones(2);
		let err = broadcast_like(coef.view(), Some(&like)).unwrap_err();
		assert!(matches!(err, ShapeError::RankMismatch { coef: 2, reference: 1 }));
	}
}
