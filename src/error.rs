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

use thiserror::Error;

/// Errors raised while building a [`NoiseSchedule`](crate::NoiseSchedule). These are fatal; a model cannot be
/// constructed from a schedule that fails validation.
#[derive(Debug, Error)]
pub enum ScheduleError {
	/// The requested schedule kind is not one of `linear` or `cosine`.
	#[error("unknown noise schedule type `{0}` (expected `linear` or `cosine`)")]
	UnknownKind(String),
	/// A schedule needs at least one diffusion step.
	#[error("number of diffusion steps must be >0")]
	NoSteps,
	/// Timesteps are drawn from `[1, N-1]`, which is empty for fewer than 2 steps.
	#[error("training needs at least 2 diffusion steps, this schedule has {0}")]
	TooShort(usize),
	/// An explicitly provided beta is not in `[0, 1)`.
	#[error("betas[{index}] = {value} is outside of [0, 1)")]
	BetaOutOfRange {
		/// Offending timestep.
		index: usize,
		/// Offending value.
		value: f64
	},
	/// `alpha_bars` is not the running product of `alphas`.
	#[error("alpha_bars[{index}] = {actual} does not match the cumulative product of alphas ({expected})")]
	CumprodMismatch {
		/// First timestep at which the invariant breaks.
		index: usize,
		/// Running product of `alphas[..=index]`.
		expected: f64,
		/// Stored `alpha_bars[index]`.
		actual: f64
	},
	/// The stored `f32` `alpha_bars` stop strictly decreasing or fall below the smallest normal `f32`, which happens
	/// when a schedule has too many steps.
	#[error("stored alpha_bars[{index}] = {value} is not a strictly decreasing normal f32; use fewer diffusion steps")]
	Degenerate {
		/// First timestep at which the stored schedule degenerates.
		index: usize,
		/// Stored `alpha_bars[index]`.
		value: f32
	}
}

/// Errors raised when the arrays passed to an operation do not line up.
#[derive(Debug, Error)]
pub enum ShapeError {
	/// Two arrays that must describe the same rows have different row counts.
	#[error("`{what}` has {actual} rows, expected {expected}")]
	RowMismatch {
		/// Name of the mismatched input.
		what: &'static str,
		/// Row count of the state.
		expected: usize,
		/// Row count of the mismatched input.
		actual: usize
	},
	/// Batch indices are needed to draw one timestep per sample, but none were given.
	#[error("batch indices are required to assign timesteps")]
	MissingBatch,
	/// A coefficient cannot be broadcast against a reference of lower rank.
	#[error("cannot broadcast a rank {coef} coefficient against a rank {reference} array")]
	RankMismatch {
		/// Rank of the coefficient.
		coef: usize,
		/// Rank of the reference.
		reference: usize
	},
	/// The predictor returned noise of a different shape than the state it was given.
	#[error("predictor returned shape {actual:?}, expected {expected:?}")]
	PredictorOutput {
		/// Shape of the state.
		expected: Vec<usize>,
		/// Shape of the prediction.
		actual: Vec<usize>
	},
	/// A timestep index is outside of the schedule.
	#[error("timestep {t} is out of this schedule's bounds (N = {steps})")]
	TimestepOutOfRange {
		/// Offending timestep.
		t: usize,
		/// Length of the schedule.
		steps: usize
	},
	/// An `ndarray` reshape failed.
	#[error(transparent)]
	Layout(#[from] ndarray::ShapeError)
}

/// Error returned by [`DDPM`](crate::DDPM) operations.
#[derive(Debug, Error)]
pub enum DDPMError {
	#[error(transparent)]
	#[allow(missing_docs)]
	Schedule(#[from] ScheduleError),
	#[error(transparent)]
	#[allow(missing_docs)]
	Shape(#[from] ShapeError),
	/// The external noise predictor failed.
	#[error("noise predictor failed: {0}")]
	Predictor(anyhow::Error)
}

/// Result type used throughout the crate.
pub type Result<T, E = DDPMError> = std::result::Result<T, E>;
