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

//! Noise schedules and the closed-form diffusion processes built on top of them.
//!
//! * A [`NoiseSchedule`] fixes how much signal and noise are mixed at every diffusion step `t`: the `betas`, the
//!   `alphas = 1 - betas`, and their running product `alpha_bars`.
//! * The forward process `q(z_t | z_0)` corrupts clean data in closed form; see [`NoiseSchedule::q_sample`].
//! * The reverse process `p(z_{t-1} | z_t)` undoes one step given the model's noise prediction; see
//!   [`NoiseSchedule::reverse_step`].

use std::{f64::consts::FRAC_PI_2, fmt, str::FromStr};

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ScheduleError, ShapeError};

mod forward;
mod reverse;

pub use self::forward::ForwardSample;

/// First beta of the linear schedule.
pub const LINEAR_BETA_MIN: f64 = 1e-4;
/// Last beta of the linear schedule.
pub const LINEAR_BETA_MAX: f64 = 0.02;
/// Offset `s` of the cosine schedule, keeping `betas` from vanishing near `t = 0`.
pub const COSINE_OFFSET: f64 = 0.001;

const CUMPROD_RTOL: f64 = 1e-5;
const CUMPROD_ATOL: f64 = 1e-8;

/// A mapping from a diffusion step count to a sequence of betas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoiseScheduleKind {
	/// Betas linearly spaced between `1e-4` and `0.02`.
	Linear,
	/// `alpha_bars` follow a squared cosine, from [Improved DDPM][iddpm].
	///
	/// [iddpm]: https://arxiv.org/abs/2102.09672
	Cosine
}

impl Default for NoiseScheduleKind {
	fn default() -> Self {
		Self::Linear
	}
}

impl FromStr for NoiseScheduleKind {
	type Err = ScheduleError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"linear" => Ok(Self::Linear),
			"cosine" => Ok(Self::Cosine),
			_ => Err(ScheduleError::UnknownKind(s.to_string()))
		}
	}
}

impl fmt::Display for NoiseScheduleKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Linear => "linear",
			Self::Cosine => "cosine"
		})
	}
}

/// The `betas`, `alphas` and `alpha_bars` of a discrete diffusion process with `N` steps.
///
/// Coefficients are computed once in double precision, validated, and frozen as `f32`. A schedule is never mutated
/// after construction, so it can be shared freely between threads.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
	betas: Array1<f32>,
	alphas: Array1<f32>,
	alpha_bars: Array1<f32>,
	sqrt_betas: Array1<f32>,
	sqrt_alphas: Array1<f32>,
	sqrt_alpha_bars: Array1<f32>,
	sqrt_one_minus_alpha_bars: Array1<f32>
}

impl NoiseSchedule {
	/// Creates a new schedule of `steps` diffusion steps.
	///
	/// ```
	/// # use pyke_ddpm::{NoiseSchedule, NoiseScheduleKind};
	/// let schedule = NoiseSchedule::new(1000, NoiseScheduleKind::Cosine)?;
	/// assert_eq!(schedule.len(), 1000);
	/// assert!((schedule.alpha_bars()[0] - 1.0).abs() < 1e-6);
	/// # Ok::<(), pyke_ddpm::ScheduleError>(())
	/// ```
	///
	/// # Errors
	/// Can error if:
	/// - `steps` is 0
	/// - the resulting `alpha_bars` are not the cumulative product of `alphas`
	/// - `steps` is so large that the stored `alpha_bars` stop decreasing or underflow
	pub fn new(steps: usize, kind: NoiseScheduleKind) -> Result<Self, ScheduleError> {
		if steps == 0 {
			return Err(ScheduleError::NoSteps);
		}

		let (betas, alphas, alpha_bars) = match kind {
			NoiseScheduleKind::Linear => {
				let betas = Array1::linspace(LINEAR_BETA_MIN, LINEAR_BETA_MAX, steps);
				let alphas = 1.0 - &betas;
				let alpha_bars = cumprod(alphas.view());
				(betas, alphas, alpha_bars)
			}
			NoiseScheduleKind::Cosine => {
				let n = steps as f64;
				let cos2 = |t: f64| (((t / n + COSINE_OFFSET) / (1.0 + COSINE_OFFSET)) * FRAC_PI_2).cos().powi(2);
				let f0 = cos2(0.0);

				let alpha_bars = (0..steps).map(|t| cos2(t as f64) / f0).collect::<Array1<_>>();
				let mut alphas = alpha_bars.clone();
				for t in 1..steps {
					alphas[t] = alpha_bars[t] / alpha_bars[t - 1];
				}
				let betas = 1.0 - &alphas;
				(betas, alphas, alpha_bars)
			}
		};

		let schedule = Self::assemble(betas.view(), alphas.view(), alpha_bars.view())?;
		debug!(%kind, steps, alpha_bar_last = schedule.alpha_bars[steps - 1], "built noise schedule");
		Ok(schedule)
	}

	/// Creates a schedule from explicit betas, e.g. ones a model was trained with.
	///
	/// # Errors
	/// Can error if:
	/// - `betas` is empty
	/// - any beta is outside of `[0, 1)`, or a beta after the first is `0`
	/// - the stored `alpha_bars` stop decreasing or underflow
	pub fn from_betas(betas: ArrayView1<'_, f32>) -> Result<Self, ScheduleError> {
		if betas.is_empty() {
			return Err(ScheduleError::NoSteps);
		}
		let betas = betas.mapv(f64::from);
		let alphas = 1.0 - &betas;
		let alpha_bars = cumprod(alphas.view());
		let schedule = Self::assemble(betas.view(), alphas.view(), alpha_bars.view())?;
		debug!(steps = schedule.len(), "built noise schedule from explicit betas");
		Ok(schedule)
	}

	fn assemble(betas: ArrayView1<'_, f64>, alphas: ArrayView1<'_, f64>, alpha_bars: ArrayView1<'_, f64>) -> Result<Self, ScheduleError> {
		if let Some((index, &value)) = betas.indexed_iter().find(|(_, b)| !(0.0..1.0).contains(*b)) {
			return Err(ScheduleError::BetaOutOfRange { index, value });
		}
		check_cumprod(alphas, alpha_bars)?;

		// the f32 tables are what q & p read, so the invariants must survive narrowing
		let alphas_f32 = alphas.mapv(|v| v as f32);
		let alpha_bars_f32 = alpha_bars.mapv(|v| v as f32);
		check_cumprod(alphas_f32.mapv(f64::from).view(), alpha_bars_f32.mapv(f64::from).view())?;
		check_decreasing(alpha_bars_f32.view())?;

		Ok(Self {
			betas: betas.mapv(|v| v as f32),
			alphas: alphas_f32,
			alpha_bars: alpha_bars_f32,
			sqrt_betas: betas.mapv(|v| v.sqrt() as f32),
			sqrt_alphas: alphas.mapv(|v| v.sqrt() as f32),
			sqrt_alpha_bars: alpha_bars.mapv(|v| v.sqrt() as f32),
			sqrt_one_minus_alpha_bars: alpha_bars.mapv(|v| (1.0 - v).max(0.0).sqrt() as f32)
		})
	}

	/// Returns the number of diffusion steps `N`.
	#[allow(clippy::len_without_is_empty)]
	pub fn len(&self) -> usize {
		self.betas.len()
	}

	/// The per-step noise variances.
	pub fn betas(&self) -> ArrayView1<'_, f32> {
		self.betas.view()
	}

	/// `1 - betas`.
	pub fn alphas(&self) -> ArrayView1<'_, f32> {
		self.alphas.view()
	}

	/// Running product of `alphas`; the fraction of signal variance left at step `t`.
	pub fn alpha_bars(&self) -> ArrayView1<'_, f32> {
		self.alpha_bars.view()
	}

	/// Gathers `betas[t]` for every row of `t`.
	///
	/// # Errors
	/// Returns [`ShapeError::TimestepOutOfRange`] if any timestep is `>= N`.
	pub fn betas_at(&self, t: ArrayView1<'_, usize>) -> Result<Array1<f32>, ShapeError> {
		gather(&self.betas, t)
	}

	/// Gathers `alphas[t]` for every row of `t`.
	///
	/// # Errors
	/// Returns [`ShapeError::TimestepOutOfRange`] if any timestep is `>= N`.
	pub fn alphas_at(&self, t: ArrayView1<'_, usize>) -> Result<Array1<f32>, ShapeError> {
		gather(&self.alphas, t)
	}

	/// Gathers `alpha_bars[t]` for every row of `t`.
	///
	/// # Errors
	/// Returns [`ShapeError::TimestepOutOfRange`] if any timestep is `>= N`.
	pub fn alpha_bars_at(&self, t: ArrayView1<'_, usize>) -> Result<Array1<f32>, ShapeError> {
		gather(&self.alpha_bars, t)
	}
}

fn gather(coefs: &Array1<f32>, t: ArrayView1<'_, usize>) -> Result<Array1<f32>, ShapeError> {
	t.iter()
		.map(|&t| coefs.get(t).copied().ok_or(ShapeError::TimestepOutOfRange { t, steps: coefs.len() }))
		.collect()
}

fn cumprod(alphas: ArrayView1<'_, f64>) -> Array1<f64> {
	alphas
		.into_iter()
		.scan(1.0, |prod, alpha| {
			*prod *= *alpha;
			Some(*prod)
		})
		.collect::<Array1<_>>()
}

fn check_cumprod(alphas: ArrayView1<'_, f64>, alpha_bars: ArrayView1<'_, f64>) -> Result<(), ScheduleError> {
	let mut expected = 1.0;
	for (index, (alpha, &actual)) in alphas.iter().zip(alpha_bars.iter()).enumerate() {
		expected *= *alpha;
		if (expected - actual).abs() > CUMPROD_ATOL + CUMPROD_RTOL * expected.abs() || actual.is_nan() {
			return Err(ScheduleError::CumprodMismatch { index, expected, actual });
		}
	}
	Ok(())
}

fn check_decreasing(alpha_bars: ArrayView1<'_, f32>) -> Result<(), ScheduleError> {
	let mut previous = 1.0_f32;
	for (index, &value) in alpha_bars.indexed_iter() {
		let decreasing = value < previous || (index == 0 && value == previous);
		if !value.is_normal() || !decreasing {
			return Err(ScheduleError::Degenerate { index, value });
		}
		previous = value;
	}
	Ok(())
}
