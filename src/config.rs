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

use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{NoiseSchedule, NoiseScheduleKind, ScheduleError};

/// Construction parameters of a [`DDPM`](crate::DDPM).
///
/// Deserializes from kebab-case JSON; every field is optional:
/// ```json
/// { "steps": 1000, "noise-schedule": "cosine", "t-epsilon": 0.001 }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DDPMConfig {
	/// Number of diffusion steps `N`.
	pub steps: usize,
	/// The noise schedule; see [`NoiseScheduleKind`].
	pub noise_schedule: NoiseScheduleKind,
	/// Numerical floor reserved for continuous-time variants. Unused by the discrete-time process.
	pub t_epsilon: f32
}

impl Default for DDPMConfig {
	fn default() -> Self {
		Self {
			steps: 1000,
			noise_schedule: NoiseScheduleKind::Linear,
			t_epsilon: 0.001
		}
	}
}

impl DDPMConfig {
	/// Loads a config from a JSON file.
	pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
		let path = path.as_ref();
		let raw = fs::read_to_string(path).with_context(|| format!("failed to read DDPM config `{}`", path.display()))?;
		serde_json::from_str(&raw).with_context(|| format!("invalid DDPM config `{}`", path.display()))
	}

	/// Set the number of diffusion steps.
	pub fn with_steps(mut self, steps: usize) -> Self {
		self.steps = steps;
		self
	}

	/// Set the noise schedule.
	pub fn with_noise_schedule(mut self, noise_schedule: NoiseScheduleKind) -> Self {
		self.noise_schedule = noise_schedule;
		self
	}

	/// Builds the [`NoiseSchedule`] described by this config.
	///
	/// # Errors
	/// See [`NoiseSchedule::new`].
	pub fn build_schedule(&self) -> Result<NoiseSchedule, ScheduleError> {
		NoiseSchedule::new(self.steps, self.noise_schedule)
	}
}
