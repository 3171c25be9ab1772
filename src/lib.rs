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

//! `pyke-ddpm` is the core of a [denoising diffusion probabilistic model][ddpm]: the noise schedule, the closed-form
//! forward (noising) process, the noise-prediction training loss, and the ancestral reverse sampling chain.
//!
//! The denoising network itself is not part of this crate; anything implementing [`NoisePredictor`] can be plugged
//! in, be it a graph network over molecules or a small MLP over 2D toy data.
//! ```ignore
//! use pyke_ddpm::{DDPMConfig, DDPMSamplingOptions, LossReduction, NoiseScheduleKind, PredictorInput, DDPM};
//!
//! let ddpm = DDPM::new(model, &DDPMConfig::default().with_noise_schedule(NoiseScheduleKind::Cosine))?;
//!
//! // training: one loss per row, reduce however you like
//! let losses = ddpm.losses(x.view(), Some(batch.view()), None, None, None, &mut rng)?;
//! let loss = pyke_ddpm::reduce_losses(losses.view(), Some(batch.view()), LossReduction::MeanPerSample)?;
//!
//! // inference
//! let samples = ddpm.sample((256, 2), &PredictorInput::default(), &DDPMSamplingOptions::default().with_seed(42))?;
//! ```
//!
//! [ddpm]: https://arxiv.org/abs/2006.11239

#![warn(missing_docs)]
#![warn(rustdoc::all)]
#![warn(clippy::correctness, clippy::suspicious, clippy::complexity, clippy::perf, clippy::style)]
#![allow(clippy::tabs_in_doc_comments)]

mod config;
mod error;
pub mod pipelines;
mod predictor;
pub mod schedulers;
mod util;

pub use self::config::DDPMConfig;
pub use self::error::{DDPMError, Result, ScheduleError, ShapeError};
pub use self::pipelines::*;
pub use self::predictor::{NoisePredictor, PredictorInput};
pub use self::schedulers::*;
pub use self::util::broadcast_like;
