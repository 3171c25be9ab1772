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

mod broadcast;

pub use self::broadcast::broadcast_like;

use crate::ShapeError;

pub(crate) fn check_rows(what: &'static str, expected: usize, actual: usize) -> Result<(), ShapeError> {
	if expected != actual {
		return Err(ShapeError::RowMismatch { what, expected, actual });
	}
	Ok(())
}
