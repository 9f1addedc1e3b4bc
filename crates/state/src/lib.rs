// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aetherflow-state: the SQLite-backed `JobRun` / `StepRun` / `Lock`
//! store (spec.md §4.1).

mod error;
mod store;

pub use error::StateError;
pub use store::{resolve_state_path, StateStore};
