// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aetherflow-registry: connector and step lookup tables, dispatched
//! by the string names flow documents use (spec.md §9).

mod connector;
mod step;

pub use connector::{Connector, ConnectorFactory, ConnectorRegistry, RegistryError};
pub use step::{
    LockStore, ResourceBag, Step, StepContext, StepDispatch, StepError, StepOutcome, StepRegistry,
};
