// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aetherflow-steps: the built-in `with_lock` and `external.process`
//! step implementations (spec.md §4.6, §4.7).

mod external_process;
mod with_lock;

pub use external_process::ExternalProcessStep;
pub use with_lock::WithLockStep;

/// Register every built-in step under its canonical type name.
pub fn register_builtins(registry: &mut aetherflow_registry::StepRegistry) {
    registry.register("with_lock", std::sync::Arc::new(WithLockStep));
    registry.register("external.process", std::sync::Arc::new(ExternalProcessStep));
}
