//! Configuration for the vulnwatch operator.
//!
//! Loads an [`OperatorConfig`](vulnwatch_core::config::OperatorConfig) from
//! files, inline JSON and `OPERATOR_*` variables, validates it, and installs
//! the tracing subscriber the operator logs through.

#![allow(missing_docs)]

pub mod loader;
pub mod telemetry;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigSource, error::ConfigLoadError};
pub use telemetry::init_tracing;
pub use validation::{ConfigWarning, ConfigWarnings};
