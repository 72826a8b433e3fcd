//! BULWARK Module Registry
//!
//! Tracks participating modules, orders them by declared dependencies and
//! scores their health from reported error and success counts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod graph;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use graph::{dependency_order, dependents_of, DependencyMap};
pub use registry::{ModuleHealth, ModuleRegistryManager, HEALTHY_ERROR_RATE};
