//! Entity models and insert DTOs.

pub mod artifact;
pub mod execution;
pub mod script;

pub use artifact::Artifact;
pub use execution::{Execution, TriggerSource};
pub use script::{CreateScript, Script};
