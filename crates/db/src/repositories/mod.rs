//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&SqlitePool` as the first argument.

pub mod artifact_repo;
pub mod execution_repo;
pub mod script_repo;

pub use artifact_repo::ArtifactRepo;
pub use execution_repo::ExecutionRepo;
pub use script_repo::ScriptRepo;
