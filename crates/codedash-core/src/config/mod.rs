//! Configuration for the engine and the server around it
//!
//! Configuration is read from YAML; every section may be omitted. A few
//! environment variables override file values so deployments can swap the
//! interpreter or listen address without editing the file.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::EngineError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<CodedashConfig, EngineError> {
    ConfigLoader::from_file(path).await
}
