use serde::Deserialize;

use crate::error::{DriverError, Result};
use crate::storage::driver::MAX_CHUNK_SIZE;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    pub root_directory: String,
    pub container: String,
    pub max_chunk_size: usize,
}

/// Parameter map accepted by [`DriverConfig::from_parameters`], keyed the
/// way registry configuration files spell them.
#[derive(Deserialize, Debug, Default)]
struct DriverParameters {
    #[serde(default)]
    rootdirectory: Option<String>,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    maxchunksize: Option<usize>,
}

impl DriverConfig {
    pub fn new(container: impl Into<String>) -> Self {
        DriverConfig {
            root_directory: String::new(),
            container: container.into(),
            max_chunk_size: MAX_CHUNK_SIZE,
        }
    }

    pub fn with_root_directory(mut self, root_directory: impl Into<String>) -> Self {
        self.root_directory = root_directory.into();
        self
    }

    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Builds a config from a driver parameter map such as
    /// `{"container": "registry", "rootdirectory": "/docker"}`.
    pub fn from_parameters(parameters: serde_json::Value) -> Result<Self> {
        let params: DriverParameters = serde_json::from_value(parameters)
            .map_err(|err| DriverError::Config(err.to_string()))?;

        let container = params
            .container
            .filter(|container| !container.is_empty())
            .ok_or_else(|| DriverError::Config("no container parameter provided".to_string()))?;

        let config = DriverConfig::new(container)
            .with_root_directory(params.rootdirectory.unwrap_or_default())
            .with_max_chunk_size(params.maxchunksize.unwrap_or(MAX_CHUNK_SIZE));
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container.is_empty() {
            return Err(DriverError::Config("no container parameter provided".to_string()));
        }
        if self.max_chunk_size == 0 {
            return Err(DriverError::Config("maxchunksize must be positive".to_string()));
        }
        Ok(())
    }
}
