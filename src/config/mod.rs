//! Configuration module for the converge engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `converge.yaml`
//! - Environment and `.env` overrides
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{
    find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, ENV_PARALLELISM, ENV_STACK, ENV_STATE_PATH,
};
pub use spec::{
    DeploymentConfig, EchoConfig, EngineConfig, ProjectConfig, ProvidersConfig, StateConfig,
    DEFAULT_PROGRAM_FILE,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
