//! Configuration validation.
//!
//! Checks an [`EngineConfig`] before any state is touched, collecting every
//! error and warning rather than stopping at the first.

use crate::error::{ConfigError, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

use super::spec::{DeploymentConfig, EchoConfig, EngineConfig, ProjectConfig};

/// Parallelism above which a warning is emitted.
const PARALLELISM_WARN_THRESHOLD: usize = 64;

/// Validator for engine configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_deployment(&config.deployment, &mut result);
        Self::validate_echo(&config.providers.echo, &mut result);

        if config.program.as_os_str().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("program"),
                message: String::from("Program path cannot be empty"),
            });
        }

        for warning in &result.warnings {
            warn!("{warning}");
        }

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ConfigError::validation(first_error.message.clone(), first_error.field.clone()).into())
        }
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        for (field, value) in [("project.name", &project.name), ("project.stack", &project.stack)] {
            if value.is_empty() {
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("{field} cannot be empty"),
                });
            } else if !is_valid_name(value) {
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!(
                        "'{value}' is invalid. Must be lowercase alphanumeric with hyphens."
                    ),
                });
            }
        }
    }

    fn validate_deployment(deployment: &DeploymentConfig, result: &mut ValidationResult) {
        if deployment.parallelism == 0 {
            result.errors.push(ValidationError {
                field: String::from("deployment.parallelism"),
                message: String::from("Parallelism must be at least 1"),
            });
        } else if deployment.parallelism > PARALLELISM_WARN_THRESHOLD {
            result.warnings.push(format!(
                "deployment.parallelism: {} concurrent steps is unusual",
                deployment.parallelism
            ));
        }

        if deployment.timeout_secs == Some(0) {
            result.errors.push(ValidationError {
                field: String::from("deployment.timeout_secs"),
                message: String::from("Timeout must be at least 1 second"),
            });
        }
    }

    fn validate_echo(echo: &EchoConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, key) in echo.force_new.iter().enumerate() {
            if key.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("providers.echo.force_new[{i}]"),
                    message: String::from("Property name cannot be empty"),
                });
            } else if !seen.insert(key) {
                result.warnings.push(format!(
                    "providers.echo.force_new[{i}]: '{key}' is listed twice"
                ));
            }
        }
    }
}

/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::ConvergeError;

    fn config(yaml: &str) -> EngineConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web"));
        assert!(is_valid_name("api-v2"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web"));
        assert!(!is_valid_name("2web"));
        assert!(!is_valid_name("web_api"));
        assert!(!is_valid_name("web-"));
        assert!(!is_valid_name("web--api"));
    }

    #[test]
    fn test_valid_config_passes_with_warnings() {
        let config = config(
            "project:\n  name: web\ndeployment:\n  parallelism: 128\nproviders:\n  echo:\n    force_new: [zone, zone]\n",
        );

        let result = ConfigValidator::new().validate(&config).unwrap();

        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 2);
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let config = config("project:\n  name: web\ndeployment:\n  parallelism: 0\n");

        let err = ConfigValidator::new().validate(&config).unwrap_err();

        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::ValidationError { field: Some(ref f), .. }) if f == "deployment.parallelism"
        ));
    }

    #[test]
    fn test_invalid_stack_name_rejected() {
        let config = config("project:\n  name: web\n  stack: Prod\n");

        let err = ConfigValidator::new().validate(&config).unwrap_err();

        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::ValidationError { field: Some(ref f), .. }) if f == "project.stack"
        ));
    }
}
