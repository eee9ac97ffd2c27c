//! Resource identity: URNs and stack references.
//!
//! A URN is the stable join key between desired-state registrations and
//! recorded snapshot entries. It is built deterministically from the stack,
//! the project, the parent type chain, the resource type and the logical
//! name, so repeated declarations of the same logical resource resolve to the
//! same identity across runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PlanError;

/// Prefix shared by every URN.
pub const URN_PREFIX: &str = "urn:converge:";

/// Type token of the implicit root stack pseudo-resource.
pub const ROOT_STACK_TYPE: &str = "converge:stack:Stack";

/// Separator between URN segments.
const SEGMENT_DELIMITER: &str = "::";

/// Separator between parent types in a qualified type.
const TYPE_DELIMITER: char = '$';

/// Uniform resource name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

/// Identifies the stack a snapshot belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StackRef {
    /// Project name.
    pub project: String,
    /// Stack name.
    pub stack: String,
}

impl Urn {
    /// Builds the URN of a resource.
    ///
    /// The parent's qualified type is prefixed to `type_token`, unless the
    /// parent is the root stack.
    ///
    /// # Errors
    ///
    /// Returns an error if any segment contains disallowed characters.
    pub fn new(
        stack: &str,
        project: &str,
        parent: Option<&Self>,
        type_token: &str,
        name: &str,
    ) -> Result<Self, PlanError> {
        validate_segment("stack", stack)?;
        validate_segment("project", project)?;
        validate_type(type_token)?;
        validate_name(name)?;

        let qualified = match parent {
            Some(p) if p.type_token() != ROOT_STACK_TYPE => {
                format!("{}{TYPE_DELIMITER}{type_token}", p.qualified_type())
            }
            _ => type_token.to_string(),
        };

        Ok(Self(format!(
            "{URN_PREFIX}{stack}{SEGMENT_DELIMITER}{project}{SEGMENT_DELIMITER}{qualified}{SEGMENT_DELIMITER}{name}"
        )))
    }

    /// Parses and validates a URN string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a well-formed URN.
    pub fn parse(value: &str) -> Result<Self, PlanError> {
        let invalid = |reason: &str| PlanError::InvalidUrn {
            urn: value.to_string(),
            reason: reason.to_string(),
        };

        let body = value
            .strip_prefix(URN_PREFIX)
            .ok_or_else(|| invalid("missing 'urn:converge:' prefix"))?;

        let parts: Vec<&str> = body.splitn(4, SEGMENT_DELIMITER).collect();
        let [stack, project, qualified, name] = parts.as_slice() else {
            return Err(invalid("expected stack, project, type and name segments"));
        };

        validate_segment("stack", stack)?;
        validate_segment("project", project)?;
        for type_token in qualified.split(TYPE_DELIMITER) {
            validate_type(type_token)?;
        }
        validate_name(name)?;

        Ok(Self(value.to_string()))
    }

    /// Returns the URN as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> [&str; 4] {
        let body = self.0.strip_prefix(URN_PREFIX).unwrap_or(&self.0);
        let mut parts = body.splitn(4, SEGMENT_DELIMITER);
        [
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
        ]
    }

    /// Returns the stack segment.
    #[must_use]
    pub fn stack(&self) -> &str {
        self.segments()[0]
    }

    /// Returns the project segment.
    #[must_use]
    pub fn project(&self) -> &str {
        self.segments()[1]
    }

    /// Returns the `$`-joined parent type chain plus the resource type.
    #[must_use]
    pub fn qualified_type(&self) -> &str {
        self.segments()[2]
    }

    /// Returns the resource's own type token.
    #[must_use]
    pub fn type_token(&self) -> &str {
        let qualified = self.qualified_type();
        qualified
            .rsplit(TYPE_DELIMITER)
            .next()
            .unwrap_or(qualified)
    }

    /// Returns the logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.segments()[3]
    }

    /// Returns true if this is the root stack pseudo-resource.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.type_token() == ROOT_STACK_TYPE
    }
}

impl StackRef {
    /// Creates a stack reference.
    #[must_use]
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
        }
    }

    /// Returns the URN of this stack's root pseudo-resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the project or stack name is invalid.
    pub fn root_urn(&self) -> Result<Urn, PlanError> {
        Urn::new(
            &self.stack,
            &self.project,
            None,
            ROOT_STACK_TYPE,
            &self.root_name(),
        )
    }

    /// Returns the logical name of the root pseudo-resource.
    #[must_use]
    pub fn root_name(&self) -> String {
        format!("{}-{}", self.project, self.stack)
    }

    /// Builds the URN of a resource in this stack.
    ///
    /// # Errors
    ///
    /// Returns an error if any segment is invalid.
    pub fn urn(&self, parent: Option<&Urn>, type_token: &str, name: &str) -> Result<Urn, PlanError> {
        Urn::new(&self.stack, &self.project, parent, type_token, name)
    }
}

fn validate_segment(field: &str, value: &str) -> Result<(), PlanError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PlanError::InvalidName {
            name: value.to_string(),
            reason: format!("{field} names may only contain letters, digits, '_', '-' and '.'"),
        })
    }
}

fn validate_type(type_token: &str) -> Result<(), PlanError> {
    let parts: Vec<&str> = type_token.split(':').collect();
    let valid = parts.len() == 3
        && parts.iter().all(|p| {
            !p.is_empty()
                && p
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
        });
    if valid {
        Ok(())
    } else {
        Err(PlanError::InvalidType {
            type_token: type_token.to_string(),
        })
    }
}

fn validate_name(name: &str) -> Result<(), PlanError> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if name.contains(SEGMENT_DELIMITER) {
        Some("name must not contain '::'")
    } else if name.chars().any(char::is_control) {
        Some("name must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(PlanError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Urn {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Urn {
    type Error = PlanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Urn> for String {
    fn from(urn: Urn) -> Self {
        urn.0
    }
}

impl fmt::Display for StackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.stack)
    }
}
