//! Custom attribute and network slot specifications.
//!
//! Both use the pipe-separated form
//! `requirement|input_type|description[|options[|default]]`, for example
//! `O|text|Hostname||localhost` or `M|network|Public network| |`.

use std::fmt;
use std::str::FromStr;

use sandbox_core::Error;

use crate::Result;

/// Whether a value must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// `M`
    Mandatory,
    /// `O`
    Optional,
}

impl Requirement {
    fn parse(spec: &str, raw: &str) -> Result<Self> {
        match raw.trim() {
            "M" => Ok(Self::Mandatory),
            "O" => Ok(Self::Optional),
            other => Err(invalid(spec, format!("unknown requirement `{other}`"))),
        }
    }
}

/// How a value is entered and encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    /// Free text
    Text,
    /// Hidden text
    Password,
    /// `YES` / `NO`
    Boolean,
    /// Free text, submitted base64-encoded
    Text64,
}

impl InputType {
    /// Returns the type as written in specifications.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Password => "password",
            Self::Boolean => "boolean",
            Self::Text64 => "text64",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed custom attribute specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    /// Mandatory or optional
    pub requirement: Requirement,
    /// Input type
    pub input_type: InputType,
    /// Human readable description
    pub description: String,
    /// Options field, unused by the supported input types
    pub options: String,
    /// Default value, empty when none
    pub default: String,
}

impl AttributeSpec {
    /// Check if a non-empty value is required.
    #[must_use]
    pub const fn is_mandatory(&self) -> bool {
        matches!(self.requirement, Requirement::Mandatory)
    }
}

impl FromStr for AttributeSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.splitn(5, '|').collect();
        if parts.len() < 2 {
            return Err(invalid(s, "expected `requirement|type|description`"));
        }

        let requirement = Requirement::parse(s, parts[0])?;
        let input_type = match parts[1].trim() {
            "text" => InputType::Text,
            "password" => InputType::Password,
            "boolean" => InputType::Boolean,
            "text64" => InputType::Text64,
            other => return Err(invalid(s, format!("unsupported input type `{other}`"))),
        };
        let field = |index: usize| parts.get(index).map_or("", |p| p.trim()).to_string();

        Ok(Self {
            requirement,
            input_type,
            description: field(2),
            options: field(3),
            default: field(4),
        })
    }
}

/// Parsed network slot specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSlot {
    /// Slot name, the key in the template's `networks` map
    pub name: String,
    /// Mandatory or optional
    pub requirement: Requirement,
    /// Human readable description
    pub description: String,
}

impl NetworkSlot {
    /// Parse the specification of slot `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAttributeSpec`] unless the spec reads
    /// `M|network|...` or `O|network|...`.
    pub fn parse(name: &str, spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.splitn(4, '|').collect();
        if parts.len() < 2 {
            return Err(invalid(spec, "expected `requirement|network|description`"));
        }
        let requirement = Requirement::parse(spec, parts[0])?;
        if parts[1].trim() != "network" {
            return Err(invalid(spec, format!("`{}` is not a network slot", parts[1].trim())));
        }
        Ok(Self {
            name: name.to_string(),
            requirement,
            description: parts.get(2).map_or("", |p| p.trim()).to_string(),
        })
    }
}

fn invalid(spec: &str, reason: impl Into<String>) -> Error {
    Error::InvalidAttributeSpec {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}
