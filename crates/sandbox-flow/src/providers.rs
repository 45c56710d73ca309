//! Attribute value providers.
//!
//! Every custom attribute key maps to a [`ValueProvider`]. Keys the installer
//! can fill from its own state are `Derived`, credentials are `Secret`, and
//! everything else is asked.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sandbox_core::prompt::Prompter;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::attributes::{AttributeSpec, InputType};
use crate::Result;

/// Where an attribute value comes from.
#[derive(Debug, Clone)]
pub enum ValueProvider {
    /// Fixed value computed by the installer
    Derived(String),
    /// Secret value computed by the installer
    Secret(SecretString),
    /// Ask the operator
    Prompt,
}

static PROMPT: ValueProvider = ValueProvider::Prompt;

/// Declarative map from attribute key to value provider.
///
/// Keys without an entry are asked.
#[derive(Debug, Clone, Default)]
pub struct AttributeResolver {
    providers: BTreeMap<String, ValueProvider>,
}

impl AttributeResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, provider: ValueProvider) -> Self {
        self.providers.insert(key.into(), provider);
        self
    }

    /// Register a derived value for `key`.
    #[must_use]
    pub fn derived(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, ValueProvider::Derived(value.into()))
    }

    /// Register a secret value for `key`.
    #[must_use]
    pub fn secret(self, key: impl Into<String>, value: SecretString) -> Self {
        self.with(key, ValueProvider::Secret(value))
    }

    /// Provider for `key`.
    #[must_use]
    pub fn provider(&self, key: &str) -> &ValueProvider {
        self.providers.get(key).unwrap_or(&PROMPT)
    }

    /// Resolve a value for every attribute of `custom_attrs`.
    ///
    /// # Errors
    ///
    /// Returns [`sandbox_core::Error::InvalidAttributeSpec`] for a malformed
    /// specification and propagates prompt failures, including
    /// [`sandbox_core::Error::Interrupted`].
    pub fn resolve(
        &self,
        custom_attrs: &BTreeMap<String, String>,
        prompter: &dyn Prompter,
    ) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for (key, raw) in custom_attrs {
            let spec: AttributeSpec = raw.parse()?;
            let value = match self.provider(key) {
                ValueProvider::Derived(value) => {
                    debug!(attribute = %key, "using derived value");
                    value.clone()
                }
                ValueProvider::Secret(secret) => {
                    debug!(attribute = %key, "using secret value");
                    secret.expose_secret().to_string()
                }
                ValueProvider::Prompt => ask(key, &spec, prompter)?,
            };
            values.insert(key.clone(), value);
        }
        Ok(values)
    }
}

fn ask(key: &str, spec: &AttributeSpec, prompter: &dyn Prompter) -> Result<String> {
    let message = if spec.description.is_empty() {
        key.to_string()
    } else {
        format!("{} ({key})", spec.description)
    };
    let default = (!spec.default.is_empty()).then(|| spec.default.clone());

    loop {
        let answer = match spec.input_type {
            InputType::Boolean => {
                let default = spec.default.eq_ignore_ascii_case("yes");
                let yes = prompter.confirm(&message, default)?;
                return Ok(if yes { "YES" } else { "NO" }.to_string());
            }
            InputType::Password => prompter.password(&message)?,
            InputType::Text | InputType::Text64 => prompter.text(&message, default.clone())?,
        };
        let answer = match &default {
            Some(default) if answer.is_empty() => default.clone(),
            _ => answer,
        };

        if answer.is_empty() && spec.is_mandatory() {
            warn!(attribute = key, "a value is required");
            continue;
        }

        return Ok(match spec.input_type {
            InputType::Text64 => STANDARD.encode(answer),
            _ => answer,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_test_utils::ScriptedPrompter;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_derived_and_secret_are_not_asked() {
        let resolver = AttributeResolver::new()
            .derived("ENDPOINT", "http://one:2633/RPC2")
            .secret("PASSWORD", SecretString::from("s3cret".to_string()));
        let prompter = ScriptedPrompter::new(Vec::<String>::new());

        let values = resolver
            .resolve(
                &attrs(&[
                    ("ENDPOINT", "M|text|Endpoint"),
                    ("PASSWORD", "M|password|Password"),
                ]),
                &prompter,
            )
            .unwrap();

        assert_eq!(values["ENDPOINT"], "http://one:2633/RPC2");
        assert_eq!(values["PASSWORD"], "s3cret");
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn test_mandatory_repeats_until_answered() {
        let prompter = ScriptedPrompter::new(["", "", "admin"]);
        let values = AttributeResolver::new()
            .resolve(&attrs(&[("USER", "M|text|Admin user")]), &prompter)
            .unwrap();
        assert_eq!(values["USER"], "admin");
        assert_eq!(prompter.asked().len(), 3);
    }

    #[test]
    fn test_optional_takes_default() {
        let prompter = ScriptedPrompter::new([""]);
        let values = AttributeResolver::new()
            .resolve(&attrs(&[("HOST", "O|text|Hostname||localhost")]), &prompter)
            .unwrap();
        assert_eq!(values["HOST"], "localhost");
    }

    #[test]
    fn test_boolean_and_text64() {
        let prompter = ScriptedPrompter::new(["n", "hello"]);
        let values = AttributeResolver::new()
            .resolve(
                &attrs(&[
                    ("A_TLS", "O|boolean|Enable TLS||YES"),
                    ("B_SCRIPT", "M|text64|Start script"),
                ]),
                &prompter,
            )
            .unwrap();
        assert_eq!(values["A_TLS"], "NO");
        assert_eq!(values["B_SCRIPT"], "aGVsbG8=");
    }

    #[test]
    fn test_bad_spec_is_rejected() {
        let prompter = ScriptedPrompter::new(Vec::<String>::new());
        let err = AttributeResolver::new()
            .resolve(&attrs(&[("FLAVOUR", "M|list|Flavour|a,b")]), &prompter)
            .unwrap_err();
        assert!(matches!(
            err,
            sandbox_core::Error::InvalidAttributeSpec { .. }
        ));
    }
}
