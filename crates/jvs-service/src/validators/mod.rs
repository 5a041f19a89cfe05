//! Justification category validators.
//!
//! Each justification category maps to a [`Validator`] that decides whether
//! a submitted justification is acceptable and may attach annotations (e.g.
//! a resolved ticket URL) to it. The registry owns the mapping; the built-in
//! explanation validator is always present. Implementations may be backed by
//! out-of-process plugins; the service only depends on this interface.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::errors::JvsError;
use crate::models::Justification;

/// Category handled by the built-in explanation validator.
pub const EXPLANATION_CATEGORY: &str = "explanation";

/// Outcome of validating a single justification.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    /// Merged into the justification before it is embedded in the token.
    pub annotations: HashMap<String, String>,
}

impl ValidationResult {
    /// An unconditional acceptance with no warnings or annotations.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    /// A rejection carrying one error message.
    #[must_use]
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![error.into()],
            ..Self::default()
        }
    }
}

/// Display hints surfaced to UIs collecting justifications.
#[derive(Debug, Clone, Serialize)]
pub struct UiData {
    pub display_name: String,
    pub hint: String,
}

/// A pluggable justification validator.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Decide whether `justification` is acceptable. A transport or plugin
    /// failure is an `Err`; content rejection is `Ok` with `valid == false`.
    async fn validate(&self, justification: &Justification) -> Result<ValidationResult, JvsError>;

    /// Display hints for this category.
    async fn ui_data(&self) -> Result<UiData, JvsError>;
}

/// Built-in validator for free-form explanations. Accepts any non-empty
/// value.
pub struct ExplanationValidator;

#[async_trait]
impl Validator for ExplanationValidator {
    async fn validate(&self, justification: &Justification) -> Result<ValidationResult, JvsError> {
        if justification.value.is_empty() {
            Ok(ValidationResult::invalid("explanation cannot be empty"))
        } else {
            Ok(ValidationResult::valid())
        }
    }

    async fn ui_data(&self) -> Result<UiData, JvsError> {
        Ok(UiData {
            display_name: "Explanation".to_string(),
            hint: "A reason for the action".to_string(),
        })
    }
}

/// Category-to-validator mapping. Always contains the explanation validator.
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut validators: HashMap<String, Arc<dyn Validator>> = HashMap::new();
        validators.insert(
            EXPLANATION_CATEGORY.to_string(),
            Arc::new(ExplanationValidator),
        );
        Self { validators }
    }

    /// Register (or replace) the validator for a category.
    pub fn register(&mut self, category: impl Into<String>, validator: Arc<dyn Validator>) {
        self.validators.insert(category.into(), validator);
    }

    #[must_use]
    pub fn get(&self, category: &str) -> Option<&Arc<dyn Validator>> {
        self.validators.get(category)
    }

    /// Registered categories, sorted.
    #[must_use]
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        categories.sort_unstable();
        categories
    }

    /// Display hints for every registered category, keyed by category.
    ///
    /// # Errors
    ///
    /// Propagates the first validator transport failure.
    pub async fn ui_data(&self) -> Result<BTreeMap<String, UiData>, JvsError> {
        let mut hints = BTreeMap::new();
        for (category, validator) in &self.validators {
            hints.insert(category.clone(), validator.ui_data().await?);
        }
        Ok(hints)
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explanation_validator_accepts_non_empty() {
        let justification = Justification::new(EXPLANATION_CATEGORY, "fixing issue 42");
        let result = ExplanationValidator.validate(&justification).await.unwrap();

        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
        assert!(result.annotations.is_empty());
    }

    #[tokio::test]
    async fn test_explanation_validator_rejects_empty() {
        let justification = Justification::new(EXPLANATION_CATEGORY, "");
        let result = ExplanationValidator.validate(&justification).await.unwrap();

        assert!(!result.valid);
        assert_eq!(result.errors, vec!["explanation cannot be empty".to_string()]);
    }

    #[tokio::test]
    async fn test_registry_always_contains_explanation() {
        let registry = ValidatorRegistry::new();
        assert!(registry.get(EXPLANATION_CATEGORY).is_some());
        assert!(registry.get("jira").is_none());
        assert_eq!(registry.categories(), vec![EXPLANATION_CATEGORY]);
    }

    struct TicketValidator;

    #[async_trait]
    impl Validator for TicketValidator {
        async fn validate(
            &self,
            justification: &Justification,
        ) -> Result<ValidationResult, JvsError> {
            let mut result = ValidationResult::valid();
            result.annotations.insert(
                "url".to_string(),
                format!("https://issues.example.com/{}", justification.value),
            );
            Ok(result)
        }

        async fn ui_data(&self) -> Result<UiData, JvsError> {
            Ok(UiData {
                display_name: "Ticket".to_string(),
                hint: "An issue tracker id".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_registry_register_and_ui_data() {
        let mut registry = ValidatorRegistry::new();
        registry.register("jira", Arc::new(TicketValidator));

        assert_eq!(registry.categories(), vec![EXPLANATION_CATEGORY, "jira"]);

        let hints = registry.ui_data().await.unwrap();
        assert_eq!(hints.get("jira").unwrap().display_name, "Ticket");
        assert_eq!(
            hints.get(EXPLANATION_CATEGORY).unwrap().display_name,
            "Explanation"
        );
    }
}
