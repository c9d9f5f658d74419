//! Tree configuration.
//!
//! The configuration can be loaded from environment variables or built in
//! code. Tests and embedders normally use the builder methods.
//!
//! # Environment Variables
//!
//! - `SBTREE_MAX_LEAF_ENTRIES`: Cap on entries per leaf (default: what a page holds)
//! - `SBTREE_MAX_INTERNAL_ENTRIES`: Cap on separators per internal node (default: what a page holds)
//!
//! # Invariants
//!
//! - fan-out caps, when set, are at least [`TreeConfig::MIN_FAN_OUT`]

/// Tree shape configuration, applied when a tree is created.
///
/// The effective fan-out is the smaller of the configured cap and what one
/// page holds for the codec's largest key. It is persisted in the tree
/// metadata, so reopening a tree ignores this configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeConfig {
    pub max_leaf_entries: Option<usize>,
    pub max_internal_entries: Option<usize>,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

const MAX_LEAF_ENTRIES: &str = "SBTREE_MAX_LEAF_ENTRIES";
const MAX_INTERNAL_ENTRIES: &str = "SBTREE_MAX_INTERNAL_ENTRIES";

/// Parse an optional numeric setting, enforcing a lower bound.
fn parse_setting(name: &str, value: Option<&str>, min: usize) -> Result<Option<usize>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("'{value}' is not a non-negative integer"),
    })?;
    if parsed < min {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("{parsed} is below the minimum of {min}"),
        });
    }
    Ok(Some(parsed))
}

impl TreeConfig {
    /// Smallest accepted fan-out. Both halves of a split keep at least two
    /// entries.
    pub const MIN_FAN_OUT: usize = 4;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a fan-out variable is set but is not an integer of
    /// at least [`Self::MIN_FAN_OUT`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            max_leaf_entries: parse_setting(MAX_LEAF_ENTRIES, lookup(MAX_LEAF_ENTRIES).as_deref(), Self::MIN_FAN_OUT)?,
            max_internal_entries: parse_setting(
                MAX_INTERNAL_ENTRIES,
                lookup(MAX_INTERNAL_ENTRIES).as_deref(),
                Self::MIN_FAN_OUT,
            )?,
        })
    }

    #[must_use]
    pub const fn with_max_leaf_entries(mut self, entries: usize) -> Self {
        self.max_leaf_entries = Some(entries);
        self
    }

    #[must_use]
    pub const fn with_max_internal_entries(mut self, entries: usize) -> Self {
        self.max_internal_entries = Some(entries);
        self
    }

    /// Cap both node kinds at the same fan-out.
    #[must_use]
    pub const fn with_fan_out(self, entries: usize) -> Self {
        self.with_max_leaf_entries(entries)
            .with_max_internal_entries(entries)
    }

    /// Check the caps set through the builder methods.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first cap below [`Self::MIN_FAN_OUT`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            (MAX_LEAF_ENTRIES, self.max_leaf_entries),
            (MAX_INTERNAL_ENTRIES, self.max_internal_entries),
        ] {
            if let Some(value) = value
                && value < Self::MIN_FAN_OUT
            {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("{value} is below the minimum of {}", Self::MIN_FAN_OUT),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        assert_eq!(
            TreeConfig::from_lookup(lookup(&[])).expect("tree config"),
            TreeConfig::default()
        );
    }

    #[test]
    fn test_values_from_lookup() {
        let tree = TreeConfig::from_lookup(lookup(&[
            (MAX_LEAF_ENTRIES, "64"),
            (MAX_INTERNAL_ENTRIES, " 32 "),
        ]))
        .expect("tree");
        assert_eq!(tree.max_leaf_entries, Some(64));
        assert_eq!(tree.max_internal_entries, Some(32));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = TreeConfig::from_lookup(lookup(&[(MAX_LEAF_ENTRIES, "2")])).expect_err("too small");
        assert_eq!(
            err.to_string(),
            "invalid value for SBTREE_MAX_LEAF_ENTRIES: 2 is below the minimum of 4"
        );

        let err = TreeConfig::from_lookup(lookup(&[(MAX_LEAF_ENTRIES, "three")])).expect_err("text");
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: MAX_LEAF_ENTRIES.to_string(),
                message: "'three' is not a non-negative integer".to_string(),
            }
        );

        assert!(TreeConfig::from_lookup(lookup(&[(MAX_INTERNAL_ENTRIES, "3")])).is_err());
    }

    #[test]
    fn test_builder_validation() {
        let config = TreeConfig::default().with_fan_out(8);
        assert_eq!(config.max_leaf_entries, Some(8));
        assert_eq!(config.max_internal_entries, Some(8));
        assert!(config.validate().is_ok());

        let bad = TreeConfig::default().with_max_internal_entries(2);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
