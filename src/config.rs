//! Orchestrator configuration: builder defaults overridable via environment
//! variables through `dotenvy`, same precedence order the teacher crate uses
//! for its runtime config (explicit builder call > env var > built-in
//! default).

use crate::errors::SeverityPolicy;

/// Tunables for one [`crate::orchestrator::Orchestrator`] instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bounded event queue capacity (§5: "a bounded default, e.g. 64").
    pub queue_capacity: usize,
    /// Regex-free glob the `http` action's resolved `url` must match;
    /// default `^/` per §4.E step 1.
    pub http_allow_pattern: String,
    pub default_severity_policy: SeverityPolicy,
    /// §9 Open Question 1: legacy string `if` conditions (`if: "{{…}}"`) are
    /// rejected at compile time unless explicitly opted into.
    pub allow_legacy_string_conditions: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            http_allow_pattern: "^/".to_string(),
            default_severity_policy: SeverityPolicy::default(),
            allow_legacy_string_conditions: false,
        }
    }
}

/// Builds an [`OrchestratorConfig`], falling back to environment variables
/// (loaded via `dotenvy`) and finally the hardcoded defaults above.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    queue_capacity: Option<usize>,
    http_allow_pattern: Option<String>,
    allow_legacy_string_conditions: Option<bool>,
}

impl OrchestratorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn queue_capacity(mut self, value: usize) -> Self {
        self.queue_capacity = Some(value);
        self
    }

    #[must_use]
    pub fn http_allow_pattern(mut self, value: impl Into<String>) -> Self {
        self.http_allow_pattern = Some(value.into());
        self
    }

    #[must_use]
    pub fn allow_legacy_string_conditions(mut self, value: bool) -> Self {
        self.allow_legacy_string_conditions = Some(value);
        self
    }

    /// Resolves the final config: explicit builder value, then the matching
    /// `FLOWSPIRE_*` environment variable (`.env` loaded via `dotenvy` if
    /// present), then the built-in default.
    #[must_use]
    pub fn build(self) -> OrchestratorConfig {
        let _ = dotenvy::dotenv();
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            queue_capacity: self
                .queue_capacity
                .or_else(|| env_usize("FLOWSPIRE_QUEUE_CAPACITY"))
                .unwrap_or(defaults.queue_capacity),
            http_allow_pattern: self
                .http_allow_pattern
                .or_else(|| std::env::var("FLOWSPIRE_HTTP_ALLOW_PATTERN").ok())
                .unwrap_or(defaults.http_allow_pattern),
            default_severity_policy: defaults.default_severity_policy,
            allow_legacy_string_conditions: self
                .allow_legacy_string_conditions
                .or_else(|| env_bool("FLOWSPIRE_ALLOW_LEGACY_STRING_CONDITIONS"))
                .unwrap_or(defaults.allow_legacy_string_conditions),
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_value_wins_over_default() {
        let config = OrchestratorConfigBuilder::new().queue_capacity(128).build();
        assert_eq!(config.queue_capacity, 128);
    }

    #[test]
    fn unset_fields_fall_back_to_defaults() {
        let config = OrchestratorConfigBuilder::new().build();
        assert_eq!(config.http_allow_pattern, "^/");
    }
}
