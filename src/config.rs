//! Controller configuration
//!
//! Read from `SWITCHYARD_*` environment variables, with CLI flags layered on
//! top for namespace and app. Resource names derive from the app name unless
//! overridden.

use crate::state::VersionTarget;
use std::time::Duration;
use thiserror::Error;

/// Replicas each blue-green color runs while staged or live
pub const DEFAULT_STANDARD_REPLICAS: i32 = 2;

/// Replicas the canary runs while it receives traffic
pub const DEFAULT_CANARY_REPLICAS: i32 = 1;

/// Ingress annotation carrying the canary traffic split
pub const DEFAULT_WEIGHT_ANNOTATION: &str = "nginx.ingress.kubernetes.io/canary-weight";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub namespace: String,
    pub app: String,
    /// Service whose selector picks the live blue-green color
    pub service: String,
    /// Ingress whose annotation carries the canary weight
    pub canary_ingress: String,
    pub weight_annotation: String,
    /// Container whose image `set_image` replaces
    pub container: String,
    pub app_label: String,
    pub version_label: String,
    pub state_configmap: String,
    pub standard_replicas: i32,
    pub canary_replicas: i32,
    pub deploy_health_timeout: Duration,
    pub switch_health_timeout: Duration,
    pub promote_health_timeout: Duration,
    pub poll_interval: Duration,
    /// Attempts at zeroing the canary annotation during rollback
    pub rollback_attempts: u32,
}

impl ControllerConfig {
    /// Defaults for an app, every resource name derived from it
    pub fn for_app(namespace: &str, app: &str) -> Self {
        ControllerConfig {
            namespace: namespace.to_string(),
            app: app.to_string(),
            service: app.to_string(),
            canary_ingress: format!("{app}-canary"),
            weight_annotation: DEFAULT_WEIGHT_ANNOTATION.to_string(),
            container: "app".to_string(),
            app_label: "app".to_string(),
            version_label: "version".to_string(),
            state_configmap: format!("{app}-release-state"),
            standard_replicas: DEFAULT_STANDARD_REPLICAS,
            canary_replicas: DEFAULT_CANARY_REPLICAS,
            deploy_health_timeout: Duration::from_secs(120),
            switch_health_timeout: Duration::from_secs(60),
            promote_health_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            rollback_attempts: 3,
        }
    }

    /// Load from the process environment
    pub fn from_env(
        namespace: Option<String>,
        app: Option<String>,
    ) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), namespace, app)
    }

    /// Load from an arbitrary key lookup; explicit arguments win over it
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        namespace: Option<String>,
        app: Option<String>,
    ) -> Result<Self, ConfigError> {
        let namespace = namespace
            .or_else(|| lookup("SWITCHYARD_NAMESPACE"))
            .unwrap_or_else(|| "default".to_string());
        let app = app
            .or_else(|| lookup("SWITCHYARD_APP"))
            .unwrap_or_else(|| "app".to_string());

        let mut config = ControllerConfig::for_app(&namespace, &app);

        let strings: [(&str, &mut String); 7] = [
            ("SWITCHYARD_SERVICE", &mut config.service),
            ("SWITCHYARD_CANARY_INGRESS", &mut config.canary_ingress),
            ("SWITCHYARD_WEIGHT_ANNOTATION", &mut config.weight_annotation),
            ("SWITCHYARD_CONTAINER", &mut config.container),
            ("SWITCHYARD_APP_LABEL", &mut config.app_label),
            ("SWITCHYARD_VERSION_LABEL", &mut config.version_label),
            ("SWITCHYARD_STATE_CONFIGMAP", &mut config.state_configmap),
        ];
        for (key, slot) in strings {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }

        if let Some(v) = lookup("SWITCHYARD_STANDARD_REPLICAS") {
            config.standard_replicas = parse_replicas("SWITCHYARD_STANDARD_REPLICAS", &v)?;
        }
        if let Some(v) = lookup("SWITCHYARD_CANARY_REPLICAS") {
            config.canary_replicas = parse_replicas("SWITCHYARD_CANARY_REPLICAS", &v)?;
        }
        if let Some(v) = lookup("SWITCHYARD_DEPLOY_HEALTH_TIMEOUT_SECONDS") {
            config.deploy_health_timeout =
                parse_seconds("SWITCHYARD_DEPLOY_HEALTH_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("SWITCHYARD_SWITCH_HEALTH_TIMEOUT_SECONDS") {
            config.switch_health_timeout =
                parse_seconds("SWITCHYARD_SWITCH_HEALTH_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("SWITCHYARD_PROMOTE_HEALTH_TIMEOUT_SECONDS") {
            config.promote_health_timeout =
                parse_seconds("SWITCHYARD_PROMOTE_HEALTH_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("SWITCHYARD_POLL_INTERVAL_SECONDS") {
            config.poll_interval = parse_seconds("SWITCHYARD_POLL_INTERVAL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("SWITCHYARD_ROLLBACK_ATTEMPTS") {
            config.rollback_attempts = v
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| invalid("SWITCHYARD_ROLLBACK_ATTEMPTS", &v, "expected an integer >= 1"))?;
        }

        Ok(config)
    }

    pub fn deployment_for(&self, target: VersionTarget) -> String {
        format!("{}-{}", self.app, target.as_str())
    }

    /// Label selector matching all pods of one target
    pub fn selector_for(&self, target: VersionTarget) -> String {
        format!(
            "{}={},{}={}",
            self.app_label,
            self.app,
            self.version_label,
            target.as_str()
        )
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_replicas(key: &str, value: &str) -> Result<i32, ConfigError> {
    value
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| invalid(key, value, "expected an integer >= 1"))
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|n| *n >= 1)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(key, value, "expected whole seconds >= 1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_derive_from_app() {
        let config = ControllerConfig::from_lookup(lookup_from(&[]), None, Some("web".into()))
            .expect("defaults load");
        assert_eq!(config.namespace, "default");
        assert_eq!(config.service, "web");
        assert_eq!(config.canary_ingress, "web-canary");
        assert_eq!(config.state_configmap, "web-release-state");
        assert_eq!(config.standard_replicas, 2);
        assert_eq!(config.canary_replicas, 1);
        assert_eq!(config.deploy_health_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_explicit_args_beat_environment() {
        let env = lookup_from(&[("SWITCHYARD_NAMESPACE", "staging"), ("SWITCHYARD_APP", "api")]);
        let config =
            ControllerConfig::from_lookup(env, Some("prod".into()), None).expect("config loads");
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.app, "api");
    }

    #[test]
    fn test_environment_overrides() {
        let env = lookup_from(&[
            ("SWITCHYARD_SERVICE", "web-live"),
            ("SWITCHYARD_DEPLOY_HEALTH_TIMEOUT_SECONDS", "300"),
            ("SWITCHYARD_ROLLBACK_ATTEMPTS", "5"),
            ("SWITCHYARD_CONTAINER", ""),
        ]);
        let config = ControllerConfig::from_lookup(env, None, Some("web".into())).unwrap();
        assert_eq!(config.service, "web-live");
        assert_eq!(config.deploy_health_timeout, Duration::from_secs(300));
        assert_eq!(config.rollback_attempts, 5);
        assert_eq!(config.container, "app", "empty values leave the default");
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        for (key, value) in [
            ("SWITCHYARD_STANDARD_REPLICAS", "0"),
            ("SWITCHYARD_POLL_INTERVAL_SECONDS", "soon"),
            ("SWITCHYARD_ROLLBACK_ATTEMPTS", "0"),
        ] {
            let result = ControllerConfig::from_lookup(lookup_from(&[(key, value)]), None, None);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { key: ref k, .. }) if k == key),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_names_and_selectors() {
        let config = ControllerConfig::for_app("default", "web");
        assert_eq!(config.deployment_for(VersionTarget::Green), "web-green");
        assert_eq!(config.deployment_for(VersionTarget::Canary), "web-canary");
        assert_eq!(
            config.selector_for(VersionTarget::Blue),
            "app=web,version=blue"
        );
    }
}
