// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(&contents, path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|s| s.to_str());
    let config = if matches!(extension, Some("yaml") | Some("yml")) {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(contents).context("Failed to parse JSON config")?
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EnvType;
    use crate::load_balancer::Strategy;
    use std::time::Duration;

    #[test]
    fn yaml_defaults_fill_in() {
        let yaml = r#"
environments:
  - image: "affine:latest"
    replicas: 3
    load_balance: round_robin
    env_vars:
      API_KEY: "secret"
"#;
        let config = parse_config(yaml, Path::new("envfleet.yaml")).unwrap();
        config.validate().unwrap();

        let env = &config.environments[0];
        assert_eq!(env.replicas, 3);
        assert_eq!(env.base_port, 8000);
        assert_eq!(env.mode, Mode::Local);
        assert_eq!(env.load_balance, Strategy::RoundRobin);
        assert_eq!(env.env_vars.get("API_KEY").map(String::as_str), Some("secret"));
        assert!(!config.metrics.enabled);
        assert_eq!(config.health_check.unhealthy_threshold, 1);
    }

    #[test]
    fn startup_timeout_follows_env_type_unless_set() {
        let config = LoadConfig::new("x");
        assert_eq!(config.startup_timeout(EnvType::FunctionBased), Duration::from_secs(60));
        assert_eq!(config.startup_timeout(EnvType::HttpBased), Duration::from_secs(120));

        let mut config = LoadConfig::new("x");
        config.startup_timeout_secs = Some(5);
        assert_eq!(config.startup_timeout(EnvType::HttpBased), Duration::from_secs(5));
    }

    #[test]
    fn json_is_accepted() {
        let json = r#"{"environments": [{"image": "x", "mode": "remote", "remote_url": "http://10.0.0.1:8080"}]}"#;
        let config = parse_config(json, Path::new("envfleet.json")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.environments[0].mode, Mode::Remote);
    }

    #[test]
    fn validation_rejects_zero_replicas() {
        let yaml = "environments:\n  - image: x\n    replicas: 0\n";
        let config = parse_config(yaml, Path::new("c.yml")).unwrap();
        assert!(config.validate().is_err());
    }
}
