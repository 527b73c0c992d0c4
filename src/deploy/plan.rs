// src/deploy/plan.rs
use crate::config::{is_local_host, LoadConfig, Mode};
use crate::error::{Error, Result};

/// Where one replica goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub index: usize,
    pub host: String,
    pub port: u16,
    /// `None` lets the backend pick a timestamped name.
    pub container_name: Option<String>,
}

/// A validated, fully resolved deployment. Building one constructs nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub prefix: String,
    pub instances: Vec<InstanceSpec>,
}

/// Image basename with `:` replaced, usable as a container name.
pub fn sanitize_image(image: &str) -> String {
    image.rsplit('/').next().unwrap_or(image).replace(':', "-")
}

impl DeploymentPlan {
    pub fn resolve(config: &LoadConfig) -> Result<Self> {
        config.validate()?;

        let prefix = config
            .container_name
            .clone()
            .unwrap_or_else(|| sanitize_image(&config.image));

        if config.mode == Mode::Remote {
            return Ok(Self {
                prefix,
                instances: Vec::new(),
            });
        }

        let hosts: Vec<String> = match config.explicit_hosts() {
            Some(hosts) => hosts[..config.replicas].to_vec(),
            None => vec!["localhost".to_string(); config.replicas],
        };

        if let Some(host) = hosts.iter().find(|h| !is_local_host(h)) {
            return Err(Error::NotImplemented(format!(
                "Remote deployment via SSH not yet implemented. Host: {}",
                host
            )));
        }

        let single = config.replicas == 1;
        let instances = hosts
            .into_iter()
            .enumerate()
            .map(|(index, host)| {
                let port = u16::try_from(index)
                    .ok()
                    .and_then(|offset| config.base_port.checked_add(offset))
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "port range {}+{} exceeds 65535",
                            config.base_port, config.replicas
                        ))
                    })?;
                let container_name = if single {
                    config.container_name.clone()
                } else {
                    Some(format!("{}-{}", prefix, index))
                };
                Ok(InstanceSpec {
                    index,
                    host,
                    port,
                    container_name,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { prefix, instances })
    }

    pub fn pool_name(&self) -> String {
        format!("{}-pool", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_increment_from_base() {
        let plan = DeploymentPlan::resolve(&LoadConfig::new("x").replicas(3).base_port(8000)).unwrap();

        let ports: Vec<u16> = plan.instances.iter().map(|i| i.port).collect();
        assert_eq!(ports, vec![8000, 8001, 8002]);
        assert!(plan.instances.iter().all(|i| i.host == "localhost"));
        assert_eq!(plan.instances[2].container_name.as_deref(), Some("x-2"));
        assert_eq!(plan.pool_name(), "x-pool");
    }

    #[test]
    fn image_names_lose_registry_and_tag() {
        assert_eq!(sanitize_image("registry.io/team/affine:latest"), "affine-latest");
        assert_eq!(sanitize_image("affine"), "affine");
    }

    #[test]
    fn too_few_hosts_is_validation_error() {
        let config = LoadConfig::new("x").replicas(2).hosts(["localhost"]);
        assert!(matches!(DeploymentPlan::resolve(&config), Err(Error::Validation(_))));
    }

    #[test]
    fn non_local_host_is_not_implemented() {
        let config = LoadConfig::new("x").replicas(2).hosts(["localhost", "10.0.0.5"]);
        assert!(matches!(DeploymentPlan::resolve(&config), Err(Error::NotImplemented(_))));
    }

    #[test]
    fn extra_hosts_are_ignored_and_loopbacks_accepted() {
        let config = LoadConfig::new("x").replicas(2).hosts(["127.0.0.1", "::1", "far.away"]);
        let plan = DeploymentPlan::resolve(&config).unwrap();
        assert_eq!(plan.instances.len(), 2);
        assert_eq!(plan.instances[1].host, "::1");
    }

    #[test]
    fn single_replica_keeps_caller_name() {
        let plan = DeploymentPlan::resolve(&LoadConfig::new("registry.io/affine:v2")).unwrap();
        assert_eq!(plan.instances[0].container_name, None);
        assert_eq!(plan.prefix, "affine-v2");

        let named = DeploymentPlan::resolve(&LoadConfig::new("affine").container_name("mine")).unwrap();
        assert_eq!(named.instances[0].container_name.as_deref(), Some("mine"));
    }

    #[test]
    fn port_overflow_is_rejected() {
        let config = LoadConfig::new("x").replicas(3).base_port(65534);
        assert!(matches!(DeploymentPlan::resolve(&config), Err(Error::Validation(_))));
    }
}
