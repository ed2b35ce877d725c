use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::Deserialize;

fn default_listen_addr() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_tls_cert_path() -> String {
    "/etc/webhook/certs/cert.pem".to_string()
}

fn default_tls_key_path() -> String {
    "/etc/webhook/certs/key.pem".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ignored_namespaces() -> Vec<String> {
    vec!["kube-system".to_string(), "kube-public".to_string()]
}

fn default_flavor_label() -> String {
    "kubevirt.io/flavor".to_string()
}

fn default_flavor_value() -> String {
    "android".to_string()
}

fn default_launcher_label() -> String {
    "kubevirt.io".to_string()
}

fn default_launcher_value() -> String {
    "virt-launcher".to_string()
}

fn default_target_container() -> String {
    "compute".to_string()
}

fn default_image() -> String {
    "quay.io/quamotion/android-x86-launcher:latest".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct InjectorConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: String,
    #[serde(default = "default_tls_key_path")]
    pub tls_key_path: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub injection: InjectionConfig,
}

/// Selection and rewrite rules applied to every admitted pod.
///
/// Built once at startup and shared read-only between requests.
#[derive(Debug, Clone, Deserialize)]
pub struct InjectionConfig {
    /// Namespaces whose pods are never mutated.
    #[serde(default = "default_ignored_namespaces")]
    pub ignored_namespaces: Vec<String>,
    #[serde(default = "default_flavor_label")]
    pub flavor_label: String,
    #[serde(default = "default_flavor_value")]
    pub flavor_value: String,
    #[serde(default = "default_launcher_label")]
    pub launcher_label: String,
    #[serde(default = "default_launcher_value")]
    pub launcher_value: String,
    /// Name of the container whose image gets replaced.
    #[serde(default = "default_target_container")]
    pub target_container: String,
    /// Image reference written into the target container.
    #[serde(default = "default_image")]
    pub image: String,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            ignored_namespaces: default_ignored_namespaces(),
            flavor_label: default_flavor_label(),
            flavor_value: default_flavor_value(),
            launcher_label: default_launcher_label(),
            launcher_value: default_launcher_value(),
            target_container: default_target_container(),
            image: default_image(),
        }
    }
}

impl InjectorConfig {
    pub fn load(path: &str) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("INJECTOR_").split("__"))
            .extract()
            .map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = InjectorConfig::load("missing.yaml").map_err(|e| *e)?;
            assert_eq!(config.listen_addr, "0.0.0.0:8443");
            assert_eq!(config.metrics_addr, "0.0.0.0:9090");
            assert_eq!(
                config.injection.ignored_namespaces,
                vec!["kube-system", "kube-public"]
            );
            assert_eq!(config.injection.target_container, "compute");
            assert_eq!(
                config.injection.image,
                "quay.io/quamotion/android-x86-launcher:latest"
            );
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
listen_addr: "127.0.0.1:9443"
injection:
  image: "registry.local/launcher:v2"
  ignored_namespaces: ["kube-system"]
"#,
            )?;
            jail.set_env("INJECTOR_INJECTION__TARGET_CONTAINER", "main");
            jail.set_env("INJECTOR_LOG_LEVEL", "debug");

            let config = InjectorConfig::load("config.yaml").map_err(|e| *e)?;
            assert_eq!(config.listen_addr, "127.0.0.1:9443");
            assert_eq!(config.log_level, "debug");
            assert_eq!(config.injection.image, "registry.local/launcher:v2");
            assert_eq!(config.injection.ignored_namespaces, vec!["kube-system"]);
            assert_eq!(config.injection.target_container, "main");
            assert_eq!(config.injection.flavor_value, "android");
            Ok(())
        });
    }
}
