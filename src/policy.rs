use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::InjectionConfig;

/// Decides whether a pod is a KubeVirt android launcher that should have its
/// compute image swapped.
///
/// Checks run in order and the first failing one short-circuits: ignored
/// namespace, missing labels, flavor label, launcher label.
pub fn is_mutation_required(
    config: &InjectionConfig,
    namespace: &str,
    name: &str,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    if config.ignored_namespaces.iter().any(|ns| ns == namespace) {
        debug!(%name, %namespace, "skipping mutation, namespace is ignored");
        return false;
    }

    let Some(labels) = labels else {
        debug!(%name, %namespace, "skipping mutation, object has no labels");
        return false;
    };

    if !label_matches(labels, &config.flavor_label, &config.flavor_value, name) {
        return false;
    }

    if !label_matches(labels, &config.launcher_label, &config.launcher_value, name) {
        return false;
    }

    info!(%name, %namespace, "mutation required");
    true
}

fn label_matches(
    labels: &BTreeMap<String, String>,
    key: &str,
    expected: &str,
    name: &str,
) -> bool {
    match labels.get(key) {
        None => {
            debug!(%name, label = %key, "skipping mutation, label is missing");
            false
        }
        Some(value) if value != expected => {
            debug!(
                %name,
                label = %key,
                %value,
                %expected,
                "skipping mutation, label has unexpected value"
            );
            false
        }
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn launcher_labels() -> BTreeMap<String, String> {
        labels(&[
            ("kubevirt.io/flavor", "android"),
            ("kubevirt.io", "virt-launcher"),
        ])
    }

    #[rstest]
    #[case("kube-system")]
    #[case("kube-public")]
    fn test_ignored_namespace_never_mutates(#[case] namespace: &str) {
        let config = InjectionConfig::default();
        assert!(!is_mutation_required(
            &config,
            namespace,
            "launcher",
            Some(&launcher_labels())
        ));
        assert!(!is_mutation_required(&config, namespace, "launcher", None));
    }

    #[test]
    fn test_no_labels() {
        let config = InjectionConfig::default();
        assert!(!is_mutation_required(&config, "default", "pod", None));
        assert!(!is_mutation_required(
            &config,
            "default",
            "pod",
            Some(&BTreeMap::new())
        ));
    }

    #[rstest]
    #[case::missing_flavor(&[("kubevirt.io", "virt-launcher")])]
    #[case::missing_launcher(&[("kubevirt.io/flavor", "android")])]
    #[case::wrong_flavor(&[("kubevirt.io/flavor", "fedora"), ("kubevirt.io", "virt-launcher")])]
    #[case::wrong_launcher(&[("kubevirt.io/flavor", "android"), ("kubevirt.io", "virt-handler")])]
    #[case::flavor_case_differs(&[("kubevirt.io/flavor", "Android"), ("kubevirt.io", "virt-launcher")])]
    fn test_label_mismatch(#[case] pairs: &[(&str, &str)]) {
        let config = InjectionConfig::default();
        assert!(!is_mutation_required(
            &config,
            "default",
            "pod",
            Some(&labels(pairs))
        ));
    }

    #[test]
    fn test_matching_launcher_pod() {
        let config = InjectionConfig::default();
        assert!(is_mutation_required(
            &config,
            "default",
            "virt-launcher-android-abcde",
            Some(&launcher_labels())
        ));
    }

    #[test]
    fn test_extra_labels_are_ignored() {
        let config = InjectionConfig::default();
        let mut pod_labels = launcher_labels();
        pod_labels.insert("app".to_string(), "emulator".to_string());
        assert!(is_mutation_required(&config, "vms", "pod", Some(&pod_labels)));
    }

    #[test]
    fn test_custom_ignored_namespaces() {
        let config = InjectionConfig {
            ignored_namespaces: vec!["sandbox".to_string()],
            ..InjectionConfig::default()
        };
        assert!(!is_mutation_required(
            &config,
            "sandbox",
            "pod",
            Some(&launcher_labels())
        ));
        assert!(is_mutation_required(
            &config,
            "kube-system",
            "pod",
            Some(&launcher_labels())
        ));
    }
}
