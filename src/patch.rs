use json_patch::jsonptr::PointerBuf;
use json_patch::{Patch, PatchOperation, ReplaceOperation};
use k8s_openapi::api::core::v1::Container;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::InjectionConfig;

/// Builds the JSON Patch that points the target container at the launcher image.
///
/// Returns an empty patch when the pod has no container with the target name.
/// If several containers share the name, the last one is patched.
pub fn build_patch(config: &InjectionConfig, containers: &[Container]) -> Patch {
    let mut target_index = None;

    for (i, container) in containers.iter().enumerate() {
        debug!(container = %container.name, index = i, "found container");
        if container.name == config.target_container {
            target_index = Some(i);
        }
    }

    let Some(index) = target_index else {
        warn!(
            target_container = %config.target_container,
            "no target container found on pod"
        );
        return Patch(Vec::new());
    };

    let index = index.to_string();
    Patch(vec![PatchOperation::Replace(ReplaceOperation {
        path: PointerBuf::from_tokens(["spec", "containers", index.as_str(), "image"]),
        value: Value::String(config.image.clone()),
    })])
}
