//! Structural delta between a desired child and its observed counterpart.
//!
//! Desired fields are laid over the observed JSON document: every value the
//! desired object carries is managed and overwritten when it differs, while
//! fields only present in the observed object (server defaults, fields other
//! controllers own) survive. Paths are RFC 6901 JSON pointers.

use serde_json::Value as JsonValue;

/// Per-kind rules for the overlay.
#[derive(Clone, Debug, Default)]
pub struct DiffPolicy {
    /// Never written, even when the desired object sets them.
    pub ignore: Vec<String>,
    /// Managed even in absence: removed from the observed object when the
    /// desired object does not carry them.
    pub owned: Vec<String>,
}

impl DiffPolicy {
    pub fn ignore(mut self, path: &str) -> Self {
        self.ignore.push(path.to_string());
        self
    }

    pub fn owned(mut self, path: &str) -> Self {
        self.owned.push(path.to_string());
        self
    }
}

/// Escape one path segment for use inside a JSON pointer.
pub fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Lay `desired` over `observed` in place. Returns the pointers of every
/// field that changed; empty means the observed object is converged.
pub fn overlay(
    observed: &mut JsonValue,
    desired: &JsonValue,
    policy: &DiffPolicy,
) -> Vec<String> {
    let mut changed = Vec::new();
    merge(observed, desired, "", policy, &mut changed);

    for path in &policy.owned {
        if desired.pointer(path).is_none() && remove(observed, path) {
            changed.push(path.clone());
        }
    }
    changed
}

fn merge(
    observed: &mut JsonValue,
    desired: &JsonValue,
    path: &str,
    policy: &DiffPolicy,
    changed: &mut Vec<String>,
) {
    if policy.ignore.iter().any(|p| p == path) {
        return;
    }
    match (observed, desired) {
        (JsonValue::Object(obs), JsonValue::Object(des)) => {
            for (key, value) in des {
                let child = format!("{}/{}", path, escape(key));
                match obs.get_mut(key) {
                    Some(existing) => {
                        merge(existing, value, &child, policy, changed)
                    }
                    None => {
                        if policy.ignore.iter().any(|p| *p == child) {
                            continue;
                        }
                        obs.insert(key.clone(), value.clone());
                        changed.push(child);
                    }
                }
            }
        }
        // Same-length lists are merged element-wise so defaults filled into
        // list entries (container fields, port protocols) are not fought over.
        (JsonValue::Array(obs), JsonValue::Array(des))
            if obs.len() == des.len() =>
        {
            for (idx, (o, d)) in obs.iter_mut().zip(des).enumerate() {
                merge(o, d, &format!("{}/{}", path, idx), policy, changed);
            }
        }
        (obs, des) => {
            if *obs != *des {
                *obs = des.clone();
                changed.push(path.to_string());
            }
        }
    }
}

fn remove(doc: &mut JsonValue, path: &str) -> bool {
    let Some((parent, last)) = path.rsplit_once('/') else {
        return false;
    };
    let key = last.replace("~1", "/").replace("~0", "~");
    let target = if parent.is_empty() {
        Some(doc)
    } else {
        doc.pointer_mut(parent)
    };
    match target {
        Some(JsonValue::Object(map)) => map.remove(&key).is_some(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converged_object_has_empty_delta() {
        let mut observed = json!({
            "spec": {"replicas": 1, "clusterIP": "10.0.0.7", "ports": [{"port": 80, "protocol": "TCP"}]}
        });
        let desired = json!({"spec": {"replicas": 1, "ports": [{"port": 80}]}});
        let before = observed.clone();
        assert!(overlay(&mut observed, &desired, &DiffPolicy::default()).is_empty());
        assert_eq!(observed, before);
    }

    #[test]
    fn changed_leaf_is_overwritten_and_reported() {
        let mut observed = json!({
            "spec": {"containers": [{"name": "api", "image": "orders:v2", "imagePullPolicy": "IfNotPresent"}]}
        });
        let desired = json!({"spec": {"containers": [{"name": "api", "image": "orders:v3"}]}});
        let changed = overlay(&mut observed, &desired, &DiffPolicy::default());
        assert_eq!(changed, ["/spec/containers/0/image"]);
        assert_eq!(observed["spec"]["containers"][0]["image"], "orders:v3");
        assert_eq!(observed["spec"]["containers"][0]["imagePullPolicy"], "IfNotPresent");
    }

    #[test]
    fn ignored_paths_are_left_alone() {
        let mut observed = json!({"spec": {"replicas": 4}});
        let desired = json!({"spec": {"replicas": 1}});
        let policy = DiffPolicy::default().ignore("/spec/replicas");
        assert!(overlay(&mut observed, &desired, &policy).is_empty());
        assert_eq!(observed["spec"]["replicas"], 4);

        let mut observed = json!({"spec": {}});
        assert!(overlay(&mut observed, &desired, &policy).is_empty());
        assert!(observed["spec"].get("replicas").is_none());
    }

    #[test]
    fn list_length_change_replaces_the_list() {
        let mut observed = json!({"spec": {"tls": [{"hosts": ["a"]}, {"hosts": ["b"]}]}});
        let desired = json!({"spec": {"tls": [{"hosts": ["a"]}]}});
        let changed = overlay(&mut observed, &desired, &DiffPolicy::default());
        assert_eq!(changed, ["/spec/tls"]);
        assert_eq!(observed["spec"]["tls"], json!([{"hosts": ["a"]}]));
    }

    #[test]
    fn owned_paths_absent_from_desired_are_removed() {
        let mut observed = json!({
            "metadata": {"annotations": {"cert-manager.io/cluster-issuer": "letsencrypt", "other": "x"}},
            "spec": {"tls": [{"secretName": "orders-tls"}], "rules": []}
        });
        let desired = json!({"spec": {"rules": []}});
        let policy = DiffPolicy::default()
            .owned("/spec/tls")
            .owned(&format!("/metadata/annotations/{}", escape("cert-manager.io/cluster-issuer")));
        let changed = overlay(&mut observed, &desired, &policy);
        assert_eq!(changed.len(), 2);
        assert!(observed["spec"].get("tls").is_none());
        assert_eq!(observed["metadata"]["annotations"], json!({"other": "x"}));

        // Already absent: nothing to do.
        assert!(overlay(&mut observed, &desired, &policy).is_empty());
    }
}
