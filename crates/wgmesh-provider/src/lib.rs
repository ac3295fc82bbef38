//! Declarative resource lifecycle over a mesh.
//!
//! Wraps the mesh as a CRUD resource for infrastructure-as-code drivers:
//! [`check`] validates raw inputs, [`create`] realizes the mesh (tearing it
//! back down on any failure), [`diff`] reports which changes force a
//! delete-before-replace, and [`delete`] removes the remote artifacts.
//! The driver hands the mesh document over via `PULUMI_MESH_FILE` and tags
//! the resource with `PULUMI_MESH_ID`.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use wgmesh_core::{Mesh, MeshInfo, MeshSpec, Toggle};
use wgmesh_remote::{Dial, Transport};

pub mod error;

pub use error::ProviderError;

/// Environment variable carrying the resource id.
pub const ENV_MESH_ID: &str = "PULUMI_MESH_ID";

/// Environment variable pointing at the mesh document.
pub const ENV_MESH_FILE: &str = "PULUMI_MESH_FILE";

/// Node attributes whose change forces replacement.
const NODE_REPLACE_ATTRS: [&str; 7] = [
    "addr",
    "name",
    "ssh",
    "endpoint",
    "listen_port",
    "peers",
    "prio",
];

/// One validation failure from [`check`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckFailure {
    /// Dotted path of the offending property.
    pub property: String,
    /// Why it was rejected.
    pub reason: String,
}

impl CheckFailure {
    fn new(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

/// Result of [`check`]: normalized inputs plus any failures.
#[derive(Clone, Debug, Serialize)]
pub struct CheckResult {
    /// Inputs with node names defaulted from their keys.
    pub inputs: Value,
    /// Validation failures; empty when the inputs are acceptable.
    pub failures: Vec<CheckFailure>,
}

/// Result of [`diff`].
#[derive(Clone, Debug, Serialize)]
pub struct DiffResult {
    /// Whether anything changed.
    pub changes: bool,
    /// Dotted paths forcing replacement.
    pub replaces: Vec<String>,
    /// A replacement tears the old mesh down before creating the new one.
    pub delete_before_replace: bool,
}

/// Result of [`create`].
#[derive(Clone, Debug, Serialize)]
pub struct CreateResult {
    /// Generated resource id.
    pub id: String,
    /// Mesh snapshot taken after bring-up.
    pub info: MeshInfo,
    /// The canonicalized mesh document.
    pub outs: Value,
}

/// Validates raw resource inputs, defaulting node names from their keys.
#[must_use]
pub fn check(new: &Value) -> CheckResult {
    let mut inputs = new.clone();
    let mut failures = Vec::new();

    for field in ["name", "network"] {
        if inputs.get(field).is_none_or(Value::is_null) {
            failures.push(CheckFailure::new(field, "required"));
        }
    }

    match inputs.get_mut("nodes") {
        None | Some(Value::Null) => failures.push(CheckFailure::new("nodes", "required")),
        Some(Value::Object(nodes)) => {
            for (key, node) in nodes {
                let Some(node) = node.as_object_mut() else {
                    failures.push(CheckFailure::new(format!("nodes.{key}"), "must be a mapping"));
                    continue;
                };
                if node.get("addr").is_none_or(Value::is_null) {
                    failures.push(CheckFailure::new(format!("nodes.{key}.addr"), "required"));
                }
                match node.get("name") {
                    Some(Value::String(name)) if name != key => {
                        failures.push(CheckFailure::new(
                            format!("nodes.{key}.name"),
                            "must match key",
                        ));
                    }
                    Some(Value::String(_)) => {}
                    _ => {
                        node.insert("name".to_string(), Value::String(key.clone()));
                    }
                }
                if node.get("ssh").is_none_or(Value::is_null) {
                    failures.push(CheckFailure::new(format!("nodes.{key}.ssh"), "required"));
                }
                if node.get("endpoint").is_none_or(Value::is_null) {
                    failures.push(CheckFailure::new(format!("nodes.{key}.endpoint"), "required"));
                }
            }
        }
        Some(_) => failures.push(CheckFailure::new("nodes", "must be a mapping")),
    }

    CheckResult { inputs, failures }
}

/// Compares old and new resource inputs and reports what forces
/// replacement. Any change to the mesh identity, peering policy, or a
/// node's declared attributes replaces the whole mesh, old one first.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> DiffResult {
    let mut replaces = Vec::new();

    for field in ["name", "network", "full"] {
        if old.get(field) != new.get(field) {
            replaces.push(field.to_string());
        }
    }

    let empty = serde_json::Map::new();
    let old_nodes = old.get("nodes").and_then(Value::as_object).unwrap_or(&empty);
    let new_nodes = new.get("nodes").and_then(Value::as_object).unwrap_or(&empty);

    let mut removed: Vec<&String> = Vec::new();
    for key in old_nodes.keys() {
        if !new_nodes.contains_key(key) {
            removed.push(key);
        }
    }

    for (key, new_node) in new_nodes {
        match old_nodes.get(key) {
            None => replaces.push(format!("nodes.{key}")),
            Some(old_node) => {
                for attr in NODE_REPLACE_ATTRS {
                    if old_node.get(attr) != new_node.get(attr) {
                        replaces.push(format!("nodes.{key}.{attr}"));
                    }
                }
            }
        }
    }

    replaces.extend(removed.into_iter().map(|key| format!("nodes.{key}")));

    DiffResult {
        changes: !replaces.is_empty(),
        replaces,
        delete_before_replace: true,
    }
}

/// Realizes a declared mesh: peer everything, write every config, bring the
/// fleet up. Any failure tears the mesh back down before the error is
/// returned, so a failed create leaves nothing behind.
pub async fn create<T, D>(spec: MeshSpec, dialer: &D) -> Result<CreateResult, ProviderError>
where
    T: Transport + Clone + Send + Sync + 'static,
    D: Dial<Transport = T>,
{
    let mut mesh = Mesh::open(spec, dialer).await?;

    match create_inner(&mut mesh).await {
        Ok(result) => Ok(result),
        Err(e) => {
            if !mesh.down(Toggle::Force).await {
                warn!("[{}] [create] !! teardown after failed create was partial", mesh.name());
            }
            Err(e)
        }
    }
}

async fn create_inner<T>(mesh: &mut Mesh<T>) -> Result<CreateResult, ProviderError>
where
    T: Transport + Clone + Send + Sync + 'static,
{
    mesh.peer_all().await?;
    mesh.config_write_all().await?;

    if mesh.up(Toggle::Skip).await? != Some(true) {
        return Err(ProviderError::CreateFailed {
            mesh: mesh.name().to_string(),
        });
    }

    let info = mesh.info().await;
    let outs = serde_json::to_value(mesh.to_spec())?;

    Ok(CreateResult {
        id: format!("mesh-{}", random_id()),
        info,
        outs,
    })
}

/// Deletes the remote artifacts of a declared mesh: interfaces down,
/// configs removed. Best-effort per node.
pub async fn delete<T, D>(spec: MeshSpec, dialer: &D) -> Result<bool, ProviderError>
where
    T: Transport + Clone + Send + Sync + 'static,
    D: Dial<Transport = T>,
{
    let mesh = Mesh::open(spec, dialer).await?;
    Ok(mesh.down(Toggle::Force).await)
}

/// The resource id handed over by the driver, if any.
#[must_use]
pub fn mesh_id_from_env() -> Option<String> {
    std::env::var(ENV_MESH_ID).ok()
}

/// Loads the mesh document named by `PULUMI_MESH_FILE`, if set.
pub fn spec_from_env() -> Result<Option<MeshSpec>, ProviderError> {
    let Ok(path) = std::env::var(ENV_MESH_FILE) else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(&path)
        .map_err(|e| ProviderError::Document(format!("{path}: {e}")))?;
    let spec = if path.ends_with(".json") {
        serde_json::from_str(&text).map_err(|e| ProviderError::Document(e.to_string()))?
    } else {
        serde_yaml::from_str(&text).map_err(|e| ProviderError::Document(e.to_string()))?
    };
    Ok(Some(spec))
}

fn random_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            char::from_digit(u32::from(n), 16).unwrap_or('0')
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use wgmesh_core::NodeSpec;
    use wgmesh_remote::{Lab, SshSpec};

    fn node_spec(addr: &str, endpoint: &str, host: &str) -> NodeSpec {
        NodeSpec {
            name: None,
            addr: addr.parse().expect("valid cidr"),
            ssh: SshSpec::Target(format!("root@{host}")),
            endpoint: endpoint.parse().expect("valid endpoint"),
            listen_port: None,
            prio: None,
            json: None,
        }
    }

    fn two_node_spec() -> MeshSpec {
        let mut nodes = BTreeMap::new();
        nodes.insert("a".to_string(), node_spec("10.0.0.1/24", "203.0.113.1", "mesh-a"));
        nodes.insert("b".to_string(), node_spec("10.0.0.2/24", "203.0.113.2", "mesh-b"));
        MeshSpec {
            name: "m".to_string(),
            network: "10.0.0.0/24".parse().expect("valid network"),
            full: true,
            nodes,
        }
    }

    fn valid_inputs() -> Value {
        json!({
            "name": "m",
            "network": "10.0.0.0/24",
            "nodes": {
                "a": {"addr": "10.0.0.1/24", "ssh": "root@mesh-a", "endpoint": "203.0.113.1"},
            }
        })
    }

    #[test]
    fn check_accepts_valid_inputs_and_defaults_names() {
        let result = check(&valid_inputs());
        assert!(result.failures.is_empty());
        assert_eq!(result.inputs["nodes"]["a"]["name"], json!("a"));
    }

    #[test]
    fn check_reports_missing_fields() {
        let result = check(&json!({}));
        let properties: Vec<&str> = result.failures.iter().map(|f| f.property.as_str()).collect();
        assert_eq!(properties, vec!["name", "network", "nodes"]);
    }

    #[test]
    fn check_reports_missing_node_fields() {
        let result = check(&json!({
            "name": "m",
            "network": "10.0.0.0/24",
            "nodes": {"a": {}}
        }));
        let properties: Vec<&str> = result.failures.iter().map(|f| f.property.as_str()).collect();
        assert_eq!(
            properties,
            vec!["nodes.a.addr", "nodes.a.ssh", "nodes.a.endpoint"]
        );
    }

    #[test]
    fn check_rejects_name_key_mismatch() {
        let mut inputs = valid_inputs();
        inputs["nodes"]["a"]["name"] = json!("z");
        let result = check(&inputs);
        assert_eq!(result.failures[0].property, "nodes.a.name");
    }

    #[test]
    fn diff_reports_no_changes_for_identical_inputs() {
        let inputs = valid_inputs();
        let result = diff(&inputs, &inputs);
        assert!(!result.changes);
        assert!(result.replaces.is_empty());
        assert!(result.delete_before_replace);
    }

    #[test]
    fn diff_flags_mesh_and_node_attributes() {
        let old = valid_inputs();
        let mut new = valid_inputs();
        new["full"] = json!(false);
        new["nodes"]["a"]["addr"] = json!("10.0.0.9/24");
        new["nodes"]["z"] = json!({"addr": "10.0.0.3/24", "ssh": "root@mesh-z", "endpoint": "203.0.113.3"});

        let result = diff(&old, &new);
        assert!(result.changes);
        assert_eq!(result.replaces, vec!["full", "nodes.a.addr", "nodes.z"]);
    }

    #[test]
    fn diff_flags_removed_nodes() {
        let old = valid_inputs();
        let new = json!({"name": "m", "network": "10.0.0.0/24", "nodes": {}});
        let result = diff(&old, &new);
        assert_eq!(result.replaces, vec!["nodes.a"]);
    }

    #[tokio::test]
    async fn create_realizes_the_mesh() {
        let lab = Lab::new();
        let result = create(two_node_spec(), &lab).await.expect("create");

        assert!(result.id.starts_with("mesh-"));
        assert!((result.info.is_up - 1.0).abs() < f64::EPSILON);
        assert!(lab.interface_up("mesh-a", "wg-m1"));
        assert!(lab.interface_up("mesh-b", "wg-m2"));
        assert_eq!(result.outs["name"], json!("m"));
    }

    #[tokio::test]
    async fn failed_create_tears_everything_down() {
        let lab = Lab::new();
        lab.fail_wg_quick_up("mesh-b");

        let result = create(two_node_spec(), &lab).await;
        assert!(matches!(result, Err(ProviderError::CreateFailed { .. })));

        assert!(!lab.interface_up("mesh-a", "wg-m1"));
        assert!(!lab.interface_up("mesh-b", "wg-m2"));
        assert!(lab.read_file("mesh-a", "/etc/wireguard/wg-m1.conf").is_none());
        assert!(lab.read_file("mesh-b", "/etc/wireguard/wg-m2.conf").is_none());
    }

    #[tokio::test]
    async fn delete_removes_remote_artifacts() {
        let lab = Lab::new();
        create(two_node_spec(), &lab).await.expect("create");

        assert!(delete(two_node_spec(), &lab).await.expect("delete"));
        assert!(!lab.interface_up("mesh-a", "wg-m1"));
        assert!(lab.read_file("mesh-a", "/etc/wireguard/wg-m1.conf").is_none());
    }

    #[test]
    fn random_ids_are_hex_and_distinct() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
