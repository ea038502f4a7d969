//! Kubeconfig materialization.
//!
//! The admin credential bundle kubeadm writes inside the bootstrap control
//! plane points at the node's own address. Before it is useful from the host,
//! the named cluster entry's server has to be swapped for the published port.

use crate::error::{CoreError, Result, ResultExt};
use crate::node::{Node, ADMIN_KUBECONFIG_PATH};
use serde_yaml::Value;
use std::path::Path;

/// Server URL for a host-published API port.
pub fn localhost_server(port: u16) -> String {
    format!("https://localhost:{port}")
}

/// Rewrite the `server` of the cluster entry named `cluster_entry`.
///
/// Everything else in the document is carried over unchanged.
pub fn rewrite_server(raw: &[u8], cluster_entry: &str, server: &str) -> Result<Vec<u8>> {
    let mut doc: Value = serde_yaml::from_slice(raw)
        .map_err(|e| CoreError::Kubeconfig(format!("failed to load kubeconfig: {e}")))?;

    let clusters = doc
        .get_mut("clusters")
        .and_then(Value::as_sequence_mut)
        .ok_or_else(|| CoreError::Kubeconfig("kubeconfig has no clusters".into()))?;

    let entry = clusters
        .iter_mut()
        .find(|c| c.get("name").and_then(Value::as_str) == Some(cluster_entry))
        .ok_or_else(|| {
            CoreError::Kubeconfig(format!("kubeconfig has no cluster named {cluster_entry:?}"))
        })?;

    let cluster = entry
        .get_mut("cluster")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| {
            CoreError::Kubeconfig(format!("cluster {cluster_entry:?} has no cluster section"))
        })?;
    cluster.insert(Value::from("server"), Value::from(server));

    Ok(serde_yaml::to_string(&doc)?.into_bytes())
}

/// Write a kubeconfig to `dest`, creating parent directories. The file is
/// readable by the owner only.
pub async fn write(dest: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, contents)
        .await
        .with_context(|| format!("failed to write kubeconfig {}", dest.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

/// Read the admin credential bundle from `node`.
pub async fn read_admin(node: &Node) -> Result<Vec<u8>> {
    node.read_file(ADMIN_KUBECONFIG_PATH)
        .await
        .context("failed to get kubeconfig from node")
}

/// Copy the admin kubeconfig out of `node` into `dest`, pointed at
/// `https://localhost:<external_port>`.
pub async fn materialize(
    node: &Node,
    dest: &Path,
    external_port: u16,
    cluster_name: &str,
) -> Result<()> {
    let raw = read_admin(node).await?;
    let rewritten = rewrite_server(&raw, cluster_name, &localhost_server(external_port))?;
    write(dest, &rewritten).await?;
    tracing::info!(path = %dest.display(), port = external_port, "Kubeconfig written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeRole;
    use kinder_runtime::testing::ScriptedRunner;
    use kinder_runtime::Engine;
    use std::sync::Arc;

    const ADMIN_CONF: &str = r#"apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t
    server: https://10.0.0.5:6443
  name: demo
- cluster:
    server: https://10.0.0.9:6443
  name: other
contexts:
- context:
    cluster: demo
    user: kubernetes-admin
  name: kubernetes-admin@demo
current-context: kubernetes-admin@demo
kind: Config
preferences: {}
users:
- name: kubernetes-admin
  user:
    client-certificate-data: Y2VydA==
    client-key-data: a2V5
"#;

    fn server_of(doc: &Value, name: &str) -> String {
        doc["clusters"]
            .as_sequence()
            .unwrap()
            .iter()
            .find(|c| c["name"].as_str() == Some(name))
            .and_then(|c| c["cluster"]["server"].as_str())
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_rewrite_only_touches_named_server() {
        let out = rewrite_server(ADMIN_CONF.as_bytes(), "demo", &localhost_server(54321)).unwrap();
        let after: Value = serde_yaml::from_slice(&out).unwrap();
        assert_eq!(server_of(&after, "demo"), "https://localhost:54321");
        assert_eq!(server_of(&after, "other"), "https://10.0.0.9:6443");

        let mut expected: Value = serde_yaml::from_str(ADMIN_CONF).unwrap();
        expected["clusters"][0]["cluster"]["server"] = Value::from("https://localhost:54321");
        assert_eq!(after, expected);
    }

    #[test]
    fn test_rewrite_preserves_key_order() {
        let out = rewrite_server(ADMIN_CONF.as_bytes(), "demo", "https://localhost:1").unwrap();
        let text = String::from_utf8(out).unwrap();
        let ca = text.find("certificate-authority-data").unwrap();
        let server = text.find("server: https://localhost:1").unwrap();
        assert!(ca < server);
        assert!(text.starts_with("apiVersion: v1\n"));
    }

    #[test]
    fn test_rewrite_missing_entry_fails() {
        let err =
            rewrite_server(ADMIN_CONF.as_bytes(), "absent", "https://localhost:1").unwrap_err();
        assert!(matches!(err, CoreError::Kubeconfig(_)));
        assert!(err.to_string().contains("absent"));
    }

    #[test]
    fn test_rewrite_rejects_garbage() {
        assert!(rewrite_server(b"clusters: [", "demo", "x").is_err());
        assert!(rewrite_server(b"kind: Config\n", "demo", "x").is_err());
    }

    #[tokio::test]
    async fn test_materialize_writes_private_file() {
        let runner = Arc::new(ScriptedRunner::new().on(
            ["docker", "exec", "demo-control-plane", "cat", ADMIN_KUBECONFIG_PATH],
            ADMIN_CONF,
        ));
        let node = Node::new("demo-control-plane", NodeRole::ControlPlane, Engine::docker(runner));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("config");

        materialize(&node, &dest, 54321, "demo").await.unwrap();

        let written: Value = serde_yaml::from_slice(&std::fs::read(&dest).unwrap()).unwrap();
        assert_eq!(server_of(&written, "demo"), "https://localhost:54321");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_materialize_read_failure_names_operation() {
        let runner = Arc::new(ScriptedRunner::new().fail_on(["docker", "exec"], "No such file"));
        let node = Node::new("demo-control-plane", NodeRole::ControlPlane, Engine::docker(runner));
        let dir = tempfile::tempdir().unwrap();
        let err = materialize(&node, &dir.path().join("config"), 1, "demo")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to get kubeconfig from node"));
    }
}
