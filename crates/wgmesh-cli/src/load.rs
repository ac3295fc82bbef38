//! Mesh document loading.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use wgmesh_core::MeshSpec;

/// Reads and parses the mesh document from a file or stdin (`-`).
///
/// JSON is used when `force_json` is set or the file extension is `.json`;
/// YAML otherwise.
pub fn load_mesh(path: &Path, force_json: bool) -> anyhow::Result<MeshSpec> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading mesh document from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading mesh document {}", path.display()))?
    };

    let json = force_json || path.extension().is_some_and(|ext| ext == "json");
    let spec: MeshSpec = if json {
        serde_json::from_str(&text).context("parsing mesh document as JSON")?
    } else {
        serde_yaml::from_str(&text).context("parsing mesh document as YAML")?
    };

    Ok(spec)
}
