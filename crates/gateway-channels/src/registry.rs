use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use gateway_core::{GatewayError, Result};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::manifest::ChannelManifest;

/// Loads `*_manifest.json` files from a directory and serves them by
/// channel id. Manifests can also be registered in-process, which is how
/// tests and built-in adapters seed the registry without touching disk.
pub struct ChannelRegistry {
    manifest_dir: Option<PathBuf>,
    manifests: RwLock<HashMap<String, ChannelManifest>>,
}

impl ChannelRegistry {
    /// Empty registry with no backing directory — manifests must be
    /// registered via [`Self::register_manifest`].
    pub fn new() -> Self {
        Self {
            manifest_dir: None,
            manifests: RwLock::new(HashMap::new()),
        }
    }

    /// Load every `*_manifest.json` file under `manifest_dir` at
    /// construction time.
    pub fn load_from_dir(manifest_dir: impl AsRef<Path>) -> Self {
        let registry = Self {
            manifest_dir: Some(manifest_dir.as_ref().to_path_buf()),
            manifests: RwLock::new(HashMap::new()),
        };
        registry.load_manifests();
        registry
    }

    fn load_manifests(&self) {
        let Some(dir) = &self.manifest_dir else { return };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "manifest directory unreadable");
                return;
            }
        };

        let mut loaded = self.manifests.write().unwrap();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_manifest = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with("_manifest.json"))
                .unwrap_or(false);
            if !is_manifest {
                continue;
            }

            match std::fs::read_to_string(&path)
                .map_err(GatewayError::from)
                .and_then(|s| serde_json::from_str::<ChannelManifest>(&s).map_err(GatewayError::from))
            {
                Ok(manifest) => {
                    info!(channel_id = %manifest.id, name = %manifest.name, "loaded channel manifest");
                    loaded.insert(manifest.id.clone(), manifest);
                }
                Err(e) => error!(path = %path.display(), error = %e, "failed to load manifest"),
            }
        }
    }

    pub fn register_manifest(&self, manifest: ChannelManifest) {
        info!(channel_id = %manifest.id, "registered channel manifest");
        self.manifests.write().unwrap().insert(manifest.id.clone(), manifest);
    }

    pub fn get_manifest(&self, channel_id: &str) -> Option<ChannelManifest> {
        self.manifests.read().unwrap().get(channel_id).cloned()
    }

    pub fn list_manifests(&self) -> Vec<ChannelManifest> {
        self.manifests.read().unwrap().values().cloned().collect()
    }

    pub fn list_channels(&self) -> Vec<Value> {
        self.manifests
            .read()
            .unwrap()
            .values()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "name": m.name,
                    "icon": m.icon,
                    "description": m.description,
                    "provider": m.provider,
                    "capabilities": m.capabilities,
                })
            })
            .collect()
    }

    pub fn validate_config(&self, channel_id: &str, config: &HashMap<String, Value>) -> Result<()> {
        let manifest = self
            .get_manifest(channel_id)
            .ok_or_else(|| GatewayError::ChannelNotFound(channel_id.to_string()))?;
        manifest.validate_config(config)
    }

    /// Drop every in-memory manifest and reparse the manifest directory.
    /// Manifests registered purely in-process (no backing file) are lost.
    pub fn reload_manifests(&self) {
        self.manifests.write().unwrap().clear();
        self.load_manifests();
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{SecurityDefaults, SessionScope};

    fn sample(id: &str) -> ChannelManifest {
        ChannelManifest {
            id: id.to_string(),
            name: id.to_string(),
            icon: "icon".into(),
            description: "desc".into(),
            long_description: None,
            version: "1.0.0".into(),
            provider: None,
            docs_url: None,
            required_config_fields: vec![],
            webhook_paths: vec![],
            session_scope: SessionScope::User,
            capabilities: vec![],
            security_defaults: SecurityDefaults::default(),
            setup_steps: vec![],
            privacy_badges: vec![],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn register_and_get_round_trips() {
        let registry = ChannelRegistry::new();
        registry.register_manifest(sample("telegram"));
        assert!(registry.get_manifest("telegram").is_some());
        assert!(registry.get_manifest("discord").is_none());
    }

    #[test]
    fn validate_config_errors_for_unknown_channel() {
        let registry = ChannelRegistry::new();
        let err = registry.validate_config("ghost", &HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "CHANNEL_NOT_FOUND");
    }

    #[test]
    fn reload_clears_in_process_only_manifests() {
        let registry = ChannelRegistry::new();
        registry.register_manifest(sample("telegram"));
        registry.reload_manifests();
        assert!(registry.get_manifest("telegram").is_none());
    }
}
