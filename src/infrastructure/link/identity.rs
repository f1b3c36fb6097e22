//! Controller identity announced to the robot after connecting.

/// Resolves the human-readable name of this controller
pub trait NameSource: Send + Sync {
    fn controller_name(&self) -> anyhow::Result<String>;
}

/// Configured override first, then the host name from the environment
#[derive(Debug, Clone, Default)]
pub struct HostNameSource {
    configured: Option<String>,
}

impl HostNameSource {
    pub fn new(configured: Option<String>) -> Self {
        Self { configured }
    }
}

impl NameSource for HostNameSource {
    fn controller_name(&self) -> anyhow::Result<String> {
        if let Some(name) = self.configured.as_deref().map(str::trim) {
            if !name.is_empty() {
                return Ok(name.to_string());
            }
        }

        ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|name| name.trim().to_string())
            .find(|name| !name.is_empty())
            .ok_or_else(|| anyhow::anyhow!("No host name available"))
    }
}

/// Generic label used when no name can be resolved
pub fn platform_label() -> String {
    match std::env::consts::OS {
        "android" => "Android".to_string(),
        "ios" => "iPhone".to_string(),
        "macos" => "Mac".to_string(),
        "windows" => "Windows PC".to_string(),
        "linux" => "Linux".to_string(),
        other => other.to_string(),
    }
}

/// Resolve a name, falling back to [`platform_label`] on failure
pub fn resolve_controller_name(source: &dyn NameSource) -> String {
    match source.controller_name() {
        Ok(name) => name,
        Err(e) => {
            tracing::debug!("Controller name unavailable ({}), using platform label", e);
            platform_label()
        }
    }
}
