//! Renderer, window and shader settings

use super::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Shader binaries consumed by the graphics pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::new("shaders/simple_shader.vert.spv", "shaders/simple_shader.frag.spv")
    }
}

/// Initial window settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan!".to_string(),
            width: 846,
            height: 484,
        }
    }
}

/// # Renderer Configuration
///
/// Application metadata handed to the Vulkan instance, validation settings,
/// the initial window and the shader binaries for the default pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Engine name for Vulkan instance creation
    pub engine_name: String,
    /// Whether to enable Vulkan validation layers, `None` means debug builds only
    pub enable_validation: Option<bool>,
    /// Window settings
    pub window: WindowConfig,
    /// Shader configuration
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (0, 0, 1),
            engine_name: "Azha".to_string(),
            enable_validation: None,
            window: WindowConfig::default(),
            shaders: ShaderConfig::default(),
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set the initial window
    pub fn with_window(mut self, title: impl Into<String>, width: u32, height: u32) -> Self {
        self.window = WindowConfig {
            title: title.into(),
            width,
            height,
        };
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window must have a non-zero size, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if self.shaders.vertex_shader_path.is_empty() || self.shaders.fragment_shader_path.is_empty() {
            return Err(ConfigError::Invalid("Shader paths cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Azha")
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_demo_window() {
        let config = RendererConfig::default();
        assert_eq!(config.application_name, "Azha");
        assert_eq!(config.application_version, (0, 0, 1));
        assert_eq!(config.window.title, "Vulkan!");
        assert_eq!((config.window.width, config.window.height), (846, 484));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_follows_build_type_when_unset() {
        let config = RendererConfig::default();
        assert_eq!(config.validation_enabled(), cfg!(debug_assertions));
        assert!(!config.with_validation(false).validation_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RendererConfig::new("").validate().is_err());
        assert!(RendererConfig::default().with_window("x", 0, 10).validate().is_err());
        assert!(RendererConfig::default()
            .with_shaders(ShaderConfig::new("", "frag.spv"))
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RendererConfig = toml::from_str(
            r#"
            application_name = "Partial"

            [window]
            title = "Small"
            width = 320
            height = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.application_name, "Partial");
        assert_eq!(config.window.width, 320);
        assert_eq!(config.shaders, ShaderConfig::default());
        assert_eq!(config.engine_name, "Azha");
    }
}
