//! Triangle demo application
//!
//! Opens a window, uploads a single triangle and draws it every frame until the
//! window is closed or Escape is pressed. Settings are read from `azha.toml`
//! (or `azha.ron`) in the working directory when present.

use azha_render::config::{Config, ConfigError, RendererConfig};
use azha_render::foundation::ids::IdAllocator;
use azha_render::foundation::logging;
use azha_render::render::mesh::{Mesh, Vertex};
use azha_render::render::vulkan::{
    GpuContext, GraphicsPipeline, PipelineConfig, PipelineLayout, ShaderSet, VulkanError, VulkanRenderer,
    VulkanResult,
};
use azha_render::render::window::{Window, WindowError, WindowEvent};
use glfw::Key;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const CONFIG_FILES: [&str; 2] = ["azha.toml", "azha.ron"];

const TRIANGLE: [Vertex; 3] = [
    Vertex::new([0.0, -0.5], [1.0, 0.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5], [0.0, 0.0, 1.0, 1.0]),
    Vertex::new([0.5, 0.5], [0.0, 1.0, 0.0, 1.0]),
];

#[derive(Error, Debug)]
enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),
}

struct TriangleApp {
    // Field order is teardown order: GPU objects first, the window last
    mesh: Mesh,
    pipeline: GraphicsPipeline,
    renderer: VulkanRenderer,
    context: Arc<GpuContext>,
    window: Window,
}

impl TriangleApp {
    fn new(config: &RendererConfig) -> Result<Self, AppError> {
        let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
        let context = Arc::new(GpuContext::new(&window, config)?);
        let renderer = VulkanRenderer::new(Arc::clone(&context), &mut window)?;

        let shaders = ShaderSet::from_files(
            context.device(),
            resolve_asset(&config.shaders.vertex_shader_path),
            resolve_asset(&config.shaders.fragment_shader_path),
        )?;
        let pipeline_layout = Arc::new(PipelineLayout::new(&context, &[], &[])?);
        let pipeline = GraphicsPipeline::new(
            &context,
            &PipelineConfig::default_for(renderer.swapchain_render_pass()),
            &shaders,
            &pipeline_layout,
        )?;

        let mut mesh_ids = IdAllocator::new();
        let mesh = Mesh::from_vertices(&context, &mut mesh_ids, &TRIANGLE)?;

        log::info!("Triangle demo ready on {}", context.device_name());

        Ok(Self {
            mesh,
            pipeline,
            renderer,
            context,
            window,
        })
    }

    fn run(&mut self) -> Result<(), AppError> {
        while !self.window.should_close() {
            for event in self.window.poll_events() {
                if matches!(event, WindowEvent::CloseRequested | WindowEvent::KeyPressed(Key::Escape)) {
                    self.window.set_should_close(true);
                }
                self.renderer.handle_window_event(&event);
            }

            self.draw_frame()?;
        }

        self.context.wait_idle()?;
        log::info!(
            "Closing after {} swapchain recreation(s)",
            self.renderer.recreation_count()
        );
        Ok(())
    }

    fn draw_frame(&mut self) -> VulkanResult<()> {
        let Some(command_buffer) = self.renderer.begin_frame(&mut self.window)? else {
            return Ok(());
        };

        self.renderer.begin_swapchain_render_pass(command_buffer)?;
        self.pipeline.bind(command_buffer);
        self.mesh.bind(command_buffer);
        self.mesh.draw(command_buffer);
        self.renderer.end_swapchain_render_pass(command_buffer)?;

        self.renderer.end_frame(&mut self.window)
    }
}

fn load_config() -> Result<RendererConfig, ConfigError> {
    let config = match CONFIG_FILES.iter().map(Path::new).find(|path| path.exists()) {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            RendererConfig::load_from_file(path)?
        }
        None => RendererConfig::default(),
    };

    config.validate()?;
    Ok(config)
}

/// Relative asset paths fall back to this package's directory so the demo runs
/// from the workspace root as well as from its own directory.
fn resolve_asset(path: &str) -> PathBuf {
    let direct = PathBuf::from(path);
    if direct.is_absolute() || direct.exists() {
        direct
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(path)
    }
}

fn main() {
    logging::init();
    log::info!("Starting triangle demo");

    let result = load_config().map_err(AppError::from).and_then(|config| {
        let mut app = TriangleApp::new(&config)?;
        app.run()
    });

    if let Err(e) = result {
        log::error!("Application error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shaders_are_built() {
        if std::env::var("SKIP_SHADERS").is_ok() {
            return;
        }

        let shaders = RendererConfig::default().shaders;
        for path in [&shaders.vertex_shader_path, &shaders.fragment_shader_path] {
            let resolved = resolve_asset(path);
            assert!(resolved.exists(), "missing compiled shader {:?}", resolved);
        }
    }

    #[test]
    fn test_default_shaders_have_sources() {
        let shaders = RendererConfig::default().shaders;
        for path in [&shaders.vertex_shader_path, &shaders.fragment_shader_path] {
            let source = path.trim_end_matches(".spv");
            assert!(
                Path::new(env!("CARGO_MANIFEST_DIR")).join(source).exists(),
                "no GLSL source for {}",
                path
            );
        }
    }
}
