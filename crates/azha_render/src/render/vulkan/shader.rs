//! SPIR-V shader modules

use super::error::{VulkanError, VulkanResult};
use ash::{vk, Device};
use std::ffi::CStr;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

/// Entry point every shader stage is expected to export
pub const SHADER_ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V bytecode
    pub fn from_bytes(device: Device, bytes: &[u8]) -> VulkanResult<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid SPIR-V: {}", e)))?;
        Self::from_words(device, &code)
    }

    /// Load a shader module from a compiled SPIR-V file
    pub fn from_file(device: Device, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let code = read_spirv_file(path)?;
        Self::from_words(device, &code)
    }

    fn from_words(device: Device, code: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description for pipeline creation
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(SHADER_ENTRY_POINT)
            .build()
    }
}

/// Read SPIR-V words from `path`
pub fn read_spirv_file(path: impl AsRef<Path>) -> VulkanResult<Vec<u32>> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|source| VulkanError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let code = ash::util::read_spv(&mut file)
        .map_err(|e| VulkanError::InitializationFailed(format!("Invalid SPIR-V in {}: {}", path.display(), e)))?;

    log::debug!("Loaded shader {} ({} words)", path.display(), code.len());
    Ok(code)
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Vertex and fragment stage pair
pub struct ShaderSet {
    /// Vertex stage
    pub vertex: ShaderModule,
    /// Fragment stage
    pub fragment: ShaderModule,
}

impl ShaderSet {
    /// Load both stages from SPIR-V files
    pub fn from_files(device: &Device, vertex_path: impl AsRef<Path>, fragment_path: impl AsRef<Path>) -> VulkanResult<Self> {
        Ok(Self {
            vertex: ShaderModule::from_file(device.clone(), vertex_path)?,
            fragment: ShaderModule::from_file(device.clone(), fragment_path)?,
        })
    }

    /// Stage descriptions in pipeline order
    pub fn stage_infos(&self) -> [vk::PipelineShaderStageCreateInfo; 2] {
        [
            self.vertex.stage_info(vk::ShaderStageFlags::VERTEX),
            self.fragment.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ]
    }
}
