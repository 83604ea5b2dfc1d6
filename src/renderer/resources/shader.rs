use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{memory_or, GfxResult, GraphicsError};

/// A compiled SPIR-V module and the stage it runs in.
pub struct ShaderModule {
    handle: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    ctx: Arc<DeviceContext>,
}

impl ShaderModule {
    pub fn from_file(
        ctx: Arc<DeviceContext>,
        path: impl AsRef<Path>,
        stage: vk::ShaderStageFlags,
    ) -> GfxResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            log::error!("Unable to read shader {}: {}", path.display(), e);
            GraphicsError::FileLoadError
        })?;
        Self::from_bytes(ctx, &bytes, stage)
    }

    pub fn from_bytes(ctx: Arc<DeviceContext>, bytes: &[u8], stage: vk::ShaderStageFlags) -> GfxResult<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| {
            log::error!("Invalid SPIR-V for {:?} stage: {}", stage, e);
            GraphicsError::FileLoadError
        })?;
        let info = vk::ShaderModuleCreateInfo::default().code(&code);
        let handle = unsafe {
            ctx.device().create_shader_module(&info).map_err(|e| {
                log::error!("Unable to create shader module: {}", e);
                memory_or(e, GraphicsError::InitializationFailed)
            })?
        };
        Ok(Self { handle, stage, ctx })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_shader_module(self.handle) };
    }
}
