// Shader bytecode and shader modules
//
// Vulkan consumes SPIR-V as 32-bit words. `ShaderCode` is the validated,
// word-aligned form of an opaque byte buffer; `ShaderModule` is the scoped
// device handle built from it, released as soon as it goes out of scope.

use ash::vk;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::device::Device;
use super::error::ResourceCreationError;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("failed to read shader {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("shader bytecode is empty")]
    Empty,

    #[error("shader bytecode length {0} is not a multiple of 4")]
    Misaligned(usize),

    #[error("shader bytecode does not start with the SPIR-V magic number")]
    BadMagic,
}

/// Compiled SPIR-V, validated and word-aligned
#[derive(Debug, Clone)]
pub struct ShaderCode {
    words: Vec<u32>,
}

impl ShaderCode {
    /// Read a whole `.spv` file into memory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ShaderError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ShaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let code = Self::from_bytes(&bytes)?;
        log::debug!("Loaded shader {:?} ({} words)", path, code.words.len());
        Ok(code)
    }

    /// Byte-swapped modules are normalized to host order
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShaderError> {
        if bytes.is_empty() {
            return Err(ShaderError::Empty);
        }
        if bytes.len() % 4 != 0 {
            return Err(ShaderError::Misaligned(bytes.len()));
        }

        // Either byte order is accepted; read_spv swaps to host order
        let first = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if first != SPIRV_MAGIC && first != SPIRV_MAGIC.swap_bytes() {
            return Err(ShaderError::BadMagic);
        }

        // Length and magic are already checked, so only I/O can fail here
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|_| ShaderError::BadMagic)?;

        Ok(Self { words })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

/// Shader module that lives only as long as pipeline creation needs it
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<Device>,
}

impl ShaderModule {
    pub fn new(device: &Arc<Device>, code: &ShaderCode) -> Result<Self, ResourceCreationError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code.words());

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(ResourceCreationError::ShaderModule)?;

        Ok(Self {
            module,
            device: device.clone(),
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}
