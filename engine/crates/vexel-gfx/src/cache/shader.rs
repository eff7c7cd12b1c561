//! Shader module 缓存
//!
//! 和结构化 key 的缓存同一套模式，但 key 是文件系统路径：
//! 同一个 spv 文件只读取、构造一次。pipeline 全部建完之后可以通过
//! [`GfxShaderModuleCache::clear`] 释放字节码，已构造的 pipeline 不受影响。

use std::path::{Path, PathBuf};

use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::foundation::device::GfxDevice;
use crate::foundation::error::{GfxError, GfxResult};

/// 读取 spv 文件为 SPIR-V 指令字序列
///
/// 字节长度不是 4 的整数倍属于格式错误，在触碰 driver 之前就报告。
fn read_spv_file(path: &Path) -> GfxResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| GfxError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;

    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(GfxError::ShaderFormat {
            path: path.to_path_buf(),
            len: bytes.len() as u64,
        });
    }

    ash::util::read_spv(&mut std::io::Cursor::new(&bytes)).map_err(|source| GfxError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })
}

/// 可以存放多个 shader module，使用路径进行索引
pub struct GfxShaderModuleCache {
    modules: Mutex<FxHashMap<PathBuf, vk::ShaderModule>>,
}

impl GfxShaderModuleCache {
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(FxHashMap::default()),
        }
    }

    /// 查找或加载 shader module
    ///
    /// 文件读取和 driver 构造都发生在锁内：同一个路径的并发请求串行化，
    /// 文件只会被读取一次。
    pub fn get_or_load(&self, device: &GfxDevice, path: &Path) -> GfxResult<vk::ShaderModule> {
        self.get_or_load_with(path, |code| {
            let create_info = vk::ShaderModuleCreateInfo::default().code(code);
            device
                .create_shader_module(&create_info, &path.display().to_string())
                .map_err(GfxError::construction("shader module"))
        })
    }

    pub(crate) fn get_or_load_with(
        &self,
        path: &Path,
        create: impl FnOnce(&[u32]) -> GfxResult<vk::ShaderModule>,
    ) -> GfxResult<vk::ShaderModule> {
        let mut modules = self.modules.lock();
        if let Some(&module) = modules.get(path) {
            return Ok(module);
        }

        let code = read_spv_file(path)?;
        let module = create(&code)?;

        modules.insert(path.to_path_buf(), module);
        log::debug!("shader_module cache: loaded {:?} ({} words)", path, code.len());
        Ok(module)
    }

    /// 清空缓存并销毁所有 shader module
    ///
    /// 只应在所有引用这些字节码的 pipeline 都构造完成之后调用；
    /// 已构造的 pipeline handle 不受影响。之后再次请求同一个路径
    /// 会重新加载。
    pub fn clear(&self, device: &GfxDevice) {
        let drained = self.drain();
        let count = drained.len();
        for module in drained {
            unsafe {
                device.destroy_shader_module(module, None);
            }
        }
        if count > 0 {
            log::info!("shader_module cache: released {} modules", count);
        }
    }

    pub(crate) fn drain(&self) -> Vec<vk::ShaderModule> {
        let mut modules = self.modules.lock();
        modules.drain().map(|(_, module)| module).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for GfxShaderModuleCache {
    fn default() -> Self {
        Self::new()
    }
}
