//! 构建对象的驻留缓存
//!
//! 六种 GPU 构建对象各有一个缓存实例，全部由逻辑设备
//! [`crate::foundation::device::GfxDevice`] 持有；需要驻留的组件拿到
//! 设备引用（或单个缓存的引用）来调用，不经过任何全局单例。

pub mod arena;
pub mod descriptor;
pub mod interner;
pub mod pipeline;
pub mod pipeline_layout;
pub mod render_pass;
pub mod sampler;
pub mod shader;

pub use descriptor::{GfxDescriptorBindingDesc, GfxDescriptorSetLayoutCache, GfxDescriptorSetLayoutDesc};
pub use pipeline::{
    GfxColorBlendDesc, GfxComputePipelineDesc, GfxDepthStencilDesc, GfxGraphicsPipelineDesc, GfxPipelineCache,
    GfxRasterDesc, GfxShaderStageDesc, GfxVertexAttributeDesc, GfxVertexBindingDesc,
};
pub use pipeline_layout::{GfxPipelineLayoutCache, GfxPipelineLayoutDesc, GfxPushConstantRange};
pub use render_pass::{
    GfxAttachmentDesc, GfxAttachmentRef, GfxRenderPassCache, GfxRenderPassDesc, GfxSubpassDependencyDesc,
    GfxSubpassDesc,
};
pub use sampler::{GfxSamplerCache, GfxSamplerDesc};
pub use shader::GfxShaderModuleCache;

use crate::foundation::device::GfxDevice;

/// 所有构建对象缓存的集合
///
/// 生命周期和逻辑设备一致：随设备创建，在设备销毁前由
/// [`Self::destroy`] 统一销毁所有缓存的 GPU 对象。
pub struct GfxResourceCache {
    render_passes: GfxRenderPassCache,
    descriptor_set_layouts: GfxDescriptorSetLayoutCache,
    pipeline_layouts: GfxPipelineLayoutCache,
    samplers: GfxSamplerCache,
    pipelines: GfxPipelineCache,
}

impl GfxResourceCache {
    pub fn new() -> Self {
        Self {
            render_passes: GfxRenderPassCache::new(),
            descriptor_set_layouts: GfxDescriptorSetLayoutCache::new(),
            pipeline_layouts: GfxPipelineLayoutCache::new(),
            samplers: GfxSamplerCache::new(),
            pipelines: GfxPipelineCache::new(),
        }
    }

    #[inline]
    pub fn render_passes(&self) -> &GfxRenderPassCache {
        &self.render_passes
    }
    #[inline]
    pub fn descriptor_set_layouts(&self) -> &GfxDescriptorSetLayoutCache {
        &self.descriptor_set_layouts
    }
    #[inline]
    pub fn pipeline_layouts(&self) -> &GfxPipelineLayoutCache {
        &self.pipeline_layouts
    }
    #[inline]
    pub fn samplers(&self) -> &GfxSamplerCache {
        &self.samplers
    }
    #[inline]
    pub fn pipelines(&self) -> &GfxPipelineCache {
        &self.pipelines
    }

    /// 释放 pipeline 缓存私有的 shader 字节码
    #[inline]
    pub fn clear_shader_modules(&self, device: &GfxDevice) {
        self.pipelines.clear_shader_modules(device);
    }

    /// 全部缓存的 entry 总数
    pub fn entry_count(&self) -> usize {
        self.render_passes.len()
            + self.descriptor_set_layouts.len()
            + self.pipeline_layouts.len()
            + self.samplers.len()
            + self.pipelines.len()
            + self.pipelines.shader_modules().len()
    }

    /// 销毁所有缓存的 GPU 对象并清空缓存
    ///
    /// 只能在设备销毁前调用一次；此后所有已发出的 handle 全部失效。
    pub(crate) fn destroy(&self, device: &GfxDevice) {
        log::info!("destroying resource caches ({} entries)", self.entry_count());

        // pipeline 先于它引用的 layout / render pass 销毁
        self.pipelines.destroy(device);
        self.pipeline_layouts.destroy(device);
        self.descriptor_set_layouts.destroy(device);
        self.render_passes.destroy(device);
        self.samplers.destroy(device);
    }
}

impl Default for GfxResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cache_is_empty() {
        let caches = GfxResourceCache::new();
        assert_eq!(caches.entry_count(), 0);
        assert!(caches.render_passes().is_empty());
        assert!(caches.pipelines().is_empty());
    }
}
