//! Vulkan 逻辑设备封装

use std::ffi::CString;
use std::ops::Deref;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicBool, Ordering};

use ash::prelude::VkResult;
use ash::vk;

use crate::cache::{
    GfxComputePipelineDesc, GfxDescriptorSetLayoutDesc, GfxGraphicsPipelineDesc, GfxPipelineLayoutDesc,
    GfxRenderPassDesc, GfxResourceCache, GfxSamplerDesc,
};
use crate::foundation::error::GfxResult;

/// Vulkan 逻辑设备封装
///
/// 持有核心设备 API、debug utils 扩展，以及全部构建对象缓存。
/// 缓存的生命周期和设备完全一致：设备销毁时所有缓存的 GPU 对象一并销毁，
/// 此前发出的所有 handle 随之失效。
///
/// 物理设备选择和 queue 发现在上一层完成，这里只接收建好的
/// `ash::Device`。
pub struct GfxDevice {
    /// 核心 Vulkan 设备 API
    device: ash::Device,
    /// 调试工具扩展 API
    debug_utils: ash::ext::debug_utils::Device,

    caches: GfxResourceCache,

    #[cfg(debug_assertions)]
    destroyed: AtomicBool,
}

// 构造与销毁
impl GfxDevice {
    pub fn new(instance: &ash::Instance, device: ash::Device) -> Self {
        let debug_utils = ash::ext::debug_utils::Device::new(instance, &device);

        Self {
            device,
            debug_utils,
            caches: GfxResourceCache::new(),

            #[cfg(debug_assertions)]
            destroyed: AtomicBool::new(false),
        }
    }

    /// 销毁所有缓存的 GPU 对象，然后销毁设备
    ///
    /// 此后所有由缓存发出的 handle 全部失效。
    pub fn destroy(&self) {
        log::info!("destroying device");
        self.caches.destroy(self);

        #[cfg(debug_assertions)]
        self.destroyed.store(true, Ordering::SeqCst);

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// 缓存入口
impl GfxDevice {
    #[inline]
    pub fn caches(&self) -> &GfxResourceCache {
        &self.caches
    }

    #[inline]
    pub fn get_or_create_render_pass(&self, desc: &GfxRenderPassDesc) -> GfxResult<vk::RenderPass> {
        self.caches.render_passes().get_or_create(self, desc)
    }

    #[inline]
    pub fn get_or_create_descriptor_set_layout(
        &self,
        desc: &GfxDescriptorSetLayoutDesc,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        self.caches.descriptor_set_layouts().get_or_create(self, desc)
    }

    #[inline]
    pub fn get_or_create_pipeline_layout(&self, desc: &GfxPipelineLayoutDesc) -> GfxResult<vk::PipelineLayout> {
        self.caches.pipeline_layouts().get_or_create(self, desc)
    }

    #[inline]
    pub fn get_or_create_sampler(&self, desc: &GfxSamplerDesc) -> GfxResult<vk::Sampler> {
        self.caches.samplers().get_or_create(self, desc)
    }

    #[inline]
    pub fn get_or_create_graphics_pipeline(&self, desc: &GfxGraphicsPipelineDesc) -> GfxResult<vk::Pipeline> {
        self.caches.pipelines().get_or_create_graphics(self, desc)
    }

    #[inline]
    pub fn get_or_create_compute_pipeline(&self, desc: &GfxComputePipelineDesc) -> GfxResult<vk::Pipeline> {
        self.caches.pipelines().get_or_create_compute(self, desc)
    }

    /// 释放 shader 字节码内存，通常在加载阶段结束、所有 pipeline
    /// 构造完成之后调用
    #[inline]
    pub fn clear_shader_modules(&self) {
        self.caches.clear_shader_modules(self);
    }
}

// driver 构造函数：创建 + debug name
impl GfxDevice {
    pub fn create_render_pass(&self, create_info: &vk::RenderPassCreateInfo, debug_name: &str) -> VkResult<vk::RenderPass> {
        let render_pass = unsafe { self.device.create_render_pass(create_info, None)? };
        self.set_object_debug_name(render_pass, debug_name);
        Ok(render_pass)
    }

    pub fn create_descriptor_set_layout(
        &self,
        create_info: &vk::DescriptorSetLayoutCreateInfo,
        debug_name: &str,
    ) -> VkResult<vk::DescriptorSetLayout> {
        let layout = unsafe { self.device.create_descriptor_set_layout(create_info, None)? };
        self.set_object_debug_name(layout, debug_name);
        Ok(layout)
    }

    pub fn create_pipeline_layout(
        &self,
        create_info: &vk::PipelineLayoutCreateInfo,
        debug_name: &str,
    ) -> VkResult<vk::PipelineLayout> {
        let layout = unsafe { self.device.create_pipeline_layout(create_info, None)? };
        self.set_object_debug_name(layout, debug_name);
        Ok(layout)
    }

    pub fn create_sampler(&self, create_info: &vk::SamplerCreateInfo, debug_name: &str) -> VkResult<vk::Sampler> {
        let sampler = unsafe { self.device.create_sampler(create_info, None)? };
        self.set_object_debug_name(sampler, debug_name);
        Ok(sampler)
    }

    pub fn create_shader_module(
        &self,
        create_info: &vk::ShaderModuleCreateInfo,
        debug_name: &str,
    ) -> VkResult<vk::ShaderModule> {
        let module = unsafe { self.device.create_shader_module(create_info, None)? };
        self.set_object_debug_name(module, debug_name);
        Ok(module)
    }

    pub fn create_graphics_pipeline(
        &self,
        create_info: &vk::GraphicsPipelineCreateInfo,
        debug_name: &str,
    ) -> VkResult<vk::Pipeline> {
        let pipeline = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(create_info), None)
                .map_err(|(_, result)| result)?[0]
        };
        self.set_object_debug_name(pipeline, debug_name);
        Ok(pipeline)
    }

    pub fn create_compute_pipeline(
        &self,
        create_info: &vk::ComputePipelineCreateInfo,
        debug_name: &str,
    ) -> VkResult<vk::Pipeline> {
        let pipeline = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(create_info), None)
                .map_err(|(_, result)| result)?[0]
        };
        self.set_object_debug_name(pipeline, debug_name);
        Ok(pipeline)
    }
}

// tools
impl GfxDevice {
    #[inline]
    pub fn set_object_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: impl AsRef<str>) {
        let name = CString::new(name.as_ref()).unwrap();
        unsafe {
            self.debug_utils
                .set_debug_utils_object_name(
                    &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
                )
                .unwrap();
        }
    }

    #[inline]
    pub fn wait_idle(&self) {
        unsafe {
            self.device.device_wait_idle().unwrap();
        }
    }
}

impl Deref for GfxDevice {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}
impl Drop for GfxDevice {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed.load(Ordering::SeqCst), "GfxDevice must be destroyed before being dropped.");
    }
}
