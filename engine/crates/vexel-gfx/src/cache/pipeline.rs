//! Pipeline（graphics + compute）的结构化 key 和驻留缓存
//!
//! pipeline 缓存是嵌套的：它私有一个按路径索引的 shader module 子缓存，
//! 每次 pipeline 请求先经过子缓存解析各 stage 的 module，再调用 driver。
//! 所有 pipeline 构造完之后可以用 [`GfxPipelineCache::clear_shader_modules`]
//! 释放 shader 字节码，已构造的 pipeline handle 不受影响。
//!
//! graphics key 中的 `layout` / `render_pass` 是来自对应驻留缓存的
//! handle：相同结构必然是相同 handle，按 handle 比较即按结构比较。

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};

use ash::vk;
use itertools::Itertools;

use crate::cache::arena::{GfxSeq, GfxSeqArena};
use crate::cache::interner::{GfxCacheKey, GfxInternCache};
use crate::cache::shader::GfxShaderModuleCache;
use crate::foundation::device::GfxDevice;
use crate::foundation::error::{GfxError, GfxResult};

/// 单个 shader stage：入口点 + spv 文件路径
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxShaderStageDesc<'a> {
    pub stage: vk::ShaderStageFlags,
    pub path: &'a Path,
    pub entry_point: &'a CStr,
}

pub(crate) struct GfxShaderStageKey {
    stage: vk::ShaderStageFlags,
    path: PathBuf,
    entry_point: CString,
}

impl GfxShaderStageDesc<'_> {
    fn matches_key(&self, key: &GfxShaderStageKey) -> bool {
        self.stage == key.stage && self.path == key.path.as_path() && self.entry_point == key.entry_point.as_c_str()
    }

    fn to_key(self) -> GfxShaderStageKey {
        GfxShaderStageKey {
            stage: self.stage,
            path: self.path.to_path_buf(),
            entry_point: self.entry_point.to_owned(),
        }
    }
}

/// 顶点缓冲区的 binding 描述
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxVertexBindingDesc {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}
impl GfxVertexBindingDesc {
    fn to_vk(self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(self.binding)
            .stride(self.stride)
            .input_rate(self.input_rate)
    }
}

/// 顶点属性描述
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxVertexAttributeDesc {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}
impl GfxVertexAttributeDesc {
    fn to_vk(self) -> vk::VertexInputAttributeDescription {
        vk::VertexInputAttributeDescription::default()
            .location(self.location)
            .binding(self.binding)
            .format(self.format)
            .offset(self.offset)
    }
}

/// 单个 color attachment 的混合状态
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxColorBlendDesc {
    pub blend_enable: bool,
    pub src_color_blend_factor: vk::BlendFactor,
    pub dst_color_blend_factor: vk::BlendFactor,
    pub color_blend_op: vk::BlendOp,
    pub src_alpha_blend_factor: vk::BlendFactor,
    pub dst_alpha_blend_factor: vk::BlendFactor,
    pub alpha_blend_op: vk::BlendOp,
    pub color_write_mask: vk::ColorComponentFlags,
}
impl Default for GfxColorBlendDesc {
    /// 不混合，直接写入
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: vk::BlendFactor::ONE,
            dst_color_blend_factor: vk::BlendFactor::ZERO,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}
impl GfxColorBlendDesc {
    /// 标准 alpha 混合
    pub fn alpha_blending() -> Self {
        Self {
            blend_enable: true,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            ..Default::default()
        }
    }

    fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(self.blend_enable)
            .src_color_blend_factor(self.src_color_blend_factor)
            .dst_color_blend_factor(self.dst_color_blend_factor)
            .color_blend_op(self.color_blend_op)
            .src_alpha_blend_factor(self.src_alpha_blend_factor)
            .dst_alpha_blend_factor(self.dst_alpha_blend_factor)
            .alpha_blend_op(self.alpha_blend_op)
            .color_write_mask(self.color_write_mask)
    }
}

/// 光栅化状态
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxRasterDesc {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
}
impl Default for GfxRasterDesc {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            // 按照 OpenGL 的传统，将 CCW 视为 front face
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

/// 深度测试状态
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxDepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
}
impl Default for GfxDepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
        }
    }
}

const DEFAULT_DYNAMIC_STATES: &[vk::DynamicState] = &[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Graphics pipeline 的借用版描述
///
/// `layout` 和 `render_pass` 从对应的驻留缓存获取。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxGraphicsPipelineDesc<'a> {
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,

    pub shader_stages: &'a [GfxShaderStageDesc<'a>],

    pub vertex_bindings: &'a [GfxVertexBindingDesc],
    pub vertex_attributes: &'a [GfxVertexAttributeDesc],
    pub primitive_topology: vk::PrimitiveTopology,

    pub raster: GfxRasterDesc,
    pub msaa_samples: vk::SampleCountFlags,
    pub enable_sample_shading: bool,

    /// 需要为每个 color attachment 分别指定
    pub color_blend_states: &'a [GfxColorBlendDesc],
    pub depth_stencil: GfxDepthStencilDesc,
    pub dynamic_states: &'a [vk::DynamicState],
}
impl Default for GfxGraphicsPipelineDesc<'_> {
    fn default() -> Self {
        Self {
            layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
            shader_stages: &[],
            vertex_bindings: &[],
            vertex_attributes: &[],
            primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            raster: GfxRasterDesc::default(),
            msaa_samples: vk::SampleCountFlags::TYPE_1,
            enable_sample_shading: false,
            color_blend_states: &[],
            depth_stencil: GfxDepthStencilDesc::default(),
            dynamic_states: DEFAULT_DYNAMIC_STATES,
        }
    }
}

#[derive(Default)]
pub(crate) struct GfxPipelineArena {
    stages: GfxSeqArena<GfxShaderStageKey>,
    vertex_bindings: GfxSeqArena<GfxVertexBindingDesc>,
    vertex_attributes: GfxSeqArena<GfxVertexAttributeDesc>,
    blend_states: GfxSeqArena<GfxColorBlendDesc>,
    dynamic_states: GfxSeqArena<vk::DynamicState>,
}

pub(crate) struct GfxGraphicsPipelineKey {
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    subpass: u32,
    stages: GfxSeq,
    vertex_bindings: GfxSeq,
    vertex_attributes: GfxSeq,
    primitive_topology: vk::PrimitiveTopology,
    raster: GfxRasterDesc,
    msaa_samples: vk::SampleCountFlags,
    enable_sample_shading: bool,
    blend_states: GfxSeq,
    depth_stencil: GfxDepthStencilDesc,
    dynamic_states: GfxSeq,
}

impl GfxCacheKey for GfxGraphicsPipelineDesc<'_> {
    type Arena = GfxPipelineArena;
    type Owned = GfxGraphicsPipelineKey;

    fn matches(&self, owned: &GfxGraphicsPipelineKey, arena: &GfxPipelineArena) -> bool {
        let owned_stages = arena.stages.get(owned.stages);
        self.layout == owned.layout
            && self.render_pass == owned.render_pass
            && self.subpass == owned.subpass
            && self.shader_stages.len() == owned_stages.len()
            && self.shader_stages.iter().zip(owned_stages).all(|(stage, key)| stage.matches_key(key))
            && self.vertex_bindings == arena.vertex_bindings.get(owned.vertex_bindings)
            && self.vertex_attributes == arena.vertex_attributes.get(owned.vertex_attributes)
            && self.primitive_topology == owned.primitive_topology
            && self.raster == owned.raster
            && self.msaa_samples == owned.msaa_samples
            && self.enable_sample_shading == owned.enable_sample_shading
            && self.color_blend_states == arena.blend_states.get(owned.blend_states)
            && self.depth_stencil == owned.depth_stencil
            && self.dynamic_states == arena.dynamic_states.get(owned.dynamic_states)
    }

    fn intern(&self, arena: &mut GfxPipelineArena) -> GfxGraphicsPipelineKey {
        GfxGraphicsPipelineKey {
            layout: self.layout,
            render_pass: self.render_pass,
            subpass: self.subpass,
            stages: arena.stages.intern(self.shader_stages.iter().map(|stage| stage.to_key())),
            vertex_bindings: arena.vertex_bindings.intern(self.vertex_bindings.iter().copied()),
            vertex_attributes: arena.vertex_attributes.intern(self.vertex_attributes.iter().copied()),
            primitive_topology: self.primitive_topology,
            raster: self.raster,
            msaa_samples: self.msaa_samples,
            enable_sample_shading: self.enable_sample_shading,
            blend_states: arena.blend_states.intern(self.color_blend_states.iter().copied()),
            depth_stencil: self.depth_stencil,
            dynamic_states: arena.dynamic_states.intern(self.dynamic_states.iter().copied()),
        }
    }
}

/// Compute pipeline 的借用版描述
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxComputePipelineDesc<'a> {
    pub layout: vk::PipelineLayout,
    pub path: &'a Path,
    pub entry_point: &'a CStr,
}

pub(crate) struct GfxComputePipelineKey {
    layout: vk::PipelineLayout,
    path: PathBuf,
    entry_point: CString,
}

impl GfxCacheKey for GfxComputePipelineDesc<'_> {
    type Arena = ();
    type Owned = GfxComputePipelineKey;

    fn matches(&self, owned: &GfxComputePipelineKey, _arena: &()) -> bool {
        self.layout == owned.layout
            && self.path == owned.path.as_path()
            && self.entry_point == owned.entry_point.as_c_str()
    }

    fn intern(&self, _arena: &mut ()) -> GfxComputePipelineKey {
        GfxComputePipelineKey {
            layout: self.layout,
            path: self.path.to_path_buf(),
            entry_point: self.entry_point.to_owned(),
        }
    }
}

/// Pipeline 驻留缓存（graphics + compute）
pub struct GfxPipelineCache {
    graphics: GfxInternCache<GfxPipelineArena, GfxGraphicsPipelineKey, vk::Pipeline>,
    compute: GfxInternCache<(), GfxComputePipelineKey, vk::Pipeline>,
    shader_modules: GfxShaderModuleCache,
}

impl GfxPipelineCache {
    pub fn new() -> Self {
        Self {
            graphics: GfxInternCache::new("graphics_pipeline"),
            compute: GfxInternCache::new("compute_pipeline"),
            shader_modules: GfxShaderModuleCache::new(),
        }
    }

    /// 查找或创建 graphics pipeline
    pub fn get_or_create_graphics(
        &self,
        device: &GfxDevice,
        desc: &GfxGraphicsPipelineDesc,
    ) -> GfxResult<vk::Pipeline> {
        self.graphics.get_or_create(desc, |key, arena, slot| {
            // 先经过子缓存解析每个 stage 的 shader module
            let stages = arena.stages.get(key.stages);
            let modules = stages
                .iter()
                .map(|stage| self.shader_modules.get_or_load(device, &stage.path))
                .collect::<GfxResult<Vec<_>>>()?;
            let stage_infos = stages
                .iter()
                .zip(modules)
                .map(|(stage, module)| {
                    vk::PipelineShaderStageCreateInfo::default()
                        .stage(stage.stage)
                        .module(module)
                        .name(&stage.entry_point)
                })
                .collect_vec();

            let vertex_bindings =
                arena.vertex_bindings.get(key.vertex_bindings).iter().map(|b| b.to_vk()).collect_vec();
            let vertex_attributes =
                arena.vertex_attributes.get(key.vertex_attributes).iter().map(|a| a.to_vk()).collect_vec();
            let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
                .vertex_binding_descriptions(&vertex_bindings)
                .vertex_attribute_descriptions(&vertex_attributes);

            let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
                .topology(key.primitive_topology)
                .primitive_restart_enable(false);

            // viewport 和 scissor 具体值由 dynamic state 决定，但是数量由该 create info 决定
            let viewport_info = vk::PipelineViewportStateCreateInfo {
                viewport_count: 1,
                scissor_count: 1,
                ..Default::default()
            };

            let raster_info = vk::PipelineRasterizationStateCreateInfo::default()
                .polygon_mode(key.raster.polygon_mode)
                .cull_mode(key.raster.cull_mode)
                .front_face(key.raster.front_face)
                .line_width(1.0);

            let msaa_info = vk::PipelineMultisampleStateCreateInfo::default()
                .rasterization_samples(key.msaa_samples)
                .sample_shading_enable(key.enable_sample_shading);

            let blend_states = arena.blend_states.get(key.blend_states).iter().map(|s| s.to_vk()).collect_vec();
            let color_blend_info =
                vk::PipelineColorBlendStateCreateInfo::default().logic_op_enable(false).attachments(&blend_states);

            let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(key.depth_stencil.depth_test)
                .depth_write_enable(key.depth_stencil.depth_write)
                .depth_compare_op(key.depth_stencil.depth_compare_op);

            let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default()
                .dynamic_states(arena.dynamic_states.get(key.dynamic_states));

            let create_info = vk::GraphicsPipelineCreateInfo::default()
                .stages(&stage_infos)
                .vertex_input_state(&vertex_input_info)
                .input_assembly_state(&input_assembly_info)
                .viewport_state(&viewport_info)
                .rasterization_state(&raster_info)
                .multisample_state(&msaa_info)
                .color_blend_state(&color_blend_info)
                .depth_stencil_state(&depth_stencil_info)
                .dynamic_state(&dynamic_state_info)
                .layout(key.layout)
                .render_pass(key.render_pass)
                .subpass(key.subpass);

            device
                .create_graphics_pipeline(&create_info, &format!("graphics_pipeline#{slot}"))
                .map_err(GfxError::construction("graphics pipeline"))
        })
    }

    /// 查找或创建 compute pipeline
    pub fn get_or_create_compute(
        &self,
        device: &GfxDevice,
        desc: &GfxComputePipelineDesc,
    ) -> GfxResult<vk::Pipeline> {
        self.compute.get_or_create(desc, |key, _, slot| {
            let module = self.shader_modules.get_or_load(device, &key.path)?;
            let stage_info = vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(module)
                .name(&key.entry_point);

            let create_info = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(key.layout);

            device
                .create_compute_pipeline(&create_info, &format!("compute_pipeline#{slot}"))
                .map_err(GfxError::construction("compute pipeline"))
        })
    }

    /// 清空 shader module 子缓存，释放字节码内存
    ///
    /// 已构造的 pipeline handle 不受影响；之后的 pipeline 请求若复用
    /// 已清空的路径会重新加载。
    pub fn clear_shader_modules(&self, device: &GfxDevice) {
        self.shader_modules.clear(device);
    }

    #[inline]
    pub fn shader_modules(&self) -> &GfxShaderModuleCache {
        &self.shader_modules
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.graphics.len() + self.compute.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn destroy(&self, device: &GfxDevice) {
        for pipeline in self.graphics.drain_handles().into_iter().chain(self.compute.drain_handles()) {
            unsafe {
                device.destroy_pipeline(pipeline, None);
            }
        }
        for module in self.shader_modules.drain() {
            unsafe {
                device.destroy_shader_module(module, None);
            }
        }
    }
}

impl Default for GfxPipelineCache {
    fn default() -> Self {
        Self::new()
    }
}
