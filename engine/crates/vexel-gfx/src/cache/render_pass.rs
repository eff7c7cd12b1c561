//! Render pass 的结构化 key 和驻留缓存
//!
//! Render pass 是嵌套最深的构建对象：attachment 列表、subpass 列表
//! （每个 subpass 又有 input/color/resolve 引用列表、可选的
//! depth-stencil 引用和 preserve 下标列表）、subpass 依赖列表。
//! 借用版描述引用调用方栈上的数组；自有 key 把每一层序列都收进 arena。

use ash::vk;
use itertools::Itertools;

use crate::cache::arena::{GfxSeq, GfxSeqArena};
use crate::cache::interner::{GfxCacheKey, GfxInternCache};
use crate::foundation::device::GfxDevice;
use crate::foundation::error::{GfxError, GfxResult};

/// 单个 attachment 的描述
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxAttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}
impl Default for GfxAttachmentDesc {
    fn default() -> Self {
        Self {
            format: vk::Format::UNDEFINED,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::UNDEFINED,
        }
    }
}
impl GfxAttachmentDesc {
    fn to_vk(self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(self.samples)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(self.stencil_load_op)
            .stencil_store_op(self.stencil_store_op)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// 对 attachment 序列中某一项的引用
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxAttachmentRef {
    /// 所属 render pass 的 attachment 序列中的下标
    pub attachment: u32,
    pub layout: vk::ImageLayout,
}
impl GfxAttachmentRef {
    #[inline]
    pub fn new(attachment: u32, layout: vk::ImageLayout) -> Self {
        Self { attachment, layout }
    }

    fn to_vk(self) -> vk::AttachmentReference {
        vk::AttachmentReference::default().attachment(self.attachment).layout(self.layout)
    }
}

/// 单个 subpass 的描述
///
/// `resolve_attachments` 要么为空，要么与 `color_attachments` 等长
/// （这是 driver 校验的生产者契约，缓存只按给定长度折叠）。
/// depth-stencil 是单个可选引用，不是序列：缺省和任何存在的值都不相等。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct GfxSubpassDesc<'a> {
    pub input_attachments: &'a [GfxAttachmentRef],
    pub color_attachments: &'a [GfxAttachmentRef],
    pub resolve_attachments: &'a [GfxAttachmentRef],
    pub depth_stencil_attachment: Option<GfxAttachmentRef>,
    pub preserve_attachments: &'a [u32],
}

/// subpass 之间的执行依赖
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSubpassDependencyDesc {
    /// 源 subpass 下标，外部依赖用 `vk::SUBPASS_EXTERNAL`
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub dependency_flags: vk::DependencyFlags,
}
impl GfxSubpassDependencyDesc {
    fn to_vk(self) -> vk::SubpassDependency {
        vk::SubpassDependency::default()
            .src_subpass(self.src_subpass)
            .dst_subpass(self.dst_subpass)
            .src_stage_mask(self.src_stage_mask)
            .dst_stage_mask(self.dst_stage_mask)
            .src_access_mask(self.src_access_mask)
            .dst_access_mask(self.dst_access_mask)
            .dependency_flags(self.dependency_flags)
    }
}

/// Render pass 的借用版描述，数组字段都是调用方的临时存储
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct GfxRenderPassDesc<'a> {
    pub attachments: &'a [GfxAttachmentDesc],
    pub subpasses: &'a [GfxSubpassDesc<'a>],
    pub dependencies: &'a [GfxSubpassDependencyDesc],
}

/// 自有版 subpass：内层序列已收进 arena
#[derive(Clone, Copy)]
pub(crate) struct GfxSubpassKey {
    input: GfxSeq,
    color: GfxSeq,
    resolve: GfxSeq,
    depth_stencil: Option<GfxAttachmentRef>,
    preserve: GfxSeq,
}

#[derive(Default)]
pub(crate) struct GfxRenderPassArena {
    attachments: GfxSeqArena<GfxAttachmentDesc>,
    refs: GfxSeqArena<GfxAttachmentRef>,
    preserves: GfxSeqArena<u32>,
    subpasses: GfxSeqArena<GfxSubpassKey>,
    dependencies: GfxSeqArena<GfxSubpassDependencyDesc>,
}

pub(crate) struct GfxRenderPassKey {
    attachments: GfxSeq,
    subpasses: GfxSeq,
    dependencies: GfxSeq,
}

impl GfxCacheKey for GfxRenderPassDesc<'_> {
    type Arena = GfxRenderPassArena;
    type Owned = GfxRenderPassKey;

    fn matches(&self, owned: &GfxRenderPassKey, arena: &GfxRenderPassArena) -> bool {
        if self.attachments != arena.attachments.get(owned.attachments)
            || self.dependencies != arena.dependencies.get(owned.dependencies)
        {
            return false;
        }

        let owned_subpasses = arena.subpasses.get(owned.subpasses);
        if self.subpasses.len() != owned_subpasses.len() {
            return false;
        }
        self.subpasses.iter().zip(owned_subpasses).all(|(sp, key)| {
            sp.input_attachments == arena.refs.get(key.input)
                && sp.color_attachments == arena.refs.get(key.color)
                && sp.resolve_attachments == arena.refs.get(key.resolve)
                && sp.depth_stencil_attachment == key.depth_stencil
                && sp.preserve_attachments == arena.preserves.get(key.preserve)
        })
    }

    fn intern(&self, arena: &mut GfxRenderPassArena) -> GfxRenderPassKey {
        let subpass_keys = self
            .subpasses
            .iter()
            .map(|sp| GfxSubpassKey {
                input: arena.refs.intern(sp.input_attachments.iter().copied()),
                color: arena.refs.intern(sp.color_attachments.iter().copied()),
                resolve: arena.refs.intern(sp.resolve_attachments.iter().copied()),
                depth_stencil: sp.depth_stencil_attachment,
                preserve: arena.preserves.intern(sp.preserve_attachments.iter().copied()),
            })
            .collect_vec();

        GfxRenderPassKey {
            attachments: arena.attachments.intern(self.attachments.iter().copied()),
            subpasses: arena.subpasses.intern(subpass_keys),
            dependencies: arena.dependencies.intern(self.dependencies.iter().copied()),
        }
    }
}

/// flatten 的中间结果：每个 subpass 自己的 vk 引用数组
///
/// `vk::SubpassDescription` 只借用这些数组，所以它们要先于
/// SubpassDescription 列表构建并在 driver 调用期间保持存活。
struct FlatSubpass {
    input: Vec<vk::AttachmentReference>,
    color: Vec<vk::AttachmentReference>,
    resolve: Vec<vk::AttachmentReference>,
    depth_stencil: Option<vk::AttachmentReference>,
    preserve: GfxSeq,
}

fn flatten(
    key: &GfxRenderPassKey,
    arena: &GfxRenderPassArena,
) -> (Vec<vk::AttachmentDescription>, Vec<FlatSubpass>, Vec<vk::SubpassDependency>) {
    let to_vk_refs = |seq: GfxSeq| arena.refs.get(seq).iter().map(|r| r.to_vk()).collect_vec();

    let attachments = arena.attachments.get(key.attachments).iter().map(|a| a.to_vk()).collect_vec();
    let subpasses = arena
        .subpasses
        .get(key.subpasses)
        .iter()
        .map(|sp| FlatSubpass {
            input: to_vk_refs(sp.input),
            color: to_vk_refs(sp.color),
            resolve: to_vk_refs(sp.resolve),
            depth_stencil: sp.depth_stencil.map(|r| r.to_vk()),
            preserve: sp.preserve,
        })
        .collect_vec();
    let dependencies = arena.dependencies.get(key.dependencies).iter().map(|d| d.to_vk()).collect_vec();

    (attachments, subpasses, dependencies)
}

/// Render pass 驻留缓存
pub struct GfxRenderPassCache {
    cache: GfxInternCache<GfxRenderPassArena, GfxRenderPassKey, vk::RenderPass>,
}

impl GfxRenderPassCache {
    pub fn new() -> Self {
        Self {
            cache: GfxInternCache::new("render_pass"),
        }
    }

    /// 查找或创建 render pass
    ///
    /// attachment 下标是否越界等结构合法性由 driver 校验，
    /// 缓存不做参数检查。
    pub fn get_or_create(&self, device: &GfxDevice, desc: &GfxRenderPassDesc) -> GfxResult<vk::RenderPass> {
        self.cache.get_or_create(desc, |key, arena, slot| {
            let (attachments, flat_subpasses, dependencies) = flatten(key, arena);

            let subpasses = flat_subpasses
                .iter()
                .map(|sp| {
                    let mut subpass = vk::SubpassDescription::default()
                        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                        .input_attachments(&sp.input)
                        .color_attachments(&sp.color)
                        .preserve_attachments(arena.preserves.get(sp.preserve));
                    // resolve 为空表示不做 resolve，不能传长度不符的空数组指针
                    if !sp.resolve.is_empty() {
                        subpass = subpass.resolve_attachments(&sp.resolve);
                    }
                    if let Some(depth_stencil) = &sp.depth_stencil {
                        subpass = subpass.depth_stencil_attachment(depth_stencil);
                    }
                    subpass
                })
                .collect_vec();

            let create_info = vk::RenderPassCreateInfo::default()
                .attachments(&attachments)
                .subpasses(&subpasses)
                .dependencies(&dependencies);

            device
                .create_render_pass(&create_info, &format!("render_pass#{slot}"))
                .map_err(GfxError::construction("render pass"))
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub(crate) fn destroy(&self, device: &GfxDevice) {
        for render_pass in self.cache.drain_handles() {
            unsafe {
                device.destroy_render_pass(render_pass, None);
            }
        }
    }
}

impl Default for GfxRenderPassCache {
    fn default() -> Self {
        Self::new()
    }
}
