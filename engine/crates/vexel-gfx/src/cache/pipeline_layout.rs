//! Pipeline layout 的结构化 key 和驻留缓存
//!
//! key 由 set layout handle 序列和 push constant range 序列组成。
//! set layout handle 本身来自 descriptor set layout 缓存，
//! 相同结构必然是相同 handle，所以按 handle 比较就是按结构比较。

use ash::vk;
use itertools::Itertools;

use crate::cache::arena::{GfxSeq, GfxSeqArena};
use crate::cache::interner::{GfxCacheKey, GfxInternCache};
use crate::foundation::device::GfxDevice;
use crate::foundation::error::{GfxError, GfxResult};

/// push constant 的范围描述
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxPushConstantRange {
    pub stage_flags: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}
impl GfxPushConstantRange {
    fn to_vk(self) -> vk::PushConstantRange {
        vk::PushConstantRange::default().stage_flags(self.stage_flags).offset(self.offset).size(self.size)
    }
}

/// Pipeline layout 的借用版描述
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct GfxPipelineLayoutDesc<'a> {
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_ranges: &'a [GfxPushConstantRange],
}

#[derive(Default)]
pub(crate) struct GfxPipelineLayoutArena {
    set_layouts: GfxSeqArena<vk::DescriptorSetLayout>,
    ranges: GfxSeqArena<GfxPushConstantRange>,
}

pub(crate) struct GfxPipelineLayoutKey {
    set_layouts: GfxSeq,
    ranges: GfxSeq,
}

impl GfxCacheKey for GfxPipelineLayoutDesc<'_> {
    type Arena = GfxPipelineLayoutArena;
    type Owned = GfxPipelineLayoutKey;

    fn matches(&self, owned: &GfxPipelineLayoutKey, arena: &GfxPipelineLayoutArena) -> bool {
        self.set_layouts == arena.set_layouts.get(owned.set_layouts)
            && self.push_constant_ranges == arena.ranges.get(owned.ranges)
    }

    fn intern(&self, arena: &mut GfxPipelineLayoutArena) -> GfxPipelineLayoutKey {
        GfxPipelineLayoutKey {
            set_layouts: arena.set_layouts.intern(self.set_layouts.iter().copied()),
            ranges: arena.ranges.intern(self.push_constant_ranges.iter().copied()),
        }
    }
}

/// Pipeline layout 驻留缓存
pub struct GfxPipelineLayoutCache {
    cache: GfxInternCache<GfxPipelineLayoutArena, GfxPipelineLayoutKey, vk::PipelineLayout>,
}

impl GfxPipelineLayoutCache {
    pub fn new() -> Self {
        Self {
            cache: GfxInternCache::new("pipeline_layout"),
        }
    }

    pub fn get_or_create(&self, device: &GfxDevice, desc: &GfxPipelineLayoutDesc) -> GfxResult<vk::PipelineLayout> {
        self.cache.get_or_create(desc, |key, arena, slot| {
            // push constant range 序列展开成 vk 的平行数组
            let ranges = arena.ranges.get(key.ranges).iter().map(|r| r.to_vk()).collect_vec();
            let create_info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(arena.set_layouts.get(key.set_layouts))
                .push_constant_ranges(&ranges);

            device
                .create_pipeline_layout(&create_info, &format!("pipeline_layout#{slot}"))
                .map_err(GfxError::construction("pipeline layout"))
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
        for layout in self.cache.drain_handles() {
            unsafe {
                device.destroy_pipeline_layout(layout, None);
            }
        }
    }
}

impl Default for GfxPipelineLayoutCache {
    fn default() -> Self {
        Self::new()
    }
}
