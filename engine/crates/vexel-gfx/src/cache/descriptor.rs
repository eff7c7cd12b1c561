//! Descriptor set layout 的结构化 key 和驻留缓存

use ash::vk;
use itertools::Itertools;

use crate::cache::arena::{GfxSeq, GfxSeqArena};
use crate::cache::interner::{GfxCacheKey, GfxInternCache};
use crate::foundation::device::GfxDevice;
use crate::foundation::error::{GfxError, GfxResult};

/// 单个 binding 的描述
///
/// binding 下标取序列中的位置，flatten 时按位置编号。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxDescriptorBindingDesc {
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// Descriptor set layout 的借用版描述
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct GfxDescriptorSetLayoutDesc<'a> {
    pub flags: vk::DescriptorSetLayoutCreateFlags,
    pub bindings: &'a [GfxDescriptorBindingDesc],
}

pub(crate) struct GfxDescriptorSetLayoutKey {
    flags: vk::DescriptorSetLayoutCreateFlags,
    bindings: GfxSeq,
}

impl GfxCacheKey for GfxDescriptorSetLayoutDesc<'_> {
    type Arena = GfxSeqArena<GfxDescriptorBindingDesc>;
    type Owned = GfxDescriptorSetLayoutKey;

    fn matches(&self, owned: &GfxDescriptorSetLayoutKey, arena: &Self::Arena) -> bool {
        self.flags == owned.flags && self.bindings == arena.get(owned.bindings)
    }

    fn intern(&self, arena: &mut Self::Arena) -> GfxDescriptorSetLayoutKey {
        GfxDescriptorSetLayoutKey {
            flags: self.flags,
            bindings: arena.intern(self.bindings.iter().copied()),
        }
    }
}

fn flatten(
    key: &GfxDescriptorSetLayoutKey,
    arena: &GfxSeqArena<GfxDescriptorBindingDesc>,
) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    arena
        .get(key.bindings)
        .iter()
        .enumerate()
        .map(|(index, binding)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(index as u32)
                .descriptor_type(binding.descriptor_type)
                .descriptor_count(binding.descriptor_count)
                .stage_flags(binding.stage_flags)
        })
        .collect_vec()
}

/// Descriptor set layout 驻留缓存
pub struct GfxDescriptorSetLayoutCache {
    cache: GfxInternCache<GfxSeqArena<GfxDescriptorBindingDesc>, GfxDescriptorSetLayoutKey, vk::DescriptorSetLayout>,
}

impl GfxDescriptorSetLayoutCache {
    pub fn new() -> Self {
        Self {
            cache: GfxInternCache::new("descriptor_set_layout"),
        }
    }

    pub fn get_or_create(
        &self,
        device: &GfxDevice,
        desc: &GfxDescriptorSetLayoutDesc,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        self.cache.get_or_create(desc, |key, arena, slot| {
            let bindings = flatten(key, arena);
            let create_info =
                vk::DescriptorSetLayoutCreateInfo::default().flags(key.flags).bindings(&bindings);

            device
                .create_descriptor_set_layout(&create_info, &format!("descriptor_set_layout#{slot}"))
                .map_err(GfxError::construction("descriptor set layout"))
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
                device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

impl Default for GfxDescriptorSetLayoutCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ash::vk::Handle;

    use super::*;

    fn compute_bindings() -> [GfxDescriptorBindingDesc; 2] {
        [
            GfxDescriptorBindingDesc {
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
            },
            GfxDescriptorBindingDesc {
                descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
            },
        ]
    }

    #[test]
    fn test_flatten_assigns_positional_binding_indices() {
        let mut arena = GfxSeqArena::default();
        let bindings = compute_bindings();
        let desc = GfxDescriptorSetLayoutDesc { flags: Default::default(), bindings: &bindings };

        let owned = desc.intern(&mut arena);
        let flat = flatten(&owned, &arena);

        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].binding, 0);
        assert_eq!(flat[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(flat[1].binding, 1);
        assert_eq!(flat[1].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(flat[1].stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_binding_order_is_significant() {
        let cache = GfxDescriptorSetLayoutCache::new();
        let count = AtomicUsize::new(0);

        let bindings = compute_bindings();
        let swapped = [bindings[1], bindings[0]];

        for bindings in [&bindings, &swapped] {
            cache
                .cache
                .get_or_create(
                    &GfxDescriptorSetLayoutDesc { flags: Default::default(), bindings: &bindings[..] },
                    |_, _, slot| {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, GfxError>(vk::DescriptorSetLayout::from_raw(slot as u64 + 1))
                    },
                )
                .unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_two_threads_one_layout() {
        // uniform buffer + storage image 的两个 compute binding，
        // 两个线程同时请求：只构造一个对象，双方拿到相等的 handle
        let cache = GfxDescriptorSetLayoutCache::new();
        let count = AtomicUsize::new(0);

        let handles = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        let bindings = compute_bindings();
                        let desc = GfxDescriptorSetLayoutDesc {
                            flags: Default::default(),
                            bindings: &bindings,
                        };
                        cache
                            .cache
                            .get_or_create(&desc, |_, _, _| {
                                count.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(std::time::Duration::from_millis(10));
                                Ok::<_, GfxError>(vk::DescriptorSetLayout::from_raw(0xD5))
                            })
                            .unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect_vec()
        });

        assert_eq!(handles[0], handles[1]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }
}
