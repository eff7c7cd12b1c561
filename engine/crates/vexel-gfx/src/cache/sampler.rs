//! Sampler 的描述和驻留缓存

use ash::vk;

use crate::cache::interner::{GfxCacheKey, GfxInternCache};
use crate::foundation::device::GfxDevice;
use crate::foundation::error::{GfxError, GfxResult};

/// Sampler descriptor
///
/// 没有数组字段，key 整体就是一个 `Copy` 的标量组合。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    /// 0 表示关闭各向异性过滤
    pub max_anisotropy: u32,
    pub compare_op: Option<vk::CompareOp>,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub border_color: vk::BorderColor,
}
impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: 0,
            compare_op: None,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        }
    }
}

impl GfxSamplerDesc {
    fn to_vk(&self) -> vk::SamplerCreateInfo<'static> {
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .address_mode_u(self.address_mode_u)
            .address_mode_v(self.address_mode_v)
            .address_mode_w(self.address_mode_w)
            .mipmap_mode(self.mipmap_mode)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(self.border_color);

        if self.max_anisotropy > 0 {
            create_info = create_info.anisotropy_enable(true).max_anisotropy(self.max_anisotropy as f32);
        } else {
            create_info = create_info.anisotropy_enable(false);
        }

        if let Some(compare_op) = self.compare_op {
            create_info = create_info.compare_enable(true).compare_op(compare_op);
        } else {
            create_info = create_info.compare_enable(false);
        }

        create_info
    }
}

impl GfxCacheKey for GfxSamplerDesc {
    type Arena = ();
    type Owned = GfxSamplerDesc;

    fn matches(&self, owned: &GfxSamplerDesc, _arena: &()) -> bool {
        self == owned
    }

    fn intern(&self, _arena: &mut ()) -> GfxSamplerDesc {
        *self
    }
}

/// Sampler 驻留缓存
pub struct GfxSamplerCache {
    cache: GfxInternCache<(), GfxSamplerDesc, vk::Sampler>,
}

impl GfxSamplerCache {
    pub fn new() -> Self {
        Self {
            cache: GfxInternCache::new("sampler"),
        }
    }

    pub fn get_or_create(&self, device: &GfxDevice, desc: &GfxSamplerDesc) -> GfxResult<vk::Sampler> {
        self.cache.get_or_create(desc, |key, _, slot| {
            device
                .create_sampler(&key.to_vk(), &format!("sampler#{slot}"))
                .map_err(GfxError::construction("sampler"))
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
        for sampler in self.cache.drain_handles() {
            unsafe {
                device.destroy_sampler(sampler, None);
            }
        }
    }
}

impl Default for GfxSamplerCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ash::vk::Handle;

    use super::*;

    #[test]
    fn test_default_desc_flattens_disabled_features() {
        let create_info = GfxSamplerDesc::default().to_vk();

        assert_eq!(create_info.anisotropy_enable, vk::FALSE);
        assert_eq!(create_info.compare_enable, vk::FALSE);
        assert_eq!(create_info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(create_info.max_lod, vk::LOD_CLAMP_NONE);
    }

    #[test]
    fn test_anisotropy_and_compare_flatten() {
        let desc = GfxSamplerDesc {
            max_anisotropy: 16,
            compare_op: Some(vk::CompareOp::LESS_OR_EQUAL),
            ..Default::default()
        };
        let create_info = desc.to_vk();

        assert_eq!(create_info.anisotropy_enable, vk::TRUE);
        assert_eq!(create_info.max_anisotropy, 16.0);
        assert_eq!(create_info.compare_enable, vk::TRUE);
        assert_eq!(create_info.compare_op, vk::CompareOp::LESS_OR_EQUAL);
    }

    #[test]
    fn test_compare_op_absent_vs_present() {
        let cache = GfxSamplerCache::new();
        let count = AtomicUsize::new(0);

        let plain = GfxSamplerDesc::default();
        let shadow = GfxSamplerDesc { compare_op: Some(vk::CompareOp::NEVER), ..Default::default() };

        for desc in [plain, plain, shadow] {
            cache
                .cache
                .get_or_create(&desc, |_, _, slot| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, GfxError>(vk::Sampler::from_raw(slot as u64 + 1))
                })
                .unwrap();
        }

        // plain 命中一次，shadow 是独立 entry
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }
}
