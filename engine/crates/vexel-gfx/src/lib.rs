//! Vexel 的 GFX 层
//!
//! Vulkan 构建对象的驻留缓存：render pass、descriptor set layout、
//! pipeline layout、sampler、shader module、pipeline。
//!
//! 这些对象的创建都要经过 driver，开销大，并且同一份参数只应该创建一次。
//! 每种对象都有一个结构化 key（借用版描述 + 缓存持有的自有版），
//! 缓存按 key 的内容（而不是指针）查找，miss 时深拷贝进 arena 后恰好调用
//! 一次 driver 构造函数。返回的 handle 是 `Copy` 的非拥有引用，
//! 由缓存负责在 [`foundation::device::GfxDevice::destroy`] 时销毁。

pub mod cache;
pub mod foundation;

pub use cache::GfxResourceCache;
pub use foundation::device::GfxDevice;
pub use foundation::error::{GfxError, GfxResult};
