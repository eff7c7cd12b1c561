use std::path::PathBuf;

use ash::vk;

pub type GfxResult<T> = Result<T, GfxError>;

/// GFX 层的错误类型
///
/// 缓存层不做任何恢复：driver 的错误原样向上传递，同一份参数重试只会得到
/// 同样的结果。shader 字节码的 IO 错误和 driver 构造失败是两类错误，
/// 调用方可以据此区分 "文件坏了" 和 "GPU 状态坏了"。
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    /// driver 拒绝了参数、资源耗尽或者 device lost
    #[error("failed to create {kind}: {result}")]
    Construction {
        /// 对象种类，例如 "render pass"
        kind: &'static str,
        result: vk::Result,
    },

    /// shader 字节码文件不可读
    #[error("failed to read shader {path:?}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// shader 字节码长度不是 SPIR-V 指令字长（4 字节）的整数倍
    #[error("shader {path:?} is not valid SPIR-V: {len} bytes is not a multiple of 4")]
    ShaderFormat { path: PathBuf, len: u64 },
}

impl GfxError {
    #[inline]
    pub(crate) fn construction(kind: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Construction { kind, result }
    }
}
