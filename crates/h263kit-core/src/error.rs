//! 统一错误类型定义.
//!
//! 所有 h263kit crate 共用的错误类型, 支持跨模块传播.

use thiserror::Error;

/// h263kit 统一错误类型
#[derive(Debug, Error)]
pub enum KitError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 图像头损坏, 帧被拒绝
    #[error("图像头损坏: {0}")]
    HeaderCorrupt(String),

    /// 会话中途的像素格式变化无法接受
    #[error("不支持的格式变化: {0}")]
    FormatChangeRejected(String),

    /// 硬件加速后端失败
    #[error("硬件加速错误: {0}")]
    HwAccel(String),

    /// 编解码器错误
    #[error("编解码器错误: {0}")]
    Codec(String),

    /// 未找到指定的编解码器
    #[error("未找到编解码器: {0}")]
    CodecNotFound(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl KitError {
    /// 是否为码流数据类错误 (帧级可恢复, 会话可继续)
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidData(_) | Self::HeaderCorrupt(_) | Self::Eof
        )
    }
}

/// h263kit 统一 Result 类型
pub type KitResult<T> = Result<T, KitError>;
