//! 编解码器参数.
//!
//! 描述打开解码器时由容器层提供的配置.

use crate::codec_id::CodecId;

/// 编解码器参数
#[derive(Debug, Clone)]
pub struct CodecParameters {
    /// 编解码器标识
    pub codec_id: CodecId,
    /// 容器给出的四字符码 (小端, 0 表示未知)
    pub codec_tag: u32,
    /// 额外数据
    pub extra_data: Vec<u8>,
    /// 容器声明的宽度 (0 表示未知)
    pub width: u32,
    /// 容器声明的高度 (0 表示未知)
    pub height: u32,
    /// 每个样本的原始位深 (0 表示未知, 按 8 位处理)
    pub bits_per_raw_sample: u32,
}

impl CodecParameters {
    /// 创建视频参数
    pub fn video(codec_id: CodecId, width: u32, height: u32) -> Self {
        Self {
            codec_id,
            codec_tag: 0,
            extra_data: Vec::new(),
            width,
            height,
            bits_per_raw_sample: 0,
        }
    }

    /// 设置四字符码
    pub fn with_codec_tag(mut self, tag: u32) -> Self {
        self.codec_tag = tag;
        self
    }

    /// 设置额外数据
    pub fn with_extra_data(mut self, extra_data: Vec<u8>) -> Self {
        self.extra_data = extra_data;
        self
    }
}
