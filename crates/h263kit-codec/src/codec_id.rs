//! 编解码器标识符.
//!
//! 为 H.263 系列中的每种码流方言分配唯一标识.

use std::fmt;

/// 编解码器标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// 未知编解码器
    None,
    /// ITU-T H.263 基线
    H263,
    /// H.263+ / H.263 version 2
    H263P,
    /// Intel H.263
    H263I,
    /// Sorenson Spark (FLV1)
    Flv1,
    /// MPEG-4 Part 2
    Mpeg4,
    /// Microsoft MPEG-4 v1
    MsMpeg4V1,
    /// Microsoft MPEG-4 v2
    MsMpeg4V2,
    /// Microsoft MPEG-4 v3 (DivX 3)
    MsMpeg4V3,
    /// Windows Media Video 7
    Wmv1,
    /// Windows Media Video 8
    Wmv2,
}

impl CodecId {
    /// 获取编解码器的人类可读名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::H263 => "h263",
            Self::H263P => "h263p",
            Self::H263I => "h263i",
            Self::Flv1 => "flv",
            Self::Mpeg4 => "mpeg4",
            Self::MsMpeg4V1 => "msmpeg4v1",
            Self::MsMpeg4V2 => "msmpeg4v2",
            Self::MsMpeg4V3 => "msmpeg4",
            Self::Wmv1 => "wmv1",
            Self::Wmv2 => "wmv2",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 由四字符码构造 codec tag (小端, 与 AVI/FourCC 一致)
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    (tag[0] as u32) | ((tag[1] as u32) << 8) | ((tag[2] as u32) << 16) | ((tag[3] as u32) << 24)
}
