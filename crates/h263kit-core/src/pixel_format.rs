//! 像素格式定义.
//!
//! 解码器输出帧的像素排列方式, 包括软件平面格式和硬件加速后端的不透明表面格式.

use std::fmt;

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 未指定 (会话格式协商失败后也会被置为此值)
    #[default]
    None,

    // ========================
    // 软件平面格式
    // ========================
    /// YUV 4:2:0 平面格式, 8 位
    Yuv420p,
    /// YUV 4:2:0 平面格式, 10 位小端 (studio profile)
    Yuv420p10le,
    /// 灰度 8 位 (仅解码亮度)
    Gray8,

    // ========================
    // 硬件表面格式 (像素由后端持有)
    // ========================
    /// VA-API 表面
    Vaapi,
    /// VDPAU 表面
    Vdpau,
    /// CUDA 设备内存
    Cuda,
    /// VideoToolbox 像素缓冲
    VideoToolbox,
}

impl PixelFormat {
    /// 是否为硬件表面格式
    pub const fn is_hardware(&self) -> bool {
        matches!(
            self,
            Self::Vaapi | Self::Vdpau | Self::Cuda | Self::VideoToolbox
        )
    }

    /// 单个分量的位深, 硬件格式与 None 返回 0
    pub const fn bits_per_component(&self) -> u32 {
        match self {
            Self::Yuv420p | Self::Gray8 => 8,
            Self::Yuv420p10le => 10,
            _ => 0,
        }
    }

    /// 平面数量
    pub const fn plane_count(&self) -> usize {
        match self {
            Self::Yuv420p | Self::Yuv420p10le => 3,
            Self::Gray8 => 1,
            _ => 0,
        }
    }

    /// 色度子采样 (log2 水平, log2 垂直)
    pub const fn chroma_shift(&self) -> (u32, u32) {
        match self {
            Self::Yuv420p | Self::Yuv420p10le => (1, 1),
            _ => (0, 0),
        }
    }

    /// 每个样本占用的字节数
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Yuv420p10le => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Yuv420p => "yuv420p",
            Self::Yuv420p10le => "yuv420p10le",
            Self::Gray8 => "gray",
            Self::Vaapi => "vaapi",
            Self::Vdpau => "vdpau",
            Self::Cuda => "cuda",
            Self::VideoToolbox => "videotoolbox",
        };
        write!(f, "{}", name)
    }
}
