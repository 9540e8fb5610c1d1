//! 解码后的帧数据 (Frame).
//!
//! 表示解码后的原始视频数据.

use h263kit_core::PixelFormat;

use crate::packet::NOPTS_VALUE;

/// 视频帧
///
/// 包含解码后的原始像素数据, 支持多平面存储.
/// 例如 YUV420P 格式有 3 个平面: Y, U, V.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// 各平面的像素数据
    pub data: Vec<Vec<u8>>,
    /// 各平面每行的字节数 (linesize / stride)
    pub linesize: Vec<usize>,
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 帧时长
    pub duration: i64,
    /// 是否为关键帧
    pub is_keyframe: bool,
    /// 图片类型 (I/P/B 帧)
    pub picture_type: PictureType,
    /// 行序是否自下而上 (等价于负 stride 导出)
    pub bottom_up: bool,
    /// 每个宏块的量化参数 (按 mb_width 行优先), 仅在启用导出时存在
    pub qp_table: Option<Vec<i8>>,
    /// 采样宽高比 (分子, 分母)
    pub sample_aspect_ratio: (u32, u32),
}

impl VideoFrame {
    /// 创建视频帧, 软件格式按 16 对齐分配各平面 (初始为中灰)
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let plane_count = pixel_format.plane_count();
        let mut data = Vec::with_capacity(plane_count);
        let mut linesize = Vec::with_capacity(plane_count);
        let aligned_w = (width as usize + 15) & !15;
        let aligned_h = (height as usize + 15) & !15;
        let (shift_x, shift_y) = pixel_format.chroma_shift();
        let bps = pixel_format.bytes_per_sample();
        for plane in 0..plane_count {
            let (w, h) = if plane == 0 {
                (aligned_w, aligned_h)
            } else {
                (aligned_w >> shift_x, aligned_h >> shift_y)
            };
            linesize.push(w * bps);
            data.push(vec![128u8; w * bps * h]);
        }
        Self {
            data,
            linesize,
            width,
            height,
            pixel_format,
            pts: NOPTS_VALUE,
            duration: 0,
            is_keyframe: false,
            picture_type: PictureType::None,
            bottom_up: false,
            qp_table: None,
            sample_aspect_ratio: (1, 1),
        }
    }

    /// 指定平面的可见尺寸 (宽, 高)
    pub fn plane_size(&self, plane: usize) -> (usize, usize) {
        if plane == 0 {
            return (self.width as usize, self.height as usize);
        }
        let (shift_x, shift_y) = self.pixel_format.chroma_shift();
        (
            (self.width as usize + (1 << shift_x) - 1) >> shift_x,
            (self.height as usize + (1 << shift_y) - 1) >> shift_y,
        )
    }

    /// 读取单个样本 (8 位格式)
    pub fn sample(&self, plane: usize, x: usize, y: usize) -> u8 {
        self.data[plane][y * self.linesize[plane] + x]
    }

    /// 垂直翻转行序并标记 `bottom_up`
    ///
    /// 用于某些旧编码器写出的倒置图像 (GEOV/GEOX).
    pub fn flip_vertical(&mut self) {
        for plane in 0..self.data.len() {
            let stride = self.linesize[plane];
            if stride == 0 {
                continue;
            }
            let rows = self.data[plane].len() / stride;
            let buf = &mut self.data[plane];
            for row in 0..rows / 2 {
                let (top, bottom) = buf.split_at_mut((rows - 1 - row) * stride);
                top[row * stride..(row + 1) * stride].swap_with_slice(&mut bottom[..stride]);
            }
        }
        self.bottom_up = !self.bottom_up;
    }
}

/// 图片类型 (I/P/B 帧)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PictureType {
    /// 未指定
    #[default]
    None,
    /// I 帧 (关键帧, 帧内编码)
    I,
    /// P 帧 (前向预测)
    P,
    /// B 帧 (双向预测)
    B,
    /// S 帧 (GMC Sprite)
    S,
}

impl PictureType {
    /// 单字符名称
    pub const fn as_char(&self) -> char {
        match self {
            Self::None => '?',
            Self::I => 'I',
            Self::P => 'P',
            Self::B => 'B',
            Self::S => 'S',
        }
    }
}
