//! 硬件加速后端接口.
//!
//! 配置了后端时, 每个片的剩余字节整体交给后端, 宏块解码与像素重建都由后端完成.

use h263kit_core::{KitResult, PixelFormat};

use crate::codec_id::CodecId;
use crate::frame::PictureType;

use super::picture::Picture;

/// 传给后端的帧级参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwFrameConfig {
    pub codec_id: CodecId,
    pub width: u32,
    pub height: u32,
    pub pict_type: PictureType,
    pub qscale: u8,
    pub h263_plus: bool,
    pub loop_filter: bool,
    pub no_rounding: bool,
}

/// 硬件解码后端
pub trait HardwareBackend: Send {
    /// 后端名称
    fn name(&self) -> &'static str;

    /// 后端输出的表面格式
    fn surface_format(&self) -> PixelFormat;

    /// 开始一帧, `data` 为整个数据包
    fn start_frame(&mut self, config: &HwFrameConfig, data: &[u8]) -> KitResult<()>;

    /// 解码一个片, `data` 从片起点所在字节到数据包末尾
    fn decode_slice(&mut self, data: &[u8]) -> KitResult<()>;

    /// 结束一帧, 把结果写入当前图像
    fn end_frame(&mut self, picture: &mut Picture) -> KitResult<()>;
}
