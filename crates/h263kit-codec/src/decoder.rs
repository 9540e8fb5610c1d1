//! 解码器 trait 定义.
//!
//! 所有解码器实现必须实现 `Decoder` trait.

use h263kit_core::KitResult;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::VideoFrame;
use crate::packet::Packet;

/// 解码器 trait
///
/// 解码流程:
/// 1. 调用 `send_packet()` 送入一帧压缩数据
/// 2. 调用 `receive_frame()` 取出解码后的帧
/// 3. 重复以上步骤直到所有数据处理完毕
/// 4. 送入空包 (drain) 以获取解码器中缓存的帧
pub trait Decoder: Send {
    /// 获取解码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 使用参数配置解码器
    ///
    /// 默认实现为空操作.
    fn open(&mut self, _params: &CodecParameters) -> KitResult<()> {
        Ok(())
    }

    /// 送入一个压缩数据包进行解码
    ///
    /// # 返回
    /// - `Ok(())`: 数据包已被完整消费
    /// - `Err(..)`: 帧被拒绝, 会话仍可继续送入后续数据包
    fn send_packet(&mut self, packet: &Packet) -> KitResult<()>;

    /// 从解码器取出一帧解码数据
    ///
    /// # 返回
    /// - `Ok(frame)`: 成功取出一帧
    /// - `Err(KitError::NeedMoreData)`: 需要送入更多数据包
    /// - `Err(KitError::Eof)`: 已送入空包且所有帧已取出
    fn receive_frame(&mut self) -> KitResult<VideoFrame>;

    /// 刷新解码器, 清空参考帧与待输出队列
    ///
    /// 用于 seek 后重置解码器状态.
    fn flush(&mut self);
}
