//! 解码器实现模块.

pub mod h263;

use crate::codec_id::CodecId;
use crate::registry::CodecRegistry;

/// 注册所有内置解码器
pub fn register_all_decoders(registry: &mut CodecRegistry) {
    registry.register_decoder(CodecId::H263, "h263", h263::H263Decoder::create_h263);
    registry.register_decoder(CodecId::H263P, "h263p", h263::H263Decoder::create_h263p);
    registry.register_decoder(CodecId::Flv1, "flv", h263::H263Decoder::create_flv);
}
