//! # h263kit-codec
//!
//! 编解码器框架与 H.263 系列解码器.
//!
//! ## 支持的编解码器
//!
//! - **内置头解析**: H.263 (含 H.263+ PLUSPTYPE 子集), Sorenson Spark (FLV1)
//! - **可注入头解析**: MPEG-4 Part 2, MS-MPEG4 v1/v2/v3, WMV1, WMV2, Intel H.263
//!
//! ## 使用示例
//!
//! ```rust
//! use h263kit_codec::{CodecId, CodecRegistry};
//!
//! let mut reg = CodecRegistry::new();
//! h263kit_codec::register_all(&mut reg);
//!
//! let decoder = reg.create_decoder(CodecId::H263).unwrap();
//! assert_eq!(decoder.name(), "h263");
//! ```

pub mod codec_id;
pub mod codec_parameters;
pub mod decoder;
pub mod decoders;
pub mod frame;
pub mod packet;
pub mod registry;

// 重导出常用类型
pub use codec_id::CodecId;
pub use codec_parameters::CodecParameters;
pub use decoder::Decoder;
pub use frame::{PictureType, VideoFrame};
pub use packet::Packet;
pub use registry::CodecRegistry;

/// 注册所有内置编解码器
pub fn register_all(registry: &mut CodecRegistry) {
    decoders::register_all_decoders(registry);
}
