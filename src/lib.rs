//! # h263kit
//!
//! 纯 Rust 实现的 H.263 系列视频解码器, 对标 FFmpeg 的 h263dec.
//!
//! 一个帧调度器驱动整个方言家族: H.263 基线/H.263+、Sorenson Spark (FLV1),
//! 以及可注入头解析器的 MPEG-4 Part 2、MS-MPEG4、WMV1/WMV2.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use h263kit::codec::{CodecId, Packet};
//!
//! let registry = h263kit::default_codec_registry();
//! let mut decoder = registry.create_decoder(CodecId::H263).unwrap();
//! decoder.send_packet(&Packet::from_data(vec![0u8; 16])).ok();
//! while let Ok(frame) = decoder.receive_frame() {
//!     println!("{}x{} {}", frame.width, frame.height, frame.picture_type.as_char());
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `h263kit-core` | 错误类型、按位读写器、像素格式 |
//! | `h263kit-codec` | 编解码器框架与 H.263 系列解码器 |

pub mod logging;

/// 核心类型与工具 (对标 libavutil)
pub use h263kit_core as core;

/// 编解码器框架 (对标 libavcodec)
pub use h263kit_codec as codec;

/// 获取 h263kit 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置解码器的注册表
pub fn default_codec_registry() -> h263kit_codec::CodecRegistry {
    let mut registry = h263kit_codec::CodecRegistry::new();
    h263kit_codec::register_all(&mut registry);
    registry
}
