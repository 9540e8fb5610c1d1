//! # h263kit-core
//!
//! h263kit 的底层基础设施: 统一错误类型、按位读写器与像素格式定义.

pub mod bitreader;
pub mod bitwriter;
pub mod error;
pub mod pixel_format;

// 重导出常用类型
pub use bitreader::BitReader;
pub use bitwriter::BitWriter;
pub use error::{KitError, KitResult};
pub use pixel_format::PixelFormat;
