//! Sorenson Spark (FLV1) 图像头.
//!
//! FLV1 沿用 H.263 的宏块层, 图像头改为 17 位起始码 + 显式尺寸,
//! 并增加 disposable inter 帧类型 (不作为参考).

use h263kit_core::{BitReader, KitError, KitResult};
use log::debug;

use crate::frame::PictureType;

use super::context::DecoderState;
use super::header::{HeaderParser, HeaderStatus, decode_gob_header, skip_supplemental_info};

/// FLV1 图像起始码 (17 位)
const FLV_START_CODE: u32 = 1;

/// Sorenson Spark 头解析器
#[derive(Debug, Default)]
pub struct FlvHeaderParser;

impl FlvHeaderParser {
    pub fn new() -> Self {
        Self
    }

    /// 按尺寸代码读取图像宽高
    fn read_dimensions(reader: &mut BitReader<'_>) -> KitResult<(u32, u32)> {
        let dims = match reader.read_bits(3)? {
            0 => {
                let w = reader.read_bits(8)?;
                let h = reader.read_bits(8)?;
                (w, h)
            }
            1 => {
                let w = reader.read_bits(16)?;
                let h = reader.read_bits(16)?;
                (w, h)
            }
            2 => (352, 288),
            3 => (176, 144),
            4 => (128, 96),
            5 => (320, 240),
            6 => (160, 120),
            _ => (0, 0),
        };
        Ok(dims)
    }
}

impl HeaderParser for FlvHeaderParser {
    fn name(&self) -> &'static str {
        "flv"
    }

    fn parse_picture_header(
        &mut self,
        reader: &mut BitReader<'_>,
        state: &mut DecoderState,
    ) -> KitResult<HeaderStatus> {
        if reader.read_bits(17)? != FLV_START_CODE {
            return Err(KitError::HeaderCorrupt("FLV 图像起始码错误".into()));
        }
        let format = reader.read_bits(5)?;
        if format > 1 {
            return Err(KitError::HeaderCorrupt(format!("FLV 格式错误: {}", format)));
        }
        let flv_version = format as u8 + 1;
        let picture_number = reader.read_bits(8)?;
        let (width, height) = Self::read_dimensions(reader)?;
        if width == 0 || height == 0 {
            return Err(KitError::HeaderCorrupt(format!(
                "FLV 图像尺寸无效: {}x{}",
                width, height
            )));
        }

        // 0 = I, 1 = P, 2/3 = disposable P
        let type_code = reader.read_bits(2)?;
        let droppable = type_code > 1;
        let pict_type = if type_code == 0 {
            PictureType::I
        } else {
            PictureType::P
        };

        let deblocking = reader.read_flag()?;
        let qscale = reader.read_bits(5)? as i32;
        skip_supplemental_info(reader)?;
        if qscale == 0 {
            return Err(KitError::HeaderCorrupt("量化参数为 0".into()));
        }

        state.width = width;
        state.height = height;
        state.picture_number = picture_number;
        state.pict_type = pict_type;
        state.droppable = droppable;
        state.set_qscale(qscale);
        state.flv_version = flv_version;
        state.h263_plus = false;
        state.long_vectors = false;
        state.loop_filter = false;
        state.no_rounding = false;
        state.sample_aspect_ratio = (1, 1);

        debug!(
            "FLV 图像头: {}x{}, 类型={}{}, qscale={}, 版本={}, 去块={}",
            width,
            height,
            pict_type.as_char(),
            if droppable { " (disposable)" } else { "" },
            qscale,
            flv_version,
            deblocking,
        );
        Ok(HeaderStatus::Decoded)
    }

    fn decode_slice_header(
        &mut self,
        reader: &mut BitReader<'_>,
        state: &mut DecoderState,
    ) -> KitResult<()> {
        decode_gob_header(reader, state)
    }
}

#[cfg(test)]
mod tests {
    use h263kit_core::BitWriter;

    use super::*;
    use crate::decoders::h263::options::WorkaroundBugs;
    use crate::decoders::h263::variant::{Variant, profile};

    fn parse(data: &[u8]) -> (KitResult<HeaderStatus>, DecoderState) {
        let mut st = DecoderState::new(profile(Variant::Flv), WorkaroundBugs::AUTODETECT);
        let mut reader = BitReader::new(data);
        let result = FlvHeaderParser::new().parse_picture_header(&mut reader, &mut st);
        (result, st)
    }

    fn header(format: u32, size_code: u32, type_code: u32) -> BitWriter {
        let mut bw = BitWriter::new();
        bw.write_bits(FLV_START_CODE, 17);
        bw.write_bits(format, 5);
        bw.write_bits(3, 8);
        bw.write_bits(size_code, 3);
        if size_code == 0 {
            bw.write_bits(40, 8);
            bw.write_bits(30, 8);
        }
        bw.write_bits(type_code, 2);
        bw.write_bit(0);
        bw.write_bits(6, 5);
        bw.write_bit(0);
        bw
    }

    #[test]
    fn test_flv_standard_size() {
        let (result, st) = parse(&header(0, 5, 0).finish());
        assert_eq!(result.unwrap(), HeaderStatus::Decoded);
        assert_eq!((st.width, st.height), (320, 240));
        assert_eq!(st.pict_type, PictureType::I);
        assert_eq!(st.flv_version, 1);
        assert!(!st.droppable);
    }

    #[test]
    fn test_flv_custom_size_and_version() {
        let (result, st) = parse(&header(1, 0, 1).finish());
        assert!(result.is_ok());
        assert_eq!((st.width, st.height), (40, 30));
        assert_eq!(st.flv_version, 2);
        assert_eq!(st.pict_type, PictureType::P);
    }

    #[test]
    fn test_flv_disposable_inter() {
        let (result, st) = parse(&header(0, 3, 2).finish());
        assert!(result.is_ok());
        assert_eq!(st.pict_type, PictureType::P);
        assert!(st.droppable);
    }

    #[test]
    fn test_flv_rejects_bad_start_code_and_size() {
        let (result, _) = parse(&[0xFF; 8]);
        assert!(result.is_err());
        let (result, st) = parse(&header(0, 7, 0).finish());
        assert!(matches!(result, Err(KitError::HeaderCorrupt(_))));
        assert_eq!(st.width, 0);
    }
}
