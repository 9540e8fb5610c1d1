//! 图像头与片头解析.
//!
//! `HeaderParser` 是各方言头语法的统一接口. 帧调度器按方言分派表选定解析器,
//! 解析器只在成功时提交尺寸和编码模式字段, 失败时由调度器回滚尺寸快照.
//!
//! 本文件同时提供 H.263 基线 / H.263+ 的解析实现以及通用的 GOB 头解析,
//! 片循环的重同步搜索由 trait 的默认方法实现.

use h263kit_core::{BitReader, KitError, KitResult};
use log::{debug, error, trace, warn};

use crate::frame::PictureType;

use super::context::DecoderState;

/// 图像起始码 (PSC, 22 位)
pub(super) const PSC: u32 = 0x20;

/// 重同步扫描所需的最少剩余位数: 16 个零 + 1 + GN(5) + GQUANT(5)
const RESYNC_MIN_BITS: isize = 16 + 1 + 5 + 5;

/// 标准源格式 (索引 1..=5)
const SOURCE_FORMATS: [(u32, u32); 8] = [
    (0, 0),
    (128, 96),
    (176, 144),
    (352, 288),
    (704, 576),
    (1408, 1152),
    (0, 0),
    (0, 0),
];

/// 像素宽高比代码 (索引 15 为扩展 PAR)
const PIXEL_ASPECT: [(u32, u32); 16] = [
    (0, 1),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (0, 1),
    (0, 1),
    (0, 1),
    (0, 1),
    (0, 1),
    (0, 1),
    (0, 1),
    (0, 1),
    (0, 1),
    (0, 1),
];

/// 图像头解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    /// 图像头有效, 继续解码
    Decoded,
    /// 显式的未编码帧, 不产生输出
    FrameSkipped,
}

/// 二级头 (WMV2) 解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryHeader {
    /// 继续片解码
    Continue,
    /// 本帧无需片解码, 直接进入帧结束
    FrameEnd,
}

/// 方言头解析器
pub trait HeaderParser: Send {
    /// 解析器名称
    fn name(&self) -> &'static str;

    /// 解析一个图像头
    ///
    /// 返回 `Err` 表示头损坏. 实现应只在成功时写入 `state`.
    fn parse_picture_header(
        &mut self,
        reader: &mut BitReader<'_>,
        state: &mut DecoderState,
    ) -> KitResult<HeaderStatus>;

    /// 在游标处解析一个片头 (GOB 头 / video packet 头), 成功时更新游标与量化参数
    fn decode_slice_header(
        &mut self,
        reader: &mut BitReader<'_>,
        state: &mut DecoderState,
    ) -> KitResult<()>;

    /// 搜索下一个可用的片起点
    ///
    /// 先尝试游标处的片头; 否则回到当前片起点, 按字节对齐向后扫描.
    fn resync(&mut self, reader: &mut BitReader<'_>, state: &mut DecoderState) -> KitResult<()> {
        if reader.show_bits(16) == 0 {
            let pos = reader.bits_read();
            if self.decode_slice_header(reader, state).is_ok() {
                trace!("同步点位于游标处: bit {}", pos);
                return Ok(());
            }
        }

        reader.seek_to_bit(state.last_resync_bit);
        reader.align_to_byte();
        while reader.bits_left() > RESYNC_MIN_BITS {
            if reader.show_bits(16) == 0 {
                let pos = reader.bits_read();
                if self.decode_slice_header(reader, state).is_ok() {
                    trace!("扫描找到同步点: bit {}", pos);
                    return Ok(());
                }
                reader.seek_to_bit(pos);
            }
            reader.skip_bits_unchecked(8);
        }
        Err(KitError::InvalidData("未找到下一个同步点".into()))
    }

    /// 片解码之后的尾部扩展头 (MS-MPEG4 v1..v3 的 I 帧)
    fn decode_ext_header(
        &mut self,
        _reader: &mut BitReader<'_>,
        _state: &mut DecoderState,
        _buf_size: usize,
    ) -> KitResult<()> {
        Ok(())
    }

    /// 片解码之前的二级头 (WMV2)
    fn decode_secondary_header(
        &mut self,
        _reader: &mut BitReader<'_>,
        _state: &mut DecoderState,
    ) -> KitResult<SecondaryHeader> {
        Ok(SecondaryHeader::Continue)
    }
}

/// 解析 H.263 GOB 头 (16 个零 + 填充 + 1, GN, GFID, GQUANT)
pub(super) fn decode_gob_header(
    reader: &mut BitReader<'_>,
    state: &mut DecoderState,
) -> KitResult<()> {
    if reader.show_bits(16) != 0 {
        return Err(KitError::InvalidData("GOB 起始码缺失".into()));
    }
    reader.skip_bits(16)?;

    let mut left = reader.bits_left().min(32);
    while left > 13 {
        if reader.read_bit()? == 1 {
            break;
        }
        left -= 1;
    }
    if left <= 13 {
        return Err(KitError::InvalidData("GOB 起始码后没有找到 1".into()));
    }

    let gob_number = reader.read_bits(5)? as usize;
    reader.skip_bits(2)?; // GFID
    let gquant = reader.read_bits(5)? as i32;

    let mb_y = state.gob_height() * gob_number;
    if mb_y >= state.mb_height {
        return Err(KitError::InvalidData(format!(
            "GOB 编号越界: gn={}, mb_y={}, mb_height={}",
            gob_number, mb_y, state.mb_height,
        )));
    }
    if gquant == 0 {
        return Err(KitError::InvalidData("GQUANT 为 0".into()));
    }

    state.mb_x = 0;
    state.mb_y = mb_y;
    state.set_qscale(gquant);
    trace!("GOB 头: gn={}, mb_y={}, gquant={}", gob_number, mb_y, gquant);
    Ok(())
}

/// 跳过 PEI/PSUPP 扩展信息 (每个 1 后跟 8 位数据)
pub(super) fn skip_supplemental_info(reader: &mut BitReader<'_>) -> KitResult<()> {
    while reader.read_bit()? == 1 {
        reader.skip_bits(8)?;
    }
    Ok(())
}

/// 解析完成但尚未提交的图像头字段
#[derive(Debug, Clone)]
struct PictureHeader {
    width: u32,
    height: u32,
    picture_number: u32,
    pict_type: PictureType,
    qscale: i32,
    h263_plus: bool,
    long_vectors: bool,
    loop_filter: bool,
    no_rounding: bool,
    sample_aspect_ratio: (u32, u32),
}

/// H.263 基线与 H.263+ 图像头解析器
#[derive(Debug, Default)]
pub struct H263HeaderParser {
    /// H.263+ 自定义图像时钟频率 (影响后续帧的 ETR 字段)
    custom_pcf: bool,
}

impl H263HeaderParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按字节对齐搜索 22 位 PSC
    fn find_picture_start(reader: &mut BitReader<'_>) -> KitResult<()> {
        reader.align_to_byte();
        if reader.bits_left() < 22 {
            return Err(KitError::HeaderCorrupt("数据不足以容纳图像起始码".into()));
        }
        let mut startcode = reader.read_bits(22 - 8)?;
        let mut left = reader.bits_left();
        while left > 24 {
            startcode = ((startcode << 8) | reader.read_bits(8)?) & 0x003F_FFFF;
            if startcode == PSC {
                break;
            }
            left -= 8;
        }
        if startcode != PSC {
            return Err(KitError::HeaderCorrupt("图像起始码错误".into()));
        }
        Ok(())
    }

    /// 解析 PLUSPTYPE 之后的扩展图像头
    fn parse_plus_header(
        &mut self,
        reader: &mut BitReader<'_>,
        state: &DecoderState,
        header: &mut PictureHeader,
    ) -> KitResult<()> {
        let ufep = reader.read_bits(3)?;
        let mut format = 0usize;
        if ufep == 1 {
            // OPPTYPE
            format = reader.read_bits(3)? as usize;
            self.custom_pcf = reader.read_flag()?;
            let optional_modes = [
                ("无限制运动向量 (Annex D)", reader.read_flag()?),
                ("SAC", reader.read_flag()?),
                ("高级预测模式", reader.read_flag()?),
                ("高级帧内编码", reader.read_flag()?),
            ];
            header.loop_filter = reader.read_flag()?;
            let more_modes = [
                ("片结构模式", reader.read_flag()?),
                ("参考图像选择", reader.read_flag()?),
            ];
            let _independent_segments = reader.read_flag()?;
            let tail_modes = [
                ("替代帧间 VLC", reader.read_flag()?),
                ("修正量化", reader.read_flag()?),
            ];
            for (name, enabled) in optional_modes
                .iter()
                .chain(more_modes.iter())
                .chain(tail_modes.iter())
            {
                if *enabled {
                    error!("不支持的 H.263+ 可选模式: {}", name);
                    return Err(KitError::HeaderCorrupt(format!("不支持 {}", name)));
                }
            }
            reader.skip_bits(1)?; // 防起始码仿真
            reader.skip_bits(3)?; // 保留
        } else if ufep != 0 {
            error!("UFEP 取值错误: {}", ufep);
            return Err(KitError::HeaderCorrupt(format!("UFEP={}", ufep)));
        }

        // MPPTYPE
        header.pict_type = match reader.read_bits(3)? {
            0 | 7 => PictureType::I,
            1 => PictureType::P,
            2 => return Err(KitError::HeaderCorrupt("不支持改进 PB 帧".into())),
            3 => return Err(KitError::HeaderCorrupt("不支持 H.263+ B 帧".into())),
            other => {
                return Err(KitError::HeaderCorrupt(format!("图像类型错误: {}", other)));
            }
        };
        reader.skip_bits(2)?; // RPR, RRU
        header.no_rounding = reader.read_flag()?;
        reader.skip_bits(3)?; // 保留 + 1

        // CPM
        if reader.read_flag()? {
            reader.skip_bits(2)?;
        }

        if ufep == 1 {
            if format == 6 {
                // CPFMT
                let aspect_code = reader.read_bits(4)? as usize;
                header.width = (reader.read_bits(9)? + 1) * 4;
                if reader.read_bit()? != 1 {
                    warn!("自定义图像格式中的 marker 位错误");
                }
                header.height = reader.read_bits(9)? * 4;
                header.sample_aspect_ratio = if aspect_code == 15 {
                    let num = reader.read_bits(8)?;
                    let den = reader.read_bits(8)?;
                    (num, den)
                } else {
                    PIXEL_ASPECT[aspect_code]
                };
            } else {
                let (width, height) = SOURCE_FORMATS[format];
                header.width = width;
                header.height = height;
                header.sample_aspect_ratio = (12, 11);
            }
            if self.custom_pcf {
                reader.skip_bits(8)?; // CPCFC
            }
        } else {
            header.width = state.width;
            header.height = state.height;
            header.sample_aspect_ratio = state.sample_aspect_ratio;
        }
        if self.custom_pcf {
            reader.skip_bits(2)?; // ETR
        }

        header.qscale = reader.read_bits(5)? as i32;
        header.h263_plus = true;
        Ok(())
    }
}

impl HeaderParser for H263HeaderParser {
    fn name(&self) -> &'static str {
        "h263"
    }

    fn parse_picture_header(
        &mut self,
        reader: &mut BitReader<'_>,
        state: &mut DecoderState,
    ) -> KitResult<HeaderStatus> {
        Self::find_picture_start(reader)?;

        let mut header = PictureHeader {
            width: 0,
            height: 0,
            picture_number: reader.read_bits(8)?,
            pict_type: PictureType::I,
            qscale: 0,
            h263_plus: false,
            long_vectors: false,
            loop_filter: false,
            no_rounding: false,
            sample_aspect_ratio: (12, 11),
        };

        // PTYPE
        if reader.read_bit()? != 1 {
            warn!("图像头 marker 位错误");
        }
        if reader.read_bit()? != 0 {
            return Err(KitError::HeaderCorrupt("H.263 标识位错误".into()));
        }
        reader.skip_bits(3)?; // split screen, document camera, freeze release

        let format = reader.read_bits(3)? as usize;
        match format {
            1..=5 => {
                let (width, height) = SOURCE_FORMATS[format];
                header.width = width;
                header.height = height;
                header.pict_type = if reader.read_flag()? {
                    PictureType::P
                } else {
                    PictureType::I
                };
                header.long_vectors = reader.read_flag()?;
                if reader.read_flag()? {
                    error!("不支持 SAC (Annex E)");
                    return Err(KitError::HeaderCorrupt("不支持 SAC".into()));
                }
                if reader.read_flag()? {
                    error!("不支持高级预测模式 (Annex F)");
                    return Err(KitError::HeaderCorrupt("不支持高级预测模式".into()));
                }
                if reader.read_flag()? {
                    error!("不支持 PB 帧 (Annex G)");
                    return Err(KitError::HeaderCorrupt("不支持 PB 帧".into()));
                }
                header.qscale = reader.read_bits(5)? as i32;
                // CPM
                if reader.read_flag()? {
                    reader.skip_bits(2)?;
                }
            }
            7 => self.parse_plus_header(reader, state, &mut header)?,
            _ => {
                return Err(KitError::HeaderCorrupt(format!("源格式错误: {}", format)));
            }
        }

        skip_supplemental_info(reader)?;

        if header.width == 0 || header.height == 0 {
            return Err(KitError::HeaderCorrupt("图像尺寸为 0".into()));
        }
        if header.qscale == 0 {
            return Err(KitError::HeaderCorrupt("量化参数为 0".into()));
        }

        state.width = header.width;
        state.height = header.height;
        state.picture_number = header.picture_number;
        state.pict_type = header.pict_type;
        state.droppable = false;
        state.set_qscale(header.qscale);
        state.h263_plus = header.h263_plus;
        state.long_vectors = header.long_vectors;
        state.loop_filter = header.loop_filter;
        state.no_rounding = header.no_rounding;
        state.sample_aspect_ratio = header.sample_aspect_ratio;
        state.flv_version = 0;

        debug!(
            "H.263 图像头: {}x{}, 类型={}, qscale={}, plus={}, tr={}",
            header.width,
            header.height,
            header.pict_type.as_char(),
            header.qscale,
            header.h263_plus,
            header.picture_number,
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

    fn state() -> DecoderState {
        DecoderState::new(profile(Variant::H263), WorkaroundBugs::AUTODETECT)
    }

    /// 写入一个 QCIF 基线图像头
    fn write_qcif_header(bw: &mut BitWriter, inter: bool, qscale: u32) {
        bw.write_bits(PSC, 22);
        bw.write_bits(7, 8); // TR
        bw.write_bits(0b10, 2);
        bw.write_bits(0, 3);
        bw.write_bits(2, 3); // QCIF
        bw.write_bit(u32::from(inter));
        bw.write_bits(0, 4); // UMV, SAC, AP, PB
        bw.write_bits(qscale, 5);
        bw.write_bit(0); // CPM
        bw.write_bit(0); // PEI
    }

    #[test]
    fn test_parse_baseline_header() {
        let mut bw = BitWriter::new();
        write_qcif_header(&mut bw, true, 12);
        let data = bw.finish();

        let mut st = state();
        let mut parser = H263HeaderParser::new();
        let mut reader = BitReader::new(&data);
        let status = parser.parse_picture_header(&mut reader, &mut st).unwrap();
        assert_eq!(status, HeaderStatus::Decoded);
        assert_eq!((st.width, st.height), (176, 144));
        assert_eq!(st.pict_type, PictureType::P);
        assert_eq!(st.qscale, 12);
        assert_eq!(st.picture_number, 7);
        assert!(!st.h263_plus);
    }

    #[test]
    fn test_psc_found_after_leading_garbage() {
        let mut bw = BitWriter::new();
        bw.write_bytes(&[0xAB, 0xCD]);
        write_qcif_header(&mut bw, false, 5);
        let data = bw.finish();

        let mut st = state();
        let mut reader = BitReader::new(&data);
        H263HeaderParser::new()
            .parse_picture_header(&mut reader, &mut st)
            .unwrap();
        assert_eq!(st.pict_type, PictureType::I);
    }

    #[test]
    fn test_corrupt_header_leaves_state_untouched() {
        let mut bw = BitWriter::new();
        bw.write_bits(PSC, 22);
        bw.write_bits(0, 8);
        bw.write_bits(0b10, 2);
        bw.write_bits(0, 3);
        bw.write_bits(2, 3);
        bw.write_bit(0);
        bw.write_bits(0b0100, 4); // SAC
        bw.write_bits(0, 16);
        let data = bw.finish();

        let mut st = state();
        st.width = 352;
        st.height = 288;
        let mut reader = BitReader::new(&data);
        let result = H263HeaderParser::new().parse_picture_header(&mut reader, &mut st);
        assert!(matches!(result, Err(KitError::HeaderCorrupt(_))));
        assert_eq!((st.width, st.height), (352, 288));
    }

    #[test]
    fn test_plus_custom_format() {
        let mut bw = BitWriter::new();
        bw.write_bits(PSC, 22);
        bw.write_bits(0, 8);
        bw.write_bits(0b10, 2);
        bw.write_bits(0, 3);
        bw.write_bits(7, 3); // PLUSPTYPE
        bw.write_bits(1, 3); // UFEP
        bw.write_bits(6, 3); // 自定义格式
        bw.write_bit(0); // custom PCF
        bw.write_bits(0, 4); // UMV SAC AP AIC
        bw.write_bit(1); // 去块滤波
        bw.write_bits(0, 5); // SS RPS ISD AIV MQ
        bw.write_bits(0b1000, 4);
        bw.write_bits(1, 3); // P
        bw.write_bits(0, 2);
        bw.write_bit(0); // rounding
        bw.write_bits(0b001, 3);
        bw.write_bit(0); // CPM
        bw.write_bits(2, 4); // PAR 12:11
        bw.write_bits(320 / 4 - 1, 9);
        bw.write_bit(1);
        bw.write_bits(240 / 4, 9);
        bw.write_bits(9, 5); // PQUANT
        bw.write_bit(0); // PEI
        let data = bw.finish();

        let mut st = state();
        let mut reader = BitReader::new(&data);
        H263HeaderParser::new()
            .parse_picture_header(&mut reader, &mut st)
            .unwrap();
        assert_eq!((st.width, st.height), (320, 240));
        assert!(st.h263_plus);
        assert!(st.loop_filter);
        assert_eq!(st.pict_type, PictureType::P);
        assert_eq!(st.qscale, 9);
    }

    #[test]
    fn test_gob_header() {
        let mut st = state();
        st.width = 176;
        st.height = 144;
        st.resize_grid();

        let mut bw = BitWriter::new();
        bw.write_bits(0, 16);
        bw.write_bits(0, 3); // 填充
        bw.write_bit(1);
        bw.write_bits(4, 5); // GN
        bw.write_bits(0, 2);
        bw.write_bits(17, 5);
        bw.write_bits(0, 8);
        let data = bw.finish();

        let mut reader = BitReader::new(&data);
        decode_gob_header(&mut reader, &mut st).unwrap();
        assert_eq!((st.mb_x, st.mb_y), (0, 4));
        assert_eq!(st.qscale, 17);
    }

    #[test]
    fn test_resync_scans_from_slice_start() {
        let mut st = state();
        st.width = 176;
        st.height = 144;
        st.resize_grid();

        let mut bw = BitWriter::new();
        bw.write_bytes(&[0x5A, 0xA5, 0x33]); // 垃圾数据
        bw.write_bits(0, 16);
        bw.write_bit(1);
        bw.write_bits(6, 5);
        bw.write_bits(0, 2);
        bw.write_bits(3, 5);
        bw.write_bits(0, 16);
        let data = bw.finish();

        let mut reader = BitReader::new(&data);
        reader.seek_to_bit(13);
        st.last_resync_bit = 3;
        let mut parser = H263HeaderParser::new();
        parser.resync(&mut reader, &mut st).unwrap();
        assert_eq!(st.mb_y, 6);
        assert_eq!(st.qscale, 3);
    }

    #[test]
    fn test_resync_fails_without_gob() {
        let mut st = state();
        st.width = 176;
        st.height = 144;
        st.resize_grid();
        let data = [0xFFu8; 16];
        let mut reader = BitReader::new(&data);
        assert!(H263HeaderParser::new().resync(&mut reader, &mut st).is_err());
    }
}
