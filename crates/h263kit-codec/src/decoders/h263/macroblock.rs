//! 宏块层解码.
//!
//! `MacroblockDecoder` 把一个宏块的语法元素解码到 `MacroblockData`,
//! 只负责熵解码与运动向量预测, 反量化和重建交给 `Reconstructor`.

use h263kit_core::{BitReader, KitError, KitResult};
use log::{trace, warn};

use crate::frame::PictureType;

use super::context::{DecoderState, MotionVector};
use super::er::ErrorResilience;
use super::vlc::{
    MCBPC_I_STUFFING, MCBPC_P_STUFFING, Tcoef, ZIGZAG, decode_cbpy, decode_mcbpc_inter,
    decode_mcbpc_intra, decode_mvd, decode_tcoef,
};

/// DQUANT 增量表
const DQUANT_TABLE: [i32; 4] = [-1, -2, 1, 2];

/// 宏块解码结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbStatus {
    /// 宏块正常解码
    Ok,
    /// 宏块之后恰好是片结束
    SliceEnd,
    /// 本应是片边界的位置语法不一致
    SliceEndDesync,
    /// 宏块语法错误
    Error,
}

/// 宏块类型 (MCBPC 表下标 / 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MbType {
    Inter,
    InterQ,
    Inter4V,
    Intra,
    IntraQ,
    Inter4VQ,
}

impl MbType {
    fn from_inter_index(index: usize) -> Option<Self> {
        match index / 4 {
            0 => Some(Self::Inter),
            1 => Some(Self::InterQ),
            2 => Some(Self::Inter4V),
            3 => Some(Self::Intra),
            4 => Some(Self::IntraQ),
            6 => Some(Self::Inter4VQ),
            _ => None,
        }
    }

    fn is_intra(self) -> bool {
        matches!(self, Self::Intra | Self::IntraQ)
    }

    fn has_dquant(self) -> bool {
        matches!(self, Self::InterQ | Self::IntraQ | Self::Inter4VQ)
    }
}

/// 一个宏块的解码结果
#[derive(Debug, Clone)]
pub struct MacroblockData {
    /// 6 个 8x8 块的量化系数 (光栅序), 帧内块的 [0] 为 DC 电平
    pub blocks: [[i32; 64]; 6],
    /// 编码块模式 (bit5..bit0 对应 Y0..Y3, Cb, Cr)
    pub cbp: u8,
    /// 帧内宏块
    pub intra: bool,
    /// 跳过宏块 (COD = 1)
    pub skipped: bool,
    /// 运动向量 (半像素)
    pub mv: MotionVector,
    /// 解码本宏块时的量化参数
    pub qscale: u8,
}

impl Default for MacroblockData {
    fn default() -> Self {
        Self {
            blocks: [[0; 64]; 6],
            cbp: 0,
            intra: false,
            skipped: false,
            mv: MotionVector::ZERO,
            qscale: 1,
        }
    }
}

impl MacroblockData {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清空, 准备解码下一个宏块
    pub fn clear(&mut self) {
        for block in &mut self.blocks {
            block.fill(0);
        }
        self.cbp = 0;
        self.intra = false;
        self.skipped = false;
        self.mv = MotionVector::ZERO;
    }

    /// 第 `n` 个块是否有系数
    pub fn block_coded(&self, n: usize) -> bool {
        self.cbp & (32 >> n) != 0
    }
}

/// 宏块解码器
pub trait MacroblockDecoder: Send {
    /// 解码游标处的一个宏块
    fn decode_macroblock(
        &mut self,
        reader: &mut BitReader<'_>,
        state: &mut DecoderState,
        mb: &mut MacroblockData,
    ) -> MbStatus;

    /// 数据分区帧的第一遍 (运动/头分区), 覆盖从片起点开始的宏块范围
    fn decode_partitions(
        &mut self,
        _reader: &mut BitReader<'_>,
        _state: &mut DecoderState,
        _er: &mut dyn ErrorResilience,
    ) -> KitResult<()> {
        Err(KitError::Unsupported("宏块解码器不支持数据分区".into()))
    }
}

/// H.263 基线宏块解码器 (含 FLV 转义)
#[derive(Debug, Default)]
pub struct H263MacroblockDecoder;

impl H263MacroblockDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_inner(
        reader: &mut BitReader<'_>,
        state: &mut DecoderState,
        mb: &mut MacroblockData,
    ) -> KitResult<()> {
        let xy = state.mb_index(state.mb_x, state.mb_y);
        let inter_picture = matches!(state.pict_type, PictureType::P | PictureType::S);

        let mb_type = if inter_picture {
            let index = loop {
                if reader.read_flag()? {
                    // COD = 1: 跳过
                    mb.skipped = true;
                    mb.qscale = state.qscale;
                    state.clean_intra_table_entries(xy);
                    return Ok(());
                }
                let index = decode_mcbpc_inter(reader)
                    .ok_or_else(|| KitError::InvalidData("P 帧 MCBPC 非法".into()))?;
                if index != MCBPC_P_STUFFING {
                    break index;
                }
            };
            let mb_type = MbType::from_inter_index(index)
                .ok_or_else(|| KitError::InvalidData("P 帧宏块类型非法".into()))?;
            mb.cbp = (index & 3) as u8;
            mb_type
        } else {
            let index = loop {
                let index = decode_mcbpc_intra(reader)
                    .ok_or_else(|| KitError::InvalidData("I 帧 MCBPC 非法".into()))?;
                if index != MCBPC_I_STUFFING {
                    break index;
                }
            };
            mb.cbp = (index & 3) as u8;
            if index >= 4 {
                MbType::IntraQ
            } else {
                MbType::Intra
            }
        };

        mb.intra = mb_type.is_intra();
        let cbpy = decode_cbpy(reader).ok_or_else(|| KitError::InvalidData("CBPY 非法".into()))?;
        let cbpy = if mb.intra { cbpy } else { cbpy ^ 0xF };
        mb.cbp |= cbpy << 2;

        if mb_type.has_dquant() {
            let delta = DQUANT_TABLE[reader.read_bits(2)? as usize];
            state.set_qscale(i32::from(state.qscale) + delta);
        }
        mb.qscale = state.qscale;

        if matches!(mb_type, MbType::Inter4V | MbType::Inter4VQ) {
            return Err(KitError::Unsupported("不支持 4MV 宏块".into()));
        }

        if mb.intra {
            state.mbintra_table[xy] = true;
        } else {
            state.clean_intra_table_entries(xy);
            let pred = predict_motion(state);
            let mx = decode_motion(reader, pred.x, state.long_vectors)?;
            let my = decode_motion(reader, pred.y, state.long_vectors)?;
            mb.mv = MotionVector::new(mx, my);
        }

        for n in 0..6 {
            let coded = mb.block_coded(n);
            decode_block(reader, state, &mut mb.blocks[n], mb.intra, coded)?;
        }
        Ok(())
    }
}

impl MacroblockDecoder for H263MacroblockDecoder {
    fn decode_macroblock(
        &mut self,
        reader: &mut BitReader<'_>,
        state: &mut DecoderState,
        mb: &mut MacroblockData,
    ) -> MbStatus {
        mb.clear();
        if let Err(e) = Self::decode_inner(reader, state, mb) {
            warn!(
                "宏块 ({}, {}) 解码失败: {} (bit {})",
                state.mb_x,
                state.mb_y,
                e,
                reader.bits_read()
            );
            return MbStatus::Error;
        }
        let xy = state.mb_index(state.mb_x, state.mb_y);
        if let Some(q) = state.qscale_table.get_mut(xy) {
            *q = mb.qscale;
        }

        // 之后 16 位全零 (或数据结束) 即为片结束
        let left = reader.bits_left();
        let next = if left <= 0 {
            0
        } else if left < 16 {
            reader.show_bits(16) >> (16 - left)
        } else {
            reader.show_bits(16)
        };
        if next == 0 {
            trace!("片结束于宏块 ({}, {})", state.mb_x, state.mb_y);
            MbStatus::SliceEnd
        } else {
            MbStatus::Ok
        }
    }
}

fn mid_pred(a: i32, b: i32, c: i32) -> i32 {
    a.max(b).min(a.min(b).max(c))
}

/// 16x16 运动向量预测 (左 / 上 / 右上中值)
fn predict_motion(state: &DecoderState) -> MotionVector {
    let xy = state.mb_index(state.mb_x, state.mb_y);
    let left = if state.mb_x == 0 {
        MotionVector::ZERO
    } else {
        state.motion_val[xy - 1]
    };

    if state.first_slice_line {
        if state.mb_x == state.resync_mb_x {
            return MotionVector::ZERO;
        }
        return left;
    }

    let above = state.motion_val[xy - state.mb_stride];
    let above_right = if state.mb_x + 1 >= state.mb_width {
        MotionVector::ZERO
    } else {
        state.motion_val[xy - state.mb_stride + 1]
    };
    MotionVector::new(
        mid_pred(left.x, above.x, above_right.x),
        mid_pred(left.y, above.y, above_right.y),
    )
}

/// 解码一个运动向量分量
fn decode_motion(reader: &mut BitReader<'_>, pred: i32, long_vectors: bool) -> KitResult<i32> {
    let delta = decode_mvd(reader).ok_or_else(|| KitError::InvalidData("MVD 非法".into()))?;
    if delta == 0 {
        return Ok(pred);
    }
    let mut val = pred + delta;
    if !long_vectors {
        val = ((val + 32) & 63) - 32;
    } else {
        if pred < -31 && val < -63 {
            val += 64;
        }
        if pred > 32 && val > 63 {
            val -= 64;
        }
    }
    Ok(val)
}

/// 解码一个 8x8 块的系数
fn decode_block(
    reader: &mut BitReader<'_>,
    state: &DecoderState,
    block: &mut [i32; 64],
    intra: bool,
    coded: bool,
) -> KitResult<()> {
    let mut i = 0usize;
    if intra {
        let level = reader.read_bits(8)? as i32;
        if level & 0x7F == 0 {
            return Err(KitError::InvalidData(format!("帧内 DC 非法: {}", level)));
        }
        block[0] = if level == 255 { 128 } else { level };
        i = 1;
    }
    if !coded {
        return Ok(());
    }

    loop {
        let (last, run, level) =
            match decode_tcoef(reader).ok_or_else(|| KitError::InvalidData("TCOEF 非法".into()))? {
                Tcoef::Coef { last, run, level } => (last, run, level),
                Tcoef::Escape => decode_escape(reader, state.flv_version)?,
            };
        i += run;
        if i >= 64 {
            return Err(KitError::InvalidData(format!("系数位置越界: {}", i)));
        }
        block[ZIGZAG[i]] = level;
        if last {
            return Ok(());
        }
        i += 1;
    }
}

/// 转义系数 (H.263 定长 / FLV 第二版 7 或 11 位电平)
fn decode_escape(reader: &mut BitReader<'_>, flv_version: u8) -> KitResult<(bool, usize, i32)> {
    if flv_version > 1 {
        let is11 = reader.read_flag()?;
        let last = reader.read_flag()?;
        let run = reader.read_bits(6)? as usize;
        let level = reader.read_bits_signed(if is11 { 11 } else { 7 })?;
        return Ok((last, run, level));
    }
    let last = reader.read_flag()?;
    let run = reader.read_bits(6)? as usize;
    let level = reader.read_bits(8)? as u8 as i8 as i32;
    if level == 0 || level == -128 {
        return Err(KitError::InvalidData(format!("转义电平非法: {}", level)));
    }
    Ok((last, run, level))
}

#[cfg(test)]
mod tests {
    use h263kit_core::BitWriter;

    use super::*;
    use crate::decoders::h263::options::WorkaroundBugs;
    use crate::decoders::h263::variant::{Variant, profile};

    fn state(pict_type: PictureType) -> DecoderState {
        let mut st = DecoderState::new(profile(Variant::H263), WorkaroundBugs::AUTODETECT);
        st.width = 48;
        st.height = 32;
        st.resize_grid();
        st.pict_type = pict_type;
        st.set_qscale(4);
        st
    }

    /// 写入只含 DC 的帧内宏块
    fn write_dc_only_intra(bw: &mut BitWriter) {
        bw.write_bit(1); // MCBPC: intra cbpc=0
        bw.write_bits(3, 4); // CBPY: 0
        for _ in 0..6 {
            bw.write_bits(0x40, 8);
        }
    }

    #[test]
    fn test_intra_dc_only_then_slice_end() {
        let mut bw = BitWriter::new();
        write_dc_only_intra(&mut bw);
        bw.write_bits(0, 16);
        let data = bw.finish();

        let mut st = state(PictureType::I);
        let mut mb = MacroblockData::new();
        let mut reader = BitReader::new(&data);
        let status = H263MacroblockDecoder::new().decode_macroblock(&mut reader, &mut st, &mut mb);
        assert_eq!(status, MbStatus::SliceEnd);
        assert!(mb.intra);
        assert_eq!(mb.cbp, 0);
        assert!(mb.blocks.iter().all(|b| b[0] == 0x40));
        assert!(st.mbintra_table[0]);
    }

    #[test]
    fn test_intra_block_with_coefficients() {
        let mut bw = BitWriter::new();
        bw.write_bit(1); // cbpc=0
        bw.write_bits(3, 2); // CBPY: 15
        for n in 0..6 {
            bw.write_bits(0x20 + n, 8);
            if n < 4 {
                bw.write_bits(0x06, 3); // run=1 level=1
                bw.write_bit(0);
                bw.write_bits(0x03, 7); // 转义
                bw.write_bits(1, 1); // last
                bw.write_bits(2, 6); // run
                bw.write_bits(0xFD, 8); // -3
            }
        }
        bw.write_bits(0xFFFF, 16);
        let data = bw.finish();

        let mut st = state(PictureType::I);
        let mut mb = MacroblockData::new();
        let mut reader = BitReader::new(&data);
        let status = H263MacroblockDecoder::new().decode_macroblock(&mut reader, &mut st, &mut mb);
        assert_eq!(status, MbStatus::Ok);
        assert_eq!(mb.cbp, 0b11_1100);
        // DC 后 run=1 -> 扫描位置 2, 再 run=2 -> 扫描位置 5
        assert_eq!(mb.blocks[0][ZIGZAG[2]], 1);
        assert_eq!(mb.blocks[0][ZIGZAG[5]], -3);
        assert_eq!(mb.blocks[4][0], 0x24);
    }

    #[test]
    fn test_skipped_inter_macroblock() {
        let mut bw = BitWriter::new();
        bw.write_bit(1); // COD
        bw.write_bits(0xFF, 8);
        let data = bw.finish();

        let mut st = state(PictureType::P);
        st.mbintra_table[0] = true;
        let mut mb = MacroblockData::new();
        let mut reader = BitReader::new(&data);
        let status = H263MacroblockDecoder::new().decode_macroblock(&mut reader, &mut st, &mut mb);
        assert_eq!(status, MbStatus::Ok);
        assert!(mb.skipped);
        assert!(!st.mbintra_table[0]);
    }

    #[test]
    fn test_inter_motion_vector_wrap() {
        let mut bw = BitWriter::new();
        bw.write_bit(0); // COD
        bw.write_bit(1); // MCBPC inter cbpc=0
        bw.write_bits(3, 2); // CBPY 15 ^ 0xF = 0
        bw.write_bits(3, 6); // mvd x = 4
        bw.write_bit(0);
        bw.write_bits(2, 12); // mvd y = 32
        bw.write_bit(1); // 负号
        bw.write_bits(0xFFFF, 16);
        let data = bw.finish();

        let mut st = state(PictureType::P);
        st.mb_x = 1;
        st.resync_mb_x = 0;
        let left = st.mb_index(0, 0);
        st.motion_val[left] = MotionVector::new(30, 0);
        let mut mb = MacroblockData::new();
        let mut reader = BitReader::new(&data);
        let status = H263MacroblockDecoder::new().decode_macroblock(&mut reader, &mut st, &mut mb);
        assert_eq!(status, MbStatus::Ok);
        assert_eq!(mb.cbp, 0);
        // 30 + 4 = 34 -> 回绕到 -30; 0 - 32 = -32
        assert_eq!(mb.mv, MotionVector::new(-30, -32));
    }

    #[test]
    fn test_dquant_updates_qscale() {
        let mut bw = BitWriter::new();
        bw.write_bits(1, 4); // MCBPC intraQ cbpc=0
        bw.write_bits(3, 4); // CBPY 0
        bw.write_bits(3, 2); // +2
        for _ in 0..6 {
            bw.write_bits(0x10, 8);
        }
        bw.write_bits(0xFFFF, 16);
        let data = bw.finish();

        let mut st = state(PictureType::I);
        let mut mb = MacroblockData::new();
        let mut reader = BitReader::new(&data);
        let status = H263MacroblockDecoder::new().decode_macroblock(&mut reader, &mut st, &mut mb);
        assert_eq!(status, MbStatus::Ok);
        assert_eq!(st.qscale, 6);
        assert_eq!(mb.qscale, 6);
        assert_eq!(st.qscale_table[0], 6);
    }

    #[test]
    fn test_illegal_dc_is_error() {
        let mut bw = BitWriter::new();
        bw.write_bit(1);
        bw.write_bits(3, 4);
        bw.write_bits(0x80, 8);
        bw.write_bits(0xFFFF, 16);
        let data = bw.finish();

        let mut st = state(PictureType::I);
        let mut mb = MacroblockData::new();
        let mut reader = BitReader::new(&data);
        let status = H263MacroblockDecoder::new().decode_macroblock(&mut reader, &mut st, &mut mb);
        assert_eq!(status, MbStatus::Error);
    }

    #[test]
    fn test_motion_prediction_median() {
        let mut st = state(PictureType::P);
        st.first_slice_line = false;
        st.mb_x = 1;
        st.mb_y = 1;
        let l = st.mb_index(0, 1);
        let a = st.mb_index(1, 0);
        let ar = st.mb_index(2, 0);
        st.motion_val[l] = MotionVector::new(2, -8);
        st.motion_val[a] = MotionVector::new(6, 4);
        st.motion_val[ar] = MotionVector::new(-4, 0);
        assert_eq!(predict_motion(&st), MotionVector::new(2, 0));

        // 右边界: 右上视为零
        st.mb_x = 2;
        let l = st.mb_index(1, 1);
        let a = st.mb_index(2, 0);
        st.motion_val[l] = MotionVector::new(8, 8);
        st.motion_val[a] = MotionVector::new(4, 4);
        assert_eq!(predict_motion(&st), MotionVector::new(4, 4));
    }

    #[test]
    fn test_flv2_escape() {
        let mut bw = BitWriter::new();
        bw.write_bit(1); // is11
        bw.write_bit(1); // last
        bw.write_bits(3, 6);
        bw.write_bits_signed(-700, 11);
        let data = bw.finish();
        let mut reader = BitReader::new(&data);
        assert_eq!(decode_escape(&mut reader, 2).unwrap(), (true, 3, -700));
    }
}
