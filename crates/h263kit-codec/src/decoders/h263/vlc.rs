//! H.263 宏块层 VLC 表与解码函数.
//!
//! 包含 MCBPC, CBPY, MVD, TCOEF 码表以及 zigzag 扫描表.
//! 码表格式为 (码字, 位数), 下标即码值.

use std::sync::OnceLock;

use h263kit_core::BitReader;

// ============================================================================
// 码表
// ============================================================================

/// MCBPC (I 帧), 下标 = mb_type * 4 + cbpc, 下标 8 为填充码
const MCBPC_I: [(u16, u8); 9] = [
    (1, 1),
    (1, 3),
    (2, 3),
    (3, 3),
    (1, 4),
    (1, 6),
    (2, 6),
    (3, 6),
    (1, 9),
];

/// I 帧 MCBPC 填充码下标
pub(super) const MCBPC_I_STUFFING: usize = 8;

/// MCBPC (P 帧), 下标 = mb_type * 4 + cbpc, 下标 20 为填充码, 21..=23 不存在
const MCBPC_P: [(u16, u8); 28] = [
    (1, 1),
    (3, 4),
    (2, 4),
    (5, 6),
    (3, 3),
    (7, 7),
    (6, 7),
    (5, 9),
    (2, 3),
    (5, 7),
    (4, 7),
    (5, 8),
    (3, 5),
    (4, 8),
    (3, 8),
    (3, 7),
    (4, 6),
    (4, 9),
    (3, 9),
    (2, 9),
    (1, 9),
    (0, 0),
    (0, 0),
    (0, 0),
    (2, 11),
    (12, 13),
    (14, 13),
    (15, 13),
];

/// P 帧 MCBPC 填充码下标
pub(super) const MCBPC_P_STUFFING: usize = 20;

/// CBPY (帧内取值), 帧间使用时需取反
const CBPY: [(u16, u8); 16] = [
    (3, 4),
    (5, 5),
    (4, 5),
    (9, 4),
    (3, 5),
    (7, 4),
    (2, 6),
    (11, 4),
    (2, 5),
    (3, 6),
    (5, 4),
    (10, 4),
    (4, 4),
    (8, 4),
    (6, 4),
    (3, 2),
];

/// MVD 绝对值码表, 非零值后跟 1 位符号
const MVD: [(u16, u8); 33] = [
    (1, 1),
    (1, 2),
    (1, 3),
    (1, 4),
    (3, 6),
    (5, 7),
    (4, 7),
    (3, 7),
    (11, 9),
    (10, 9),
    (9, 9),
    (17, 10),
    (16, 10),
    (15, 10),
    (14, 10),
    (13, 10),
    (12, 10),
    (11, 10),
    (10, 10),
    (9, 10),
    (8, 10),
    (7, 10),
    (6, 10),
    (5, 10),
    (4, 10),
    (7, 11),
    (6, 11),
    (5, 11),
    (4, 11),
    (3, 11),
    (2, 11),
    (3, 12),
    (2, 12),
];

/// TCOEF (last = 0), 格式: (码字, 位数, run, level)
const TCOEF_NOT_LAST: [(u16, u8, u8, u8); 58] = [
    (0x02, 2, 0, 1),
    (0x0f, 4, 0, 2),
    (0x15, 6, 0, 3),
    (0x17, 7, 0, 4),
    (0x1f, 8, 0, 5),
    (0x25, 9, 0, 6),
    (0x24, 9, 0, 7),
    (0x21, 10, 0, 8),
    (0x20, 10, 0, 9),
    (0x07, 11, 0, 10),
    (0x06, 11, 0, 11),
    (0x20, 11, 0, 12),
    (0x06, 3, 1, 1),
    (0x14, 6, 1, 2),
    (0x1e, 8, 1, 3),
    (0x0f, 10, 1, 4),
    (0x21, 11, 1, 5),
    (0x50, 12, 1, 6),
    (0x0e, 4, 2, 1),
    (0x1d, 8, 2, 2),
    (0x0e, 10, 2, 3),
    (0x51, 12, 2, 4),
    (0x0d, 5, 3, 1),
    (0x23, 9, 3, 2),
    (0x0d, 10, 3, 3),
    (0x0c, 5, 4, 1),
    (0x22, 9, 4, 2),
    (0x52, 12, 4, 3),
    (0x0b, 5, 5, 1),
    (0x0c, 10, 5, 2),
    (0x53, 12, 5, 3),
    (0x13, 6, 6, 1),
    (0x0b, 10, 6, 2),
    (0x54, 12, 6, 3),
    (0x12, 6, 7, 1),
    (0x0a, 10, 7, 2),
    (0x11, 6, 8, 1),
    (0x09, 10, 8, 2),
    (0x10, 6, 9, 1),
    (0x08, 10, 9, 2),
    (0x16, 7, 10, 1),
    (0x55, 12, 10, 2),
    (0x15, 7, 11, 1),
    (0x14, 7, 12, 1),
    (0x1c, 8, 13, 1),
    (0x1b, 8, 14, 1),
    (0x21, 9, 15, 1),
    (0x20, 9, 16, 1),
    (0x1f, 9, 17, 1),
    (0x1e, 9, 18, 1),
    (0x1d, 9, 19, 1),
    (0x1c, 9, 20, 1),
    (0x1b, 9, 21, 1),
    (0x1a, 9, 22, 1),
    (0x22, 11, 23, 1),
    (0x23, 11, 24, 1),
    (0x56, 12, 25, 1),
    (0x57, 12, 26, 1),
];

/// TCOEF (last = 1)
const TCOEF_LAST: [(u16, u8, u8, u8); 44] = [
    (0x07, 4, 0, 1),
    (0x19, 9, 0, 2),
    (0x05, 11, 0, 3),
    (0x0f, 6, 1, 1),
    (0x04, 11, 1, 2),
    (0x0e, 6, 2, 1),
    (0x0d, 6, 3, 1),
    (0x0c, 6, 4, 1),
    (0x13, 7, 5, 1),
    (0x12, 7, 6, 1),
    (0x11, 7, 7, 1),
    (0x10, 7, 8, 1),
    (0x1a, 8, 9, 1),
    (0x19, 8, 10, 1),
    (0x18, 8, 11, 1),
    (0x17, 8, 12, 1),
    (0x16, 8, 13, 1),
    (0x15, 8, 14, 1),
    (0x14, 8, 15, 1),
    (0x13, 8, 16, 1),
    (0x18, 9, 17, 1),
    (0x17, 9, 18, 1),
    (0x16, 9, 19, 1),
    (0x15, 9, 20, 1),
    (0x14, 9, 21, 1),
    (0x13, 9, 22, 1),
    (0x12, 9, 23, 1),
    (0x11, 9, 24, 1),
    (0x07, 10, 25, 1),
    (0x06, 10, 26, 1),
    (0x05, 10, 27, 1),
    (0x04, 10, 28, 1),
    (0x24, 11, 29, 1),
    (0x25, 11, 30, 1),
    (0x26, 11, 31, 1),
    (0x27, 11, 32, 1),
    (0x58, 12, 33, 1),
    (0x59, 12, 34, 1),
    (0x5a, 12, 35, 1),
    (0x5b, 12, 36, 1),
    (0x5c, 12, 37, 1),
    (0x5d, 12, 38, 1),
    (0x5e, 12, 39, 1),
    (0x5f, 12, 40, 1),
];

/// TCOEF 转义码 (0000011)
pub(super) const TCOEF_ESCAPE: (u16, u8) = (0x03, 7);

/// zigzag 扫描顺序 (扫描序号 -> 光栅位置)
pub(super) const ZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

// ============================================================================
// TCOEF 快速查找表
// ============================================================================

/// 快速查找表位宽 (12 位覆盖全部 TCOEF 码字)
const TCOEF_FAST_BITS: u32 = 12;
const TCOEF_FAST_SIZE: usize = 1 << TCOEF_FAST_BITS;

/// 快速查找表条目, len == 0 表示非法码字
#[derive(Debug, Clone, Copy, Default)]
struct TcoefFastEntry {
    len: u8,
    escape: bool,
    last: bool,
    run: u8,
    level: u8,
}

/// TCOEF 解码结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Tcoef {
    /// 普通系数 (level 已带符号)
    Coef { last: bool, run: usize, level: i32 },
    /// 转义码, 后续字段由调用方按方言读取
    Escape,
}

fn build_tcoef_fast() -> Vec<TcoefFastEntry> {
    let mut entries = vec![TcoefFastEntry::default(); TCOEF_FAST_SIZE];
    let mut fill = |code: u16, len: u8, entry: TcoefFastEntry| {
        let padding = TCOEF_FAST_BITS - u32::from(len);
        let base = usize::from(code) << padding;
        for extra in 0..(1usize << padding) {
            entries[base | extra] = entry;
        }
    };

    for (table, last) in [(&TCOEF_NOT_LAST[..], false), (&TCOEF_LAST[..], true)] {
        for &(code, len, run, level) in table {
            fill(
                code,
                len,
                TcoefFastEntry {
                    len,
                    escape: false,
                    last,
                    run,
                    level,
                },
            );
        }
    }
    fill(
        TCOEF_ESCAPE.0,
        TCOEF_ESCAPE.1,
        TcoefFastEntry {
            len: TCOEF_ESCAPE.1,
            escape: true,
            ..TcoefFastEntry::default()
        },
    );
    entries
}

static TCOEF_FAST: OnceLock<Vec<TcoefFastEntry>> = OnceLock::new();

fn tcoef_fast() -> &'static [TcoefFastEntry] {
    TCOEF_FAST.get_or_init(build_tcoef_fast)
}

// ============================================================================
// 解码函数
// ============================================================================

/// 线性匹配一个 (码字, 位数) 表, 返回下标
fn decode_code(reader: &mut BitReader<'_>, table: &[(u16, u8)]) -> Option<usize> {
    for (index, &(code, len)) in table.iter().enumerate() {
        if len == 0 || reader.bits_left() < len as isize {
            continue;
        }
        if reader.show_bits(u32::from(len)) == u32::from(code) {
            reader.skip_bits_unchecked(usize::from(len));
            return Some(index);
        }
    }
    None
}

/// 解码 I 帧 MCBPC, 返回表下标 (可能是填充码)
pub(super) fn decode_mcbpc_intra(reader: &mut BitReader<'_>) -> Option<usize> {
    decode_code(reader, &MCBPC_I)
}

/// 解码 P 帧 MCBPC, 返回表下标 (可能是填充码)
pub(super) fn decode_mcbpc_inter(reader: &mut BitReader<'_>) -> Option<usize> {
    decode_code(reader, &MCBPC_P)
}

/// 解码 CBPY (帧内取值)
pub(super) fn decode_cbpy(reader: &mut BitReader<'_>) -> Option<u8> {
    decode_code(reader, &CBPY).map(|index| index as u8)
}

/// 解码一个带符号的 MVD 分量 (半像素单位)
pub(super) fn decode_mvd(reader: &mut BitReader<'_>) -> Option<i32> {
    let value = decode_code(reader, &MVD)? as i32;
    if value == 0 {
        return Some(0);
    }
    let negative = reader.read_flag().ok()?;
    Some(if negative { -value } else { value })
}

/// 解码一个 TCOEF 事件
pub(super) fn decode_tcoef(reader: &mut BitReader<'_>) -> Option<Tcoef> {
    let entry = tcoef_fast()[reader.show_bits(TCOEF_FAST_BITS) as usize];
    if entry.len == 0 || reader.bits_left() < entry.len as isize {
        return None;
    }
    reader.skip_bits_unchecked(usize::from(entry.len));
    if entry.escape {
        return Some(Tcoef::Escape);
    }
    let negative = reader.read_flag().ok()?;
    let level = i32::from(entry.level);
    Some(Tcoef::Coef {
        last: entry.last,
        run: usize::from(entry.run),
        level: if negative { -level } else { level },
    })
}
