//! 结尾填充缺陷检测.
//!
//! 许多历史编码器在帧尾不写或写错填充位. 片循环走完全部宏块行之后,
//! 根据剩余位的形状给会话的 `padding_bug_score` 打分, 分数越过阈值时
//! 打开 (或关闭) `NO_PADDING` 兼容开关, 进而放宽帧尾的剩余位容差.
//!
//! 每条启发式规则都是 `&TrailingBits -> i32` 的纯函数, 常数取自历史码流,
//! 必须保持原值.

use h263kit_core::BitReader;

use super::options::{ErrRecognition, WorkaroundBugs};

/// NEC 编码器错误填充码的 24 位前缀
const STUFFING_SENTINEL: u32 = 0x4010;

/// 结尾位形状检测窗口 (不含)
const SHAPE_WINDOW_BITS: isize = 137;

/// 零字节检测窗口 (含下限, 不含上限)
const ZERO_BYTE_WINDOW: (isize, isize) = (8, 300);

/// 某编码器在缓冲区末尾留下的 8 字节魔数
const TRAILING_MAGIC: u64 = 0xCDCD_CDCD_FC7F_0000;

/// 开启 NO_PADDING 的分数阈值 (严格大于)
const NO_PADDING_THRESHOLD: i32 = -2;

/// 基础容差位数
const BASE_SLACK_BITS: isize = 7;

/// MS-MPEG4 I 帧额外容差
const MSMPEG4_INTRA_SLACK_BITS: isize = 17;

/// NO_PADDING 且严格检查缓冲区时的额外容差
const STRICT_NO_PADDING_SLACK_BITS: isize = 48;

/// NO_PADDING 时的额外容差 (实际不设上限)
const LOOSE_NO_PADDING_SLACK_BITS: isize = 256 * 256 * 256 * 64;

/// 帧尾剩余位证据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingBits {
    /// 剩余位数 (可能为负, 表示越界读取)
    pub bits_left: isize,
    /// 已读位数
    pub bits_read: usize,
    /// 游标处的 24 位
    pub next24: u32,
    /// 游标处的 8 位
    pub next8: u32,
    /// 缓冲区最后 8 字节 (大端), 不足 8 字节时为 None
    pub tail: Option<u64>,
}

impl TrailingBits {
    /// 从游标采集证据
    pub fn capture(reader: &BitReader<'_>) -> Self {
        Self {
            bits_left: reader.bits_left(),
            bits_read: reader.bits_read(),
            next24: reader.show_bits(24),
            next8: reader.show_bits(8),
            tail: reader.tail_u64(),
        }
    }
}

/// NEC 填充码哨兵: 剩余至少 48 位且紧跟 0x004010 时 +32
pub fn stuffing_sentinel_score(ev: &TrailingBits, partitioned: bool) -> i32 {
    if ev.bits_left >= 48 && ev.next24 == STUFFING_SENTINEL && !partitioned {
        32
    } else {
        0
    }
}

/// 结尾位形状
///
/// 合规的填充为一个 0 后跟若干 1 直到字节边界. 正好停在缓冲区末尾 +16,
/// 合规填充 -1, 跨字节的全 1 (某些编码器特有) +4, 其它形状 +1,
/// 剩 1 位时不计分.
pub fn trailing_shape_score(ev: &TrailingBits, partitioned: bool) -> i32 {
    if partitioned || ev.bits_left < 0 || ev.bits_left >= SHAPE_WINDOW_BITS {
        return 0;
    }
    match ev.bits_left {
        0 => 16,
        1 => 0,
        left => {
            let v = ev.next8 | (0x7F >> (7 - (ev.bits_read & 7)));
            if v == 0x7F && left <= 8 {
                -1
            } else if v == 0x7F && ((ev.bits_read + 8) & 8) != 0 && left <= 16 {
                4
            } else {
                1
            }
        }
    }
}

/// H.263 I 帧尾部的零字节: +32
pub fn zero_byte_score(ev: &TrailingBits, intra: bool, partitioned: bool) -> i32 {
    let (lo, hi) = ZERO_BYTE_WINDOW;
    if ev.bits_left >= lo && ev.bits_left < hi && intra && ev.next8 == 0 && !partitioned {
        32
    } else {
        0
    }
}

/// 缓冲区以魔数结尾: +32
pub fn trailing_magic_score(ev: &TrailingBits) -> i32 {
    if ev.bits_left >= 64 && ev.tail == Some(TRAILING_MAGIC) {
        32
    } else {
        0
    }
}

/// 根据累计分数决定 NO_PADDING 开关
pub fn no_padding_decision(score: i32, partitioned: bool) -> bool {
    score > NO_PADDING_THRESHOLD && !partitioned
}

/// 在自动检测开启时按分数翻转 NO_PADDING, 返回更新后的开关集合
pub fn apply_no_padding_decision(
    flags: WorkaroundBugs,
    score: i32,
    partitioned: bool,
) -> WorkaroundBugs {
    if !flags.contains(WorkaroundBugs::AUTODETECT) {
        return flags;
    }
    let mut flags = flags;
    flags.set(
        WorkaroundBugs::NO_PADDING,
        no_padding_decision(score, partitioned),
    );
    flags
}

/// 帧尾允许的剩余位数
pub fn tail_slack(
    msmpeg4_intra: bool,
    workaround_bugs: WorkaroundBugs,
    err_recognition: ErrRecognition,
) -> isize {
    let mut slack = BASE_SLACK_BITS;
    if msmpeg4_intra {
        slack += MSMPEG4_INTRA_SLACK_BITS;
    }
    if workaround_bugs.contains(WorkaroundBugs::NO_PADDING) {
        if err_recognition.intersects(ErrRecognition::BUFFER | ErrRecognition::AGGRESSIVE) {
            slack += STRICT_NO_PADDING_SLACK_BITS;
        } else {
            slack += LOOSE_NO_PADDING_SLACK_BITS;
        }
    }
    slack
}
