//! 方言分派表.
//!
//! H.263 系列各方言共享宏块/片结构, 区别在头语法、预测模式与量化表.
//! 每种方言对应 `VARIANT_TABLE` 中的一行, 会话打开时解析一次, 之后片循环和
//! 帧调度只查询这一行以及头解析器设置的模式标志.

use crate::codec_id::CodecId;

use super::flv::FlvHeaderParser;
use super::header::{H263HeaderParser, HeaderParser};
use super::macroblock::{H263MacroblockDecoder, MacroblockDecoder};

/// 方言标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// H.263 基线
    H263,
    /// H.263+ (PLUSPTYPE)
    H263Plus,
    /// Intel H.263
    IntelH263,
    /// Sorenson Spark
    Flv,
    /// MPEG-4 Part 2
    Mpeg4,
    /// MS-MPEG4 v1
    MsMpeg4V1,
    /// MS-MPEG4 v2
    MsMpeg4V2,
    /// MS-MPEG4 v3
    MsMpeg4V3,
    /// WMV7
    Wmv1,
    /// WMV8
    Wmv2,
}

impl Variant {
    /// 由编解码器标识映射方言
    pub fn from_codec_id(codec_id: CodecId) -> Option<Self> {
        let variant = match codec_id {
            CodecId::H263 => Self::H263,
            CodecId::H263P => Self::H263Plus,
            CodecId::H263I => Self::IntelH263,
            CodecId::Flv1 => Self::Flv,
            CodecId::Mpeg4 => Self::Mpeg4,
            CodecId::MsMpeg4V1 => Self::MsMpeg4V1,
            CodecId::MsMpeg4V2 => Self::MsMpeg4V2,
            CodecId::MsMpeg4V3 => Self::MsMpeg4V3,
            CodecId::Wmv1 => Self::Wmv1,
            CodecId::Wmv2 => Self::Wmv2,
            CodecId::None => return None,
        };
        Some(variant)
    }
}

/// MS-MPEG4 系列版本号, 非 MS 方言为 `Unused`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MsMpeg4Version {
    Unused,
    V1,
    V2,
    V3,
    Wmv1,
    Wmv2,
}

impl MsMpeg4Version {
    /// 是否为 MS-MPEG4 系列
    pub fn is_msmpeg4(self) -> bool {
        self != Self::Unused
    }

    /// 是否带有 I 帧尾部扩展头 (v1..v3)
    pub fn has_ext_header(self) -> bool {
        self.is_msmpeg4() && self < Self::Wmv1
    }
}

/// 片寻址方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceAddressing {
    /// 通过同步码搜索定位下一片 (GOB / video packet)
    Resync,
    /// 固定片高, 每 slice_height 行开始新片
    FixedHeight,
}

/// 帧内 DC 缩放表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcScaleTable {
    /// 常数 8
    H263,
    /// MPEG-4 非线性表
    Mpeg4,
}

impl DcScaleTable {
    /// 按量化参数返回 DC 缩放因子
    pub fn scale(self, qscale: u8, luma: bool) -> i32 {
        let q = i32::from(qscale.clamp(1, 31));
        match self {
            Self::H263 => 8,
            Self::Mpeg4 if luma => match q {
                1..=4 => 8,
                5..=8 => 2 * q,
                9..=24 => q + 8,
                _ => 2 * q - 16,
            },
            Self::Mpeg4 => match q {
                1..=4 => 8,
                5..=24 => (q + 13) / 2,
                _ => q - 6,
            },
        }
    }
}

/// 结尾位形状启发式的适用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingHeuristics {
    /// 不评分
    None,
    /// MPEG-4: 填充码哨兵与结尾位形状
    Mpeg4,
    /// H.263: 零字节与结尾魔数
    H263,
}

/// 头解析器构造函数
pub type HeaderParserFactory = fn() -> Box<dyn HeaderParser>;

/// 宏块解码器构造函数
pub type MacroblockDecoderFactory = fn() -> Box<dyn MacroblockDecoder>;

/// 方言配置行
pub struct VariantProfile {
    /// 方言
    pub variant: Variant,
    /// 对应的编解码器标识
    pub codec_id: CodecId,
    /// 内置头解析器, 没有时必须由调用方注入
    pub header_parser: Option<HeaderParserFactory>,
    /// 内置宏块解码器, 没有时必须由调用方注入
    pub macroblock_decoder: Option<MacroblockDecoderFactory>,
    /// 是否可能使用数据分区帧
    pub partitioned: bool,
    /// 片寻址方式
    pub addressing: SliceAddressing,
    /// 默认 DC 缩放表
    pub dc_scale: DcScaleTable,
    /// 帧内 AC/DC 预测 (h263_pred)
    pub intra_pred: bool,
    /// MS-MPEG4 版本
    pub msmpeg4: MsMpeg4Version,
    /// 结尾启发式
    pub trailing: TrailingHeuristics,
    /// 等到第一个图像头才分配上下文
    pub allocate_after_header: bool,
    /// 可协商硬件表面格式
    pub hw_capable: bool,
    /// 默认低延迟 (无 B 帧重排)
    pub low_delay: bool,
    /// 非 B 帧要求剩余位数不少于宏块数的一半
    pub bit_budget_check: bool,
}

impl VariantProfile {
    /// 码流中是否存在唯一的结束标记 (MS 方言没有)
    pub fn has_unique_end_marker(&self) -> bool {
        !self.msmpeg4.is_msmpeg4()
    }
}

fn h263_header() -> Box<dyn HeaderParser> {
    Box::new(H263HeaderParser::new())
}

fn flv_header() -> Box<dyn HeaderParser> {
    Box::new(FlvHeaderParser::new())
}

fn h263_macroblock() -> Box<dyn MacroblockDecoder> {
    Box::new(H263MacroblockDecoder::new())
}

const fn ms_row(variant: Variant, codec_id: CodecId, msmpeg4: MsMpeg4Version) -> VariantProfile {
    VariantProfile {
        variant,
        codec_id,
        header_parser: None,
        macroblock_decoder: None,
        partitioned: false,
        addressing: SliceAddressing::FixedHeight,
        dc_scale: DcScaleTable::Mpeg4,
        intra_pred: true,
        msmpeg4,
        trailing: TrailingHeuristics::None,
        allocate_after_header: false,
        hw_capable: false,
        low_delay: true,
        bit_budget_check: false,
    }
}

/// 方言分派表
pub static VARIANT_TABLE: [VariantProfile; 10] = [
    VariantProfile {
        variant: Variant::H263,
        codec_id: CodecId::H263,
        header_parser: Some(h263_header),
        macroblock_decoder: Some(h263_macroblock),
        partitioned: false,
        addressing: SliceAddressing::Resync,
        dc_scale: DcScaleTable::H263,
        intra_pred: false,
        msmpeg4: MsMpeg4Version::Unused,
        trailing: TrailingHeuristics::H263,
        allocate_after_header: true,
        hw_capable: true,
        low_delay: true,
        bit_budget_check: false,
    },
    VariantProfile {
        variant: Variant::H263Plus,
        codec_id: CodecId::H263P,
        header_parser: Some(h263_header),
        macroblock_decoder: Some(h263_macroblock),
        partitioned: false,
        addressing: SliceAddressing::Resync,
        dc_scale: DcScaleTable::H263,
        intra_pred: false,
        msmpeg4: MsMpeg4Version::Unused,
        trailing: TrailingHeuristics::None,
        allocate_after_header: true,
        hw_capable: true,
        low_delay: true,
        bit_budget_check: false,
    },
    VariantProfile {
        variant: Variant::IntelH263,
        codec_id: CodecId::H263I,
        header_parser: None,
        macroblock_decoder: Some(h263_macroblock),
        partitioned: false,
        addressing: SliceAddressing::Resync,
        dc_scale: DcScaleTable::H263,
        intra_pred: false,
        msmpeg4: MsMpeg4Version::Unused,
        trailing: TrailingHeuristics::None,
        allocate_after_header: false,
        hw_capable: false,
        low_delay: true,
        bit_budget_check: false,
    },
    VariantProfile {
        variant: Variant::Flv,
        codec_id: CodecId::Flv1,
        header_parser: Some(flv_header),
        macroblock_decoder: Some(h263_macroblock),
        partitioned: false,
        addressing: SliceAddressing::Resync,
        dc_scale: DcScaleTable::H263,
        intra_pred: false,
        msmpeg4: MsMpeg4Version::Unused,
        trailing: TrailingHeuristics::None,
        allocate_after_header: false,
        hw_capable: false,
        low_delay: true,
        bit_budget_check: false,
    },
    VariantProfile {
        variant: Variant::Mpeg4,
        codec_id: CodecId::Mpeg4,
        header_parser: None,
        macroblock_decoder: None,
        partitioned: true,
        addressing: SliceAddressing::Resync,
        dc_scale: DcScaleTable::Mpeg4,
        intra_pred: true,
        msmpeg4: MsMpeg4Version::Unused,
        trailing: TrailingHeuristics::Mpeg4,
        allocate_after_header: true,
        hw_capable: true,
        low_delay: false,
        bit_budget_check: true,
    },
    ms_row(Variant::MsMpeg4V1, CodecId::MsMpeg4V1, MsMpeg4Version::V1),
    ms_row(Variant::MsMpeg4V2, CodecId::MsMpeg4V2, MsMpeg4Version::V2),
    ms_row(Variant::MsMpeg4V3, CodecId::MsMpeg4V3, MsMpeg4Version::V3),
    ms_row(Variant::Wmv1, CodecId::Wmv1, MsMpeg4Version::Wmv1),
    ms_row(Variant::Wmv2, CodecId::Wmv2, MsMpeg4Version::Wmv2),
];

/// 查找方言配置行
pub fn profile(variant: Variant) -> &'static VariantProfile {
    VARIANT_TABLE
        .iter()
        .find(|row| row.variant == variant)
        .unwrap_or(&VARIANT_TABLE[0])
}
