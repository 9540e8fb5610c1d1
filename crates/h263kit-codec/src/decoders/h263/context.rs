//! 解码器持久状态.
//!
//! 一个解码会话对应一个 `DecoderState`, 由帧调度器独占持有,
//! 头解析器和片循环在其上读写.

use crate::frame::PictureType;

use super::options::WorkaroundBugs;
use super::variant::{Variant, VariantProfile};

/// 运动向量 (半像素单位)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionVector {
    pub x: i32,
    pub y: i32,
}

impl MotionVector {
    pub const ZERO: Self = Self { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 解码器状态
pub struct DecoderState {
    /// 方言
    pub variant: Variant,
    /// 方言配置行
    pub profile: &'static VariantProfile,

    // ========================
    // 尺寸与宏块网格
    // ========================
    /// 当前图像头给出的宽度
    pub width: u32,
    /// 当前图像头给出的高度
    pub height: u32,
    /// 宏块列数
    pub mb_width: usize,
    /// 宏块行数
    pub mb_height: usize,
    /// 宏块表行跨度 (mb_width + 1, 右侧留一列哨兵)
    pub mb_stride: usize,
    /// 宏块总数
    pub mb_num: usize,

    // ========================
    // 游标与片几何
    // ========================
    /// 当前宏块列
    pub mb_x: usize,
    /// 当前宏块行 (== mb_height 表示整帧结束)
    pub mb_y: usize,
    /// 当前片起点列
    pub resync_mb_x: usize,
    /// 当前片起点行
    pub resync_mb_y: usize,
    /// 当前片起点在码流中的位位置
    pub last_resync_bit: usize,
    /// 当前宏块位于片的第一行
    pub first_slice_line: bool,
    /// 固定片高 (宏块行数, 0 表示未配置)
    pub slice_height: usize,

    // ========================
    // 图像类型与编码模式
    // ========================
    /// 当前图像类型
    pub pict_type: PictureType,
    /// 当前帧不作为参考 (FLV disposable inter)
    pub droppable: bool,
    /// 图像序号 (TR)
    pub picture_number: u32,
    /// 亮度量化参数
    pub qscale: u8,
    /// 色度量化参数
    pub chroma_qscale: u8,
    /// 三个分量的 DC 预测值
    pub last_dc: [i32; 3],
    /// 帧内 AC/DC 预测
    pub h263_pred: bool,
    /// 高级帧内编码
    pub h263_aic: bool,
    /// 是否为 H.263+ 图像头
    pub h263_plus: bool,
    /// 长运动向量模式 (Annex D)
    pub long_vectors: bool,
    /// FLV 转义格式 (0 = 非 FLV, 1 = H.263 转义, 2 = 11 位转义)
    pub flv_version: u8,
    /// 帧内去块滤波
    pub loop_filter: bool,
    /// 半像素插值不加舍入
    pub no_rounding: bool,
    /// 数据分区 (VOL 级)
    pub data_partitioning: bool,
    /// 当前帧按分区解码
    pub partitioned_frame: bool,
    /// 无 B 帧重排
    pub low_delay: bool,
    /// 原始位深 (0 表示 8 位)
    pub bits_per_raw_sample: u32,
    /// 采样宽高比
    pub sample_aspect_ratio: (u32, u32),

    // ========================
    // 会话级粘滞状态
    // ========================
    /// 缺陷兼容开关 (NO_PADDING 会被启发式翻转)
    pub workaround_bugs: WorkaroundBugs,
    /// 结尾填充缺陷置信分
    pub padding_bug_score: i32,
    /// 上一个数据包被判定为未编码帧
    pub skipped_last_frame: bool,
    /// 已完成首次上下文初始化
    pub context_initialized: bool,
    /// 头解析器要求下一帧重新初始化上下文
    pub context_reinit: bool,
    /// DivX packed 码流 (推迟 setup 发布)
    pub divx_packed: bool,

    // ========================
    // 每宏块辅助表
    // ========================
    /// 每宏块运动向量 (mb_stride 跨度)
    pub motion_val: Vec<MotionVector>,
    /// 每宏块是否帧内编码 (供 AC/DC 预测判断邻居)
    pub mbintra_table: Vec<bool>,
    /// 每宏块量化参数
    pub qscale_table: Vec<u8>,
}

impl DecoderState {
    /// 创建初始状态
    pub fn new(profile: &'static VariantProfile, workaround_bugs: WorkaroundBugs) -> Self {
        Self {
            variant: profile.variant,
            profile,
            width: 0,
            height: 0,
            mb_width: 0,
            mb_height: 0,
            mb_stride: 0,
            mb_num: 0,
            mb_x: 0,
            mb_y: 0,
            resync_mb_x: 0,
            resync_mb_y: 0,
            last_resync_bit: 0,
            first_slice_line: true,
            slice_height: 0,
            pict_type: PictureType::None,
            droppable: false,
            picture_number: 0,
            qscale: 1,
            chroma_qscale: 1,
            last_dc: [128; 3],
            h263_pred: profile.intra_pred,
            h263_aic: false,
            h263_plus: false,
            long_vectors: false,
            flv_version: 0,
            loop_filter: false,
            no_rounding: false,
            data_partitioning: false,
            partitioned_frame: false,
            low_delay: profile.low_delay,
            bits_per_raw_sample: 0,
            sample_aspect_ratio: (12, 11),
            workaround_bugs,
            padding_bug_score: 0,
            skipped_last_frame: false,
            context_initialized: false,
            context_reinit: false,
            divx_packed: false,
            motion_val: Vec::new(),
            mbintra_table: Vec::new(),
            qscale_table: Vec::new(),
        }
    }

    /// 按当前宽高重建宏块网格与辅助表
    pub fn resize_grid(&mut self) {
        self.mb_width = (self.width as usize).div_ceil(16);
        self.mb_height = (self.height as usize).div_ceil(16);
        self.mb_stride = self.mb_width + 1;
        self.mb_num = self.mb_width * self.mb_height;
        let table_len = self.mb_stride * (self.mb_height + 1);
        self.motion_val = vec![MotionVector::ZERO; table_len];
        self.mbintra_table = vec![false; table_len];
        self.qscale_table = vec![0; table_len];
    }

    /// 设置量化参数 (裁剪到 1..=31), 色度跟随亮度
    pub fn set_qscale(&mut self, qscale: i32) {
        let q = qscale.clamp(1, 31) as u8;
        self.qscale = q;
        self.chroma_qscale = q;
    }

    /// 宏块在辅助表中的索引
    pub fn mb_index(&self, x: usize, y: usize) -> usize {
        y * self.mb_stride + x
    }

    /// 当前游标的线性位置 (y * mb_width + x)
    pub fn linear_position(&self) -> usize {
        self.mb_y * self.mb_width + self.mb_x
    }

    /// 游标前进一个宏块, 到行尾时换行
    pub fn advance_cell(&mut self) -> bool {
        self.mb_x += 1;
        if self.mb_x >= self.mb_width {
            self.mb_x = 0;
            self.mb_y += 1;
            return true;
        }
        false
    }

    /// 重置 DC 预测值
    pub fn reset_dc_predictors(&mut self, value: i32) {
        self.last_dc = [value; 3];
    }

    /// 非帧内宏块清除帧内预测标记
    pub fn clean_intra_table_entries(&mut self, xy: usize) {
        if let Some(flag) = self.mbintra_table.get_mut(xy) {
            *flag = false;
        }
    }

    /// 记录宏块运动向量 (帧内宏块写零)
    pub fn update_motion_val(&mut self, xy: usize, mv: MotionVector) {
        if let Some(slot) = self.motion_val.get_mut(xy) {
            *slot = mv;
        }
    }

    /// 片起点重置预测缓存
    pub fn clean_buffers(&mut self) {
        self.reset_dc_predictors(128);
        let start = self.mb_index(self.mb_x, self.mb_y);
        for flag in self.mbintra_table.iter_mut().skip(start) {
            *flag = false;
        }
    }

    /// 每个 GOB 的宏块行数
    pub fn gob_height(&self) -> usize {
        match self.height {
            0..=400 => 1,
            401..=800 => 2,
            _ => 4,
        }
    }

    /// 当前图像是否为 B 帧
    pub fn is_b_frame(&self) -> bool {
        self.pict_type == PictureType::B
    }
}
