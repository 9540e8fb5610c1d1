//! 解码会话配置.
//!
//! 所有开关都挂在单个会话上, 多个解码会话互不影响.

use bitflags::bitflags;

bitflags! {
    /// 错误识别严格度
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ErrRecognition: u32 {
        /// 谨慎模式, 对可疑码流多做检查
        const CAREFUL = 1 << 0;
        /// 严格检查缓冲区边界 (限制尾部容差)
        const BUFFER = 1 << 2;
        /// 片段错误上报为帧错误
        const EXPLODE = 1 << 3;
        /// 宏块错误后若仍有剩余位则继续解码
        const IGNORE_ERR = 1 << 15;
        /// 把不合规视为错误
        const AGGRESSIVE = 1 << 18;
    }
}

bitflags! {
    /// 编码器缺陷兼容开关
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WorkaroundBugs: u32 {
        /// 根据码流证据自动检测缺陷
        const AUTODETECT = 1 << 0;
        /// 编码器不写结尾填充 (由启发式自动设置或手动指定)
        const NO_PADDING = 1 << 4;
    }
}

impl Default for ErrRecognition {
    fn default() -> Self {
        Self::CAREFUL
    }
}

impl Default for WorkaroundBugs {
    fn default() -> Self {
        Self::AUTODETECT
    }
}

/// 帧丢弃级别 (skip_frame), 按严格程度递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Discard {
    /// 不丢弃任何帧
    None,
    /// 仅丢弃空帧
    #[default]
    Default,
    /// 丢弃非参考帧
    NonRef,
    /// 丢弃 B 帧
    Bidir,
    /// 丢弃非帧内帧
    NonIntra,
    /// 丢弃非关键帧
    NonKey,
    /// 丢弃全部
    All,
}

/// 解码会话配置
#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    /// 错误识别严格度
    pub err_recognition: ErrRecognition,
    /// 缺陷兼容开关 (会话初始值, 运行中可能被启发式修改)
    pub workaround_bugs: WorkaroundBugs,
    /// 帧丢弃级别
    pub skip_frame: Discard,
    /// 强制指定低延迟模式 (None 表示使用方言默认值)
    pub low_delay: Option<bool>,
    /// 仅解码亮度
    pub gray: bool,
    /// 导出每宏块量化参数表
    pub export_qp_table: bool,
    /// 固定片高方言的片高 (宏块行数)
    pub slice_height: Option<usize>,
}

impl DecoderOptions {
    /// 设置错误识别严格度
    pub fn with_err_recognition(mut self, flags: ErrRecognition) -> Self {
        self.err_recognition = flags;
        self
    }

    /// 设置缺陷兼容开关
    pub fn with_workaround_bugs(mut self, flags: WorkaroundBugs) -> Self {
        self.workaround_bugs = flags;
        self
    }

    /// 设置帧丢弃级别
    pub fn with_skip_frame(mut self, discard: Discard) -> Self {
        self.skip_frame = discard;
        self
    }

    /// 设置低延迟模式
    pub fn with_low_delay(mut self, low_delay: bool) -> Self {
        self.low_delay = Some(low_delay);
        self
    }

    /// 设置灰度解码
    pub fn with_gray(mut self, gray: bool) -> Self {
        self.gray = gray;
        self
    }

    /// 设置是否导出 QP 表
    pub fn with_qp_table_export(mut self, export: bool) -> Self {
        self.export_qp_table = export;
        self
    }

    /// 设置固定片高
    pub fn with_slice_height(mut self, rows: usize) -> Self {
        self.slice_height = Some(rows);
        self
    }

    /// 是否请求严格的缓冲区边界检查
    pub fn strict_buffer(&self) -> bool {
        self.err_recognition
            .intersects(ErrRecognition::BUFFER | ErrRecognition::AGGRESSIVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = DecoderOptions::default();
        assert!(opts.workaround_bugs.contains(WorkaroundBugs::AUTODETECT));
        assert!(!opts.err_recognition.contains(ErrRecognition::EXPLODE));
        assert_eq!(opts.skip_frame, Discard::Default);
        assert!(!opts.strict_buffer());
    }

    #[test]
    fn test_discard_ordering() {
        assert!(Discard::All > Discard::NonKey);
        assert!(Discard::NonRef > Discard::Default);
        let opts = DecoderOptions::default().with_err_recognition(ErrRecognition::AGGRESSIVE);
        assert!(opts.strict_buffer());
    }
}
