//! H.263 系列视频解码器
//!
//! 一个帧调度器驱动整个方言家族: H.263 基线、H.263+、Sorenson Spark (FLV1),
//! 以及需要注入头解析器的 MPEG-4 Part 2、MS-MPEG4 v1/v2/v3、WMV1/WMV2、Intel H.263.
//!
//! 每个数据包的处理顺序:
//! 1. 按方言分派表选定的头解析器解析图像头 (失败时回滚尺寸)
//! 2. 首帧或尺寸变化时协商像素格式并重建缓冲池
//! 3. B 帧/可丢弃帧与 skip_frame 门控
//! 4. 片循环逐宏块解码, 或整体交给硬件后端
//! 5. 错误隐藏, 按低延迟策略选择输出帧, 轮转参考环
//!
//! ## 模块结构
//!
//! - `variant`: 方言分派表
//! - `context`: 解码器持久状态
//! - `header` / `flv`: 图像头与片头解析
//! - `macroblock` / `vlc`: 宏块语法解码
//! - `recon` / `idct`: 反量化、IDCT、运动补偿与环路滤波
//! - `slice`: 片循环与帧级片驱动
//! - `padding`: 结尾填充缺陷启发式
//! - `er`: 错误区域记录与隐藏
//! - `picture`: 图像缓冲与参考环
//! - `hwaccel`: 硬件后端接口

pub mod context;
pub mod er;
pub mod flv;
pub mod header;
pub mod hwaccel;
mod idct;
pub mod macroblock;
pub mod options;
pub mod padding;
pub mod picture;
pub mod recon;
pub mod slice;
pub mod variant;
mod vlc;

use std::collections::VecDeque;

use h263kit_core::{BitReader, KitError, KitResult, PixelFormat};
use log::{debug, error, trace, warn};

use crate::codec_id::{CodecId, fourcc};
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{PictureType, VideoFrame};
use crate::packet::Packet;

pub use context::{DecoderState, MotionVector};
pub use er::{ErStatus, ErrorResilience, ErrorStatusMap, SliceRegion};
pub use header::{HeaderParser, HeaderStatus, SecondaryHeader};
pub use hwaccel::{HardwareBackend, HwFrameConfig};
pub use macroblock::{MacroblockData, MacroblockDecoder, MbStatus};
pub use options::{DecoderOptions, Discard, ErrRecognition, WorkaroundBugs};
pub use picture::{FrameProgress, FramePool, Picture, PictureManager, PictureRing};
pub use recon::{Reconstructor, SoftwareReconstructor};
pub use slice::{SliceError, SliceStatus};
pub use variant::{Variant, VariantProfile};

use slice::SliceContext;

/// 需要做垂直翻转的旧编码器四字符码
const FLIPPED_TAGS: [u32; 2] = [fourcc(b"GEOV"), fourcc(b"GEOX")];

/// 单个数据包的解码结果
#[derive(Debug)]
pub struct DecodeOutcome {
    /// 本次输出的帧 (可能是延迟一帧的参考帧)
    pub frame: Option<VideoFrame>,
    /// 消费的字节数
    pub consumed: usize,
}

impl DecodeOutcome {
    fn empty(consumed: usize) -> Self {
        Self {
            frame: None,
            consumed,
        }
    }
}

// ============================================================================
// 构建器
// ============================================================================

/// 解码器构建器, 用于注入协作者
pub struct H263DecoderBuilder {
    variant: Variant,
    options: DecoderOptions,
    header: Option<Box<dyn HeaderParser>>,
    mb_decoder: Option<Box<dyn MacroblockDecoder>>,
    recon: Option<Box<dyn Reconstructor>>,
    er: Option<Box<dyn ErrorResilience>>,
    pictures: Option<Box<dyn PictureManager>>,
    hw: Option<Box<dyn HardwareBackend>>,
}

impl H263DecoderBuilder {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            options: DecoderOptions::default(),
            header: None,
            mb_decoder: None,
            recon: None,
            er: None,
            pictures: None,
            hw: None,
        }
    }

    pub fn with_options(mut self, options: DecoderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_header_parser(mut self, header: Box<dyn HeaderParser>) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_macroblock_decoder(mut self, mb_decoder: Box<dyn MacroblockDecoder>) -> Self {
        self.mb_decoder = Some(mb_decoder);
        self
    }

    pub fn with_reconstructor(mut self, recon: Box<dyn Reconstructor>) -> Self {
        self.recon = Some(recon);
        self
    }

    pub fn with_error_resilience(mut self, er: Box<dyn ErrorResilience>) -> Self {
        self.er = Some(er);
        self
    }

    pub fn with_picture_manager(mut self, pictures: Box<dyn PictureManager>) -> Self {
        self.pictures = Some(pictures);
        self
    }

    pub fn with_hardware_backend(mut self, hw: Box<dyn HardwareBackend>) -> Self {
        self.hw = Some(hw);
        self
    }

    /// 构建解码器, 方言没有内置头解析器或宏块解码器且未注入时失败
    pub fn build(self) -> KitResult<H263Decoder> {
        let profile = variant::profile(self.variant);
        let header = self
            .header
            .or_else(|| profile.header_parser.map(|factory| factory()))
            .ok_or_else(|| {
                KitError::Unsupported(format!("{} 没有内置图像头解析器, 需要注入", profile.codec_id))
            })?;
        let mb_decoder = self
            .mb_decoder
            .or_else(|| profile.macroblock_decoder.map(|factory| factory()))
            .ok_or_else(|| {
                KitError::Unsupported(format!("{} 没有内置宏块解码器, 需要注入", profile.codec_id))
            })?;

        let hw = match self.hw {
            Some(hw) if !profile.hw_capable => {
                warn!("{} 不支持硬件后端, 忽略 {}", profile.codec_id, hw.name());
                None
            }
            hw => hw,
        };

        let options = self.options;
        let mut state = DecoderState::new(profile, options.workaround_bugs);
        state.low_delay = options.low_delay.unwrap_or(profile.low_delay);
        if let Some(rows) = options.slice_height {
            state.slice_height = rows;
        }

        Ok(H263Decoder {
            profile,
            header,
            mb_decoder,
            recon: self
                .recon
                .unwrap_or_else(|| Box::new(SoftwareReconstructor::new(options.gray))),
            er: self.er.unwrap_or_else(|| Box::new(ErrorStatusMap::new())),
            pictures: self.pictures.unwrap_or_else(|| Box::new(FramePool::new())),
            hw,
            state,
            options,
            ring: PictureRing::new(),
            mb: MacroblockData::new(),
            pixel_format: PixelFormat::None,
            coded_size: (0, 0),
            codec_tag: 0,
            pending: VecDeque::new(),
            draining: false,
            frame_count: 0,
        })
    }
}

// ============================================================================
// 解码器
// ============================================================================

/// H.263 系列解码器
pub struct H263Decoder {
    profile: &'static VariantProfile,
    header: Box<dyn HeaderParser>,
    mb_decoder: Box<dyn MacroblockDecoder>,
    recon: Box<dyn Reconstructor>,
    er: Box<dyn ErrorResilience>,
    pictures: Box<dyn PictureManager>,
    hw: Option<Box<dyn HardwareBackend>>,
    state: DecoderState,
    options: DecoderOptions,
    /// current / last / next 参考环
    ring: PictureRing,
    /// 宏块系数缓冲
    mb: MacroblockData,
    /// 已导出的像素格式
    pixel_format: PixelFormat,
    /// 缓冲池当前对应的尺寸
    coded_size: (u32, u32),
    codec_tag: u32,
    /// 待取出的帧
    pending: VecDeque<VideoFrame>,
    draining: bool,
    frame_count: u64,
}

impl H263Decoder {
    /// 以默认协作者创建 H.263 解码器
    pub fn create_h263() -> KitResult<Box<dyn Decoder>> {
        Ok(Box::new(H263DecoderBuilder::new(Variant::H263).build()?))
    }

    /// 以默认协作者创建 H.263+ 解码器
    pub fn create_h263p() -> KitResult<Box<dyn Decoder>> {
        Ok(Box::new(H263DecoderBuilder::new(Variant::H263Plus).build()?))
    }

    /// 以默认协作者创建 Sorenson Spark 解码器
    pub fn create_flv() -> KitResult<Box<dyn Decoder>> {
        Ok(Box::new(H263DecoderBuilder::new(Variant::Flv).build()?))
    }

    pub fn builder(variant: Variant) -> H263DecoderBuilder {
        H263DecoderBuilder::new(variant)
    }

    /// 解码器状态 (只读)
    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// 方言配置行
    pub fn profile(&self) -> &'static VariantProfile {
        self.profile
    }

    /// 已导出的像素格式
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// 当前 next 参考图像
    pub fn next_reference(&self) -> Option<&Picture> {
        self.ring.next().map(|p| p.as_ref())
    }

    /// 解码一个数据包
    ///
    /// 空包为排空标记: 输出持有的 next 参考 (若有), 不做任何解码.
    /// 其余情况总是报告整个数据包已消费.
    pub fn decode_packet(&mut self, packet: &Packet) -> KitResult<DecodeOutcome> {
        if packet.is_empty() {
            return Ok(self.output_held_picture(packet));
        }
        if self.state.context_initialized && self.pixel_format == PixelFormat::None {
            return Err(KitError::FormatChangeRejected(
                "像素格式已失效, 会话无法继续".into(),
            ));
        }

        let data: &[u8] = &packet.data;
        let buf_size = data.len();
        let mut reader = BitReader::new(data);

        if !self.parse_header(&mut reader)? {
            return Ok(DecodeOutcome::empty(buf_size));
        }
        self.setup_context()?;

        let pict_type = self.state.pict_type;
        if self.profile.bit_budget_check
            && pict_type != PictureType::B
            && (self.state.mb_num / 2) as isize > reader.bits_left()
        {
            error!(
                "数据过短: {} 个宏块只有 {} 位",
                self.state.mb_num,
                reader.bits_left()
            );
            return Err(KitError::InvalidData("数据包位数不足".into()));
        }

        if self.ring.last().is_none() && (pict_type == PictureType::B || self.state.droppable) {
            debug!("缺少参考帧, 丢弃 {} 帧", pict_type.as_char());
            return Ok(DecodeOutcome::empty(buf_size));
        }
        if self.discarded(pict_type) {
            trace!("skip_frame={:?}, 丢弃 {} 帧", self.options.skip_frame, pict_type.as_char());
            return Ok(DecodeOutcome::empty(buf_size));
        }

        self.start_frame(packet, data)?;

        let slice_result = match self
            .header
            .decode_secondary_header(&mut reader, &mut self.state)
        {
            Ok(SecondaryHeader::FrameEnd) => SliceStatus::Done,
            Ok(SecondaryHeader::Continue) => self.run_slices(&mut reader)?,
            Err(e) => {
                self.ring.abandon_current();
                return Err(e);
            }
        };

        if self.profile.msmpeg4.has_ext_header() && pict_type == PictureType::I {
            if let Err(e) = self
                .header
                .decode_ext_header(&mut reader, &mut self.state, buf_size)
            {
                warn!("扩展头解析失败: {}", e);
                if self.state.mb_num > 0 {
                    self.er
                        .set_mb_status(self.state.mb_num - 1, ErStatus::MB_ERROR);
                }
            }
        }

        let frame = self.finish_frame()?;

        if let SliceStatus::Error(e) = slice_result {
            if e == SliceError::HwAccel {
                return Err(KitError::HwAccel("硬件后端片解码失败".into()));
            }
            if self
                .options
                .err_recognition
                .contains(ErrRecognition::EXPLODE)
            {
                return Err(KitError::InvalidData(format!("片解码失败: {:?}", e)));
            }
        }

        Ok(DecodeOutcome {
            frame,
            consumed: buf_size,
        })
    }

    /// 排空: 非低延迟 (或最后一帧被跳过) 时输出持有的 next 参考
    fn output_held_picture(&mut self, packet: &Packet) -> DecodeOutcome {
        if self.state.low_delay && !self.state.skipped_last_frame {
            return DecodeOutcome::empty(0);
        }
        let Some(next) = self.ring.take_next() else {
            return DecodeOutcome::empty(0);
        };
        let mut frame = next.frame.clone();
        if self.state.skipped_last_frame {
            frame.pts = packet.pts;
            frame.duration = packet.duration;
        }
        debug!("排空输出持有帧 pts={}", frame.pts);
        DecodeOutcome {
            frame: Some(self.export_frame(frame)),
            consumed: 0,
        }
    }

    /// 输出前的外观变换, 参考环中的图像保持原样
    fn export_frame(&self, mut frame: VideoFrame) -> VideoFrame {
        if FLIPPED_TAGS.contains(&self.codec_tag) && frame.pixel_format == PixelFormat::Yuv420p {
            frame.flip_vertical();
        }
        frame
    }

    /// 解析图像头, 返回 `false` 表示本包不解码 (显式跳帧)
    fn parse_header(&mut self, reader: &mut BitReader<'_>) -> KitResult<bool> {
        let snapshot = (self.state.width, self.state.height);
        match self.header.parse_picture_header(reader, &mut self.state) {
            Ok(HeaderStatus::Decoded) => {
                if let Some(rows) = self.options.slice_height {
                    self.state.slice_height = rows;
                }
                self.state.skipped_last_frame = false;
                trace!(
                    "{} 图像头: {} {}x{} q={}",
                    self.header.name(),
                    self.state.pict_type.as_char(),
                    self.state.width,
                    self.state.height,
                    self.state.qscale
                );
                Ok(true)
            }
            Ok(HeaderStatus::FrameSkipped) => {
                (self.state.width, self.state.height) = snapshot;
                self.state.skipped_last_frame = true;
                debug!("未编码帧, 跳过");
                Ok(false)
            }
            Err(e) => {
                (self.state.width, self.state.height) = snapshot;
                error!("图像头损坏: {}", e);
                Err(match e {
                    KitError::HeaderCorrupt(_) => e,
                    other => KitError::HeaderCorrupt(other.to_string()),
                })
            }
        }
    }

    /// 协商输出像素格式
    fn negotiate_format(&self) -> PixelFormat {
        if self.state.bits_per_raw_sample > 8 {
            PixelFormat::Yuv420p10le
        } else if self.options.gray {
            PixelFormat::Gray8
        } else if let Some(hw) = self.hw.as_ref().filter(|_| self.profile.hw_capable) {
            hw.surface_format()
        } else {
            PixelFormat::Yuv420p
        }
    }

    /// 首帧分配上下文, 之后尺寸变化时重建
    fn setup_context(&mut self) -> KitResult<()> {
        let size = (self.state.width, self.state.height);
        if let Err(e) = check_image_size(size.0, size.1) {
            error!("{}", e);
            (self.state.width, self.state.height) = self.coded_size;
            return Err(e);
        }
        if !self.state.context_initialized {
            let format = self.negotiate_format();
            self.state.resize_grid();
            self.pictures.provision(size.0, size.1, format)?;
            self.pixel_format = format;
            self.coded_size = size;
            self.state.context_initialized = true;
            debug!(
                "{} 上下文初始化: {}x{} {}",
                self.profile.codec_id, size.0, size.1, format
            );
            return Ok(());
        }

        if size == self.coded_size && !self.state.context_reinit {
            return Ok(());
        }
        self.state.context_reinit = false;
        self.state.resize_grid();
        self.ring.clear();
        self.coded_size = size;

        let format = self.negotiate_format();
        if format != self.pixel_format {
            error!(
                "不支持的格式变化: {} -> {}",
                self.pixel_format, format
            );
            self.pixel_format = PixelFormat::None;
            return Err(KitError::FormatChangeRejected(format!(
                "{}x{} 需要 {}",
                size.0, size.1, format
            )));
        }
        self.pictures.provision(size.0, size.1, format)?;
        debug!("尺寸变化, 重建上下文: {}x{}", size.0, size.1);
        Ok(())
    }

    /// skip_frame 门控
    fn discarded(&self, pict_type: PictureType) -> bool {
        let level = self.options.skip_frame;
        (level >= Discard::NonRef && pict_type == PictureType::B)
            || (level >= Discard::NonKey && pict_type != PictureType::I)
            || level >= Discard::All
    }

    /// 取得当前图像并通知各协作者帧开始
    fn start_frame(&mut self, packet: &Packet, data: &[u8]) -> KitResult<()> {
        let state = &self.state;
        let mut picture = self.pictures.acquire_current(state.pict_type)?;
        picture.frame.pts = packet.pts;
        picture.frame.duration = packet.duration;
        picture.frame.picture_type = state.pict_type;
        picture.frame.is_keyframe = state.pict_type == PictureType::I;
        picture.frame.sample_aspect_ratio = state.sample_aspect_ratio;
        if !state.divx_packed {
            picture.progress.publish_setup();
        }
        self.ring.begin(picture);

        if let Some(hw) = self.hw.as_mut() {
            let config = HwFrameConfig {
                codec_id: self.profile.codec_id,
                width: state.width,
                height: state.height,
                pict_type: state.pict_type,
                qscale: state.qscale,
                h263_plus: state.h263_plus,
                loop_filter: state.loop_filter,
                no_rounding: state.no_rounding,
            };
            if let Err(e) = hw.start_frame(&config, data) {
                error!("硬件后端 {} 帧开始失败: {}", hw.name(), e);
                self.ring.abandon_current();
                return Err(KitError::HwAccel(e.to_string()));
            }
        }

        self.er.frame_start(
            self.state.mb_width,
            self.state.mb_height,
            self.state.partitioned_frame,
        );
        Ok(())
    }

    /// 驱动片循环
    fn run_slices(&mut self, reader: &mut BitReader<'_>) -> KitResult<SliceStatus> {
        let pict_type = self.state.pict_type;
        let (current, reference) = self.ring.split_current(pict_type);
        let current = current.ok_or_else(|| KitError::Internal("当前图像缺失".into()))?;
        let mut ctx = SliceContext {
            state: &mut self.state,
            header: self.header.as_mut(),
            mb_decoder: self.mb_decoder.as_mut(),
            recon: self.recon.as_mut(),
            er: self.er.as_mut(),
            pictures: self.pictures.as_mut(),
            current,
            reference,
            hw: self
                .hw
                .as_deref_mut()
                .map(|hw| hw as &mut dyn HardwareBackend),
            options: &self.options,
            mb: &mut self.mb,
        };
        let status = slice::decode_slices(&mut ctx, reader);
        trace!("片循环结束: {:?}", status);
        Ok(status)
    }

    /// 帧结束: 错误隐藏, 硬件收尾, 选择输出并轮转参考环
    fn finish_frame(&mut self) -> KitResult<Option<VideoFrame>> {
        let pict_type = self.state.pict_type;
        let (current, reference) = self.ring.split_current(pict_type);
        let current = current.ok_or_else(|| KitError::Internal("当前图像缺失".into()))?;

        let concealed = self
            .er
            .frame_end(&mut current.frame, reference.map(|p| &p.frame));
        if concealed > 0 {
            debug!("错误隐藏 {} 个宏块", concealed);
        }

        if let Some(hw) = self.hw.as_mut() {
            if let Err(e) = hw.end_frame(current) {
                error!("硬件后端 {} 帧结束失败: {}", hw.name(), e);
                self.ring.abandon_current();
                return Err(KitError::HwAccel(e.to_string()));
            }
        }

        if self.options.export_qp_table {
            current.frame.qp_table = Some(qp_table(&self.state));
        }

        let output_current = pict_type == PictureType::B || self.state.low_delay;
        let delayed = if output_current {
            None
        } else {
            self.ring.next().map(|p| p.frame.clone())
        };

        let is_reference = pict_type != PictureType::B && !self.state.droppable;
        let committed = self.ring.commit(is_reference);
        let frame = if output_current {
            committed.map(|p| p.frame.clone())
        } else {
            delayed
        };
        let frame = frame.map(|f| self.export_frame(f));

        self.frame_count += 1;
        debug!(
            "帧 #{} ({}) 完成, 输出 {}",
            self.frame_count,
            pict_type.as_char(),
            if frame.is_some() { "1 帧" } else { "无" }
        );
        Ok(frame)
    }
}

/// 分配缓冲前的尺寸检查: 含 128 像素边缘后的面积不超过 `i32::MAX / 8`
pub fn check_image_size(width: u32, height: u32) -> KitResult<()> {
    let area = (u64::from(width) + 128) * (u64::from(height) + 128);
    if width == 0 || height == 0 || area >= (i32::MAX / 8) as u64 {
        return Err(KitError::InvalidData(format!(
            "图像尺寸超出限制: {}x{}",
            width, height
        )));
    }
    Ok(())
}

/// 按行优先导出每宏块量化参数
fn qp_table(state: &DecoderState) -> Vec<i8> {
    let mut table = Vec::with_capacity(state.mb_num);
    for y in 0..state.mb_height {
        for x in 0..state.mb_width {
            let q = state
                .qscale_table
                .get(state.mb_index(x, y))
                .copied()
                .unwrap_or(0);
            table.push(q as i8);
        }
    }
    table
}

impl Decoder for H263Decoder {
    fn codec_id(&self) -> CodecId {
        self.profile.codec_id
    }

    fn name(&self) -> &str {
        self.profile.codec_id.name()
    }

    fn open(&mut self, params: &CodecParameters) -> KitResult<()> {
        if params.codec_id != self.profile.codec_id {
            return Err(KitError::InvalidArgument(format!(
                "参数中的编解码器 {} 与解码器 {} 不匹配",
                params.codec_id, self.profile.codec_id
            )));
        }
        self.codec_tag = params.codec_tag;
        self.state.bits_per_raw_sample = params.bits_per_raw_sample;

        if !self.profile.allocate_after_header && params.width > 0 && params.height > 0 {
            self.state.width = params.width;
            self.state.height = params.height;
            self.setup_context()?;
        }
        debug!(
            "打开 {} 解码器: {}x{}, tag={:08X}",
            self.profile.codec_id, params.width, params.height, params.codec_tag
        );
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> KitResult<()> {
        self.draining = packet.is_empty();
        let outcome = self.decode_packet(packet)?;
        if let Some(frame) = outcome.frame {
            self.pending.push_back(frame);
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> KitResult<VideoFrame> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(frame);
        }
        if self.draining {
            Err(KitError::Eof)
        } else {
            Err(KitError::NeedMoreData)
        }
    }

    fn flush(&mut self) {
        debug!(
            "{} 解码器已刷新, 保留缺陷开关 {:?} (score={})",
            self.profile.codec_id, self.state.workaround_bugs, self.state.padding_bug_score
        );
        self.ring.clear();
        self.pending.clear();
        self.draining = false;
        self.state.skipped_last_frame = false;
        self.state.mb_x = 0;
        self.state.mb_y = 0;
    }
}
