//! 片循环.
//!
//! `decode_slice` 从片起点逐宏块解码到片结束或帧结束, 可重入:
//! 返回 `Continue` 时游标停在下一片的起点, 由 `decode_slices` 负责
//! 重同步 (或按固定片高) 后再次进入.
//!
//! 到达帧末尾后按剩余位形状给结尾填充缺陷打分, 并根据方言与
//! NO_PADDING 开关决定剩余位的容差.

use h263kit_core::BitReader;
use log::{error, trace, warn};

use crate::frame::PictureType;

use super::context::{DecoderState, MotionVector};
use super::er::{ErStatus, ErrorResilience};
use super::header::HeaderParser;
use super::hwaccel::HardwareBackend;
use super::macroblock::{MacroblockData, MacroblockDecoder, MbStatus};
use super::options::{DecoderOptions, ErrRecognition, WorkaroundBugs};
use super::padding::{
    TrailingBits, apply_no_padding_decision, stuffing_sentinel_score, tail_slack,
    trailing_magic_score, trailing_shape_score, zero_byte_score,
};
use super::picture::{Picture, PictureManager};
use super::recon::Reconstructor;
use super::variant::{MsMpeg4Version, SliceAddressing, TrailingHeuristics};

/// 宏块尺寸 (像素)
const MB_SIZE: usize = 16;

/// 片级错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceError {
    /// 片边界处语法不一致
    Desync,
    /// 宏块解码失败
    Macroblock,
    /// 帧尾剩余位超出容差
    TrailingData,
    /// 数据分区第一遍失败
    Partition,
    /// 硬件后端失败
    HwAccel,
}

/// 片解码结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    /// 片正常结束, 游标位于下一片起点
    Continue,
    /// 整帧完成
    Done,
    /// 片解码失败
    Error(SliceError),
}

impl SliceStatus {
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// 片循环所需的协作者
pub struct SliceContext<'a> {
    pub state: &'a mut DecoderState,
    pub header: &'a mut dyn HeaderParser,
    pub mb_decoder: &'a mut dyn MacroblockDecoder,
    pub recon: &'a mut dyn Reconstructor,
    pub er: &'a mut dyn ErrorResilience,
    pub pictures: &'a mut dyn PictureManager,
    pub current: &'a mut Picture,
    pub reference: Option<&'a Picture>,
    pub hw: Option<&'a mut dyn HardwareBackend>,
    pub options: &'a DecoderOptions,
    pub mb: &'a mut MacroblockData,
}

impl SliceContext<'_> {
    /// 一行宏块完成: 先报告行进度, 再发水平带通知
    fn finish_row(&mut self, row: usize) {
        if self.state.pict_type != PictureType::B
            && !self.state.partitioned_frame
            && !self.er.error_occurred()
        {
            self.pictures.report_row_progress(&*self.current, row);
        }
        self.pictures
            .emit_band(&*self.current, row * MB_SIZE, MB_SIZE);
    }

    /// 重建刚解码的宏块并维护预测缓存
    fn finish_macroblock(&mut self) {
        let state = &mut *self.state;
        let xy = state.mb_index(state.mb_x, state.mb_y);
        let mb = &*self.mb;

        if state.pict_type != PictureType::B {
            let mv = if mb.intra { MotionVector::ZERO } else { mb.mv };
            state.update_motion_val(xy, mv);
        }
        if mb.intra {
            if state.h263_pred || state.h263_aic {
                if let Some(flag) = state.mbintra_table.get_mut(xy) {
                    *flag = true;
                }
            }
        } else if state.h263_pred || state.h263_aic {
            state.clean_intra_table_entries(xy);
        } else {
            state.reset_dc_predictors(128);
        }

        let reference = self.reference.map(|p| &p.frame);
        self.recon
            .reconstruct(state, mb, &mut self.current.frame, reference);
        if state.loop_filter {
            self.recon.loop_filter(state, mb, &mut self.current.frame);
        }
    }
}

/// 解码一个片
pub fn decode_slice(ctx: &mut SliceContext<'_>, reader: &mut BitReader<'_>) -> SliceStatus {
    let part_mask = ErStatus::part_mask(ctx.state.partitioned_frame);

    ctx.state.last_resync_bit = reader.bits_read();
    ctx.state.first_slice_line = true;
    ctx.state.resync_mb_x = ctx.state.mb_x;
    ctx.state.resync_mb_y = ctx.state.mb_y;
    let qscale = i32::from(ctx.state.qscale);
    ctx.state.set_qscale(qscale);

    if let Some(hw) = ctx.hw.as_deref_mut() {
        let data = reader.data();
        let start = reader.byte_position().min(data.len());
        let result = hw.decode_slice(&data[start..]);
        ctx.state.mb_y = ctx.state.mb_height;
        return match result {
            Ok(()) => SliceStatus::Done,
            Err(e) => {
                error!("硬件后端 {} 片解码失败: {}", hw.name(), e);
                SliceStatus::Error(SliceError::HwAccel)
            }
        };
    }

    if ctx.state.partitioned_frame {
        if let Err(e) = ctx
            .mb_decoder
            .decode_partitions(reader, ctx.state, ctx.er)
        {
            error!("数据分区解码失败: {}", e);
            return SliceStatus::Error(SliceError::Partition);
        }
        ctx.state.first_slice_line = true;
        ctx.state.mb_x = ctx.state.resync_mb_x;
        ctx.state.mb_y = ctx.state.resync_mb_y;
        ctx.state.set_qscale(qscale);
    }

    let profile = ctx.state.profile;
    while ctx.state.mb_y < ctx.state.mb_height {
        let (rx, ry) = (ctx.state.resync_mb_x as i32, ctx.state.resync_mb_y as i32);

        if profile.addressing == SliceAddressing::FixedHeight
            && ctx.state.resync_mb_y + ctx.state.slice_height == ctx.state.mb_y
        {
            ctx.er.add_slice(
                rx,
                ry,
                ctx.state.mb_x as i32 - 1,
                ctx.state.mb_y as i32,
                ErStatus::MB_END,
            );
            return SliceStatus::Continue;
        }

        if profile.msmpeg4 == MsMpeg4Version::V1 {
            ctx.state.reset_dc_predictors(128);
        }

        while ctx.state.mb_x < ctx.state.mb_width {
            let (mb_x, mb_y) = (ctx.state.mb_x, ctx.state.mb_y);
            if ctx.state.resync_mb_x == mb_x && ctx.state.resync_mb_y + 1 == mb_y {
                ctx.state.first_slice_line = false;
            }

            let status = ctx
                .mb_decoder
                .decode_macroblock(reader, ctx.state, ctx.mb);
            let xy = ctx.state.mb_index(mb_x, mb_y);

            match status {
                MbStatus::Ok => ctx.finish_macroblock(),
                MbStatus::SliceEnd => {
                    ctx.finish_macroblock();
                    ctx.er
                        .add_slice(rx, ry, mb_x as i32, mb_y as i32, ErStatus::MB_END & part_mask);
                    ctx.state.padding_bug_score -= 1;
                    if ctx.state.advance_cell() {
                        ctx.finish_row(mb_y);
                    }
                    trace!("片结束: ({}, {}) -> ({}, {})", rx, ry, mb_x, mb_y);
                    return SliceStatus::Continue;
                }
                MbStatus::SliceEndDesync => {
                    if ctx.state.pict_type != PictureType::B {
                        ctx.state.update_motion_val(xy, MotionVector::ZERO);
                    }
                    error!("片结束位置不一致, 宏块 ({}, {})", mb_x, mb_y);
                    ctx.er.add_slice(
                        rx,
                        ry,
                        mb_x as i32 + 1,
                        mb_y as i32,
                        ErStatus::MB_ERROR & part_mask,
                    );
                    return SliceStatus::Error(SliceError::Desync);
                }
                MbStatus::Error => {
                    if ctx.state.pict_type != PictureType::B {
                        ctx.state.update_motion_val(xy, MotionVector::ZERO);
                    }
                    error!("宏块 ({}, {}) 解码错误", mb_x, mb_y);
                    ctx.er.add_slice(
                        rx,
                        ry,
                        mb_x as i32,
                        mb_y as i32,
                        ErStatus::MB_ERROR & part_mask,
                    );
                    if ctx
                        .options
                        .err_recognition
                        .contains(ErrRecognition::IGNORE_ERR)
                        && reader.bits_left() > 0
                    {
                        ctx.state.mb_x += 1;
                        continue;
                    }
                    return SliceStatus::Error(SliceError::Macroblock);
                }
            }
            ctx.state.mb_x += 1;
        }

        let row = ctx.state.mb_y;
        ctx.finish_row(row);
        ctx.state.mb_x = 0;
        ctx.state.mb_y += 1;
    }

    finish_picture(ctx, reader, part_mask)
}

/// 走完全部宏块行之后: 填充缺陷打分与剩余位容差
fn finish_picture(
    ctx: &mut SliceContext<'_>,
    reader: &BitReader<'_>,
    part_mask: ErStatus,
) -> SliceStatus {
    let state = &mut *ctx.state;
    let profile = state.profile;
    let evidence = TrailingBits::capture(reader);
    let partitioned = state.data_partitioning;

    if state.workaround_bugs.contains(WorkaroundBugs::AUTODETECT) {
        let delta = match profile.trailing {
            TrailingHeuristics::None => 0,
            TrailingHeuristics::Mpeg4 => {
                stuffing_sentinel_score(&evidence, partitioned)
                    + trailing_shape_score(&evidence, partitioned)
            }
            TrailingHeuristics::H263 => {
                zero_byte_score(&evidence, state.pict_type == PictureType::I, partitioned)
                    + trailing_magic_score(&evidence)
            }
        };
        state.padding_bug_score += delta;
        if delta != 0 {
            trace!(
                "填充缺陷打分 {:+}, 累计 {}",
                delta, state.padding_bug_score
            );
        }
    }
    state.workaround_bugs =
        apply_no_padding_decision(state.workaround_bugs, state.padding_bug_score, partitioned);

    let (rx, ry) = (state.resync_mb_x as i32, state.resync_mb_y as i32);
    let (mb_x, mb_y) = (state.mb_x as i32, state.mb_y as i32);
    let msmpeg4 = profile.msmpeg4.is_msmpeg4();

    if msmpeg4 || state.workaround_bugs.contains(WorkaroundBugs::NO_PADDING) {
        let left = evidence.bits_left;
        let slack = tail_slack(
            msmpeg4 && state.pict_type == PictureType::I,
            state.workaround_bugs,
            ctx.options.err_recognition,
        );
        if left > slack {
            error!(
                "丢弃帧尾 {} 位垃圾数据, 后续为 {:06X}",
                left, evidence.next24
            );
        } else if left < 0 {
            error!("越界读取 {} 位", -left);
        } else {
            ctx.er.add_slice(rx, ry, mb_x - 1, mb_y, ErStatus::MB_END);
        }
        return SliceStatus::Done;
    }

    error!(
        "已到图像末尾但片未结束 (剩余 {} 位, {:06X}, score={})",
        evidence.bits_left, evidence.next24, state.padding_bug_score
    );
    ctx.er
        .add_slice(rx, ry, mb_x, mb_y, ErStatus::MB_END & part_mask);
    SliceStatus::Error(SliceError::TrailingData)
}

/// 帧级片驱动: 第一片之后按寻址方式定位后续片, 直到整帧完成或无法继续
///
/// 返回本帧最后一次片错误, 没有错误时返回 `Done`.
pub fn decode_slices(ctx: &mut SliceContext<'_>, reader: &mut BitReader<'_>) -> SliceStatus {
    ctx.state.mb_x = 0;
    ctx.state.mb_y = 0;

    let mut result = decode_slice(ctx, reader);
    while ctx.state.mb_y < ctx.state.mb_height {
        let profile = ctx.state.profile;
        match profile.addressing {
            SliceAddressing::FixedHeight => {
                let slice_height = ctx.state.slice_height;
                if slice_height == 0
                    || ctx.state.mb_x != 0
                    || result.is_error()
                    || ctx.state.mb_y % slice_height != 0
                    || reader.bits_left() < 0
                {
                    break;
                }
            }
            SliceAddressing::Resync => {
                let prev = ctx.state.linear_position();
                if let Err(e) = ctx.header.resync(reader, ctx.state) {
                    trace!("重同步结束: {}", e);
                    break;
                }
                let now = ctx.state.linear_position();
                if now != prev {
                    ctx.er.set_error_occurred();
                }
                if now < prev {
                    warn!("重同步位置回退: {} -> {}", prev, now);
                    break;
                }
            }
        }

        if profile.msmpeg4 < MsMpeg4Version::Wmv1 && ctx.state.h263_pred {
            ctx.state.clean_buffers();
        }

        let status = decode_slice(ctx, reader);
        if status.is_error() {
            result = status;
        }
    }

    if result.is_error() {
        result
    } else {
        SliceStatus::Done
    }
}
