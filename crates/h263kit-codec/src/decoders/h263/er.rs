//! 错误恢复记录.
//!
//! 片循环在每个片边界和每次宏块错误处登记一个区域, 帧结束时按记录
//! 推断哪些宏块损坏或未解码, 并对其做隐藏 (从前向参考复制或填中灰).

use bitflags::bitflags;
use log::{error, trace};

use crate::frame::VideoFrame;

bitflags! {
    /// 宏块错误状态位
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ErStatus: u8 {
        const AC_ERROR = 1;
        const DC_ERROR = 2;
        const MV_ERROR = 4;
        const AC_END = 8;
        const DC_END = 16;
        const MV_END = 32;

        const MB_ERROR = Self::AC_ERROR.bits() | Self::DC_ERROR.bits() | Self::MV_ERROR.bits();
        const MB_END = Self::AC_END.bits() | Self::DC_END.bits() | Self::MV_END.bits();
    }
}

impl ErStatus {
    /// 分区帧只登记 AC 分区状态, 其余帧登记全部
    pub fn part_mask(partitioned: bool) -> Self {
        if partitioned {
            Self::AC_END | Self::AC_ERROR
        } else {
            Self::all()
        }
    }
}

/// 一次登记的区域 (含两端)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRegion {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
    pub status: ErStatus,
}

/// 错误恢复记录器
pub trait ErrorResilience: Send {
    /// 新帧开始, 重置所有宏块为未解码
    fn frame_start(&mut self, mb_width: usize, mb_height: usize, partitioned: bool);

    /// 登记 (sx, sy) 到 (ex, ey) 的片区域, 状态写在结束宏块上
    fn add_slice(&mut self, sx: i32, sy: i32, ex: i32, ey: i32, status: ErStatus);

    /// 直接覆盖单个宏块的状态
    fn set_mb_status(&mut self, mb_xy: usize, status: ErStatus);

    /// 本帧是否出现过错误
    fn error_occurred(&self) -> bool;

    /// 标记本帧出现错误
    fn set_error_occurred(&mut self);

    /// 帧结束: 隐藏损坏宏块, 返回隐藏的宏块数
    fn frame_end(&mut self, cur: &mut VideoFrame, reference: Option<&VideoFrame>) -> usize;
}

/// 每宏块状态表
#[derive(Debug, Default)]
pub struct ErrorStatusMap {
    mb_width: usize,
    mb_height: usize,
    partitioned: bool,
    status: Vec<ErStatus>,
    slice_start: Vec<bool>,
    regions: Vec<SliceRegion>,
    error_occurred: bool,
}

impl ErrorStatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 本帧登记过的区域
    pub fn regions(&self) -> &[SliceRegion] {
        &self.regions
    }

    /// 单个宏块的当前状态
    pub fn status_at(&self, mb_xy: usize) -> ErStatus {
        self.status.get(mb_xy).copied().unwrap_or_default()
    }

    fn mb_num(&self) -> usize {
        self.mb_width * self.mb_height
    }

    /// 从帧尾向前传播: 没有结束标记且后面没有错误兜底的宏块视为损坏
    fn propagate_missing_ends(&mut self) {
        for (error_bit, end_bit) in [
            (ErStatus::AC_ERROR, ErStatus::AC_END),
            (ErStatus::DC_ERROR, ErStatus::DC_END),
            (ErStatus::MV_ERROR, ErStatus::MV_END),
        ] {
            let mut end_ok = false;
            for i in (0..self.mb_num()).rev() {
                let st = self.status[i];
                if st.intersects(error_bit | end_bit) {
                    end_ok = true;
                }
                if !end_ok {
                    self.status[i] |= error_bit;
                }
                if self.slice_start[i] {
                    end_ok = false;
                }
            }
        }
    }

    fn conceal_mb(
        cur: &mut VideoFrame,
        reference: Option<&VideoFrame>,
        mb_x: usize,
        mb_y: usize,
    ) {
        for plane in 0..cur.data.len().min(3) {
            let size = if plane == 0 { 16 } else { 8 };
            let stride = cur.linesize[plane];
            let x0 = mb_x * size;
            let y0 = mb_y * size;
            for row in 0..size {
                let offset = (y0 + row) * stride + x0;
                let Some(dst) = cur.data[plane].get_mut(offset..offset + size) else {
                    continue;
                };
                match reference
                    .and_then(|r| r.data.get(plane))
                    .and_then(|src| src.get(offset..offset + size))
                {
                    Some(src) => dst.copy_from_slice(src),
                    None => dst.fill(128),
                }
            }
        }
    }
}

impl ErrorResilience for ErrorStatusMap {
    fn frame_start(&mut self, mb_width: usize, mb_height: usize, partitioned: bool) {
        self.mb_width = mb_width;
        self.mb_height = mb_height;
        self.partitioned = partitioned;
        let mb_num = mb_width * mb_height;
        self.status.clear();
        self.status
            .resize(mb_num, ErStatus::MB_ERROR | ErStatus::MB_END);
        self.slice_start.clear();
        self.slice_start.resize(mb_num, true);
        self.regions.clear();
        self.error_occurred = false;
    }

    fn add_slice(&mut self, sx: i32, sy: i32, ex: i32, ey: i32, status: ErStatus) {
        self.regions.push(SliceRegion {
            start_x: sx,
            start_y: sy,
            end_x: ex,
            end_y: ey,
            status,
        });
        let mb_num = self.mb_num() as i64;
        if mb_num == 0 {
            return;
        }
        let width = self.mb_width as i64;
        let start = (i64::from(sx) + i64::from(sy) * width).clamp(0, mb_num - 1) as usize;
        let end = (i64::from(ex) + i64::from(ey) * width).clamp(0, mb_num) as usize;
        if start > end {
            error!("错误恢复: 片结束位置早于起始位置 ({} > {})", start, end);
            return;
        }

        let mut mask = ErStatus::all();
        for (error_bit, end_bit) in [
            (ErStatus::AC_ERROR, ErStatus::AC_END),
            (ErStatus::DC_ERROR, ErStatus::DC_END),
            (ErStatus::MV_ERROR, ErStatus::MV_END),
        ] {
            if status.intersects(error_bit | end_bit) {
                mask.remove(error_bit | end_bit);
            }
        }
        if status.intersects(ErStatus::MB_ERROR) {
            self.error_occurred = true;
        }

        for i in start..end {
            self.status[i] &= mask;
            self.slice_start[i] = false;
        }
        self.slice_start[start] = true;
        if end < self.status.len() {
            self.status[end] &= mask;
            self.status[end] |= status;
            if end != start {
                self.slice_start[end] = false;
            }
        }
        trace!(
            "错误恢复登记: ({}, {}) -> ({}, {}), 状态={:?}",
            sx, sy, ex, ey, status
        );
    }

    fn set_mb_status(&mut self, mb_xy: usize, status: ErStatus) {
        if let Some(slot) = self.status.get_mut(mb_xy) {
            *slot = status;
        }
        if status.intersects(ErStatus::MB_ERROR) {
            self.error_occurred = true;
        }
    }

    fn error_occurred(&self) -> bool {
        self.error_occurred
    }

    fn set_error_occurred(&mut self) {
        self.error_occurred = true;
    }

    fn frame_end(&mut self, cur: &mut VideoFrame, reference: Option<&VideoFrame>) -> usize {
        if self.mb_num() == 0 {
            return 0;
        }
        self.propagate_missing_ends();

        let check = if self.partitioned {
            ErStatus::AC_ERROR
        } else {
            ErStatus::MB_ERROR
        };
        let mut concealed = 0;
        for i in 0..self.mb_num() {
            if self.status[i].intersects(check) {
                Self::conceal_mb(cur, reference, i % self.mb_width, i / self.mb_width);
                concealed += 1;
            }
        }
        if concealed > 0 {
            self.error_occurred = true;
            trace!("错误隐藏: {} 个宏块", concealed);
        }
        concealed
    }
}
