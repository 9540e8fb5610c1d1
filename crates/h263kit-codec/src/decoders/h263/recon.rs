//! 宏块重建.
//!
//! 反量化 + IDCT + 半像素运动补偿, 以及 Annex J 风格的块边界滤波.

use crate::frame::VideoFrame;

use super::context::{DecoderState, MotionVector};
use super::idct::idct8x8;
use super::macroblock::MacroblockData;

/// 按量化参数索引的滤波强度
const LOOP_FILTER_STRENGTH: [i32; 32] = [
    0, 1, 1, 2, 2, 3, 3, 4, 4, 4, 5, 5, 5, 6, 6, 7, 7, 7, 8, 8, 8, 9, 9, 9, 10, 10, 10, 11, 11, 11,
    12, 12,
];

/// 重建后端
pub trait Reconstructor: Send {
    /// 把一个宏块写入当前图像
    fn reconstruct(
        &mut self,
        state: &DecoderState,
        mb: &MacroblockData,
        cur: &mut VideoFrame,
        reference: Option<&VideoFrame>,
    );

    /// 对刚重建的宏块做块边界滤波
    fn loop_filter(&mut self, state: &DecoderState, mb: &MacroblockData, cur: &mut VideoFrame);
}

/// 软件重建
#[derive(Debug)]
pub struct SoftwareReconstructor {
    /// 仅重建亮度
    gray: bool,
    residual: [i32; 64],
}

impl SoftwareReconstructor {
    pub fn new(gray: bool) -> Self {
        Self {
            gray,
            residual: [0; 64],
        }
    }

    fn plane_count(&self, frame: &VideoFrame) -> usize {
        if self.gray { 1 } else { frame.data.len().min(3) }
    }
}

impl Default for SoftwareReconstructor {
    fn default() -> Self {
        Self::new(false)
    }
}

// ============================================================================
// 反量化
// ============================================================================

/// H.263 反量化, 帧内 DC 固定乘 8
pub fn dequantize(block: &mut [i32; 64], qscale: u8, intra: bool) {
    let q = i32::from(qscale.max(1));
    let qmul = q * 2;
    let qadd = (q - 1) | 1;
    let start = if intra {
        block[0] *= 8;
        1
    } else {
        0
    };
    for coeff in block.iter_mut().skip(start) {
        let level = *coeff;
        if level > 0 {
            *coeff = level * qmul + qadd;
        } else if level < 0 {
            *coeff = level * qmul - qadd;
        }
    }
}

// ============================================================================
// 运动补偿
// ============================================================================

/// 读取参考平面的一个样本, 坐标裁剪到平面内
fn ref_sample(plane: &[u8], stride: usize, height: usize, x: isize, y: isize) -> i32 {
    let xc = x.clamp(0, stride as isize - 1) as usize;
    let yc = y.clamp(0, height as isize - 1) as usize;
    i32::from(plane[yc * stride + xc])
}

/// 半像素预测一个 size x size 块
#[allow(clippy::too_many_arguments)]
fn predict_block(
    reference: &[u8],
    stride: usize,
    height: usize,
    src_x: isize,
    src_y: isize,
    half_x: bool,
    half_y: bool,
    no_rounding: bool,
    size: usize,
    out: &mut [i32; 256],
) {
    let rnd = i32::from(!no_rounding);
    for y in 0..size {
        for x in 0..size {
            let sx = src_x + x as isize;
            let sy = src_y + y as isize;
            let a = ref_sample(reference, stride, height, sx, sy);
            let v = match (half_x, half_y) {
                (false, false) => a,
                (true, false) => (a + ref_sample(reference, stride, height, sx + 1, sy) + rnd) >> 1,
                (false, true) => (a + ref_sample(reference, stride, height, sx, sy + 1) + rnd) >> 1,
                (true, true) => {
                    let b = ref_sample(reference, stride, height, sx + 1, sy);
                    let c = ref_sample(reference, stride, height, sx, sy + 1);
                    let d = ref_sample(reference, stride, height, sx + 1, sy + 1);
                    (a + b + c + d + 1 + rnd) >> 2
                }
            };
            out[y * size + x] = v;
        }
    }
}

/// 色度运动向量: 1/4 像素位置取半像素
fn chroma_offset(mv: i32) -> (isize, bool) {
    let full = (mv >> 1) as isize;
    let half = (mv & 3) != 0;
    (full >> 1, half)
}

impl Reconstructor for SoftwareReconstructor {
    fn reconstruct(
        &mut self,
        state: &DecoderState,
        mb: &MacroblockData,
        cur: &mut VideoFrame,
        reference: Option<&VideoFrame>,
    ) {
        let planes = self.plane_count(cur);
        let mut pred = [0i32; 256];

        for plane in 0..planes {
            let size = if plane == 0 { 16 } else { 8 };
            let stride = cur.linesize[plane];
            let height = cur.data[plane].len() / stride.max(1);
            let x0 = state.mb_x * size;
            let y0 = state.mb_y * size;

            // 预测
            if mb.intra {
                pred[..size * size].fill(0);
            } else if let Some(ref_plane) = reference.and_then(|r| r.data.get(plane)) {
                let mv: MotionVector = mb.mv;
                let (dx, hx, dy, hy) = if plane == 0 {
                    (
                        (mv.x >> 1) as isize,
                        mv.x & 1 != 0,
                        (mv.y >> 1) as isize,
                        mv.y & 1 != 0,
                    )
                } else {
                    let (dx, hx) = chroma_offset(mv.x);
                    let (dy, hy) = chroma_offset(mv.y);
                    (dx, hx, dy, hy)
                };
                predict_block(
                    ref_plane,
                    stride,
                    height,
                    x0 as isize + dx,
                    y0 as isize + dy,
                    hx,
                    hy,
                    state.no_rounding,
                    size,
                    &mut pred,
                );
            } else {
                pred[..size * size].fill(128);
            }

            // 残差
            let block_range = if plane == 0 { 0..4 } else { plane + 3..plane + 4 };
            for n in block_range {
                let (bx, by) = if plane == 0 { ((n & 1) * 8, (n >> 1) * 8) } else { (0, 0) };
                let has_residual = mb.intra || mb.block_coded(n);
                if has_residual {
                    self.residual = mb.blocks[n];
                    dequantize(&mut self.residual, mb.qscale, mb.intra);
                    idct8x8(&mut self.residual);
                }
                for y in 0..8 {
                    let row = (y0 + by + y) * stride + x0 + bx;
                    let Some(dst) = cur.data[plane].get_mut(row..row + 8) else {
                        continue;
                    };
                    for (x, px) in dst.iter_mut().enumerate() {
                        let mut v = pred[(by + y) * size + bx + x];
                        if has_residual {
                            v += self.residual[y * 8 + x];
                        }
                        *px = v.clamp(0, 255) as u8;
                    }
                }
            }
        }
    }

    fn loop_filter(&mut self, state: &DecoderState, mb: &MacroblockData, cur: &mut VideoFrame) {
        let strength = LOOP_FILTER_STRENGTH[usize::from(mb.qscale.min(31))];
        if strength == 0 {
            return;
        }
        let planes = self.plane_count(cur);
        for plane in 0..planes {
            let size = if plane == 0 { 16 } else { 8 };
            let stride = cur.linesize[plane];
            let x0 = state.mb_x * size;
            let y0 = state.mb_y * size;
            let data = &mut cur.data[plane];

            // 水平边界 (上边与宏块内部)
            let mut edges_y = Vec::with_capacity(2);
            if state.mb_y > 0 {
                edges_y.push(y0);
            }
            if plane == 0 {
                edges_y.push(y0 + 8);
            }
            for y in edges_y {
                filter_edge(data, y * stride + x0, stride, 1, size, strength);
            }

            // 垂直边界 (左边与宏块内部)
            let mut edges_x = Vec::with_capacity(2);
            if state.mb_x > 0 {
                edges_x.push(x0);
            }
            if plane == 0 {
                edges_x.push(x0 + 8);
            }
            for x in edges_x {
                filter_edge(data, y0 * stride + x, 1, stride, size, strength);
            }
        }
    }
}

/// 沿一条边界滤波 `len` 个样本
///
/// `across` 是垂直于边界的步长, `along` 是沿边界的步长, `origin` 为边界后第一个样本.
fn filter_edge(
    data: &mut [u8],
    origin: usize,
    across: usize,
    along: usize,
    len: usize,
    strength: i32,
) {
    for k in 0..len {
        let p2_idx = origin + k * along;
        let Some(p0_idx) = p2_idx.checked_sub(2 * across) else {
            continue;
        };
        let p1_idx = p2_idx - across;
        let p3_idx = p2_idx + across;
        if p3_idx >= data.len() {
            continue;
        }
        let p0 = i32::from(data[p0_idx]);
        let p1 = i32::from(data[p1_idx]);
        let p2 = i32::from(data[p2_idx]);
        let p3 = i32::from(data[p3_idx]);
        let d = (p0 - p3 + 4 * (p2 - p1)) / 8;

        let d1 = if d < -2 * strength {
            0
        } else if d < -strength {
            -2 * strength - d
        } else if d < strength {
            d
        } else if d < 2 * strength {
            2 * strength - d
        } else {
            0
        };

        data[p1_idx] = (p1 + d1).clamp(0, 255) as u8;
        data[p2_idx] = (p2 - d1).clamp(0, 255) as u8;

        let ad1 = d1.abs() >> 1;
        let d2 = ((p0 - p3) / 4).clamp(-ad1, ad1);
        data[p0_idx] = (p0 - d2).clamp(0, 255) as u8;
        data[p3_idx] = (p3 + d2).clamp(0, 255) as u8;
    }
}

#[cfg(test)]
mod tests {
    use h263kit_core::PixelFormat;

    use super::*;
    use crate::decoders::h263::options::WorkaroundBugs;
    use crate::decoders::h263::variant::{Variant, profile};

    fn state() -> DecoderState {
        let mut st = DecoderState::new(profile(Variant::H263), WorkaroundBugs::AUTODETECT);
        st.width = 32;
        st.height = 32;
        st.resize_grid();
        st
    }

    #[test]
    fn test_dequantize_h263() {
        let mut block = [0i32; 64];
        block[0] = 16;
        block[1] = 2;
        block[2] = -1;
        dequantize(&mut block, 4, true);
        assert_eq!(block[0], 128);
        assert_eq!(block[1], 2 * 8 + 3);
        assert_eq!(block[2], -8 - 3);

        let mut block = [0i32; 64];
        block[0] = 1;
        dequantize(&mut block, 5, false);
        assert_eq!(block[0], 10 + 5);
    }

    #[test]
    fn test_intra_dc_reconstruction() {
        let st = state();
        let mut mb = MacroblockData::new();
        mb.intra = true;
        mb.qscale = 8;
        for block in &mut mb.blocks {
            block[0] = 100;
        }
        let mut frame = VideoFrame::new(32, 32, PixelFormat::Yuv420p);
        // 默认实例重建全部三个平面
        SoftwareReconstructor::default().reconstruct(&st, &mb, &mut frame, None);
        assert_eq!(frame.data[0][0], 100);
        assert_eq!(frame.data[0][15 * frame.linesize[0] + 15], 100);
        assert_eq!(frame.data[0][16], 128);
        assert_eq!(frame.data[1][0], 100);
    }

    #[test]
    fn test_inter_copy_with_full_pel_motion() {
        let mut st = state();
        st.mb_x = 1;
        let mut reference = VideoFrame::new(32, 32, PixelFormat::Yuv420p);
        for (i, px) in reference.data[0].iter_mut().enumerate() {
            *px = (i % 32) as u8;
        }
        let mut mb = MacroblockData::new();
        mb.mv = MotionVector::new(-4, 0); // 左移 2 像素
        mb.qscale = 4;
        let mut frame = VideoFrame::new(32, 32, PixelFormat::Yuv420p);
        SoftwareReconstructor::new(false).reconstruct(&st, &mb, &mut frame, Some(&reference));
        assert_eq!(frame.data[0][16], 14);
        assert_eq!(frame.data[0][31], 29);
    }

    #[test]
    fn test_half_pel_and_edge_clamp() {
        let st = state();
        let mut reference = VideoFrame::new(32, 32, PixelFormat::Yuv420p);
        for (i, px) in reference.data[0].iter_mut().enumerate() {
            *px = ((i % 32) * 2) as u8;
        }
        let mut mb = MacroblockData::new();
        mb.mv = MotionVector::new(-3, 0); // -1.5 像素
        mb.qscale = 4;
        let mut frame = VideoFrame::new(32, 32, PixelFormat::Yuv420p);
        SoftwareReconstructor::new(false).reconstruct(&st, &mb, &mut frame, Some(&reference));
        // x = 0: 参考 -2 与 -1 都被裁剪到 0
        assert_eq!(frame.data[0][0], 0);
        // x = 2: (0 + 2 + 1) >> 1
        assert_eq!(frame.data[0][2], 1);
    }

    #[test]
    fn test_missing_reference_predicts_gray() {
        let st = state();
        let mut mb = MacroblockData::new();
        mb.skipped = true;
        let mut frame = VideoFrame::new(32, 32, PixelFormat::Yuv420p);
        frame.data[0].fill(0);
        SoftwareReconstructor::new(true).reconstruct(&st, &mb, &mut frame, None);
        assert_eq!(frame.data[0][0], 128);
    }

    #[test]
    fn test_chroma_offset_rounding() {
        assert_eq!(chroma_offset(4), (1, false));
        assert_eq!(chroma_offset(3), (0, true));
        assert_eq!(chroma_offset(-3), (-1, true));
        assert_eq!(chroma_offset(2), (0, true));
    }

    #[test]
    fn test_loop_filter_smooths_step() {
        let mut st = state();
        st.mb_x = 1;
        let mut frame = VideoFrame::new(32, 32, PixelFormat::Gray8);
        let stride = frame.linesize[0];
        for y in 0..32 {
            for x in 0..32 {
                frame.data[0][y * stride + x] = if x < 16 { 100 } else { 108 };
            }
        }
        let mut mb = MacroblockData::new();
        mb.qscale = 12;
        SoftwareReconstructor::new(false).loop_filter(&st, &mb, &mut frame);
        let left = frame.data[0][15];
        let right = frame.data[0][16];
        assert!(left > 100 && right < 108, "{} {}", left, right);
    }
}
