//! 8x8 整数反 DCT.
//!
//! 先行后列的可分离实现, 系数按 2^14 缩放 (Chen-Wang 分解).

const W1: i64 = 22725;
const W2: i64 = 21407;
const W3: i64 = 19266;
const W4: i64 = 16383;
const W5: i64 = 12873;
const W6: i64 = 8867;
const W7: i64 = 4520;

const ROW_SHIFT: u32 = 11;
const COL_SHIFT: u32 = 20;

/// 一维 8 点变换, `x` 为 8 个输入, 结果右移 `shift` 位 (含舍入)
fn idct_1d(x: [i64; 8], shift: u32) -> [i64; 8] {
    let round = 1i64 << (shift - 1);
    let even0 = W4 * x[0] + round;

    let a0 = even0 + W2 * x[2] + W4 * x[4] + W6 * x[6];
    let a1 = even0 + W6 * x[2] - W4 * x[4] - W2 * x[6];
    let a2 = even0 - W6 * x[2] - W4 * x[4] + W2 * x[6];
    let a3 = even0 - W2 * x[2] + W4 * x[4] - W6 * x[6];

    let b0 = W1 * x[1] + W3 * x[3] + W5 * x[5] + W7 * x[7];
    let b1 = W3 * x[1] - W7 * x[3] - W1 * x[5] - W5 * x[7];
    let b2 = W5 * x[1] - W1 * x[3] + W7 * x[5] + W3 * x[7];
    let b3 = W7 * x[1] - W5 * x[3] + W3 * x[5] - W1 * x[7];

    [
        (a0 + b0) >> shift,
        (a1 + b1) >> shift,
        (a2 + b2) >> shift,
        (a3 + b3) >> shift,
        (a3 - b3) >> shift,
        (a2 - b2) >> shift,
        (a1 - b1) >> shift,
        (a0 - b0) >> shift,
    ]
}

/// 原地反变换 (光栅序系数 -> 空域残差)
pub fn idct8x8(block: &mut [i32; 64]) {
    for row in block.chunks_exact_mut(8) {
        if row[1..].iter().all(|&c| c == 0) {
            // 仅 DC: 等价于 W4 * dc >> 11
            row.fill(row[0] << 3);
            continue;
        }
        let input: [i64; 8] = std::array::from_fn(|i| i64::from(row[i]));
        for (dst, v) in row.iter_mut().zip(idct_1d(input, ROW_SHIFT)) {
            *dst = v as i32;
        }
    }
    for col in 0..8 {
        let input: [i64; 8] = std::array::from_fn(|i| i64::from(block[i * 8 + col]));
        for (i, v) in idct_1d(input, COL_SHIFT).into_iter().enumerate() {
            block[i * 8 + col] = v as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_block() {
        let mut block = [0i32; 64];
        idct8x8(&mut block);
        assert!(block.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_dc_only_is_flat() {
        let mut block = [0i32; 64];
        block[0] = 800;
        idct8x8(&mut block);
        assert!(block.iter().all(|&v| v == 100), "{:?}", &block[..8]);
    }

    #[test]
    fn test_horizontal_frequency_varies_along_row() {
        let mut block = [0i32; 64];
        block[1] = 160;
        idct8x8(&mut block);
        assert!(block[0] > 0 && block[7] < 0);
        assert_eq!(block[0], block[8]);
        assert_eq!(block[0], -block[7]);
    }
}
