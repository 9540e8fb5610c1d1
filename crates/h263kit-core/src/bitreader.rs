//! 比特流读取器.
//!
//! 解码循环使用的位游标, 按大端位序读取 (MSB first).
//!
//! 与普通的按位读取器不同, 这里的游标允许越界: `skip_bits_unchecked` 可以把位置
//! 推过缓冲区末尾, 此时 `bits_left()` 返回负数, 上层据此诊断越界读取.
//! `show_bits` 在末尾之后按 0 填充, 永不失败.

use crate::{KitError, KitResult};

/// 比特流读取器
///
/// # 示例
/// ```
/// use h263kit_core::bitreader::BitReader;
///
/// let data = [0b10110001, 0b01010101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.show_bits(4), 0b0001);
/// assert_eq!(br.bits_left(), 12);
/// ```
#[derive(Clone)]
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前位位置 (可能超过 data.len() * 8)
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 获取已读取的总位数
    pub fn bits_read(&self) -> usize {
        self.pos
    }

    /// 缓冲区总位数
    pub fn size_in_bits(&self) -> usize {
        self.data.len() * 8
    }

    /// 获取剩余可读位数, 越界读取后为负
    pub fn bits_left(&self) -> isize {
        self.size_in_bits() as isize - self.pos as isize
    }

    /// 是否已到达 (或越过) 末尾
    pub fn is_eof(&self) -> bool {
        self.bits_left() <= 0
    }

    /// 窥视 N 个位 (最多 32 位), 末尾之后补 0
    pub fn show_bits(&self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        debug_assert!(n <= 32, "show_bits: n={} 超过 32 位", n);
        let byte = self.pos >> 3;
        let mut window = 0u64;
        for i in 0..8 {
            let b = self.data.get(byte + i).copied().unwrap_or(0);
            window = (window << 8) | u64::from(b);
        }
        let shift = (self.pos & 7) as u32;
        ((window << shift) >> (64 - n)) as u32
    }

    /// 窥视 N 个位, 数据不足时报错
    pub fn peek_bits(&self, n: u32) -> KitResult<u32> {
        if n > 32 {
            return Err(KitError::InvalidArgument(format!(
                "peek_bits: n={} 超过 32 位",
                n,
            )));
        }
        if n as isize > self.bits_left() {
            return Err(KitError::Eof);
        }
        Ok(self.show_bits(n))
    }

    /// 读取 N 个位 (最多 32 位)
    pub fn read_bits(&mut self, n: u32) -> KitResult<u32> {
        let value = self.peek_bits(n)?;
        self.pos += n as usize;
        Ok(value)
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> KitResult<u32> {
        self.read_bits(1)
    }

    /// 读取 1 个位并转换为布尔值
    pub fn read_flag(&mut self) -> KitResult<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    /// 读取有符号整数 (二进制补码)
    pub fn read_bits_signed(&mut self, n: u32) -> KitResult<i32> {
        let val = self.read_bits(n)?;
        if n == 0 {
            return Ok(0);
        }
        if n >= 32 {
            return Ok(val as i32);
        }
        let shift = 32 - n;
        Ok(((val << shift) as i32) >> shift)
    }

    /// 跳过 N 个位, 数据不足时报错
    pub fn skip_bits(&mut self, n: usize) -> KitResult<()> {
        if n as isize > self.bits_left() {
            return Err(KitError::Eof);
        }
        self.pos += n;
        Ok(())
    }

    /// 跳过 N 个位, 允许越过末尾
    pub fn skip_bits_unchecked(&mut self, n: usize) {
        self.pos += n;
    }

    /// 对齐到下一个字节边界
    ///
    /// 如果当前已在字节边界, 则不做任何事.
    pub fn align_to_byte(&mut self) {
        self.pos = (self.pos + 7) & !7;
    }

    /// 到下一个字节边界的位数 (已对齐时为 0)
    pub fn bits_to_byte_boundary(&self) -> usize {
        (8 - (self.pos & 7)) & 7
    }

    /// 获取当前字节位置 (向下取整)
    pub fn byte_position(&self) -> usize {
        self.pos >> 3
    }

    /// 跳转到指定位位置
    pub fn seek_to_bit(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// 从当前字节位置到末尾的数据
    pub fn remaining_data(&self) -> &'a [u8] {
        let start = self.byte_position().min(self.data.len());
        &self.data[start..]
    }

    /// 缓冲区最后 8 个字节 (大端), 不足 8 字节时返回 None
    pub fn tail_u64(&self) -> Option<u64> {
        let len = self.data.len();
        if len < 8 {
            return None;
        }
        let mut value = 0u64;
        for &b in &self.data[len - 8..] {
            value = (value << 8) | u64::from(b);
        }
        Some(value)
    }

    /// 获取底层数据的引用
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}
