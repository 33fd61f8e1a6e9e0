/// 位图块的视图，只看前`len`位
///
/// 位`i`位于第`i / 8`字节的第`i % 8`位，置 1 表示已分配。
#[derive(Debug)]
pub struct Bitmap<'a> {
    bits: &'a mut [u8],
    len: usize,
}

impl<'a> Bitmap<'a> {
    #[inline]
    pub fn new(bits: &'a mut [u8], len: usize) -> Self {
        debug_assert!(len <= bits.len() * 8);
        Self { bits, len }
    }

    /// 首个为 0 的位
    #[inline]
    pub fn first_zero(&self) -> Option<usize> {
        self.first_zero_from(0)
    }

    /// 不小于`start`的首个为 0 的位
    pub fn first_zero_from(&self, start: usize) -> Option<usize> {
        if start >= self.len {
            return None;
        }
        // 起始字节中`start`之前的位视作已分配
        let head = (1u8 << (start % 8)).wrapping_sub(1);
        // 找出还有 0 的字节，其尾部 1 的个数即为块内偏移
        self.bits
            .iter()
            .enumerate()
            .skip(start / 8)
            .map(|(i, &byte)| if i == start / 8 { (i, byte | head) } else { (i, byte) })
            .find_map(|(i, byte)| (byte != u8::MAX).then(|| i * 8 + byte.trailing_ones() as usize))
            .filter(|&bit| bit < self.len)
    }

    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        self.bits[bit / 8] & (1 << (bit % 8)) != 0
    }

    #[inline]
    pub fn set(&mut self, bit: usize) {
        self.bits[bit / 8] |= 1 << (bit % 8);
    }

    /// 清除一位，返回它原先是否被置位
    #[inline]
    pub fn clear(&mut self, bit: usize) -> bool {
        let was_set = self.test(bit);
        self.bits[bit / 8] &= !(1 << (bit % 8));
        was_set
    }

    /// 把`[start, end)`内的位全部置 1
    pub fn set_range(&mut self, start: usize, end: usize) {
        (start..end).for_each(|bit| self.set(bit));
    }

    /// 前`len`位中 1 的个数
    pub fn count_ones(&self) -> usize {
        (0..self.len).filter(|&bit| self.test(bit)).count()
    }
}

/// 分配时探查块组的顺序：`p, p-1, p+1, p-2, p+2, ...`，越界的跳过
pub fn probe_groups(preferred: u32, count: u32) -> impl Iterator<Item = u32> {
    let preferred = preferred.min(count.saturating_sub(1)) as i64;
    let count = count as i64;

    (0..2 * count)
        .map(move |step| {
            let dist = (step + 1) / 2;
            if step % 2 == 1 {
                preferred - dist
            } else {
                preferred + dist
            }
        })
        .filter(move |&g| (0..count).contains(&g))
        .map(|g| g as u32)
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn first_fit() {
        let mut raw = [0xFF, 0b0000_0111, 0];
        let mut bitmap = Bitmap::new(&mut raw, 24);
        assert_eq!(Some(11), bitmap.first_zero());

        bitmap.set(11);
        assert_eq!(Some(12), bitmap.first_zero());
        assert!(bitmap.clear(3));
        assert!(!bitmap.clear(3));
        assert_eq!(Some(3), bitmap.first_zero());
        assert_eq!(11, bitmap.count_ones());
    }

    #[test]
    fn bounded_by_len() {
        let mut raw = [0xFF, 0b0000_1111];
        let bitmap = Bitmap::new(&mut raw, 12);
        assert_eq!(None, bitmap.first_zero());
    }

    #[test]
    fn search_from_an_offset() {
        let mut raw = [0b1111_0110, 0b1111_1110, 0];
        let bitmap = Bitmap::new(&mut raw, 20);
        assert_eq!(Some(0), bitmap.first_zero());
        assert_eq!(Some(3), bitmap.first_zero_from(1));
        assert_eq!(Some(8), bitmap.first_zero_from(4));
        assert_eq!(Some(16), bitmap.first_zero_from(9));
        assert_eq!(Some(19), bitmap.first_zero_from(19));
        assert_eq!(None, bitmap.first_zero_from(20));
    }

    #[test]
    fn probe_order() {
        assert_eq!(
            [2, 1, 3, 0, 4],
            probe_groups(2, 5).collect::<Vec<_>>()[..]
        );
        assert_eq!([0, 1, 2], probe_groups(0, 3).collect::<Vec<_>>()[..]);
        assert_eq!([2, 1, 0], probe_groups(2, 3).collect::<Vec<_>>()[..]);
        assert_eq!([0], probe_groups(0, 1).collect::<Vec<_>>()[..]);
    }
}
