/// Bitmap area tracking `capacity` inodes or blocks, one bit each,
/// least significant bit first; 1 means in use.
#[derive(Debug)]
pub struct Bitmap<B> {
    bits: B,
    capacity: usize,
}

impl<B: AsRef<[u8]>> Bitmap<B> {
    #[inline]
    pub fn new(bits: B, capacity: usize) -> Self {
        debug_assert!(capacity <= bits.as_ref().len() * 8);
        Self { bits, capacity }
    }

    pub fn get(&self, bit: usize) -> bool {
        bit < self.capacity && self.bits.as_ref()[bit / 8] & (1 << (bit % 8)) != 0
    }

    /// Number of set bits among the tracked ones.
    pub fn count_used(&self) -> usize {
        (0..self.capacity).filter(|&bit| self.get(bit)).count()
    }

    #[inline]
    pub fn count_free(&self) -> usize {
        self.capacity - self.count_used()
    }

    /// Lowest clear bit, if any.
    pub fn first_free(&self) -> Option<usize> {
        self.bits
            .as_ref()
            .iter()
            .enumerate()
            .find_map(|(byte_index, &bits)| {
                (bits != u8::MAX).then_some(byte_index * 8 + bits.trailing_ones() as usize)
            })
            .filter(|&bit| bit < self.capacity)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Bitmap<B> {
    /// Sets `bit`, returning whether it was clear before.
    pub fn set(&mut self, bit: usize) -> bool {
        debug_assert!(bit < self.capacity);
        let byte = &mut self.bits.as_mut()[bit / 8];
        let was_clear = *byte & (1 << (bit % 8)) == 0;
        *byte |= 1 << (bit % 8);
        was_clear
    }

    /// Clears `bit`, returning whether it was set before.
    pub fn clear(&mut self, bit: usize) -> bool {
        debug_assert!(bit < self.capacity);
        let byte = &mut self.bits.as_mut()[bit / 8];
        let was_set = *byte & (1 << (bit % 8)) != 0;
        *byte &= !(1 << (bit % 8));
        was_set
    }

    /// Marks every bit past the capacity as used, as mkfs does for the tail
    /// of a bitmap block.
    pub fn fill_padding(&mut self) {
        let capacity = self.capacity;
        let bytes = self.bits.as_mut();
        let first_full = capacity.div_ceil(8);
        if capacity % 8 != 0 {
            bytes[capacity / 8] |= u8::MAX << (capacity % 8);
        }
        bytes[first_full..].fill(u8::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_lsb_first() {
        let mut bytes = [0u8; 4];
        let mut bitmap = Bitmap::new(&mut bytes[..], 32);
        assert!(bitmap.set(0));
        assert!(!bitmap.set(0));
        assert!(bitmap.set(9));
        assert!(bitmap.get(9));
        assert!(bitmap.clear(0));
        assert!(!bitmap.clear(0));
        assert_eq!(bytes, [0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn first_free_respects_capacity() {
        let bytes = [0xFF, 0b0000_0111];
        assert_eq!(Bitmap::new(&bytes[..], 16).first_free(), Some(11));
        assert_eq!(Bitmap::new(&bytes[..], 11).first_free(), None);
        assert_eq!(Bitmap::new(&[0xFFu8; 2][..], 16).first_free(), None);
    }

    #[test]
    fn count_ignores_padding_bits() {
        // Bits past the capacity are set by mkfs and must not be counted.
        let bytes = [0b0000_0101, 0xFF];
        let bitmap = Bitmap::new(&bytes[..], 8);
        assert_eq!(bitmap.count_used(), 2);
        assert_eq!(bitmap.count_free(), 6);
        assert!(!bitmap.get(9));
    }

    #[test]
    fn padding_leaves_tracked_bits() {
        let mut bytes = [0u8; 4];
        let mut bitmap = Bitmap::new(&mut bytes[..], 13);
        bitmap.fill_padding();
        assert_eq!(bitmap.count_used(), 0);
        assert_eq!(bitmap.first_free(), Some(0));
        assert_eq!(bytes, [0x00, 0b1110_0000, 0xFF, 0xFF]);
    }
}
