//! Helpers for reading big-endian fields out of a byte iterator.

use std::net::Ipv4Addr;

/// An extension trait for `Iterator<Item = u8>` that reads the fixed-size
/// fields PDUs are made of.
///
/// ```ignore
/// // A data id and a step counter
/// let mut fields = [0x00, 0x07, 0, 0, 0, 0, 0, 0, 0, 0x2A].into_iter();
/// assert_eq!(fields.next_u16_be(), Some(7));
/// assert_eq!(fields.next_u64_be(), Some(42));
/// assert_eq!(fields.next_u8(), None);
/// ```
pub(crate) trait BytesExt: Iterator<Item = u8> {
    fn next_u8(&mut self) -> Option<u8> {
        self.next()
    }

    fn next_u16_be(&mut self) -> Option<u16> {
        self.next_n().map(u16::from_be_bytes)
    }

    fn next_u32_be(&mut self) -> Option<u32> {
        self.next_n().map(u32::from_be_bytes)
    }

    fn next_u64_be(&mut self) -> Option<u64> {
        self.next_n().map(u64::from_be_bytes)
    }

    fn next_i64_be(&mut self) -> Option<i64> {
        self.next_n().map(i64::from_be_bytes)
    }

    fn next_f64_be(&mut self) -> Option<f64> {
        self.next_n().map(f64::from_be_bytes)
    }

    fn next_ipv4addr(&mut self) -> Option<Ipv4Addr> {
        self.next_n::<4>().map(Ipv4Addr::from)
    }

    /// Collects the next `N` items of the iterator into an array. Returns
    /// `None` if there were fewer than `N` bytes left.
    fn next_n<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut result = [0; N];
        for element in &mut result {
            *element = self.next()?
        }
        Some(result)
    }

    /// Collects the next `len` bytes into a vector. Returns `None` if there
    /// were fewer than `len` bytes left.
    fn next_vec(&mut self, len: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.next()?);
        }
        Some(out)
    }
}

impl<T: Iterator<Item = u8>> BytesExt for T {}
