use std::collections::HashMap;

use bytemuck::Pod;

use crate::codegen::Width;
use crate::util::Address;

const LOG_BYTES_IN_PAGE: u8 = 12;
const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// Sparse byte-addressed memory. Pages are mapped on first write and read as zero before that.
/// Multi-byte values are stored in host byte order.
#[derive(Default, Clone)]
pub struct SimMemory {
    pages: HashMap<usize, Box<[u8; BYTES_IN_PAGE]>>,
}

impl SimMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn split(addr: Address) -> (usize, usize) {
        let raw = addr.as_usize();
        (raw >> LOG_BYTES_IN_PAGE, raw & (BYTES_IN_PAGE - 1))
    }

    pub fn read_u8(&self, addr: Address) -> u8 {
        let (page, offset) = Self::split(addr);
        self.pages.get(&page).map_or(0, |p| p[offset])
    }

    pub fn write_u8(&mut self, addr: Address, value: u8) {
        let (page, offset) = Self::split(addr);
        self.pages
            .entry(page)
            .or_insert_with(|| Box::new([0; BYTES_IN_PAGE]))[offset] = value;
    }

    pub fn read<T: Pod>(&self, addr: Address) -> T {
        let bytes: Vec<u8> = (0..std::mem::size_of::<T>())
            .map(|i| self.read_u8(addr + i))
            .collect();
        bytemuck::pod_read_unaligned(&bytes)
    }

    pub fn write<T: Pod>(&mut self, addr: Address, value: T) {
        for (i, byte) in bytemuck::bytes_of(&value).iter().enumerate() {
            self.write_u8(addr + i, *byte);
        }
    }

    /// Zero-extending read of a value of the given width.
    pub fn read_width(&self, addr: Address, width: Width) -> usize {
        match width {
            Width::Byte => self.read::<u8>(addr) as usize,
            Width::Int => self.read::<u32>(addr) as usize,
            Width::Word => self.read::<usize>(addr),
        }
    }

    /// Truncating write of a value of the given width.
    pub fn write_width(&mut self, addr: Address, width: Width, value: usize) {
        match width {
            Width::Byte => self.write::<u8>(addr, value as u8),
            Width::Int => self.write::<u32>(addr, value as u32),
            Width::Word => self.write::<usize>(addr, value),
        }
    }

    pub fn fill(&mut self, start: Address, bytes: usize, value: u8) {
        for i in 0..bytes {
            self.write_u8(start + i, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_reads_zero() {
        let memory = SimMemory::new();
        assert_eq!(memory.read::<usize>(Address::from_usize(0x1234_5678)), 0);
    }

    #[test]
    fn access_across_pages() {
        let mut memory = SimMemory::new();
        let addr = Address::from_usize(BYTES_IN_PAGE * 3 - 2);
        memory.write::<u32>(addr, 0xdead_beef);
        assert_eq!(memory.read::<u32>(addr), 0xdead_beef);
        assert_eq!(memory.pages.len(), 2);
    }

    #[test]
    fn widths_truncate() {
        let mut memory = SimMemory::new();
        let addr = Address::from_usize(0x1000);
        memory.write_width(addr, Width::Int, 0x1_2345_6789);
        assert_eq!(memory.read_width(addr, Width::Int), 0x2345_6789);
        assert_eq!(memory.read_width(addr + 4usize, Width::Int), 0);
        memory.write_width(addr, Width::Byte, 0x1ff);
        assert_eq!(memory.read_width(addr, Width::Byte), 0xff);
    }

    #[test]
    fn fill() {
        let mut memory = SimMemory::new();
        let addr = Address::from_usize(0x2000);
        memory.fill(addr, 16, 0xff);
        assert_eq!(memory.read::<u64>(addr + 8usize), u64::MAX);
        assert_eq!(memory.read_u8(addr + 16usize), 0);
    }
}
