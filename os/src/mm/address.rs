//! SV39 下的物理/虚拟地址与页号
use super::PageTableEntry;
use crate::config::{PAGE_SIZE, PAGE_SIZE_BITS};
use core::fmt::{self, Debug, Formatter};

const PA_WIDTH_SV39: usize = 56;
const VA_WIDTH_SV39: usize = 39;
const PPN_WIDTH_SV39: usize = PA_WIDTH_SV39 - PAGE_SIZE_BITS;
const VPN_WIDTH_SV39: usize = VA_WIDTH_SV39 - PAGE_SIZE_BITS;

/// 物理地址
#[repr(C)]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct PhysAddr(pub usize);

/// 虚拟地址
#[repr(C)]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct VirtAddr(pub usize);

/// 物理页号
#[repr(C)]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct PhysPageNum(pub usize);

/// 虚拟页号
#[repr(C)]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct VirtPageNum(pub usize);

/// 为地址类型生成 `Debug` 与截断宽度的 `usize` 互转
macro_rules! sv39_number {
    ($ty:ident, $tag:literal, $width:expr) => {
        impl Debug for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_fmt(format_args!(concat!($tag, ":{:#x}"), self.0))
            }
        }
        impl From<usize> for $ty {
            fn from(v: usize) -> Self {
                Self(v & ((1 << $width) - 1))
            }
        }
    };
}

sv39_number!(PhysAddr, "PA", PA_WIDTH_SV39);
sv39_number!(PhysPageNum, "PPN", PPN_WIDTH_SV39);
sv39_number!(VirtAddr, "VA", VA_WIDTH_SV39);
sv39_number!(VirtPageNum, "VPN", VPN_WIDTH_SV39);

impl From<PhysAddr> for usize {
    fn from(v: PhysAddr) -> Self {
        v.0
    }
}
impl From<PhysPageNum> for usize {
    fn from(v: PhysPageNum) -> Self {
        v.0
    }
}
impl From<VirtPageNum> for usize {
    fn from(v: VirtPageNum) -> Self {
        v.0
    }
}
impl From<VirtAddr> for usize {
    /// 高半部分的地址按第 38 位符号扩展
    fn from(v: VirtAddr) -> Self {
        if v.0 >= (1 << (VA_WIDTH_SV39 - 1)) {
            v.0 | (!((1 << VA_WIDTH_SV39) - 1))
        } else {
            v.0
        }
    }
}

impl VirtAddr {
    /// 向下取整的页号
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 / PAGE_SIZE)
    }
    /// 向上取整的页号
    pub fn ceil(&self) -> VirtPageNum {
        VirtPageNum(self.0.div_ceil(PAGE_SIZE))
    }
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
    pub fn aligned(&self) -> bool {
        self.page_offset() == 0
    }
}

impl PhysAddr {
    /// 向下取整的页号
    pub fn floor(&self) -> PhysPageNum {
        PhysPageNum(self.0 / PAGE_SIZE)
    }
    /// 向上取整的页号
    pub fn ceil(&self) -> PhysPageNum {
        PhysPageNum(self.0.div_ceil(PAGE_SIZE))
    }
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl From<VirtAddr> for VirtPageNum {
    fn from(v: VirtAddr) -> Self {
        assert!(v.aligned());
        v.floor()
    }
}
impl From<VirtPageNum> for VirtAddr {
    fn from(v: VirtPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}
impl From<PhysAddr> for PhysPageNum {
    fn from(v: PhysAddr) -> Self {
        assert_eq!(v.page_offset(), 0);
        v.floor()
    }
}
impl From<PhysPageNum> for PhysAddr {
    fn from(v: PhysPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

impl VirtPageNum {
    /// 三级页表中每一级的索引，从根页表开始
    pub fn indexes(&self) -> [usize; 3] {
        let mut vpn = self.0;
        let mut idx = [0usize; 3];
        for i in (0..3).rev() {
            idx[i] = vpn & 511;
            vpn >>= 9;
        }
        idx
    }
    /// 向后偏移 `pages` 页
    pub fn add(&self, pages: usize) -> Self {
        Self(self.0 + pages)
    }
}

impl PhysPageNum {
    /// 把该页视为一张页表
    pub fn get_pte_array(&self) -> &'static mut [PageTableEntry] {
        let pa: PhysAddr = (*self).into();
        unsafe { core::slice::from_raw_parts_mut(pa.0 as *mut PageTableEntry, 512) }
    }
    /// 该页的全部字节
    pub fn get_bytes_array(&self) -> &'static mut [u8] {
        let pa: PhysAddr = (*self).into();
        unsafe { core::slice::from_raw_parts_mut(pa.0 as *mut u8, PAGE_SIZE) }
    }
}

/// 字节数向上取整到页数
pub fn page_count(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// 页号步进
pub trait StepByOne {
    fn step(&mut self);
}
impl StepByOne for VirtPageNum {
    fn step(&mut self) {
        self.0 += 1;
    }
}

/// 左闭右开的页号区间
#[derive(Copy, Clone, Debug)]
pub struct SimpleRange<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    l: T,
    r: T,
}
impl<T> SimpleRange<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    pub fn new(start: T, end: T) -> Self {
        assert!(start <= end, "start {:?} > end {:?}!", start, end);
        Self { l: start, r: end }
    }
    pub fn get_start(&self) -> T {
        self.l
    }
    pub fn get_end(&self) -> T {
        self.r
    }
}
impl<T> IntoIterator for SimpleRange<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    type Item = T;
    type IntoIter = SimpleRangeIterator<T>;
    fn into_iter(self) -> Self::IntoIter {
        SimpleRangeIterator {
            current: self.l,
            end: self.r,
        }
    }
}

/// [`SimpleRange`] 的迭代器
pub struct SimpleRangeIterator<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    current: T,
    end: T,
}
impl<T> Iterator for SimpleRangeIterator<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    type Item = T;
    fn next(&mut self) -> Option<Self::Item> {
        if self.current == self.end {
            None
        } else {
            let t = self.current;
            self.current.step();
            Some(t)
        }
    }
}

/// 虚拟页号区间
pub type VPNRange = SimpleRange<VirtPageNum>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(1), 1);
        assert_eq!(page_count(PAGE_SIZE), 1);
        assert_eq!(page_count(4097), 2);
        assert_eq!(page_count(usize::MAX), usize::MAX / PAGE_SIZE + 1);
    }

    #[test]
    fn indexes_split_vpn_into_nine_bit_levels() {
        let vpn = VirtPageNum((3 << 18) | (5 << 9) | 7);
        assert_eq!(vpn.indexes(), [3, 5, 7]);
        assert_eq!(VirtAddr::from(0x4000).floor().indexes(), [0, 0, 4]);
    }

    #[test]
    fn virt_addr_truncates_and_sign_extends() {
        let va = VirtAddr::from(usize::MAX);
        assert_eq!(va.0, (1 << 39) - 1);
        assert_eq!(usize::from(va), usize::MAX);
        assert_eq!(usize::from(VirtAddr::from(0x4000)), 0x4000);
    }

    #[test]
    fn vpn_range_iterates_half_open() {
        let range = VPNRange::new(VirtPageNum(4), VirtPageNum(7));
        let pages: alloc::vec::Vec<_> = range.into_iter().map(|vpn| vpn.0).collect();
        assert_eq!(pages, [4, 5, 6]);
    }
}
