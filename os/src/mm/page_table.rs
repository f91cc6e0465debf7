//! SV39 三级页表 [`PageTable`] 及按用户权限访问用户内存的辅助函数。

use super::{FramePool, FrameTracker, PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};
use crate::config::PAGE_SIZE;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::*;

bitflags! {
    /// 页表项标志
    pub struct PTEFlags: u8 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// 页表项
#[derive(Copy, Clone)]
#[repr(C)]
pub struct PageTableEntry {
    pub bits: usize,
}

impl PageTableEntry {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        PageTableEntry {
            bits: ppn.0 << 10 | flags.bits() as usize,
        }
    }
    pub fn empty() -> Self {
        PageTableEntry { bits: 0 }
    }
    pub fn ppn(&self) -> PhysPageNum {
        (self.bits >> 10 & ((1usize << 44) - 1)).into()
    }
    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u8)
    }
    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::V)
    }
    pub fn readable(&self) -> bool {
        self.flags().contains(PTEFlags::R)
    }
    pub fn writable(&self) -> bool {
        self.flags().contains(PTEFlags::W)
    }
    pub fn executable(&self) -> bool {
        self.flags().contains(PTEFlags::X)
    }
}

/// 建立映射失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// 没有空闲页帧存放页表
    OutOfMemory,
    /// 该虚拟页已经有映射
    AlreadyMapped(VirtPageNum),
}

/// 用户态访问时会触发的缺页异常
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFault {
    /// 读访问，附带出错的虚拟地址
    Load(usize),
    /// 写访问，附带出错的虚拟地址
    Store(usize),
}

/// 页表。根页表和按需创建的中间页表都由 `frames` 持有。
pub struct PageTable {
    root_ppn: PhysPageNum,
    frames: Vec<FrameTracker>,
    pool: FramePool,
}

impl PageTable {
    /// 从 `pool` 分配根页表
    pub fn new(pool: &FramePool) -> Option<Self> {
        let frame = pool.alloc()?;
        Some(PageTable {
            root_ppn: frame.ppn,
            frames: vec![frame],
            pool: pool.clone(),
        })
    }
    /// 查找叶子页表项，途中缺失的中间页表会被创建。
    /// 页帧耗尽时回收本次新建的空页表并返回 `None`。
    fn find_pte_create(&mut self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        let idxs = vpn.indexes();
        let mut path = [self.root_ppn; 3];
        let mut ppn = self.root_ppn;
        for (level, idx) in idxs.iter().enumerate() {
            path[level] = ppn;
            let pte = &mut ppn.get_pte_array()[*idx];
            if level == 2 {
                return Some(pte);
            }
            if !pte.is_valid() {
                let Some(frame) = self.pool.alloc() else {
                    self.reclaim_empty_tables(&path[..=level], &idxs);
                    return None;
                };
                *pte = PageTableEntry::new(frame.ppn, PTEFlags::V);
                self.frames.push(frame);
            }
            ppn = pte.ppn();
        }
        None
    }
    fn find_pte(&self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        let idxs = vpn.indexes();
        let mut ppn = self.root_ppn;
        for (level, idx) in idxs.iter().enumerate() {
            let pte = &mut ppn.get_pte_array()[*idx];
            if level == 2 {
                return Some(pte);
            }
            if !pte.is_valid() {
                return None;
            }
            ppn = pte.ppn();
        }
        None
    }
    /// 自底向上释放 `path` 上已经完全为空的中间页表，根页表除外
    fn reclaim_empty_tables(&mut self, path: &[PhysPageNum], idxs: &[usize; 3]) {
        for level in (1..path.len()).rev() {
            let table = path[level];
            if table.get_pte_array().iter().any(|pte| pte.is_valid()) {
                break;
            }
            path[level - 1].get_pte_array()[idxs[level - 1]] = PageTableEntry::empty();
            self.frames.retain(|frame| frame.ppn != table);
            trace!("page table: reclaimed empty table {:?}", table);
        }
    }
    /// 建立 `vpn` 到 `ppn` 的映射，已有映射时拒绝覆盖
    pub fn map(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, flags: PTEFlags) -> Result<(), MapError> {
        let pte = self.find_pte_create(vpn).ok_or(MapError::OutOfMemory)?;
        if pte.is_valid() {
            return Err(MapError::AlreadyMapped(vpn));
        }
        *pte = PageTableEntry::new(ppn, flags | PTEFlags::V);
        Ok(())
    }
    /// 移除 `vpn` 的映射并返回原页表项；本就没有映射时返回 `None`
    pub fn unmap(&mut self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        let idxs = vpn.indexes();
        let mut path = [self.root_ppn; 3];
        let mut ppn = self.root_ppn;
        for level in 0..3 {
            path[level] = ppn;
            let pte = &mut ppn.get_pte_array()[idxs[level]];
            if !pte.is_valid() {
                return None;
            }
            if level == 2 {
                let old = *pte;
                *pte = PageTableEntry::empty();
                self.reclaim_empty_tables(&path, &idxs);
                return Some(old);
            }
            ppn = pte.ppn();
        }
        None
    }
    /// 叶子页表存在时即返回其中的页表项，该项可能无效；
    /// 判断是否已映射还需检查 [`PageTableEntry::is_valid`]
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.find_pte(vpn).map(|pte| *pte)
    }
    pub fn translate_va(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.find_pte(va.floor()).map(|pte| {
            let aligned_pa: PhysAddr = pte.ppn().into();
            (aligned_pa.0 + va.page_offset()).into()
        })
    }
    /// satp 寄存器的值
    pub fn token(&self) -> usize {
        8usize << 60 | self.root_ppn.0
    }
    /// 当前页表占用的页帧数（包括根页表）
    pub fn table_frames(&self) -> usize {
        self.frames.len()
    }

    /// 按用户态权限找到 `va` 所在的物理页
    fn user_page(&self, va: VirtAddr, need: PTEFlags) -> Option<PhysPageNum> {
        self.translate(va.floor())
            .filter(|pte| pte.is_valid() && pte.flags().contains(PTEFlags::U | need))
            .map(|pte| pte.ppn())
    }
    /// 以用户身份从 `va` 读取 `buf.len()` 字节
    pub fn read_user(&self, va: usize, buf: &mut [u8]) -> Result<(), PageFault> {
        let mut done = 0;
        while done < buf.len() {
            let cur = VirtAddr::from(va.wrapping_add(done));
            let ppn = self
                .user_page(cur, PTEFlags::R)
                .ok_or(PageFault::Load(cur.0))?;
            let offset = cur.page_offset();
            let n = (PAGE_SIZE - offset).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&ppn.get_bytes_array()[offset..offset + n]);
            done += n;
        }
        Ok(())
    }
    /// 以用户身份向 `va` 写入 `data`，遇到不可写的页即停止
    pub fn write_user(&self, va: usize, data: &[u8]) -> Result<(), PageFault> {
        let mut done = 0;
        while done < data.len() {
            let cur = VirtAddr::from(va.wrapping_add(done));
            let ppn = self
                .user_page(cur, PTEFlags::W)
                .ok_or(PageFault::Store(cur.0))?;
            let offset = cur.page_offset();
            let n = (PAGE_SIZE - offset).min(data.len() - done);
            ppn.get_bytes_array()[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }
    /// 读取用户态以 `\0` 结尾的字节串（不含 `\0`），最多读取 `limit` 字节。
    /// 字节原样返回，由调用者决定如何解码。
    pub fn translated_bytes(&self, va: usize, limit: usize) -> Result<Vec<u8>, PageFault> {
        let mut bytes = Vec::new();
        let mut ch = [0u8; 1];
        for i in 0..limit {
            self.read_user(va.wrapping_add(i), &mut ch)?;
            if ch[0] == 0 {
                break;
            }
            bytes.push(ch[0]);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::frame_allocator::test_pool;

    const RW_USER: PTEFlags = PTEFlags::from_bits_truncate(0b1_0110);

    #[test]
    fn map_translate_unmap() {
        let pool = test_pool(8);
        let mut pt = PageTable::new(&pool).unwrap();
        let frame = pool.alloc().unwrap();
        let vpn = VirtAddr::from(0x4000).floor();
        pt.map(vpn, frame.ppn, RW_USER).unwrap();
        assert_eq!(pt.table_frames(), 3);
        let pte = pt.translate(vpn).unwrap();
        assert!(pte.is_valid() && pte.writable());
        assert_eq!(pte.ppn(), frame.ppn);
        assert_eq!(
            pt.translate_va(VirtAddr::from(0x4123)).unwrap().0,
            PhysAddr::from(frame.ppn).0 + 0x123
        );
        assert!(pt.unmap(vpn).is_some());
        assert!(pt.translate(vpn).is_none());
        assert!(pt.unmap(vpn).is_none());
    }

    #[test]
    fn empty_tables_are_reclaimed_on_unmap() {
        let pool = test_pool(8);
        let mut pt = PageTable::new(&pool).unwrap();
        let frame = pool.alloc().unwrap();
        let baseline = pool.available();
        let a = VirtPageNum(4);
        let b = VirtPageNum(5);
        pt.map(a, frame.ppn, RW_USER).unwrap();
        pt.map(b, frame.ppn, RW_USER).unwrap();
        assert_eq!(pool.available(), baseline - 2);
        pt.unmap(a);
        assert_eq!(pool.available(), baseline - 2);
        pt.unmap(b);
        assert_eq!(pool.available(), baseline);
        assert_eq!(pt.table_frames(), 1);
    }

    #[test]
    fn map_rejects_existing_mapping() {
        let pool = test_pool(8);
        let mut pt = PageTable::new(&pool).unwrap();
        let frame = pool.alloc().unwrap();
        pt.map(VirtPageNum(4), frame.ppn, RW_USER).unwrap();
        assert_eq!(
            pt.map(VirtPageNum(4), frame.ppn, RW_USER),
            Err(MapError::AlreadyMapped(VirtPageNum(4)))
        );
    }

    #[test]
    fn failed_map_leaves_no_tables_behind() {
        // 根页表 + 一个中间页表，叶子页表分配失败
        let pool = test_pool(2);
        let mut pt = PageTable::new(&pool).unwrap();
        assert_eq!(
            pt.map(VirtPageNum(4), PhysPageNum(0), RW_USER),
            Err(MapError::OutOfMemory)
        );
        assert_eq!(pool.available(), 1);
        assert_eq!(pt.table_frames(), 1);
    }

    #[test]
    fn user_access_honours_permissions() {
        let pool = test_pool(8);
        let mut pt = PageTable::new(&pool).unwrap();
        let rw = pool.alloc().unwrap();
        let ro = pool.alloc().unwrap();
        pt.map(VirtPageNum(4), rw.ppn, RW_USER).unwrap();
        pt.map(VirtPageNum(5), ro.ppn, PTEFlags::R | PTEFlags::U).unwrap();
        pt.map(VirtPageNum(6), rw.ppn, PTEFlags::R | PTEFlags::W).unwrap();

        // 跨页写入在只读页处停止
        assert_eq!(
            pt.write_user(0x4ffe, b"abcd"),
            Err(PageFault::Store(0x5000))
        );
        let mut buf = [0u8; 2];
        pt.read_user(0x4ffe, &mut buf).unwrap();
        assert_eq!(&buf, b"ab");
        // 内核页对用户不可见
        assert_eq!(pt.read_user(0x6000, &mut buf), Err(PageFault::Load(0x6000)));
        assert_eq!(pt.read_user(0x9000, &mut buf), Err(PageFault::Load(0x9000)));
    }

    #[test]
    fn translated_bytes_stop_at_nul_or_limit() {
        let pool = test_pool(8);
        let mut pt = PageTable::new(&pool).unwrap();
        let frame = pool.alloc().unwrap();
        pt.map(VirtPageNum(4), frame.ppn, RW_USER).unwrap();
        pt.write_user(0x4010, b"buf\0tail").unwrap();
        assert_eq!(pt.translated_bytes(0x4010, 64).unwrap(), b"buf");
        assert_eq!(pt.translated_bytes(0x4010, 2).unwrap(), b"bu");
        assert_eq!(pt.translated_bytes(0x8000, 4), Err(PageFault::Load(0x8000)));
        // 非 ASCII 字节不做任何转换
        pt.write_user(0x4020, "é\0".as_bytes()).unwrap();
        assert_eq!(pt.translated_bytes(0x4020, 64).unwrap(), "é".as_bytes());
    }
}
