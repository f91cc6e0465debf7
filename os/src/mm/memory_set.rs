//! 地址空间 [`MemorySet`] 与映射区域 [`MapArea`] 的实现
use super::{FramePool, FrameTracker, MapError, PTEFlags, PageFault, PageTable, PageTableEntry};
use super::{VPNRange, VirtAddr, VirtPageNum};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use bitflags::bitflags;

/// 一个环境的地址空间
pub struct MemorySet {
    page_table: PageTable,
    areas: Vec<MapArea>,
    pool: FramePool,
}

impl MemorySet {
    /// 只含根页表的空地址空间
    pub fn new_bare(pool: &FramePool) -> Option<Self> {
        Some(Self {
            page_table: PageTable::new(pool)?,
            areas: Vec::new(),
            pool: pool.clone(),
        })
    }
    pub fn token(&self) -> usize {
        self.page_table.token()
    }
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }
    /// 映射一段私有的、由新页帧支撑的区域；失败时不留下任何映射
    pub fn insert_framed_area(
        &mut self,
        start_va: VirtAddr,
        end_va: VirtAddr,
        permission: MapPermission,
    ) -> Result<(), MapError> {
        let mut area = MapArea::new(start_va, end_va, MapType::Framed, permission);
        area.map_framed(&mut self.page_table, &self.pool)?;
        self.areas.push(area);
        Ok(())
    }
    /// 从 `start_va` 起依次映射共享对象 `region` 的页帧，每页持有一份句柄。
    /// 任一页失败都会撤销本次已建立的映射。
    pub fn map_shared(
        &mut self,
        region: usize,
        start_va: VirtAddr,
        frames: &[FrameTracker],
        permission: MapPermission,
    ) -> Result<(), MapError> {
        let end_va: VirtAddr = start_va.floor().add(frames.len()).into();
        let mut area = MapArea::new(start_va, end_va, MapType::Shared(region), permission);
        area.map_shared(&mut self.page_table, frames)?;
        self.areas.push(area);
        Ok(())
    }
    /// 撤销起始于 `start_va` 的共享对象 `region` 的映射，返回被撤销的页区间
    pub fn unmap_shared(&mut self, region: usize, start_va: VirtAddr) -> Option<VPNRange> {
        let start_vpn = start_va.floor();
        let idx = self.areas.iter().position(|area| {
            area.map_type == MapType::Shared(region) && area.vpn_range.get_start() == start_vpn
        })?;
        let mut area = self.areas.remove(idx);
        area.unmap(&mut self.page_table);
        Some(area.vpn_range)
    }
    /// 当前所有共享映射：(共享对象号, 起始地址)
    pub fn shared_areas(&self) -> Vec<(usize, VirtAddr)> {
        self.areas
            .iter()
            .filter_map(|area| match area.map_type {
                MapType::Shared(region) => Some((region, VirtAddr::from(area.vpn_range.get_start()))),
                MapType::Framed => None,
            })
            .collect()
    }
    /// 同 [`PageTable::translate`]：返回的页表项可能无效
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.page_table.translate(vpn)
    }
    pub fn read_user(&self, va: usize, buf: &mut [u8]) -> Result<(), PageFault> {
        self.page_table.read_user(va, buf)
    }
    pub fn write_user(&self, va: usize, data: &[u8]) -> Result<(), PageFault> {
        self.page_table.write_user(va, data)
    }
    pub fn translated_bytes(&self, va: usize, limit: usize) -> Result<Vec<u8>, PageFault> {
        self.page_table.translated_bytes(va, limit)
    }
    /// 写入 satp 切换到该地址空间
    #[cfg(target_arch = "riscv64")]
    pub fn activate(&self) {
        let satp = self.page_table.token();
        unsafe {
            riscv::register::satp::write(satp);
            core::arch::asm!("sfence.vma");
        }
    }
    /// 使 `range` 内各页的 TLB 项失效
    pub fn flush_tlb(&self, range: VPNRange) {
        for vpn in range {
            let va: VirtAddr = vpn.into();
            #[cfg(target_arch = "riscv64")]
            unsafe {
                core::arch::asm!("sfence.vma {0}, zero", in(reg) va.0);
            }
            trace!("tlb: flush {:?}", va);
        }
    }
    /// 撤销全部区域，归还其页帧句柄
    pub fn recycle_data_pages(&mut self) {
        for mut area in self.areas.drain(..) {
            area.unmap(&mut self.page_table);
        }
    }
}

/// 一段连续的虚拟页区域
pub struct MapArea {
    vpn_range: VPNRange,
    data_frames: BTreeMap<VirtPageNum, FrameTracker>,
    map_type: MapType,
    map_perm: MapPermission,
}

impl MapArea {
    pub fn new(
        start_va: VirtAddr,
        end_va: VirtAddr,
        map_type: MapType,
        map_perm: MapPermission,
    ) -> Self {
        Self {
            vpn_range: VPNRange::new(start_va.floor(), end_va.ceil()),
            data_frames: BTreeMap::new(),
            map_type,
            map_perm,
        }
    }
    /// 页表拒绝时 `frame` 随之销毁，引用计数复原
    fn map_one(
        &mut self,
        page_table: &mut PageTable,
        vpn: VirtPageNum,
        frame: FrameTracker,
    ) -> Result<(), MapError> {
        let pte_flags = PTEFlags::from_bits_truncate(self.map_perm.bits());
        page_table.map(vpn, frame.ppn, pte_flags)?;
        self.data_frames.insert(vpn, frame);
        Ok(())
    }
    fn map_framed(&mut self, page_table: &mut PageTable, pool: &FramePool) -> Result<(), MapError> {
        for vpn in self.vpn_range {
            let result = match pool.alloc() {
                Some(frame) => self.map_one(page_table, vpn, frame),
                None => Err(MapError::OutOfMemory),
            };
            if let Err(err) = result {
                self.unmap(page_table);
                return Err(err);
            }
        }
        Ok(())
    }
    fn map_shared(&mut self, page_table: &mut PageTable, frames: &[FrameTracker]) -> Result<(), MapError> {
        for (vpn, frame) in self.vpn_range.into_iter().zip(frames) {
            if let Err(err) = self.map_one(page_table, vpn, frame.share()) {
                self.unmap(page_table);
                return Err(err);
            }
        }
        Ok(())
    }
    /// 只撤销本区域建立过的映射，先清页表项再释放句柄
    fn unmap(&mut self, page_table: &mut PageTable) -> usize {
        let frames = core::mem::take(&mut self.data_frames);
        let count = frames.len();
        for (vpn, _frame) in frames {
            page_table.unmap(vpn);
        }
        count
    }
}

/// 映射类型：私有页帧，或共享对象的页帧
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MapType {
    Framed,
    /// 附带共享对象号
    Shared(usize),
}

bitflags! {
    /// 映射权限，与页表项中的 `R W X U` 位一致
    pub struct MapPermission: u8 {
        /// 可读
        const R = 1 << 1;
        /// 可写
        const W = 1 << 2;
        /// 可执行
        const X = 1 << 3;
        /// 用户态可访问
        const U = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::frame_allocator::test_pool;

    fn rw_user() -> MapPermission {
        MapPermission::R | MapPermission::W | MapPermission::U
    }

    #[test]
    fn framed_area_is_private_and_writable() {
        let pool = test_pool(16);
        let mut ms = MemorySet::new_bare(&pool).unwrap();
        ms.insert_framed_area(VirtAddr::from(0x1000), VirtAddr::from(0x3000), rw_user())
            .unwrap();
        ms.write_user(0x1ffe, b"span").unwrap();
        let mut buf = [0u8; 4];
        ms.read_user(0x1ffe, &mut buf).unwrap();
        assert_eq!(&buf, b"span");
        assert!(ms.shared_areas().is_empty());
    }

    #[test]
    fn shared_mapping_holds_one_reference_per_page() {
        let pool = test_pool(16);
        let mut ms = MemorySet::new_bare(&pool).unwrap();
        let frames: Vec<_> = (0..2).map(|_| pool.alloc().unwrap()).collect();
        let ro = MapPermission::R | MapPermission::U;
        ms.map_shared(3, VirtAddr::from(0x4000), &frames, ro).unwrap();
        assert!(frames.iter().all(|f| f.ref_count() == 2));
        assert_eq!(ms.shared_areas(), [(3, VirtAddr::from(0x4000))]);
        assert_eq!(ms.write_user(0x4000, b"x"), Err(PageFault::Store(0x4000)));

        assert!(ms.unmap_shared(4, VirtAddr::from(0x4000)).is_none());
        assert!(ms.unmap_shared(3, VirtAddr::from(0x5000)).is_none());
        let range = ms.unmap_shared(3, VirtAddr::from(0x4000)).unwrap();
        assert_eq!(range.get_start(), VirtPageNum(4));
        assert_eq!(range.get_end(), VirtPageNum(6));
        assert!(frames.iter().all(|f| f.ref_count() == 1));
        // 中间页表随之回收
        assert!(ms.translate(VirtPageNum(4)).is_none());
    }

    #[test]
    fn conflicting_shared_mapping_is_rolled_back() {
        let pool = test_pool(16);
        let mut ms = MemorySet::new_bare(&pool).unwrap();
        ms.insert_framed_area(VirtAddr::from(0x5000), VirtAddr::from(0x6000), rw_user())
            .unwrap();
        ms.write_user(0x5000, b"mine").unwrap();
        let frames: Vec<_> = (0..3).map(|_| pool.alloc().unwrap()).collect();
        let before = pool.available();

        assert_eq!(
            ms.map_shared(1, VirtAddr::from(0x4000), &frames, rw_user()),
            Err(MapError::AlreadyMapped(VirtPageNum(5)))
        );
        assert!(frames.iter().all(|f| f.ref_count() == 1));
        // 0x5000 仍占用同一张叶子页表，被撤销的页表项留在其中但无效
        assert!(ms.translate(VirtPageNum(4)).map_or(true, |pte| !pte.is_valid()));
        assert_eq!(pool.available(), before);
        let mut buf = [0u8; 4];
        ms.read_user(0x5000, &mut buf).unwrap();
        assert_eq!(&buf, b"mine");
    }

    #[test]
    fn framed_area_out_of_frames_leaves_nothing() {
        let pool = test_pool(4);
        let mut ms = MemorySet::new_bare(&pool).unwrap();
        assert_eq!(
            ms.insert_framed_area(VirtAddr::from(0x1000), VirtAddr::from(0x4000), rw_user()),
            Err(MapError::OutOfMemory)
        );
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn recycle_returns_every_frame() {
        let pool = test_pool(16);
        let mut ms = MemorySet::new_bare(&pool).unwrap();
        let baseline = pool.available();
        ms.insert_framed_area(VirtAddr::from(0x1000), VirtAddr::from(0x3000), rw_user())
            .unwrap();
        let frames: Vec<_> = (0..2).map(|_| pool.alloc().unwrap()).collect();
        ms.map_shared(0, VirtAddr::from(0x40_0000), &frames, rw_user()).unwrap();
        drop(frames);
        assert!(pool.available() < baseline);
        ms.recycle_data_pages();
        assert_eq!(pool.available(), baseline);
    }
}
