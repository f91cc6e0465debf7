//! 内存管理
//!
//! 针对 RV64 SV39 实现物理页帧分配器、页表、映射区域以及地址空间。
//! 每个环境都有一个 [`MemorySet`] 管理其虚拟内存；
//! 共享对象的页帧以 [`FrameTracker`] 句柄的形式同时出现在多个地址空间中。

mod address;
mod frame_allocator;
#[cfg(target_os = "none")]
mod heap_allocator;
mod memory_set;
mod page_table;

pub use address::{page_count, PhysAddr, PhysPageNum, StepByOne, VPNRange, VirtAddr, VirtPageNum};
#[cfg(test)]
pub(crate) use frame_allocator::test_pool;
pub use frame_allocator::{FramePool, FrameTracker, FRAME_ALLOCATOR};
pub use memory_set::{MapArea, MapPermission, MapType, MemorySet};
pub use page_table::{MapError, PTEFlags, PageFault, PageTable, PageTableEntry};

/// 初始化内核堆与全局页帧池
pub fn init() {
    #[cfg(target_os = "none")]
    {
        heap_allocator::init_heap();
        frame_allocator::init_frame_allocator();
    }
    info!("mm: {} frames available", FRAME_ALLOCATOR.available());
}
