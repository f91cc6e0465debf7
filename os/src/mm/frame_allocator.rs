//! 物理页帧分配器 [`FramePool`] 与带引用计数的页帧句柄 [`FrameTracker`]。
//!
//! 同一物理页帧可以被多个地址空间同时映射：每个映射都持有一个
//! [`FrameTracker`]，分配器为每个页帧维护独立的引用计数，
//! 最后一个句柄被销毁时页帧才回到空闲栈。
#[cfg(any(test, target_os = "none"))]
use super::PhysAddr;
use super::PhysPageNum;
#[cfg(target_os = "none")]
use crate::config::MEMORY_END;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::{self, Debug, Formatter};
use lazy_static::*;
use spin::Mutex;

/// 物理页帧的 RAII 句柄
pub struct FrameTracker {
    /// 物理页号
    pub ppn: PhysPageNum,
    pool: FramePool,
}

impl FrameTracker {
    /// 新分配的页帧，清零后交给调用者
    fn new(ppn: PhysPageNum, pool: FramePool) -> Self {
        ppn.get_bytes_array().fill(0);
        Self { ppn, pool }
    }
    /// 再持有一份同一页帧，引用计数加一
    pub fn share(&self) -> Self {
        self.pool.inner.lock().share(self.ppn);
        Self {
            ppn: self.ppn,
            pool: self.pool.clone(),
        }
    }
    /// 该页帧当前的句柄数
    pub fn ref_count(&self) -> usize {
        self.pool.ref_count(self.ppn)
    }
}

impl Debug for FrameTracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("FrameTracker:PPN={:#x}", self.ppn.0))
    }
}

impl Drop for FrameTracker {
    fn drop(&mut self) {
        self.pool.inner.lock().dealloc(self.ppn);
    }
}

trait FrameAllocator {
    fn new() -> Self;
    fn alloc(&mut self) -> Option<PhysPageNum>;
    fn share(&mut self, ppn: PhysPageNum);
    fn dealloc(&mut self, ppn: PhysPageNum);
}

/// 栈式分配：优先复用回收的页帧，否则从未分配区间的低端取
pub struct StackFrameAllocator {
    base: usize,
    current: usize,
    end: usize,
    recycled: Vec<usize>,
    refs: Vec<u32>,
}

impl StackFrameAllocator {
    pub fn init(&mut self, l: PhysPageNum, r: PhysPageNum) {
        self.base = l.0;
        self.current = l.0;
        self.end = r.0;
        self.recycled.clear();
        self.refs = vec![0; r.0 - l.0];
        trace!("frame allocator: [{:?}, {:?}), {} frames", l, r, r.0 - l.0);
    }
    fn available(&self) -> usize {
        self.end - self.current + self.recycled.len()
    }
    fn ref_count(&self, ppn: PhysPageNum) -> usize {
        ppn.0
            .checked_sub(self.base)
            .and_then(|i| self.refs.get(i))
            .map_or(0, |&n| n as usize)
    }
    fn refs_mut(&mut self, ppn: PhysPageNum) -> &mut u32 {
        match ppn.0.checked_sub(self.base).and_then(|i| self.refs.get_mut(i)) {
            Some(n) => n,
            None => panic!("Frame ppn={:#x} is not managed by this allocator!", ppn.0),
        }
    }
}

impl FrameAllocator for StackFrameAllocator {
    fn new() -> Self {
        Self {
            base: 0,
            current: 0,
            end: 0,
            recycled: Vec::new(),
            refs: Vec::new(),
        }
    }
    fn alloc(&mut self) -> Option<PhysPageNum> {
        let ppn = if let Some(ppn) = self.recycled.pop() {
            ppn
        } else if self.current == self.end {
            return None;
        } else {
            self.current += 1;
            self.current - 1
        };
        *self.refs_mut(PhysPageNum(ppn)) = 1;
        Some(ppn.into())
    }
    fn share(&mut self, ppn: PhysPageNum) {
        let refs = self.refs_mut(ppn);
        assert!(*refs > 0, "Frame ppn={:#x} has not been allocated!", ppn.0);
        *refs += 1;
    }
    fn dealloc(&mut self, ppn: PhysPageNum) {
        let refs = self.refs_mut(ppn);
        if *refs == 0 {
            panic!("Frame ppn={:#x} has not been allocated!", ppn.0);
        }
        *refs -= 1;
        if *refs == 0 {
            self.recycled.push(ppn.0);
        }
    }
}

type FrameAllocatorImpl = StackFrameAllocator;

/// 可克隆的物理页帧池句柄，内部由自旋锁保护
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<Mutex<FrameAllocatorImpl>>,
}

impl FramePool {
    /// 空的页帧池，需要 [`FramePool::init`] 后才能分配
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FrameAllocatorImpl::new())),
        }
    }
    /// 交给页帧池管理的物理页区间 `[l, r)`
    pub fn init(&self, l: PhysPageNum, r: PhysPageNum) {
        self.inner.lock().init(l, r);
    }
    /// 分配一个清零的页帧，引用计数为 1
    pub fn alloc(&self) -> Option<FrameTracker> {
        let ppn = self.inner.lock().alloc()?;
        Some(FrameTracker::new(ppn, self.clone()))
    }
    /// 空闲页帧数
    pub fn available(&self) -> usize {
        self.inner.lock().available()
    }
    /// 页帧的引用计数，空闲或不受管理的页帧为 0
    pub fn ref_count(&self, ppn: PhysPageNum) -> usize {
        self.inner.lock().ref_count(ppn)
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// 内核全局页帧池
    pub static ref FRAME_ALLOCATOR: FramePool = FramePool::new();
}

/// 以 `ekernel` 到 `MEMORY_END` 之间的物理内存初始化全局页帧池
#[cfg(target_os = "none")]
pub fn init_frame_allocator() {
    extern "C" {
        fn ekernel();
    }
    FRAME_ALLOCATOR.init(
        PhysAddr::from(ekernel as usize).ceil(),
        PhysAddr::from(MEMORY_END).floor(),
    );
}

/// 宿主机测试用：以泄漏的页对齐堆内存模拟 `frames` 个物理页帧
#[cfg(test)]
pub(crate) fn test_pool(frames: usize) -> FramePool {
    use crate::config::PAGE_SIZE;
    use std::alloc::{alloc_zeroed, Layout};
    let layout = Layout::from_size_align(frames * PAGE_SIZE, PAGE_SIZE).unwrap();
    let base = unsafe { alloc_zeroed(layout) } as usize;
    assert_ne!(base, 0);
    let pool = FramePool::new();
    pool.init(
        PhysAddr::from(base).floor(),
        PhysAddr::from(base + frames * PAGE_SIZE).floor(),
    );
    pool
}
