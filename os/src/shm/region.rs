//! 共享对象 [`Region`] 及其页帧存储 [`FrameStorage`]
use crate::config::PAGE_SIZE;
use crate::mm::{FrameTracker, MapPermission};
use crate::task::EnvId;
use alloc::string::String;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

/// 页下标到物理页帧句柄的映射，每个页帧在此持有一份引用
pub struct FrameStorage {
    frames: Vec<FrameTracker>,
}

impl FrameStorage {
    /// 为 `pages` 个页帧预留空间；内核堆耗尽时无法继续
    pub fn with_capacity(pages: usize) -> Self {
        let mut frames = Vec::new();
        if frames.try_reserve_exact(pages).is_err() {
            panic!("Kernel runs out of memory: can't create the frames storage");
        }
        Self { frames }
    }
    /// 记录下一页（下标即当前长度）的页帧
    pub fn push(&mut self, frame: FrameTracker) {
        self.frames.push(frame);
    }
    pub fn get(&self, index: usize) -> Option<&FrameTracker> {
        self.frames.get(index)
    }
    pub fn frames(&self) -> &[FrameTracker] {
        &self.frames
    }
    pub fn len(&self) -> usize {
        self.frames.len()
    }
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
    /// 交还所有页帧句柄，没有其他持有者的页帧随即被回收
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// 一个具名、按所有者区分、带引用计数的共享对象
pub struct Region {
    owner: EnvId,
    name: String,
    size: usize,
    writable: bool,
    inner: Mutex<RegionInner>,
}

/// 会随映射变化的部分，由每个共享对象自己的锁保护
pub struct RegionInner {
    /// 当前存活的映射数；为 0 表示已被回收
    pub references: usize,
    pub storage: FrameStorage,
}

impl Region {
    /// 大小由 `storage` 的页数决定，初始引用为创建者自己的映射
    pub fn new(owner: EnvId, name: &str, writable: bool, storage: FrameStorage) -> Self {
        Self {
            owner,
            name: String::from(name),
            size: storage.len() * PAGE_SIZE,
            writable,
            inner: Mutex::new(RegionInner {
                references: 1,
                storage,
            }),
        }
    }
    pub fn owner(&self) -> EnvId {
        self.owner
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn writable(&self) -> bool {
        self.writable
    }
    pub fn page_count(&self) -> usize {
        self.size / PAGE_SIZE
    }
    /// 其他环境映射该对象时使用的权限，写权限只取决于 `writable`
    pub fn map_permission(&self) -> MapPermission {
        if self.writable {
            MapPermission::R | MapPermission::W | MapPermission::U
        } else {
            MapPermission::R | MapPermission::U
        }
    }
    pub fn lock(&self) -> MutexGuard<'_, RegionInner> {
        self.inner.lock()
    }
}
