//! 共享内存的创建、查询、获取与释放
//!
//! 锁的层次：调用者先锁住自己的 [`MemorySet`]，再取共享对象表的锁，
//! 最后取单个共享对象的锁。释放共享对象时先放开对象锁再取表锁，
//! 因而两把锁从不以相反的顺序嵌套。
use super::registry::Registry;
use super::{FrameStorage, Region, ShmError};
use crate::config::{MAX_SHARES, PAGE_SIZE, SHARES_GROWABLE, SHARE_NAME_MAX, USER_SPACE_END};
use crate::mm::{page_count, FramePool, MapPermission, MemorySet, VirtAddr};
use crate::task::EnvId;
use alloc::string::String;
use alloc::sync::Arc;
use spin::Mutex;

/// 共享对象表的运行时配置
#[derive(Debug, Clone, Copy)]
pub struct ShmConfig {
    /// 初始槽位数
    pub capacity: usize,
    /// 槽位用尽时是否倍增
    pub growable: bool,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_SHARES,
            growable: SHARES_GROWABLE,
        }
    }
}

/// 某个共享对象的快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub id: usize,
    pub owner: EnvId,
    pub name: String,
    pub size: usize,
    pub writable: bool,
    pub references: usize,
    pub frames: usize,
}

pub struct SharedMemoryManager {
    pool: FramePool,
    registry: Mutex<Registry>,
}

impl SharedMemoryManager {
    pub fn new(pool: FramePool, config: ShmConfig) -> Self {
        Self {
            pool,
            registry: Mutex::new(Registry::new(config.capacity, config.growable)),
        }
    }

    /// 创建共享对象 `name`，分配新页帧并以可写权限映射到调用者的 `space`。
    ///
    /// 创建者总能写自己的对象，`writable` 只约束之后通过 [`get`](Self::get)
    /// 映射它的环境。任何一步失败都会撤销已做的分配与映射并交还槽位。
    pub fn create(
        &self,
        space: &mut MemorySet,
        owner: EnvId,
        name: &str,
        size: usize,
        writable: bool,
        va: usize,
    ) -> Result<usize, ShmError> {
        check_name(name)?;
        if size == 0 {
            return Err(ShmError::InvalidSize);
        }
        let pages = page_count(size);
        let start_va = check_range(va, pages)?;

        let mut registry = self.registry.lock();
        if registry.find(owner, name).is_some() {
            return Err(ShmError::AlreadyExists);
        }
        let id = registry.allocate_slot()?;
        let storage = match self.alloc_storage(pages) {
            Ok(storage) => storage,
            Err(err) => {
                registry.release(id)?;
                warn!("shm: create {}:{:?} needs {} frames: {}", owner, name, pages, err);
                return Err(err);
            }
        };
        let creator = MapPermission::R | MapPermission::W | MapPermission::U;
        if let Err(err) = space.map_shared(id, start_va, storage.frames(), creator) {
            registry.release(id)?;
            warn!("shm: create {}:{:?} at {:?} rolled back: {:?}", owner, name, start_va, err);
            return Err(err.into());
        }
        registry.install(id, Arc::new(Region::new(owner, name, writable, storage)));
        info!(
            "shm: created #{} {}:{:?}, {} pages, writable={}",
            id, owner, name, pages, writable
        );
        Ok(id)
    }

    /// 逐页分配页帧，中途失败时已分配的页帧随 `storage` 一起归还
    fn alloc_storage(&self, pages: usize) -> Result<FrameStorage, ShmError> {
        if pages > self.pool.available() {
            return Err(ShmError::OutOfMemory);
        }
        let mut storage = FrameStorage::with_capacity(pages);
        for _ in 0..pages {
            let frame = self.pool.alloc().ok_or(ShmError::OutOfMemory)?;
            trace!("shm: page {} -> {:?}", storage.len(), frame);
            storage.push(frame);
        }
        Ok(storage)
    }

    /// 共享对象的字节数（已按页向上取整）
    pub fn size_of(&self, owner: EnvId, name: &str) -> Result<usize, ShmError> {
        let registry = self.registry.lock();
        let id = registry.find(owner, name).ok_or(ShmError::NotFound)?;
        registry
            .get(id)
            .map(|region| region.size())
            .ok_or(ShmError::NotFound)
    }

    /// 把 `owner` 的共享对象 `name` 的页帧映射到调用者 `space` 的 `va` 处。
    ///
    /// 写权限完全由共享对象的 `writable` 决定，与调用者是谁无关。
    pub fn get(
        &self,
        space: &mut MemorySet,
        owner: EnvId,
        name: &str,
        va: usize,
    ) -> Result<usize, ShmError> {
        let (id, region) = {
            let registry = self.registry.lock();
            let id = registry.find(owner, name).ok_or(ShmError::NotFound)?;
            let region = registry.get(id).cloned().ok_or(ShmError::NotFound)?;
            (id, region)
        };
        let start_va = check_range(va, region.page_count())?;
        let mut inner = region.lock();
        // 查找之后可能已被最后一个持有者释放
        if inner.references == 0 {
            return Err(ShmError::NotFound);
        }
        space.map_shared(id, start_va, inner.storage.frames(), region.map_permission())?;
        inner.references += 1;
        debug!(
            "shm: mapped #{} {}:{:?} at {:?}, references={}",
            id, owner, name, start_va, inner.references
        );
        Ok(id)
    }

    /// 撤销调用者在 `va` 处对共享对象 `id` 的映射；最后一个映射消失时回收对象。
    pub fn free(&self, space: &mut MemorySet, id: usize, va: usize) -> Result<(), ShmError> {
        let region = self
            .registry
            .lock()
            .get(id)
            .cloned()
            .ok_or(ShmError::NotFound)?;
        let mut inner = region.lock();
        if inner.references == 0 {
            return Err(ShmError::NotFound);
        }
        if va % PAGE_SIZE != 0 || va >= USER_SPACE_END {
            return Err(ShmError::NotMapped);
        }
        let range = space
            .unmap_shared(id, VirtAddr::from(va))
            .ok_or(ShmError::NotMapped)?;
        // 页帧可能马上被回收，先让旧的地址转换失效
        space.flush_tlb(range);
        inner.references -= 1;
        let last = inner.references == 0;
        debug!("shm: unmapped #{} at {:#x}, references={}", id, va, inner.references);
        drop(inner);
        if last {
            let mut registry = self.registry.lock();
            if registry.get(id).is_some_and(|live| Arc::ptr_eq(live, &region)) {
                registry.release(id)?;
                info!("shm: reclaimed #{} {}:{:?}", id, region.owner(), region.name());
            }
        }
        Ok(())
    }

    /// 释放 `space` 中所有共享映射，返回成功释放的个数。环境退出时调用。
    pub fn free_all(&self, space: &mut MemorySet) -> usize {
        space
            .shared_areas()
            .into_iter()
            .filter(|&(id, va)| self.free(space, id, va.0).is_ok())
            .count()
    }

    pub fn info(&self, id: usize) -> Option<RegionInfo> {
        let registry = self.registry.lock();
        let region = registry.get(id)?;
        let inner = region.lock();
        Some(RegionInfo {
            id,
            owner: region.owner(),
            name: String::from(region.name()),
            size: region.size(),
            writable: region.writable(),
            references: inner.references,
            frames: inner.storage.len(),
        })
    }

    /// 存活的共享对象数
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 共享对象表当前的槽位数
    pub fn capacity(&self) -> usize {
        self.registry.lock().capacity()
    }
}

fn check_name(name: &str) -> Result<(), ShmError> {
    if name.is_empty() || name.len() > SHARE_NAME_MAX {
        return Err(ShmError::InvalidName);
    }
    Ok(())
}

/// 起始地址页对齐，且 `pages` 页全部落在用户地址空间内
fn check_range(va: usize, pages: usize) -> Result<VirtAddr, ShmError> {
    if va % PAGE_SIZE != 0 {
        return Err(ShmError::InvalidAddress);
    }
    pages
        .checked_mul(PAGE_SIZE)
        .and_then(|len| va.checked_add(len))
        .filter(|&end| end <= USER_SPACE_END)
        .map(|_| VirtAddr::from(va))
        .ok_or(ShmError::InvalidAddress)
}
