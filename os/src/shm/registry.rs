//! 共享对象表
//!
//! 槽位按下标稳定寻址，只增不减；下标即对外的共享对象号。
//! 另有 (所有者, 名字) 到下标的哈希索引，查找不必扫描整张表。
use super::{Region, ShmError};
use crate::task::EnvId;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;

enum Slot {
    Free,
    /// 已分配但尚未填好，查找不到
    Reserved,
    Live(Arc<Region>),
}

pub struct Registry {
    slots: Vec<Slot>,
    names: HashMap<EnvId, HashMap<String, usize>>,
    growable: bool,
}

impl Registry {
    /// 建立 `capacity` 个空槽位的表；启动阶段分配失败则内核无法继续
    pub fn new(capacity: usize, growable: bool) -> Self {
        let mut slots = Vec::new();
        if slots.try_reserve_exact(capacity).is_err() {
            panic!("Kernel runs out of memory: can't create the array of shared objects");
        }
        slots.resize_with(capacity, || Slot::Free);
        Self {
            slots,
            names: HashMap::new(),
            growable,
        }
    }
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
    /// 存活的共享对象数
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// 占用第一个空槽位；表满时按配置倍增，否则返回 [`ShmError::NoCapacity`]
    pub fn allocate_slot(&mut self) -> Result<usize, ShmError> {
        let index = match self.slots.iter().position(|slot| matches!(slot, Slot::Free)) {
            Some(index) => index,
            None => self.grow()?,
        };
        self.slots[index] = Slot::Reserved;
        Ok(index)
    }
    /// 容量翻倍，返回新增部分的第一个下标
    fn grow(&mut self) -> Result<usize, ShmError> {
        let old = self.slots.len();
        if !self.growable {
            warn!("shm: registry full ({} slots)", old);
            return Err(ShmError::NoCapacity);
        }
        let new = (old * 2).max(1);
        if self.slots.try_reserve_exact(new - old).is_err() {
            warn!("shm: registry can't grow beyond {} slots", old);
            return Err(ShmError::NoCapacity);
        }
        self.slots.resize_with(new, || Slot::Free);
        debug!("shm: registry grown to {} slots", new);
        Ok(old)
    }
    /// 把构造完整的共享对象放入预留的槽位，此后才能被查找到
    pub fn install(&mut self, index: usize, region: Arc<Region>) {
        debug_assert!(matches!(self.slots[index], Slot::Reserved));
        self.names
            .entry(region.owner())
            .or_default()
            .insert(String::from(region.name()), index);
        self.slots[index] = Slot::Live(region);
    }
    pub fn find(&self, owner: EnvId, name: &str) -> Option<usize> {
        self.names.get(&owner)?.get(name).copied()
    }
    pub fn get(&self, index: usize) -> Option<&Arc<Region>> {
        match self.slots.get(index)? {
            Slot::Live(region) => Some(region),
            _ => None,
        }
    }
    /// 清空槽位并交还其页帧；下标越界返回 [`ShmError::NotFound`]，
    /// 空槽位视为已释放
    pub fn release(&mut self, index: usize) -> Result<(), ShmError> {
        let slot = self.slots.get_mut(index).ok_or(ShmError::NotFound)?;
        if let Slot::Live(region) = core::mem::replace(slot, Slot::Free) {
            let mut inner = region.lock();
            inner.references = 0;
            inner.storage.clear();
            drop(inner);
            if let Some(names) = self.names.get_mut(&region.owner()) {
                names.remove(region.name());
                if names.is_empty() {
                    self.names.remove(&region.owner());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::FrameStorage;

    fn empty_region(owner: EnvId, name: &str) -> Arc<Region> {
        Arc::new(Region::new(owner, name, true, FrameStorage::with_capacity(0)))
    }

    #[test]
    fn slots_are_handed_out_lowest_first() {
        let mut registry = Registry::new(3, false);
        assert_eq!(registry.allocate_slot(), Ok(0));
        assert_eq!(registry.allocate_slot(), Ok(1));
        registry.release(0).unwrap();
        assert_eq!(registry.allocate_slot(), Ok(0));
        assert_eq!(registry.allocate_slot(), Ok(2));
        assert_eq!(registry.allocate_slot(), Err(ShmError::NoCapacity));
        assert_eq!(registry.capacity(), 3);
    }

    #[test]
    fn full_table_doubles_when_growable() {
        let mut registry = Registry::new(2, true);
        registry.allocate_slot().unwrap();
        registry.allocate_slot().unwrap();
        assert_eq!(registry.allocate_slot(), Ok(2));
        assert_eq!(registry.capacity(), 4);

        let mut registry = Registry::new(0, true);
        assert_eq!(registry.allocate_slot(), Ok(0));
        assert_eq!(registry.capacity(), 1);
    }

    #[test]
    fn reserved_slot_is_not_visible() {
        let mut registry = Registry::new(2, false);
        let index = registry.allocate_slot().unwrap();
        assert!(registry.get(index).is_none());
        assert!(registry.is_empty());
        registry.install(index, empty_region(7, "buf"));
        assert_eq!(registry.find(7, "buf"), Some(index));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn find_matches_owner_and_name() {
        let mut registry = Registry::new(4, false);
        for (owner, name) in [(7, "buf"), (9, "buf"), (7, "count")] {
            let index = registry.allocate_slot().unwrap();
            registry.install(index, empty_region(owner, name));
        }
        assert_eq!(registry.find(7, "buf"), Some(0));
        assert_eq!(registry.find(9, "buf"), Some(1));
        assert_eq!(registry.find(7, "count"), Some(2));
        assert_eq!(registry.find(9, "count"), None);
        assert_eq!(registry.find(8, "buf"), None);
    }

    #[test]
    fn release_checks_range_only() {
        let mut registry = Registry::new(2, false);
        let index = registry.allocate_slot().unwrap();
        let region = empty_region(7, "buf");
        registry.install(index, region.clone());
        assert_eq!(registry.release(5), Err(ShmError::NotFound));
        assert_eq!(registry.release(index), Ok(()));
        assert_eq!(region.lock().references, 0);
        assert_eq!(registry.find(7, "buf"), None);
        assert_eq!(registry.release(index), Ok(()));
        assert_eq!(registry.release(1), Ok(()));
    }
}
