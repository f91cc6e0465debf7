//! 环境编号的分配与回收
use super::EnvId;
use alloc::vec::Vec;
use lazy_static::*;
use spin::Mutex;

/// 回收分配器，优先复用被回收的编号
pub struct RecycleAllocator {
    current: usize,
    recycled: Vec<usize>,
}

impl RecycleAllocator {
    /// 编号从 1 开始，0 表示“没有这个环境”
    pub fn new() -> Self {
        RecycleAllocator {
            current: 1,
            recycled: Vec::new(),
        }
    }
    pub fn alloc(&mut self) -> usize {
        if let Some(id) = self.recycled.pop() {
            id
        } else {
            self.current += 1;
            self.current - 1
        }
    }
    pub fn dealloc(&mut self, id: usize) {
        assert!(id < self.current);
        assert!(
            !self.recycled.iter().any(|i| *i == id),
            "id {} has been deallocated!",
            id
        );
        self.recycled.push(id);
    }
}

impl Default for RecycleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref ENV_ID_ALLOCATOR: Mutex<RecycleAllocator> = Mutex::new(RecycleAllocator::new());
}

/// 环境编号句柄，释放时归还编号
pub struct EnvIdHandle(pub EnvId);

impl Drop for EnvIdHandle {
    fn drop(&mut self) {
        ENV_ID_ALLOCATOR.lock().dealloc(self.0);
    }
}

pub fn env_id_alloc() -> EnvIdHandle {
    EnvIdHandle(ENV_ID_ALLOCATOR.lock().alloc())
}
