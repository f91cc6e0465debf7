//! 环境控制块
use super::{env_id_alloc, EnvId, EnvIdHandle};
use crate::mm::{FramePool, MemorySet};
use crate::shm::SharedMemoryManager;
use spin::{Mutex, MutexGuard};

/// 一个环境：编号、父环境以及独立的地址空间
pub struct EnvControlBlock {
    env_id: EnvIdHandle,
    parent: Option<EnvId>,
    memory_set: Mutex<MemorySet>,
}

impl EnvControlBlock {
    /// 从 `pool` 分配根页表建立空地址空间；页帧耗尽时返回 `None`
    pub fn new(pool: &FramePool, parent: Option<EnvId>) -> Option<Self> {
        let memory_set = MemorySet::new_bare(pool)?;
        let env = Self {
            env_id: env_id_alloc(),
            parent,
            memory_set: Mutex::new(memory_set),
        };
        debug!("env {} created, parent {:?}", env.getid(), parent);
        Some(env)
    }
    pub fn getid(&self) -> EnvId {
        self.env_id.0
    }
    pub fn getppid(&self) -> Option<EnvId> {
        self.parent
    }
    pub fn memory_set(&self) -> MutexGuard<'_, MemorySet> {
        self.memory_set.lock()
    }
    pub fn get_user_token(&self) -> usize {
        self.memory_set.lock().token()
    }
    /// 撤销该环境仍持有的全部共享映射，返回释放的映射个数。
    ///
    /// 销毁环境前必须调用（见 [`exit_current_env`](super::exit_current_env)），
    /// 否则它对共享对象的引用永远不会归还。
    pub fn release_shared_objects(&self, shm: &SharedMemoryManager) -> usize {
        let released = shm.free_all(&mut self.memory_set.lock());
        if released > 0 {
            debug!("env {}: released {} shared mappings", self.getid(), released);
        }
        released
    }
}
