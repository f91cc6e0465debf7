//! 当前处理器上正在执行的环境
use super::EnvControlBlock;
use crate::shm::SharedMemoryManager;
use alloc::sync::Arc;
use lazy_static::*;
use spin::Mutex;

/// 处理器管理结构
pub struct Processor {
    /// 当前处理器上正在执行的环境
    current: Option<Arc<EnvControlBlock>>,
}

impl Processor {
    pub fn new() -> Self {
        Self { current: None }
    }
    /// 取出当前环境（移动语义）
    pub fn take_current(&mut self) -> Option<Arc<EnvControlBlock>> {
        self.current.take()
    }
    /// 获取当前环境（克隆语义）
    pub fn current(&self) -> Option<Arc<EnvControlBlock>> {
        self.current.as_ref().map(Arc::clone)
    }
    /// 切换到 `env`，返回原来的环境
    pub fn set_current(&mut self, env: Arc<EnvControlBlock>) -> Option<Arc<EnvControlBlock>> {
        self.current.replace(env)
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// 全局唯一的处理器实例
    pub static ref PROCESSOR: Mutex<Processor> = Mutex::new(Processor::new());
}

pub fn take_current_env() -> Option<Arc<EnvControlBlock>> {
    PROCESSOR.lock().take_current()
}

pub fn current_env() -> Option<Arc<EnvControlBlock>> {
    PROCESSOR.lock().current()
}

/// 让 `env` 成为当前环境；在 riscv64 上同时切换到它的地址空间
pub fn set_current_env(env: Arc<EnvControlBlock>) -> Option<Arc<EnvControlBlock>> {
    #[cfg(target_arch = "riscv64")]
    env.memory_set().activate();
    trace!("processor: switch to env {}", env.getid());
    PROCESSOR.lock().set_current(env)
}

/// 当前环境的 token（页表地址），没有当前环境时为 `None`
pub fn current_user_token() -> Option<usize> {
    current_env().map(|env| env.get_user_token())
}

/// 结束当前环境：先归还它对共享对象的引用，再回收其余映射。
/// 返回释放的共享映射个数，没有当前环境时为 `None`。
pub fn exit_current_env(shm: &SharedMemoryManager) -> Option<usize> {
    let env = take_current_env()?;
    let released = env.release_shared_objects(shm);
    env.memory_set().recycle_data_pages();
    info!("env {} exited, {} shared mappings released", env.getid(), released);
    Some(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::test_pool;

    #[test]
    fn processor_tracks_current_env() {
        let pool = test_pool(4);
        let first = Arc::new(EnvControlBlock::new(&pool, None).unwrap());
        let second = Arc::new(EnvControlBlock::new(&pool, None).unwrap());
        let mut processor = Processor::new();
        assert!(processor.current().is_none());
        assert!(processor.set_current(first.clone()).is_none());
        let prev = processor.set_current(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&prev, &first));
        assert_eq!(processor.current().unwrap().getid(), second.getid());
        assert!(processor.take_current().is_some());
        assert!(processor.current().is_none());
    }

    /// 串行化使用全局 `PROCESSOR` 的测试
    static GLOBAL: Mutex<()> = Mutex::new(());

    #[test]
    fn global_processor_accessors() {
        let _guard = GLOBAL.lock();
        let pool = test_pool(2);
        let env = Arc::new(EnvControlBlock::new(&pool, None).unwrap());
        let token = env.get_user_token();
        set_current_env(env.clone());
        assert_eq!(current_user_token(), Some(token));
        assert_eq!(current_env().unwrap().getid(), env.getid());
        assert!(Arc::ptr_eq(&take_current_env().unwrap(), &env));
        assert_eq!(current_user_token(), None);
    }

    #[test]
    fn exiting_env_returns_shared_references() {
        use crate::config::PAGE_SIZE;
        use crate::shm::ShmConfig;

        let pool = test_pool(32);
        let shm = SharedMemoryManager::new(pool.clone(), ShmConfig::default());
        let owner = EnvControlBlock::new(&pool, None).unwrap();
        let id = shm
            .create(&mut owner.memory_set(), owner.getid(), "out", PAGE_SIZE, true, 0x10000)
            .unwrap();
        let consumer = Arc::new(EnvControlBlock::new(&pool, Some(owner.getid())).unwrap());
        shm.get(&mut consumer.memory_set(), owner.getid(), "out", 0x20000).unwrap();
        assert_eq!(shm.info(id).unwrap().references, 2);

        let _guard = GLOBAL.lock();
        set_current_env(consumer.clone());
        assert_eq!(exit_current_env(&shm), Some(1));
        assert!(current_env().is_none());
        assert_eq!(exit_current_env(&shm), None);
        assert_eq!(shm.info(id).unwrap().references, 1);
        assert!(consumer.memory_set().shared_areas().is_empty());
    }
}
