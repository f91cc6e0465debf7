//! 环境管理
//!
//! 环境即拥有独立地址空间的执行上下文。每个环境由一个 [`EnvControlBlock`]
//! 描述，编号由全局的 `ENV_ID_ALLOCATOR` 分配并在环境销毁时回收。
//! 全局唯一的 [`Processor`] 实例 `PROCESSOR` 记录当前正在执行的环境。

mod env;
mod id;
mod processor;

/// 环境编号
pub type EnvId = usize;

pub use env::EnvControlBlock;
pub use id::{env_id_alloc, EnvIdHandle, RecycleAllocator};
pub use processor::{
    current_env, current_user_token, exit_current_env, set_current_env, take_current_env, Processor, PROCESSOR,
};
