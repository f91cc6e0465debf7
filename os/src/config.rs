//! 内核常量

/// 页面大小：4KiB
pub const PAGE_SIZE: usize = 0x1000;
/// 页内偏移位宽
pub const PAGE_SIZE_BITS: usize = 0xc;

/// 内核堆大小
pub const KERNEL_HEAP_SIZE: usize = 0x30_0000;
/// 物理内存结束地址
pub const MEMORY_END: usize = 0x8800_0000;
/// 用户地址空间上界（SV39 低半部分）
pub const USER_SPACE_END: usize = 0x40_0000_0000;

/// 共享对象表的初始容量
pub const MAX_SHARES: usize = 100;
/// 共享对象表满时是否允许倍增扩容
pub const SHARES_GROWABLE: bool = true;
/// 共享对象名的最大字节数（不含结尾的 `\0`）
pub const SHARE_NAME_MAX: usize = 64;
