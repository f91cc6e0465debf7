//! SBI 调用

#![allow(unused)]

const SBI_CONSOLE_PUTCHAR: usize = 1;

#[cfg(target_arch = "riscv64")]
#[inline(always)]
fn sbi_call(which: usize, arg0: usize, arg1: usize, arg2: usize) -> usize {
    let mut ret;
    unsafe {
        core::arch::asm!(
            "ecall",
            inlateout("x10") arg0 => ret,
            in("x11") arg1,
            in("x12") arg2,
            in("x17") which,
        );
    }
    ret
}

/// 向控制台输出一个字符
#[cfg(target_arch = "riscv64")]
pub fn console_putchar(c: usize) {
    sbi_call(SBI_CONSOLE_PUTCHAR, c, 0, 0);
}

/// 非 RISC-V 平台（如宿主机上的单元测试）没有 SBI 控制台，输出被丢弃
#[cfg(not(target_arch = "riscv64"))]
pub fn console_putchar(_c: usize) {}
