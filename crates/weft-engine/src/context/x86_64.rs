//! x86-64 System V context switch.
//!
//! Callee-saved registers (rbx, rbp, r12-r15) are pushed onto the outgoing
//! stack and the stack pointer is stored in the outgoing [`Context`]; the
//! incoming side is the mirror image. Caller-saved state needs no handling:
//! the switch is an ordinary `extern "C"` call site from the compiler's point
//! of view.

use super::Context;

#[unsafe(naked)]
pub(super) unsafe extern "C" fn switch_context(_save: *mut Context, _restore: *const Context) {
    core::arch::naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// Initial frame: six zeroed register slots, then the entry address where the
/// restore's `ret` will find it. The saved stack pointer is 16-byte aligned,
/// which leaves rsp ≡ 8 (mod 16) at `entry` — the same shape as a `call`.
pub(super) unsafe fn prepare_stack(stack: *mut u8, size: usize, entry: extern "C" fn() -> !) -> Context {
    let top = (stack as usize + size) & !15;
    let sp = (top - 64) as *mut usize;
    std::ptr::write_bytes(sp, 0, 8);
    std::ptr::write(sp.add(6), entry as usize);
    Context { sp: sp.cast() }
}
