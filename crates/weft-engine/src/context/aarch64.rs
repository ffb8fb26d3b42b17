//! AArch64 (AAPCS64) context switch.
//!
//! Saves x19-x28, the frame pointer, the link register, and d8-d15 in a
//! 160-byte frame on the outgoing stack. The stack pointer must stay 16-byte
//! aligned at every step, so the frame is built with a single `sub`.

use super::Context;

#[unsafe(naked)]
pub(super) unsafe extern "C" fn switch_context(_save: *mut Context, _restore: *const Context) {
    core::arch::naked_asm!(
        "sub sp, sp, #160",
        "stp x19, x20, [sp, #0]",
        "stp x21, x22, [sp, #16]",
        "stp x23, x24, [sp, #32]",
        "stp x25, x26, [sp, #48]",
        "stp x27, x28, [sp, #64]",
        "stp x29, x30, [sp, #80]",
        "stp d8, d9, [sp, #96]",
        "stp d10, d11, [sp, #112]",
        "stp d12, d13, [sp, #128]",
        "stp d14, d15, [sp, #144]",
        "mov x9, sp",
        "str x9, [x0]",
        "ldr x9, [x1]",
        "mov sp, x9",
        "ldp x19, x20, [sp, #0]",
        "ldp x21, x22, [sp, #16]",
        "ldp x23, x24, [sp, #32]",
        "ldp x25, x26, [sp, #48]",
        "ldp x27, x28, [sp, #64]",
        "ldp x29, x30, [sp, #80]",
        "ldp d8, d9, [sp, #96]",
        "ldp d10, d11, [sp, #112]",
        "ldp d12, d13, [sp, #128]",
        "ldp d14, d15, [sp, #144]",
        "add sp, sp, #160",
        "ret",
    )
}

/// Initial frame: a zeroed 160-byte register area with the link-register slot
/// (offset 88) pointing at `entry`; the restore's `ret` branches there with
/// sp back at the 16-byte-aligned stack top.
pub(super) unsafe fn prepare_stack(stack: *mut u8, size: usize, entry: extern "C" fn() -> !) -> Context {
    let top = (stack as usize + size) & !15;
    let sp = (top - 160) as *mut u8;
    std::ptr::write_bytes(sp, 0, 160);
    std::ptr::write(sp.add(88).cast::<usize>(), entry as usize);
    Context { sp }
}
