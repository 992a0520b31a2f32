//! aarch64 context switching (AAPCS64)

use super::ContextEntry;
use std::arch::naked_asm;

/// Callee-saved state of a suspended context.
///
/// Layout is fixed by the assembly: sp, pc, x19..x28, x29, x30, d8..d15.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    sp: u64,        // 0x00
    pc: u64,        // 0x08
    x19_x28: [u64; 10], // 0x10
    fp: u64,        // 0x60
    lr: u64,        // 0x68
    d8_d15: [u64; 8], // 0x70
}

/// Prepare `ctx` so that switching to it calls `entry(arg)` on the stack
/// ending at `stack_top`.
///
/// # Safety
///
/// Same contract as the x86_64 version.
pub unsafe fn init_context(ctx: *mut Context, stack_top: *mut u8, entry: ContextEntry, arg: usize) {
    let mut regs = [0u64; 10];
    regs[0] = entry as usize as u64; // x19
    regs[1] = arg as u64; // x20
    ctx.write(Context {
        sp: (stack_top as usize & !0xF) as u64,
        pc: context_trampoline as usize as u64,
        x19_x28: regs,
        fp: 0,
        lr: 0,
        d8_d15: [0; 8],
    });
}

#[unsafe(naked)]
unsafe extern "C" fn context_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #0x1",
    );
}

/// Save the running context into `from` and resume `to`.
///
/// # Safety
///
/// Both pointers must be valid; `to` must have been filled by
/// `init_context` or by a previous `switch`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_from: *mut Context, _to: *const Context) {
    naked_asm!(
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "stp x29, x30, [x0, #0x60]",
        "stp d8, d9, [x0, #0x70]",
        "stp d10, d11, [x0, #0x80]",
        "stp d12, d13, [x0, #0x90]",
        "stp d14, d15, [x0, #0xa0]",
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldp x29, x30, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x70]",
        "ldp d10, d11, [x1, #0x80]",
        "ldp d12, d13, [x1, #0x90]",
        "ldp d14, d15, [x1, #0xa0]",
        "ldr x9, [x1, #0x08]",
        "br x9",
    );
}
