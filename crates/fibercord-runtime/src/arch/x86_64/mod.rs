//! x86_64 context switching (System V)

use super::ContextEntry;
use std::arch::naked_asm;

/// Callee-saved state of a suspended context.
///
/// Field offsets are used by the assembly below.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    rsp: u64, // 0x00
    rip: u64, // 0x08
    rbx: u64, // 0x10
    rbp: u64, // 0x18
    r12: u64, // 0x20
    r13: u64, // 0x28
    r14: u64, // 0x30
    r15: u64, // 0x38
}

/// Prepare `ctx` so that switching to it calls `entry(arg)` on the stack
/// ending at `stack_top`.
///
/// # Safety
///
/// `ctx` must be valid for writes and `stack_top` must be the top of a
/// writable stack that outlives every switch into `ctx`.
pub unsafe fn init_context(ctx: *mut Context, stack_top: *mut u8, entry: ContextEntry, arg: usize) {
    let top = stack_top as usize & !0xF;
    // rsp is 16-aligned at the trampoline's `call`, so the callee sees the
    // usual misalignment by 8. The zeroed words end unwinder walks.
    let sp = top - 16;
    (sp as *mut u64).write(0);
    ((sp + 8) as *mut u64).write(0);

    ctx.write(Context {
        rsp: sp as u64,
        rip: context_trampoline as usize as u64,
        rbx: 0,
        rbp: 0,
        r12: entry as usize as u64,
        r13: arg as u64,
        r14: 0,
        r15: 0,
    });
}

#[unsafe(naked)]
unsafe extern "C" fn context_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "ud2",
    );
}

/// Save the running context into `from` and resume `to`.
///
/// Returns when something switches back into `from`.
///
/// # Safety
///
/// Both pointers must be valid; `to` must have been filled by
/// `init_context` or by a previous `switch`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_from: *mut Context, _to: *const Context) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Resumed contexts land here with rsp at their return address.
        "1:",
        "ret",
    );
}
