//! Architecture-specific context switching
//!
//! One saved-register block per execution context and a naked `switch`
//! that stores the callee-saved state of the running context and resumes
//! another. Everything above this module only ever switches between the
//! scheduler context and a fiber context whose stack it owns.

/// Function a fresh context starts in. It never returns.
pub type ContextEntry = extern "C" fn(usize) -> !;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::{init_context, switch, Context};
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::{init_context, switch, Context};
    } else {
        compile_error!("Unsupported architecture");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Stack;

    struct Pair {
        main: Context,
        fiber: Context,
        hits: u32,
    }

    extern "C" fn bounce(arg: usize) -> ! {
        let pair = arg as *mut Pair;
        loop {
            unsafe {
                (*pair).hits += 1;
                switch(&mut (*pair).fiber, &(*pair).main);
            }
        }
    }

    #[test]
    fn test_switch_round_trip() {
        let stack = Stack::new(64 * 1024).unwrap();
        let mut pair = Box::new(Pair {
            main: Context::default(),
            fiber: Context::default(),
            hits: 0,
        });
        let p: *mut Pair = &mut *pair;
        unsafe {
            init_context(&mut (*p).fiber, stack.top(), bounce, p as usize);
            switch(&mut (*p).main, &(*p).fiber);
            assert_eq!((*p).hits, 1);
            switch(&mut (*p).main, &(*p).fiber);
            assert_eq!((*p).hits, 2);
        }
    }
}
