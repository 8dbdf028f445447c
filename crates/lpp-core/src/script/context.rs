//! The `CFunction` ABI callbacks registered with the script VM are bare
//! function pointers (`fn(&mut LuaState) -> LuaResult<usize>`) and so cannot
//! close over a Rust value. Every callback instead looks up "the currently
//! executing Metaprogram" through this thread-local stack.

use std::cell::RefCell;

use crate::metaprogram::Metaprogram;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<*mut Metaprogram>> = const { RefCell::new(Vec::new()) };
}

/// Push the Metaprogram that is about to start running script code or a
/// macro invoker. Must be paired with a `pop` once that run completes, even
/// on an error path.
pub(crate) fn push(mp: *mut Metaprogram) {
    CONTEXT_STACK.with(|s| s.borrow_mut().push(mp));
}

pub(crate) fn pop() {
    CONTEXT_STACK.with(|s| {
        s.borrow_mut().pop();
    });
}

/// Look up the currently executing Metaprogram. Returns `None` if no
/// context is active, or if the active one has already been torn down
/// (`exited`) — scripts must not be able to act on a dead Metaprogram, e.g.
/// via a dangling closure captured before a nested `processFile` returned.
pub(crate) fn current<'a>() -> Option<&'a mut Metaprogram> {
    CONTEXT_STACK.with(|s| {
        let stack = s.borrow();
        let ptr = *stack.last()?;
        // SAFETY: every push is paired with a pop before the pointee can be
        // dropped; the pointer always refers to a live Metaprogram owned by
        // the call frame that pushed it.
        let mp = unsafe { &mut *ptr };
        if mp.exited {
            None
        } else {
            Some(mp)
        }
    })
}
