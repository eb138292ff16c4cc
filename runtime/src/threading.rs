use std::{
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, AtomicU64, Ordering},
    thread::{self, JoinHandle},
};

use object::{Header, ObjectType, Value};

use crate::{ExecutionContext, Vm};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

pub fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

/// The runtime's handle on a native thread.
///
/// Pinned outside the collected heap, so the `Value` naming it never moves.
/// `context` points to the execution context owned by that thread while
/// the context is alive and is null afterwards.
#[repr(C)]
#[derive(Debug)]
pub struct ThreadObject {
    pub header: Header,
    context: AtomicPtr<ExecutionContext>,
    pub token: u64,
}

impl ThreadObject {
    pub(crate) fn new() -> Self {
        Self {
            header: Header::pinned(ObjectType::Thread),
            context: AtomicPtr::new(ptr::null_mut()),
            token: current_thread_token(),
        }
    }

    pub(crate) fn attach(&self, ctx: *mut ExecutionContext) {
        self.context.store(ctx, Ordering::Release);
    }

    pub(crate) fn detach(&self) {
        self.context.store(ptr::null_mut(), Ordering::Release);
    }
}

/// Resolves the execution context behind a thread object.
///
/// Returns [`None`] once the context has been dropped. Never allocates.
///
/// # Safety
///
/// `thread` must reference a [`ThreadObject`], e.g. one obtained from
/// [`ExecutionContext::thread`]. The returned pointer may only be
/// dereferenced by the owning thread.
pub unsafe fn thread_data(thread: Value) -> Option<NonNull<ExecutionContext>> {
    debug_assert!(thread.is_ref());
    // SAFETY: guaranteed by caller
    let object = unsafe { thread.as_ref::<ThreadObject>() };
    debug_assert_eq!(object.header.object_type(), ObjectType::Thread);
    NonNull::new(object.context.load(Ordering::Acquire))
}

/// A native thread that owns one execution context for its whole life.
pub struct ContextThread<T> {
    handle: JoinHandle<T>,
}

impl<T> ContextThread<T> {
    pub fn join(self) -> thread::Result<T> {
        self.handle.join()
    }
}

/// Starts a native thread, creates its context and runs `f` on it. The
/// context is dropped when `f` returns, before the thread exits.
pub fn spawn_with_context<F, T>(vm: &Vm, f: F) -> ContextThread<T>
where
    F: FnOnce(&mut ExecutionContext) -> T + Send + 'static,
    T: Send + 'static,
{
    let vm = vm.clone();
    ContextThread {
        handle: thread::spawn(move || {
            let mut ctx = vm.new_context();
            f(&mut ctx)
        }),
    }
}
