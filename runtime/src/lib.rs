//! Runtime support for compiled code: allocation intrinsics, the dynamic
//! stack, keyword argument binding, the builtin table and the per-thread
//! execution context that ties them to the heap.

mod alloc;
mod binder;
mod builtins;
mod context;
mod dynstack;
mod error;
mod fluids;
mod interning;
mod threading;
mod vm;

#[cfg(test)]
mod testing;

pub use alloc::{
    allocate_cell, allocate_string, allocate_words, cons, from_double,
    string_length,
};
pub use binder::{
    Arity, BindFlags, BoundFrame, CallDescriptor, KeywordTable, bind_frame,
    bind_kwargs,
};
pub use builtins::{
    BUILTINS, BuiltinDesc, BuiltinProcedure, BuiltinTable, builtin_index,
    builtin_ref, builtin_table,
};
pub use context::{ContextRoots, ExecutionContext};
pub use dynstack::{
    DynStack, Winder, dynamic_wind, pop, push_fluid, push_wind, unwind_fluid,
    unwind_to, with_fluid,
};
pub use error::{BindError, RuntimeError};
pub use fluids::{FluidId, FluidRegistry};
pub use interning::KeywordRegistry;
pub use threading::{
    ContextThread, ThreadObject, current_thread_token, spawn_with_context,
    thread_data,
};
pub use vm::{Invoke, NoInvoke, Vm, VmCreateInfo, VmShared, trace_object};
