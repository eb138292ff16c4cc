use std::{ops::Deref, sync::Arc};

use heap::{Collector, Heap, HeapSettings, NoCollector, SettingsError};
use log::debug;
use object::{ObjectType, Pair, Value, Words};

use crate::{
    BuiltinTable, ExecutionContext, FluidId, FluidRegistry, KeywordRegistry,
    RuntimeError, builtin_table,
};

/// Calls back into the interpreter or compiled code.
///
/// The runtime invokes procedures only for wind entry and exit actions. A
/// procedure that escapes to an outer prompt returns
/// [`RuntimeError::NonLocalExit`].
pub trait Invoke: Send + Sync {
    fn invoke(
        &self,
        ctx: &mut ExecutionContext,
        procedure: Value,
    ) -> Result<(), RuntimeError>;
}

/// An invoker for a VM without an interpreter: nothing is applicable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInvoke;

impl Invoke for NoInvoke {
    fn invoke(
        &self,
        _ctx: &mut ExecutionContext,
        procedure: Value,
    ) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotApplicable { procedure })
    }
}

/// Enumerates the `Value` edges of a runtime object.
///
/// # Safety
///
/// `obj` must point to a live object with a valid header.
pub unsafe fn trace_object(obj: *const u8, visitor: &mut dyn FnMut(&mut Value)) {
    // SAFETY: guaranteed by caller
    unsafe {
        let header = &*(obj as *const object::Header);
        match header.object_type() {
            ObjectType::Pair | ObjectType::Cell => {
                let pair = &mut *(obj as *mut Pair);
                visitor(&mut pair.car);
                visitor(&mut pair.cdr);
            }
            ObjectType::Words | ObjectType::Vector => {
                let words = &mut *(obj as *mut Words);
                words.words_mut().iter_mut().for_each(visitor);
            }
            ObjectType::Flonum
            | ObjectType::Str
            | ObjectType::Builtin
            | ObjectType::Thread => {}
        }
    }
}

pub struct VmCreateInfo {
    pub heap: HeapSettings,
    /// Initial capacity of each context's value stack, in words.
    pub stack_size: usize,
    pub collector: Box<dyn Collector>,
    pub invoker: Arc<dyn Invoke>,
}

impl Default for VmCreateInfo {
    fn default() -> Self {
        Self {
            heap: HeapSettings::default(),
            stack_size: 1024,
            collector: Box::new(NoCollector),
            invoker: Arc::new(NoInvoke),
        }
    }
}

/// Read-mostly state every execution context can reach.
pub struct VmShared {
    pub heap: Heap,
    pub keywords: KeywordRegistry,
    pub fluids: FluidRegistry,
    pub builtins: &'static BuiltinTable,
    pub invoker: Arc<dyn Invoke>,
    pub stack_size: usize,
}

impl std::fmt::Debug for VmShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmShared")
            .field("heap", &self.heap)
            .field("keywords", &self.keywords)
            .field("fluids", &self.fluids.len())
            .field("stack_size", &self.stack_size)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Vm {
    inner: Arc<VmShared>,
}

impl Vm {
    pub fn new(info: VmCreateInfo) -> Result<Self, SettingsError> {
        let heap = Heap::new(info.heap, trace_object, info.collector)?;
        let inner = VmShared {
            heap,
            keywords: KeywordRegistry::new(),
            fluids: FluidRegistry::new(),
            builtins: builtin_table(),
            invoker: info.invoker,
            stack_size: info.stack_size,
        };
        debug!("vm created: {} heap blocks", inner.heap.block_count());
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn shared(&self) -> &Arc<VmShared> {
        &self.inner
    }

    /// A fresh context for the calling thread.
    pub fn new_context(&self) -> Box<ExecutionContext> {
        ExecutionContext::new(self.inner.clone())
    }

    pub fn intern_keyword(&self, name: &str) -> Value {
        self.inner.keywords.intern(name)
    }

    pub fn make_fluid(&self, default: Value) -> FluidId {
        self.inner.fluids.make_fluid(default)
    }
}

impl Deref for Vm {
    type Target = VmShared;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{allocate_words, cons, from_double};

    #[test]
    fn invalid_heap_settings_are_rejected() {
        let info = VmCreateInfo {
            heap: HeapSettings {
                heap_size: 4096 * 3 + 1,
                block_size: 4096,
                large_size: 1024,
            },
            ..Default::default()
        };
        assert_eq!(
            Vm::new(info).err(),
            Some(SettingsError::HeapNotBlockMultiple)
        );
    }

    #[test]
    fn trace_visits_reference_fields() {
        let vm = crate::testing::small_vm();
        let mut ctx = vm.new_context();

        let pair = cons(&mut ctx, Value::from_i64(1), Value::from_i64(2));
        let mut seen = Vec::new();
        unsafe { trace_object(pair.ref_bits() as *const u8, &mut |v| seen.push(*v)) };
        assert_eq!(seen, vec![Value::from_i64(1), Value::from_i64(2)]);

        let block = allocate_words(&mut ctx, ObjectType::Vector, 3);
        let mut count = 0;
        unsafe { trace_object(block.as_ptr() as *const u8, &mut |_| count += 1) };
        assert_eq!(count, 3);

        let flonum = from_double(&mut ctx, 1.5);
        unsafe {
            trace_object(flonum.ref_bits() as *const u8, &mut |_| {
                panic!("flonums have no edges")
            })
        };
    }

    #[test]
    fn vm_without_interpreter_cannot_apply() {
        let vm = crate::testing::small_vm();
        let mut ctx = vm.new_context();
        let proc = Value::from_i64(4);
        assert_eq!(
            ctx.invoke(proc),
            Err(RuntimeError::NotApplicable { procedure: proc })
        );
    }
}
