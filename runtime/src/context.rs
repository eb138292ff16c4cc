use std::{alloc::Layout, ptr::NonNull, sync::Arc};

use heap::{HeapProxy, RootProvider};
use log::debug;
use object::Value;

use crate::{
    DynStack, FluidId, FluidRegistry, RuntimeError, ThreadObject, VmShared,
};

/// Per-thread runtime state.
///
/// Owned by exactly one native thread. Contexts are handed out boxed
/// and must stay in their box: the thread object records the address.
#[derive(Debug)]
pub struct ExecutionContext {
    pub heap: HeapProxy,
    pub dynstack: DynStack,
    /// Argument and local frames laid out by compiled code.
    pub stack: Vec<Value>,
    /// Current value of every fluid this context has bound; `None` reads
    /// through to the registry default.
    fluids: Vec<Option<Value>>,
    vm: Arc<VmShared>,
    thread: Box<ThreadObject>,
}

/// Everything a context keeps alive, plus values an allocation in flight
/// still has to store.
pub struct ContextRoots<'a> {
    pub pending: &'a mut [Value],
    stack: &'a mut Vec<Value>,
    dynstack: &'a mut DynStack,
    fluids: &'a mut Vec<Option<Value>>,
    defaults: &'a FluidRegistry,
}

impl RootProvider for ContextRoots<'_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        self.pending.iter_mut().for_each(&mut *visitor);
        self.stack.iter_mut().for_each(&mut *visitor);
        self.fluids.iter_mut().flatten().for_each(&mut *visitor);
        self.dynstack.visit_roots(visitor);
        self.defaults.visit_defaults(visitor);
    }
}

impl ExecutionContext {
    pub(crate) fn new(vm: Arc<VmShared>) -> Box<Self> {
        let mut ctx = Box::new(Self {
            heap: vm.heap.proxy(),
            dynstack: DynStack::new(),
            stack: Vec::with_capacity(vm.stack_size),
            fluids: Vec::new(),
            thread: Box::new(ThreadObject::new()),
            vm,
        });
        let ptr: *mut ExecutionContext = &mut *ctx;
        ctx.thread.attach(ptr);
        debug!("execution context created for thread {}", ctx.thread.token);
        ctx
    }

    #[inline]
    pub fn vm(&self) -> &Arc<VmShared> {
        &self.vm
    }

    /// The pinned thread object naming this context.
    #[inline]
    pub fn thread(&self) -> Value {
        Value::from_ptr(self.thread_object())
    }

    #[inline]
    pub fn thread_object(&self) -> &ThreadObject {
        &self.thread
    }

    pub fn fluid_ref(&self, fluid: FluidId) -> Value {
        match self.fluids.get(fluid.index()) {
            Some(Some(value)) => *value,
            _ => self.vm.fluids.default_value(fluid),
        }
    }

    /// Sets the current binding of `fluid` without pushing anything.
    ///
    /// # Panics
    ///
    /// If `fluid` was never made by this context's VM.
    #[inline]
    pub fn fluid_set(&mut self, fluid: FluidId, value: Value) {
        let index = fluid.index();
        match self.fluids.get_mut(index) {
            Some(slot) => *slot = Some(value),
            None => self.grow_fluids(fluid, value),
        }
    }

    #[cold]
    fn grow_fluids(&mut self, fluid: FluidId, value: Value) {
        let index = fluid.index();
        assert!(index < self.vm.fluids.len(), "unknown fluid {fluid:?}");
        self.fluids.resize(index + 1, None);
        self.fluids[index] = Some(value);
    }

    /// Applies `procedure` through the VM's invoker.
    pub fn invoke(&mut self, procedure: Value) -> Result<(), RuntimeError> {
        let invoker = self.vm.invoker.clone();
        invoker.invoke(self, procedure)
    }

    /// Allocates `layout` with this context's roots, `pending` included.
    ///
    /// A collection may rewrite `pending` in place; callers read the
    /// values back from it before initialising the object.
    pub(crate) fn allocate_rooted(
        &mut self,
        layout: Layout,
        pending: &mut [Value],
    ) -> NonNull<u8> {
        let Self {
            heap,
            dynstack,
            stack,
            fluids,
            vm,
            ..
        } = self;
        let mut roots = ContextRoots {
            pending,
            stack,
            dynstack,
            fluids,
            defaults: &vm.fluids,
        };
        heap.allocate(layout, &mut roots)
    }

    /// Runs the collector with this context's roots.
    pub fn collect(&mut self) {
        let Self {
            heap,
            dynstack,
            stack,
            fluids,
            vm,
            ..
        } = self;
        let mut roots = ContextRoots {
            pending: &mut [],
            stack,
            dynstack,
            fluids,
            defaults: &vm.fluids,
        };
        heap.collect(&mut roots);
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.thread.detach();
        debug!(
            "execution context dropped for thread {} ({} bytes allocated)",
            self.thread.token, self.heap.allocated
        );
    }
}
