//! Shared fixtures for the runtime's unit tests.

use std::sync::{Arc, OnceLock};

use heap::HeapSettings;
use object::Value;
use parking_lot::Mutex;

use crate::{
    ExecutionContext, FluidId, Invoke, RuntimeError, Vm, VmCreateInfo, pop,
    push_fluid, push_wind,
};

/// Escapes with itself as the tag.
pub const ESCAPE_ID: i64 = -1;
pub const ESCAPE: Value = Value::from_raw((ESCAPE_ID << 1) as u64);
/// Binds the recorder's fluid and winds a nested frame, then undoes both.
pub const REENTER_ID: i64 = -2;
pub const REENTER: Value = Value::from_raw((REENTER_ID << 1) as u64);

pub fn small_settings() -> HeapSettings {
    HeapSettings {
        heap_size: 4096 * 16,
        block_size: 4096,
        large_size: 2048,
    }
}

pub fn small_vm() -> Vm {
    Vm::new(VmCreateInfo {
        heap: small_settings(),
        stack_size: 64,
        ..Default::default()
    })
    .expect("valid settings")
}

#[derive(Default)]
struct RecorderInner {
    calls: Mutex<Vec<i64>>,
    fluid: OnceLock<FluidId>,
}

/// Treats fixnums as procedures and records every call.
#[derive(Clone, Default)]
pub struct Recorder(Arc<RecorderInner>);

impl Recorder {
    pub fn calls(&self) -> Vec<i64> {
        self.0.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.0.calls.lock().clear();
    }

    pub fn fluid(&self) -> FluidId {
        *self.0.fluid.get().expect("recorder attached to a vm")
    }
}

impl Invoke for Recorder {
    fn invoke(
        &self,
        ctx: &mut ExecutionContext,
        procedure: Value,
    ) -> Result<(), RuntimeError> {
        let id = procedure
            .as_fixnum()
            .ok_or(RuntimeError::NotApplicable { procedure })?;
        self.0.calls.lock().push(id);
        match id {
            ESCAPE_ID => Err(RuntimeError::NonLocalExit { tag: procedure }),
            REENTER_ID => {
                push_fluid(ctx, self.fluid(), Value::from_i64(99));
                push_wind(ctx, Value::from_i64(7), Value::from_i64(8))?;
                pop(ctx)?;
                pop(ctx)
            }
            _ => Ok(()),
        }
    }
}

pub fn recording_vm(recorder: &Recorder) -> Vm {
    let vm = Vm::new(VmCreateInfo {
        heap: small_settings(),
        stack_size: 64,
        invoker: Arc::new(recorder.clone()),
        ..Default::default()
    })
    .expect("valid settings");
    let fluid = vm.make_fluid(Value::from_i64(0));
    let _ = recorder.0.fluid.set(fluid);
    vm
}
