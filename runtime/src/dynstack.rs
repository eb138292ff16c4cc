//! The per-context dynamic stack.
//!
//! Holds fluid bindings and wind frames in strict LIFO order. Popping a
//! fluid binding restores the value it replaced; popping a wind frame runs
//! its exit action after the frame is already gone, so an exit action that
//! escapes never sees its own frame again.

use log::trace;
use object::Value;

use crate::{ExecutionContext, FluidId, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winder {
    Fluid {
        fluid: FluidId,
        previous: Value,
        value: Value,
    },
    Wind {
        entry: Value,
        exit: Value,
    },
}

#[derive(Debug, Default)]
pub struct DynStack {
    entries: Vec<Winder>,
}

impl DynStack {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    fn push(&mut self, winder: Winder) {
        self.entries.push(winder);
    }

    #[inline]
    fn pop(&mut self) -> Winder {
        match self.entries.pop() {
            Some(winder) => winder,
            None => panic!("dynamic stack underflow"),
        }
    }

    pub fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for winder in &mut self.entries {
            match winder {
                Winder::Fluid {
                    previous, value, ..
                } => {
                    visitor(previous);
                    visitor(value);
                }
                Winder::Wind { entry, exit } => {
                    visitor(entry);
                    visitor(exit);
                }
            }
        }
    }
}

/// Binds `fluid` to `value` until the matching pop.
pub fn push_fluid(ctx: &mut ExecutionContext, fluid: FluidId, value: Value) {
    let previous = ctx.fluid_ref(fluid);
    ctx.dynstack.push(Winder::Fluid {
        fluid,
        previous,
        value,
    });
    ctx.fluid_set(fluid, value);
}

/// Runs `entry`, then records the wind frame. If `entry` escapes nothing
/// is pushed.
pub fn push_wind(
    ctx: &mut ExecutionContext,
    entry: Value,
    exit: Value,
) -> Result<(), RuntimeError> {
    ctx.invoke(entry)?;
    ctx.dynstack.push(Winder::Wind { entry, exit });
    Ok(())
}

/// Pops the top entry and undoes it.
///
/// # Panics
///
/// On an empty dynamic stack.
pub fn pop(ctx: &mut ExecutionContext) -> Result<(), RuntimeError> {
    match ctx.dynstack.pop() {
        Winder::Fluid {
            fluid, previous, ..
        } => {
            ctx.fluid_set(fluid, previous);
            Ok(())
        }
        Winder::Wind { exit, .. } => ctx.invoke(exit),
    }
}

/// Pops a fluid binding without invoking anything.
///
/// # Panics
///
/// If the stack is empty or its top is a wind frame.
pub fn unwind_fluid(ctx: &mut ExecutionContext) {
    match ctx.dynstack.pop() {
        Winder::Fluid {
            fluid, previous, ..
        } => ctx.fluid_set(fluid, previous),
        winder @ Winder::Wind { .. } => {
            panic!("unwind_fluid over a wind frame: {winder:?}")
        }
    }
}

/// Pops entries until the stack is `depth` deep.
///
/// Exit actions may push and pop entries of their own. The first exit
/// action that escapes stops the unwind; its frame is already gone and
/// everything below is intact.
///
/// # Panics
///
/// If `depth` is deeper than the current stack.
pub fn unwind_to(
    ctx: &mut ExecutionContext,
    depth: usize,
) -> Result<(), RuntimeError> {
    assert!(
        depth <= ctx.dynstack.depth(),
        "unwind to depth {depth} above current depth {}",
        ctx.dynstack.depth()
    );
    trace!("unwinding dynamic stack {} -> {depth}", ctx.dynstack.depth());
    while ctx.dynstack.depth() > depth {
        pop(ctx)?;
    }
    Ok(())
}

/// Runs `body` with `fluid` bound to `value`.
pub fn with_fluid<T>(
    ctx: &mut ExecutionContext,
    fluid: FluidId,
    value: Value,
    body: impl FnOnce(&mut ExecutionContext) -> Result<T, RuntimeError>,
) -> Result<T, RuntimeError> {
    let depth = ctx.dynstack.depth();
    push_fluid(ctx, fluid, value);
    let result = body(ctx);
    unwind_to(ctx, depth)?;
    result
}

/// `dynamic-wind`: `entry`, then `body`, then `exit`, with `exit` run
/// whether `body` returns or escapes.
pub fn dynamic_wind<T>(
    ctx: &mut ExecutionContext,
    entry: Value,
    body: impl FnOnce(&mut ExecutionContext) -> Result<T, RuntimeError>,
    exit: Value,
) -> Result<T, RuntimeError> {
    let depth = ctx.dynstack.depth();
    push_wind(ctx, entry, exit)?;
    let result = body(ctx);
    unwind_to(ctx, depth)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        ESCAPE, ESCAPE_ID, REENTER, Recorder, recording_vm, small_vm,
    };
    use proptest::prelude::*;

    fn fix(n: i64) -> Value {
        Value::from_i64(n)
    }

    // ── fluids ────────────────────────────────────────────────────────

    #[test]
    fn fluid_binding_is_visible_until_popped() {
        let vm = small_vm();
        let fluid = vm.make_fluid(fix(0));
        let mut ctx = vm.new_context();

        push_fluid(&mut ctx, fluid, fix(1));
        assert_eq!(ctx.fluid_ref(fluid), fix(1));
        assert_eq!(ctx.dynstack.depth(), 1);

        pop(&mut ctx).unwrap();
        assert_eq!(ctx.fluid_ref(fluid), fix(0));
        assert!(ctx.dynstack.is_empty());
    }

    #[test]
    fn fluid_set_inside_binding_is_undone_by_pop() {
        let vm = small_vm();
        let fluid = vm.make_fluid(fix(0));
        let mut ctx = vm.new_context();

        ctx.fluid_set(fluid, fix(5));
        push_fluid(&mut ctx, fluid, fix(6));
        ctx.fluid_set(fluid, fix(7));
        unwind_fluid(&mut ctx);
        assert_eq!(ctx.fluid_ref(fluid), fix(5));
    }

    #[test]
    fn bindings_are_per_context() {
        let vm = small_vm();
        let fluid = vm.make_fluid(fix(0));
        let mut a = vm.new_context();
        let b = vm.new_context();

        push_fluid(&mut a, fluid, fix(1));
        assert_eq!(a.fluid_ref(fluid), fix(1));
        assert_eq!(b.fluid_ref(fluid), fix(0));
    }

    #[test]
    fn with_fluid_restores_on_escape() {
        let vm = small_vm();
        let fluid = vm.make_fluid(fix(0));
        let mut ctx = vm.new_context();

        let result: Result<(), _> = with_fluid(&mut ctx, fluid, fix(3), |ctx| {
            assert_eq!(ctx.fluid_ref(fluid), fix(3));
            Err(RuntimeError::NonLocalExit { tag: fix(0) })
        });
        assert!(result.is_err());
        assert_eq!(ctx.fluid_ref(fluid), fix(0));
        assert_eq!(ctx.dynstack.depth(), 0);
    }

    // ── wind frames ───────────────────────────────────────────────────

    #[test]
    fn wind_runs_entry_then_exit() {
        let recorder = Recorder::default();
        let vm = recording_vm(&recorder);
        let mut ctx = vm.new_context();

        push_wind(&mut ctx, fix(1), fix(2)).unwrap();
        assert_eq!(recorder.calls(), vec![1]);
        pop(&mut ctx).unwrap();
        assert_eq!(recorder.calls(), vec![1, 2]);
        assert!(ctx.dynstack.is_empty());
    }

    #[test]
    fn escaping_entry_pushes_nothing() {
        let recorder = Recorder::default();
        let vm = recording_vm(&recorder);
        let mut ctx = vm.new_context();

        let err = push_wind(&mut ctx, ESCAPE, fix(2)).unwrap_err();
        assert_eq!(err, RuntimeError::NonLocalExit { tag: ESCAPE });
        assert!(ctx.dynstack.is_empty());
        assert_eq!(recorder.calls(), vec![ESCAPE_ID]);
    }

    #[test]
    fn escaping_exit_is_not_rerun() {
        let recorder = Recorder::default();
        let vm = recording_vm(&recorder);
        let mut ctx = vm.new_context();

        push_wind(&mut ctx, fix(1), fix(2)).unwrap();
        push_wind(&mut ctx, fix(3), ESCAPE).unwrap();
        push_wind(&mut ctx, fix(5), fix(6)).unwrap();

        let err = unwind_to(&mut ctx, 0).unwrap_err();
        assert_eq!(err, RuntimeError::NonLocalExit { tag: ESCAPE });
        assert_eq!(ctx.dynstack.depth(), 1);

        unwind_to(&mut ctx, 0).unwrap();
        assert_eq!(recorder.calls(), vec![1, 3, 5, 6, ESCAPE_ID, 2]);
    }

    #[test]
    fn unwind_tolerates_reentrant_exit_actions() {
        let recorder = Recorder::default();
        let vm = recording_vm(&recorder);
        let mut ctx = vm.new_context();

        push_wind(&mut ctx, fix(1), fix(2)).unwrap();
        push_wind(&mut ctx, fix(3), REENTER).unwrap();
        unwind_to(&mut ctx, 0).unwrap();

        assert!(ctx.dynstack.is_empty());
        let calls = recorder.calls();
        assert_eq!(calls.first(), Some(&1));
        assert_eq!(calls.last(), Some(&2));
        assert_eq!(ctx.fluid_ref(recorder.fluid()), fix(0));
    }

    #[test]
    #[should_panic(expected = "dynamic stack underflow")]
    fn pop_on_empty_stack_is_fatal() {
        let vm = small_vm();
        let mut ctx = vm.new_context();
        let _ = pop(&mut ctx);
    }

    #[test]
    #[should_panic(expected = "unwind_fluid over a wind frame")]
    fn unwind_fluid_over_wind_frame_is_fatal() {
        let recorder = Recorder::default();
        let vm = recording_vm(&recorder);
        let mut ctx = vm.new_context();
        push_wind(&mut ctx, fix(1), fix(2)).unwrap();
        unwind_fluid(&mut ctx);
    }

    #[test]
    fn dynamic_wind_runs_exit_after_body() {
        let recorder = Recorder::default();
        let vm = recording_vm(&recorder);
        let mut ctx = vm.new_context();

        let out = dynamic_wind(
            &mut ctx,
            fix(1),
            |ctx| {
                assert_eq!(ctx.dynstack.depth(), 1);
                Ok(42)
            },
            fix(2),
        )
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(recorder.calls(), vec![1, 2]);
    }

    // ── laws ──────────────────────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Op {
        Bind(usize, i64),
        Wind(i64),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 0..1000i64).prop_map(|(f, v)| Op::Bind(f, v)),
            (0..1000i64).prop_map(Op::Wind),
            Just(Op::Pop),
        ]
    }

    proptest! {
        /// After any sequence of pushes and pops every fluid reads the
        /// value of its innermost live binding, or its default.
        #[test]
        fn fluids_follow_stack_discipline(ops in prop::collection::vec(op(), 0..64)) {
            let recorder = Recorder::default();
            let vm = recording_vm(&recorder);
            let fluids: Vec<_> = (0..3).map(|i| vm.make_fluid(fix(-10 - i))).collect();
            let mut ctx = vm.new_context();
            let mut model: Vec<Option<(usize, i64)>> = Vec::new();

            for op in ops {
                match op {
                    Op::Bind(f, v) => {
                        push_fluid(&mut ctx, fluids[f], fix(v));
                        model.push(Some((f, v)));
                    }
                    Op::Wind(v) => {
                        push_wind(&mut ctx, fix(v), fix(v)).unwrap();
                        model.push(None);
                    }
                    Op::Pop => {
                        if model.pop().is_some() {
                            pop(&mut ctx).unwrap();
                        }
                    }
                }
                prop_assert_eq!(ctx.dynstack.depth(), model.len());
                for (i, &fluid) in fluids.iter().enumerate() {
                    let expected = model
                        .iter()
                        .rev()
                        .flatten()
                        .find(|(f, _)| *f == i)
                        .map_or(fix(-10 - i as i64), |&(_, v)| fix(v));
                    prop_assert_eq!(ctx.fluid_ref(fluid), expected);
                }
            }
        }

        /// Exit actions run in exact reverse order of their pushes.
        #[test]
        fn exits_run_in_reverse_push_order(ids in prop::collection::vec(0..1000i64, 1..32)) {
            let recorder = Recorder::default();
            let vm = recording_vm(&recorder);
            let mut ctx = vm.new_context();

            for &id in &ids {
                push_wind(&mut ctx, fix(1000 + id), fix(id)).unwrap();
            }
            recorder.clear();
            unwind_to(&mut ctx, 0).unwrap();

            let mut expected = ids.clone();
            expected.reverse();
            prop_assert_eq!(recorder.calls(), expected);
        }
    }
}
