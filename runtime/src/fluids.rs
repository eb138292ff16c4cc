use object::Value;
use parking_lot::RwLock;

/// Dense id of a fluid variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FluidId(pub u32);

impl FluidId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// VM-wide fluid defaults.
///
/// Every context starts out seeing the default; bindings live in the
/// context's own slots and on its dynamic stack.
#[derive(Debug, Default)]
pub struct FluidRegistry {
    defaults: RwLock<Vec<Value>>,
}

impl FluidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_fluid(&self, default: Value) -> FluidId {
        let mut defaults = self.defaults.write();
        let id = FluidId(defaults.len() as u32);
        defaults.push(default);
        id
    }

    /// # Panics
    ///
    /// If `fluid` was never created by this registry.
    pub fn default_value(&self, fluid: FluidId) -> Value {
        match self.defaults.read().get(fluid.index()) {
            Some(&value) => value,
            None => panic!("unknown fluid {fluid:?}"),
        }
    }

    pub fn len(&self) -> usize {
        self.defaults.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn hold_write_lock(&self) -> parking_lot::RwLockWriteGuard<'_, Vec<Value>> {
        self.defaults.write()
    }

    /// Default values are GC roots.
    pub fn visit_defaults(&self, visitor: &mut dyn FnMut(&mut Value)) {
        self.defaults.write().iter_mut().for_each(visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_keep_their_default() {
        let registry = FluidRegistry::new();
        let a = registry.make_fluid(Value::FALSE);
        let b = registry.make_fluid(Value::from_i64(9));
        assert_eq!((a, b), (FluidId(0), FluidId(1)));
        assert_eq!(registry.default_value(b), Value::from_i64(9));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    #[should_panic(expected = "unknown fluid")]
    fn unknown_fluid_is_fatal() {
        FluidRegistry::new().default_value(FluidId(3));
    }
}
