use std::sync::OnceLock;

use log::debug;
use object::{Header, ObjectType, Value};

/// Static description of a builtin procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinDesc {
    pub name: &'static str,
    pub nreq: u16,
    pub nopt: u16,
    pub rest: bool,
}

impl BuiltinDesc {
    pub const fn new(name: &'static str, nreq: u16, nopt: u16, rest: bool) -> Self {
        Self {
            name,
            nreq,
            nopt,
            rest,
        }
    }
}

/// Builtins in id order. Compiled code embeds these ids, so entries are
/// only ever appended.
pub const BUILTINS: &[BuiltinDesc] = &[
    BuiltinDesc::new("apply", 2, 0, true),
    BuiltinDesc::new("values", 0, 0, true),
    BuiltinDesc::new("abort-to-prompt", 1, 0, true),
    BuiltinDesc::new("call-with-values", 2, 0, false),
    BuiltinDesc::new("call-with-current-continuation", 1, 0, false),
];

/// A builtin procedure object. Lives outside the collected heap.
#[repr(C)]
#[derive(Debug)]
pub struct BuiltinProcedure {
    pub header: Header,
    pub id: u32,
    pub desc: BuiltinDesc,
}

/// Process-wide table of builtin procedure objects, indexed by id.
#[derive(Debug)]
pub struct BuiltinTable {
    procedures: Box<[BuiltinProcedure]>,
}

impl BuiltinTable {
    fn new() -> Self {
        let procedures = BUILTINS
            .iter()
            .enumerate()
            .map(|(id, &desc)| BuiltinProcedure {
                header: Header::pinned(ObjectType::Builtin),
                id: id as u32,
                desc,
            })
            .collect();
        Self { procedures }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&BuiltinProcedure> {
        self.procedures.get(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuiltinProcedure> {
        self.procedures.iter()
    }
}

static BUILTIN_TABLE: OnceLock<BuiltinTable> = OnceLock::new();

/// The frozen builtin table, built on first use.
pub fn builtin_table() -> &'static BuiltinTable {
    BUILTIN_TABLE.get_or_init(|| {
        let table = BuiltinTable::new();
        debug!("builtin table frozen with {} entries", table.len());
        table
    })
}

/// The procedure object for builtin `id`. Never allocates.
///
/// # Panics
///
/// If `id` is out of range.
#[inline]
pub fn builtin_ref(id: u32) -> Value {
    let table = builtin_table();
    match table.get(id) {
        Some(procedure) => Value::from_ptr(procedure),
        None => panic!("builtin id {id} out of range ({} builtins)", table.len()),
    }
}

pub fn builtin_index(name: &str) -> Option<u32> {
    BUILTINS.iter().position(|b| b.name == name).map(|i| i as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_by_name_and_id() {
        for (id, desc) in BUILTINS.iter().enumerate() {
            let id = id as u32;
            assert_eq!(builtin_index(desc.name), Some(id));
            let value = builtin_ref(id);
            let procedure = unsafe { value.as_ref::<BuiltinProcedure>() };
            assert_eq!(procedure.id, id);
            assert_eq!(procedure.desc, *desc);
            assert_eq!(procedure.header.object_type(), ObjectType::Builtin);
        }
        assert_eq!(builtin_index("car"), None);
    }

    #[test]
    fn references_are_stable() {
        let len = builtin_table().len() as u32;
        let here: Vec<Value> = (0..len).map(builtin_ref).collect();
        let there = std::thread::spawn(move || (0..len).map(builtin_ref).collect::<Vec<_>>())
            .join()
            .unwrap();
        for id in 0..len {
            let value = here[id as usize];
            assert!(value.is_ref());
            assert_eq!(builtin_ref(id), value);
            assert_eq!(there[id as usize], value);
        }
    }

    #[test]
    fn arities() {
        let values = BUILTINS[builtin_index("values").unwrap() as usize];
        assert_eq!((values.nreq, values.nopt, values.rest), (0, 0, true));
        let call_cc = BUILTINS[builtin_index("call-with-current-continuation").unwrap() as usize];
        assert_eq!((call_cc.nreq, call_cc.rest), (1, false));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_id_is_fatal() {
        builtin_ref(BUILTINS.len() as u32);
    }

    #[test]
    fn builtins_are_pinned() {
        for procedure in builtin_table().iter() {
            assert!(procedure.header.has_flag(object::HeaderFlags::PINNED));
        }
    }
}
