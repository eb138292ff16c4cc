use std::{collections::HashMap, sync::Arc};

use object::Value;
use parking_lot::RwLock;

struct KeywordsImpl {
    names: Vec<Arc<str>>,
    ids: HashMap<Arc<str>, u32>,
}

impl KeywordsImpl {
    fn get_or_add(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        let interned = Arc::<str>::from(name);
        self.names.push(interned.clone());
        self.ids.insert(interned, id);
        id
    }
}

/// Interns keyword names (`#:x`) to dense ids.
///
/// Keywords are immediates, so two keywords are the same keyword exactly
/// when their `Value`s compare equal.
pub struct KeywordRegistry(RwLock<KeywordsImpl>);

impl KeywordRegistry {
    pub fn new() -> Self {
        Self(RwLock::new(KeywordsImpl {
            names: Vec::new(),
            ids: HashMap::new(),
        }))
    }

    /// `name` is given without the `#:` prefix.
    pub fn intern(&self, name: &str) -> Value {
        if let Some(&id) = self.0.read().ids.get(name) {
            return Value::keyword(id);
        }
        Value::keyword(self.0.write().get_or_add(name))
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.0.read().ids.get(name).map(|&id| Value::keyword(id))
    }

    pub fn name(&self, keyword: Value) -> Option<Arc<str>> {
        let id = keyword.keyword_id()?;
        self.0.read().names.get(id as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeywordRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeywordRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordRegistry")
            .field("len", &self.len())
            .finish()
    }
}
