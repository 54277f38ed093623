use super::value::Value;
use serde::{Deserialize, Serialize};

/// A mutable property map with an optional prototype parent.
///
/// Property lookup walks the prototype chain: a miss in the own map
/// recurses into the parent. Writes always go to the own map, so a child
/// can shadow a parent property without mutating the parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    props: Vec<(Value, Value)>,
    parent: Option<Box<Object>>,
}

impl Object {
    pub fn new() -> Self {
        Object::default()
    }

    pub fn with_parent(parent: Object) -> Self {
        Object {
            props: Vec::new(),
            parent: Some(Box::new(parent)),
        }
    }

    /// Look up a property, walking the prototype chain on a miss.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self.props.iter().find(|(k, _)| k == key) {
            Some((_, v)) => Some(v),
            None => self.parent.as_ref().and_then(|p| p.get(key)),
        }
    }

    /// Set a property in the own map, replacing an existing entry.
    pub fn set(&mut self, key: Value, value: Value) {
        match self.props.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.props.push((key, value)),
        }
    }

    /// Number of own properties (the prototype chain is not counted).
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.props.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

impl std::fmt::Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.props.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}
