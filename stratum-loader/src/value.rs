//! Exported values and the module container

use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A value stored in a module's exports
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value
    #[default]
    Nil,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// List of values
    List(Vec<Value>),
    /// Insertion-ordered map
    Map(IndexMap<String, Value>),
    /// Live reference to another module's exports
    Exports(Exports),
}

impl Value {
    /// Create an empty map
    pub fn map() -> Self {
        Value::Map(IndexMap::new())
    }

    /// Look up a key if this is a map
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Get an integer value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get a float value, widening integers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the exports handle this value refers to
    pub fn as_exports(&self) -> Option<&Exports> {
        match self {
            Value::Exports(exports) => Some(exports),
            _ => None,
        }
    }

    /// Whether this is `Nil`
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Render as JSON. Exports references are followed; a reference back
    /// into an exports container already being rendered becomes
    /// `"[Circular]"`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut path = Vec::new();
        self.to_json_inner(&mut path)
    }

    fn to_json_inner(&self, path: &mut Vec<*const RefCell<Value>>) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Nil => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Integer(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::List(items) => {
                Json::Array(items.iter().map(|item| item.to_json_inner(path)).collect())
            }
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json_inner(path)))
                    .collect(),
            ),
            Value::Exports(exports) => {
                let ptr = Rc::as_ptr(&exports.inner);
                if path.contains(&ptr) {
                    return Json::String("[Circular]".to_string());
                }
                path.push(ptr);
                let rendered = exports.inner.borrow().to_json_inner(path);
                path.pop();
                rendered
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Exports> for Value {
    fn from(exports: Exports) -> Self {
        Value::Exports(exports)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Shared, mutable exports container.
///
/// The container is created once with its module and never replaced; only
/// its contents change. Clones share the same container, so a consumer that
/// captured the handle early sees later writes.
#[derive(Clone)]
pub struct Exports {
    inner: Rc<RefCell<Value>>,
}

impl Exports {
    /// Create an exports container holding an empty map
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Value::map())),
        }
    }

    /// Look up an exported key
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.borrow().get(key).cloned()
    }

    /// Set an exported key. A non-map container is replaced by a map first.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut inner = self.inner.borrow_mut();
        if !matches!(*inner, Value::Map(_)) {
            *inner = Value::map();
        }
        if let Value::Map(map) = &mut *inner {
            map.insert(key.into(), value.into());
        }
    }

    /// Replace the whole exported value, keeping the container
    pub fn replace(&self, value: impl Into<Value>) {
        *self.inner.borrow_mut() = value.into();
    }

    /// Snapshot of the current contents
    pub fn value(&self) -> Value {
        self.inner.borrow().clone()
    }

    /// Whether nothing has been exported yet
    pub fn is_empty(&self) -> bool {
        match &*self.inner.borrow() {
            Value::Map(map) => map.is_empty(),
            Value::Nil => true,
            _ => false,
        }
    }

    /// Whether both handles share one container
    pub fn ptr_eq(&self, other: &Exports) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Render the contents as JSON
    pub fn to_json(&self) -> serde_json::Value {
        Value::Exports(self.clone()).to_json()
    }
}

impl Default for Exports {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Exports {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

// Contents may reference this container again, so only the identity is shown.
impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exports({:p})", Rc::as_ptr(&self.inner))
    }
}

/// The exports container owned by exactly one unit
#[derive(Debug, Clone)]
pub struct Module {
    id: String,
    exports: Exports,
}

impl Module {
    /// Create a module with empty exports
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            exports: Exports::new(),
        }
    }

    /// The owning unit's canonical id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle to the exports container
    pub fn exports(&self) -> Exports {
        self.exports.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports_identity_survives_replace() {
        let exports = Exports::new();
        let alias = exports.clone();

        exports.replace(Value::from(42));
        assert!(alias.ptr_eq(&exports));
        assert_eq!(alias.value(), Value::Integer(42));

        // Setting a key on a scalar turns it back into a map
        exports.set("a", 1);
        assert_eq!(alias.get("a"), Some(Value::Integer(1)));
    }

    #[test]
    fn test_exports_is_empty() {
        let exports = Exports::new();
        assert!(exports.is_empty());
        exports.set("x", "y");
        assert!(!exports.is_empty());
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"value": 41, "name": "b", "ratio": 0.5, "tags": [true, null]});
        let value = Value::from(json.clone());

        assert_eq!(value.get("value").and_then(Value::as_i64), Some(41));
        assert_eq!(value.get("name").and_then(Value::as_str), Some("b"));
        assert_eq!(value.get("ratio").and_then(Value::as_f64), Some(0.5));
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_cyclic_exports_render() {
        let a = Exports::new();
        let b = Exports::new();
        a.set("b", b.clone());
        b.set("a", a.clone());

        let rendered = a.to_json();
        assert_eq!(rendered, serde_json::json!({"b": {"a": "[Circular]"}}));

        // Debug never walks into the cycle
        let debug = format!("{:?}", Value::Exports(a));
        assert!(debug.starts_with("Exports(Exports(0x"));
    }

    #[test]
    fn test_module_owns_exports() {
        let module = Module::new("/lib/a");
        assert_eq!(module.id(), "/lib/a");
        assert!(module.exports().ptr_eq(&module.exports()));
    }
}
