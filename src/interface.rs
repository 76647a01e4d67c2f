use std::cell::RefCell;
use std::rc::Rc;

use futures_util::future::{FutureExt, LocalBoxFuture};
use indexmap::IndexMap;

use crate::ast::Token;
use crate::error::{TwigError, TwigResult};
use crate::value::{Object, Value};

/// A render scope.
///
/// Cloning a `Context` shares the underlying scope, so a `set` in one clone
/// is visible through the other. [`Context::child`] makes an isolated
/// shallow copy instead.
#[derive(Debug, Clone, Default)]
pub struct Context {
    data: Rc<RefCell<Object>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, name: K, value: V) -> &mut Self {
        self.set(name, value);
        self
    }

    pub fn get<T: AsRef<str>>(&self, name: T) -> Option<Value> {
        self.data.borrow().get(name.as_ref()).cloned()
    }

    pub fn contains<T: AsRef<str>>(&self, name: T) -> bool {
        self.data.borrow().contains_key(name.as_ref())
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }

    pub(crate) fn set<K: Into<String>, V: Into<Value>>(&self, name: K, value: V) {
        self.data.borrow_mut().insert(name.into(), value.into());
    }

    pub(crate) fn remove(&self, name: &str) {
        self.data.borrow_mut().shift_remove(name);
    }

    /// A shallow copy that no longer shares its scope with `self`.
    pub fn child(&self) -> Self {
        Self {
            data: Rc::new(RefCell::new(self.data.borrow().clone())),
        }
    }

    /// Copies the entries of an object value into `self`.
    pub(crate) fn extend_with(&self, value: &Value) {
        if let Value::Object(map) = value {
            self.data
                .borrow_mut()
                .extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    /// Writes back entries of `inner` whose keys already exist in `self`.
    pub(crate) fn merge_existing(&self, inner: &Self) {
        let inner = inner.data.borrow();
        let mut data = self.data.borrow_mut();
        for (key, value) in inner.iter() {
            if let Some(slot) = data.get_mut(key) {
                *slot = value.clone();
            }
        }
    }

    /// A point-in-time copy of the scope as an object value.
    pub fn snapshot(&self) -> Value {
        Value::object(self.data.borrow().clone())
    }
}

impl From<Object> for Context {
    fn from(data: Object) -> Self {
        Self {
            data: Rc::new(RefCell::new(data)),
        }
    }
}

impl From<serde_json::Value> for Context {
    /// Non-object JSON produces an empty context.
    fn from(json: serde_json::Value) -> Self {
        if let Value::Object(map) = Value::from(json) {
            Self::from(Rc::unwrap_or_clone(map))
        } else {
            Self::new()
        }
    }
}

/// How `object.key` resolves a key on a value.
pub trait Accessor {
    fn access(&self, object: &Value, key: &str) -> Value;
}

/// Probes `key`, then `getKey`, then `isKey`; arrays and strings expose
/// numeric indexes and `length`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GetterProbing;

impl Accessor for GetterProbing {
    fn access(&self, object: &Value, key: &str) -> Value {
        match object {
            Value::Object(map) => {
                if let Some(value) = map.get(key) {
                    return value.clone();
                }
                let capitalized = capitalize(key);
                map.get(&format!("get{}", capitalized))
                    .or_else(|| map.get(&format!("is{}", capitalized)))
                    .cloned()
                    .unwrap_or_default()
            }
            Value::Array(items) if key == "length" => Value::from(items.len()),
            Value::Array(_) | Value::String(_) | Value::Markup(_) => object
                .get_key(&Value::from(key))
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Template content returned by a [`Loader`].
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    Text(String),
    /// Tokens produced by an earlier compilation.
    Compiled(Vec<Token>),
}

impl From<&str> for TemplateSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for TemplateSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    /// Resolved location, e.g. a file path.
    pub location: &'a str,
    /// Registry id the template will be stored under.
    pub id: &'a str,
    pub base: Option<&'a str>,
}

pub type LoadFuture<'a> = LocalBoxFuture<'a, TwigResult<Option<TemplateSource>>>;

/// A named source of templates. Returning `Ok(None)` means "not found".
pub trait Loader {
    fn load<'a>(&'a self, request: LoadRequest<'a>) -> LoadFuture<'a>;
}

impl<F> Loader for F
where
    F: Fn(&str) -> TwigResult<Option<TemplateSource>>,
{
    fn load<'a>(&'a self, request: LoadRequest<'a>) -> LoadFuture<'a> {
        let result = self(request.location);
        async move { result }.boxed_local()
    }
}

/// Reads templates from disk, registered as `fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemLoader;

impl Loader for FileSystemLoader {
    fn load<'a>(&'a self, request: LoadRequest<'a>) -> LoadFuture<'a> {
        let result = match std::fs::read_to_string(request.location) {
            Ok(text) => Ok(Some(TemplateSource::Text(text))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TwigError::Loader(format!(
                "Unable to read template file {}: {}",
                request.location, err
            ))),
        };
        async move { result }.boxed_local()
    }
}

/// `TwigInterface` is the minimal surface of a Twig engine: register
/// templates by name and render them.
pub trait TwigInterface {
    /// `add_template` compiles `content` and makes it available under `name`.
    ///
    /// # Errors
    /// - If the template name is a duplicate.
    /// - If the template fails to compile.
    fn add_template<N: AsRef<str>, C: Into<String>>(&mut self, name: N, content: C)
    -> TwigResult<()>;

    /// `render` tries to render a template with the given context.
    ///
    /// # Errors
    /// - If the template name is not found.
    /// - If rendering fails while `rethrow` is enabled, or an extension
    ///   suspends.
    fn render<N: AsRef<str>>(&self, template_name: N, context: Option<&Context>)
    -> TwigResult<String>;
}

/// Ordered name-to-path prefixes used by `name::file` and `@name/file`.
pub type Namespaces = IndexMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_child_is_isolated() {
        let mut parent = Context::new();
        parent.insert("a", 1);
        let child = parent.child();
        child.set("a", 2);
        child.set("b", 3);
        assert_eq!(parent.get("a"), Some(Value::from(1)), "parent unchanged");
        assert!(!parent.contains("b"), "no new keys leak");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_merge_existing_only_updates_known_keys() {
        let mut parent = Context::new();
        parent.insert("a", 1);
        let child = parent.child();
        child.set("a", 5);
        child.set("b", 6);
        parent.merge_existing(&child);
        assert_eq!(parent.get("a"), Some(Value::from(5)), "existing key updated");
        assert!(!parent.contains("b"), "new key discarded");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_getter_probing() {
        let mut map = Object::new();
        map.insert("getName".to_string(), Value::from("n"));
        map.insert("isAdmin".to_string(), Value::from(true));
        let object = Value::object(map);
        assert_eq!(GetterProbing.access(&object, "name"), Value::from("n"), "getter");
        assert_eq!(GetterProbing.access(&object, "admin"), Value::from(true), "is-er");
        assert!(GetterProbing.access(&object, "x").is_undefined(), "missing");

        let items = Value::from(vec![1, 2, 3]);
        assert_eq!(GetterProbing.access(&items, "length"), Value::from(3), "length");
        assert_eq!(GetterProbing.access(&items, "1"), Value::from(2), "index");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_snapshot_is_a_copy() {
        let mut context = Context::new();
        context.insert("a", 1);
        let snapshot = context.snapshot();
        context.insert("a", 2);
        assert_eq!(
            snapshot.as_object().and_then(|m| m.get("a")).cloned(),
            Some(Value::from(1)),
            "snapshot keeps old value"
        );
    }
}
