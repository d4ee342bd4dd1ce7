//! Dependency container consumed by the runtime.
//!
//! The runtime treats the container as an opaque key to instance resolver.
//! Keys are type names as written in annotations (`Database`, `Clock`), so
//! a facade field declared `db: Database` with no value is filled from the
//! `Database` entry.
//!
//! [`Container`] is the default implementation: instances and providers in
//! one scope, falling back to a parent scope on a miss.

use crate::error::{ContextError, Result};
use crate::script::Value;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

/// Builds an instance for one key on demand.
pub trait Provider {
    fn key(&self) -> &str;

    fn provide(&self, container: &dyn DependencyContainer) -> Result<Value>;

    /// Singleton instances are cached in the scope that resolved them.
    fn is_singleton(&self) -> bool {
        true
    }
}

pub trait DependencyContainer {
    /// The instance for `key`, or `None` when nothing provides it.
    fn get(&self, key: &str) -> Option<Value>;

    /// Like [`get`](Self::get), but a miss is an error.
    fn force_get(&self, key: &str) -> Result<Value> {
        self.get(key)
            .ok_or_else(|| ContextError::DependencyNotFound(key.to_string()))
    }

    fn register(&self, provider: Rc<dyn Provider>);

    fn set(&self, key: &str, value: Value);

    /// A new scope that falls back to this one.
    fn child(self: Rc<Self>) -> Rc<dyn DependencyContainer>;

    /// Drop every instance and provider of this scope.
    fn clear(&self);
}

/// A provider backed by a closure.
pub struct FnProvider {
    key: String,
    singleton: bool,
    factory: Box<dyn Fn(&dyn DependencyContainer) -> Result<Value>>,
}

impl FnProvider {
    pub fn new(
        key: impl Into<String>,
        factory: impl Fn(&dyn DependencyContainer) -> Result<Value> + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            singleton: true,
            factory: Box::new(factory),
        }
    }

    /// Build a fresh instance on every lookup.
    pub fn transient(mut self) -> Self {
        self.singleton = false;
        self
    }
}

impl Provider for FnProvider {
    fn key(&self) -> &str {
        &self.key
    }

    fn provide(&self, container: &dyn DependencyContainer) -> Result<Value> {
        (self.factory)(container)
    }

    fn is_singleton(&self) -> bool {
        self.singleton
    }
}

#[derive(Default)]
pub struct Container {
    parent: Option<Rc<dyn DependencyContainer>>,
    instances: RefCell<IndexMap<String, Value>>,
    providers: RefCell<IndexMap<String, Rc<dyn Provider>>>,
}

impl Container {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_parent(parent: Rc<dyn DependencyContainer>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }
}

impl DependencyContainer for Container {
    fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.instances.borrow().get(key) {
            return Some(value.clone());
        }
        let provider = self.providers.borrow().get(key).cloned();
        if let Some(provider) = provider {
            match provider.provide(self) {
                Ok(value) => {
                    if provider.is_singleton() {
                        self.instances
                            .borrow_mut()
                            .insert(key.to_string(), value.clone());
                    }
                    return Some(value);
                }
                Err(e) => {
                    warn!("[container] provider for `{key}` failed: {e}");
                    return None;
                }
            }
        }
        self.parent.as_ref().and_then(|parent| parent.get(key))
    }

    fn register(&self, provider: Rc<dyn Provider>) {
        debug!("[container] provider registered for `{}`", provider.key());
        self.providers
            .borrow_mut()
            .insert(provider.key().to_string(), provider);
    }

    fn set(&self, key: &str, value: Value) {
        debug!("[container] instance set for `{key}`");
        self.instances.borrow_mut().insert(key.to_string(), value);
    }

    fn child(self: Rc<Self>) -> Rc<dyn DependencyContainer> {
        Rc::new(Container::with_parent(self))
    }

    fn clear(&self) {
        let instances = std::mem::take(&mut *self.instances.borrow_mut());
        let providers = std::mem::take(&mut *self.providers.borrow_mut());
        drop((instances, providers));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn child_scopes_fall_back_to_parent() {
        let root = Container::new();
        root.set("Clock", Value::Int(1));
        let child = root.clone().child();
        assert_eq!(child.get("Clock"), Some(Value::Int(1)));

        child.set("Clock", Value::Int(2));
        assert_eq!(child.get("Clock"), Some(Value::Int(2)));
        assert_eq!(root.get("Clock"), Some(Value::Int(1)));
    }

    #[test]
    fn force_get_fails_loudly() {
        let root = Container::new();
        assert!(matches!(
            root.force_get("Database"),
            Err(ContextError::DependencyNotFound(k)) if k == "Database"
        ));
    }

    #[test]
    fn singleton_providers_run_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let root = Container::new();
        root.register(Rc::new(FnProvider::new("Db", move |_| {
            counter.set(counter.get() + 1);
            Ok(Value::str("db"))
        })));
        assert_eq!(root.get("Db"), Some(Value::str("db")));
        assert_eq!(root.get("Db"), Some(Value::str("db")));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn transient_providers_can_use_the_container() {
        let root = Container::new();
        root.set("Base", Value::Int(10));
        root.register(Rc::new(
            FnProvider::new("Derived", |c| {
                let base = c.force_get("Base")?;
                Ok(Value::Int(base.as_int().unwrap_or(0) + 1))
            })
            .transient(),
        ));
        assert_eq!(root.get("Derived"), Some(Value::Int(11)));
    }

    #[test]
    fn clear_drops_the_scope() {
        let root = Container::new();
        root.set("Clock", Value::Int(1));
        root.clear();
        assert!(root.get("Clock").is_none());
    }
}
