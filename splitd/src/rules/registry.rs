//! Rule class registry
//!
//! Libraries are loaded once at startup. Each library's classes are
//! registered by name; the first registration of a name wins and later
//! duplicates are rejected. A library whose `init` fails is skipped without
//! affecting the others.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::affinity::AffinityCacheClass;
use super::basic::BasicClass;
use super::online::OnlineClass;
use super::router::RouterClass;
use super::traits::{RuleClass, RuleLibrary};
use crate::error::RegistryError;
use crate::uplink::LinkStatusBoard;

/// Name of the built-in library
pub const BASE_LIBRARY: &str = "base";

/// The built-in rules
#[derive(Debug)]
pub struct BaseLibrary {
    status: Arc<LinkStatusBoard>,
}

impl BaseLibrary {
    /// Create the library; `online` rules read `status`
    #[must_use]
    pub const fn new(status: Arc<LinkStatusBoard>) -> Self {
        Self { status }
    }
}

impl RuleLibrary for BaseLibrary {
    fn name(&self) -> &str {
        BASE_LIBRARY
    }

    fn rule_classes(&self) -> Vec<Arc<dyn RuleClass>> {
        vec![
            Arc::new(BasicClass),
            Arc::new(OnlineClass::new(Arc::clone(&self.status))),
            Arc::new(AffinityCacheClass::new()),
            Arc::new(AffinityCacheClass::alias()),
            Arc::new(RouterClass),
        ]
    }
}

struct Registered {
    class: Arc<dyn RuleClass>,
    library: String,
}

/// Name-to-class table, read-only once loading is done
#[derive(Default)]
pub struct RuleRegistry {
    classes: HashMap<String, Registered>,
    libraries: Vec<Arc<dyn RuleLibrary>>,
}

impl RuleRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in library
    #[must_use]
    pub fn with_builtin(status: Arc<LinkStatusBoard>) -> Self {
        let mut registry = Self::new();
        registry.load_libraries([Arc::new(BaseLibrary::new(status)) as Arc<dyn RuleLibrary>]);
        registry
    }

    /// Load one library
    ///
    /// Returns the number of classes registered. Classes whose name is
    /// already taken are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateLibrary` if a library with the same
    /// name is loaded, or the library's own init error. Nothing is
    /// registered in either case.
    pub fn load_library(&mut self, library: Arc<dyn RuleLibrary>) -> Result<usize, RegistryError> {
        let name = library.name().to_string();
        if self.libraries.iter().any(|l| l.name() == name) {
            return Err(RegistryError::DuplicateLibrary(name));
        }

        library.init()?;

        let mut registered = 0;
        for class in library.rule_classes() {
            match self.register(&name, class) {
                Ok(()) => registered += 1,
                Err(e) => warn!(error = %e, "Rule class not registered"),
            }
        }

        info!(library = %name, classes = registered, "Rule library loaded");
        self.libraries.push(library);
        Ok(registered)
    }

    /// Load several libraries, skipping any that fail
    ///
    /// Returns the number of libraries loaded.
    pub fn load_libraries<I>(&mut self, libraries: I) -> usize
    where
        I: IntoIterator<Item = Arc<dyn RuleLibrary>>,
    {
        libraries
            .into_iter()
            .filter(|library| {
                let name = library.name().to_string();
                match self.load_library(Arc::clone(library)) {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(library = %name, error = %e, "Rule library failed to load");
                        false
                    }
                }
            })
            .count()
    }

    fn register(&mut self, library: &str, class: Arc<dyn RuleClass>) -> Result<(), RegistryError> {
        let name = class.name().to_string();
        if let Some(existing) = self.classes.get(&name) {
            debug!(class = %name, owner = %existing.library, "Class name already registered");
            return Err(RegistryError::DuplicateClass {
                name,
                library: library.to_string(),
            });
        }
        self.classes.insert(
            name,
            Registered {
                class,
                library: library.to_string(),
            },
        );
        Ok(())
    }

    /// Class registered under `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn RuleClass>> {
        self.classes.get(name).map(|r| Arc::clone(&r.class))
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Registered class names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Unregister everything and run each library's `destroy`
    ///
    /// Called automatically on drop.
    pub fn shutdown(&mut self) {
        self.classes.clear();
        for library in self.libraries.drain(..).rev() {
            library.destroy();
            debug!(library = %library.name(), "Rule library unloaded");
        }
    }
}

impl Drop for RuleRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("classes", &self.names())
            .field(
                "libraries",
                &self.libraries.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
