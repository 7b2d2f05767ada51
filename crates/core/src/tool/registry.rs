use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use toolchat_model::ToolDefinition;

use super::object::{BoxedToolFuture, ToolObject, ToolObjectImpl};
use super::{Error, Tool, ToolResult};

struct Entry {
    object: Box<dyn ToolObject>,
    definition: ToolDefinition,
    validator: Option<JSONSchema>,
}

impl Entry {
    fn new(object: Box<dyn ToolObject>) -> Self {
        let definition = ToolDefinition::function(
            object.name(),
            object.description(),
            object.parameter_schema().clone(),
        );
        let validator = match JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(object.parameter_schema())
        {
            Ok(validator) => Some(validator),
            Err(err) => {
                warn!(
                    "schema of tool `{}` does not compile, arguments will not \
                     be validated: {err}",
                    object.name()
                );
                None
            }
        };
        Self {
            object,
            definition,
            validator,
        }
    }

    fn validate(&self, arguments: &Value) -> Result<(), Error> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        validator.validate(arguments).map_err(|errors| {
            let reason = errors
                .map(|err| err.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Error::invalid_input().with_reason(reason)
        })
    }
}

/// [`ToolRegistry`] builder.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    entries: Vec<Entry>,
}

impl ToolRegistryBuilder {
    /// Registers a tool. A tool with the same name registered earlier is
    /// replaced, keeping its position.
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        let entry = Entry::new(Box::new(ToolObjectImpl(tool)));
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.object.name() == entry.object.name())
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    /// Builds the registry.
    pub fn build(self) -> ToolRegistry {
        let index = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.object.name().to_owned(), idx))
            .collect();
        ToolRegistry {
            inner: Arc::new(Inner {
                entries: self.entries,
                index,
                disabled: Default::default(),
            }),
        }
    }
}

struct Inner {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    disabled: RwLock<HashSet<String>>,
}

/// A fixed mapping from tool names to tools.
///
/// Tools can be disabled at runtime, which hides them from the model and
/// refuses their calls. Cloning is cheap, all clones share the same tools
/// and the same enabled flags.
#[derive(Clone)]
pub struct ToolRegistry {
    inner: Arc<Inner>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        ToolRegistryBuilder::default().build()
    }
}

impl ToolRegistry {
    #[inline]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Returns the definitions of the enabled tools, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let disabled = self.disabled();
        self.inner
            .entries
            .iter()
            .filter(|entry| !disabled.contains(entry.object.name()))
            .map(|entry| entry.definition.clone())
            .collect()
    }

    /// Returns the names of all tools, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.entries.iter().map(|entry| entry.object.name())
    }

    /// Enables or disables the tool `name`. Returns `false` if there is no
    /// such tool.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        if !self.contains(name) {
            return false;
        }
        let mut disabled = self
            .inner
            .disabled
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if enabled {
            disabled.remove(name);
        } else {
            disabled.insert(name.to_owned());
        }
        debug!("tool `{name}` enabled: {enabled}");
        true
    }

    /// Returns whether `name` is registered and enabled.
    #[inline]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.contains(name) && !self.disabled().contains(name)
    }

    fn disabled(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        self.inner
            .disabled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether a tool named `name` is registered.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.index.contains_key(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Invokes the tool `name` with JSON-encoded `arguments`.
    ///
    /// Empty arguments are treated as an empty object. The arguments are
    /// checked against the tool's schema before the tool sees them.
    pub fn invoke(
        &self,
        name: &str,
        arguments: &str,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let prepared = self.prepare(name, arguments);
        async move { prepared?.await }
    }

    fn prepare(
        &self,
        name: &str,
        arguments: &str,
    ) -> Result<BoxedToolFuture, Error> {
        let Some(&idx) = self.inner.index.get(name) else {
            warn!("tool not found: {name}");
            return Err(Error::not_found(name));
        };
        let entry = &self.inner.entries[idx];
        if self.disabled().contains(name) {
            warn!("tool is disabled: {name}");
            return Err(Error::disabled(name));
        }

        let arguments = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments).map_err(|err| {
                Error::invalid_arguments().with_reason(err.to_string())
            })?
        };
        entry.validate(&arguments)?;

        trace!("invoking tool `{name}` with args: {arguments:?}");
        Ok(entry.object.execute(arguments))
    }
}

impl Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.inner.entries.iter().map(|e| e.object.name()))
            .finish()
    }
}
