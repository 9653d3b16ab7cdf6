//! Template rendering and binding resolution.
//!
//! Artifacts are rendered from templates using the `${{ name }}`
//! placeholder syntax. Placeholder values come from bindings, and some
//! bindings are *deferred*: their values only exist once an external
//! resource (a directory service, a generated password) finishes
//! provisioning. The renderer itself never sees an unresolved binding:
//! [`resolve_bindings`] is the barrier that awaits every deferred value
//! first, so rendering stays a pure function of its inputs.

use std::time::Duration;

use indexmap::IndexMap;
use rigger_util::redact::{SecretString, REDACTED_PLACEHOLDER};
use tokio::sync::watch;

use crate::error::BootstrapError;

/// Ordered placeholder bindings for one artifact.
pub type Bindings = IndexMap<String, Binding>;

/// A value supplied for a template placeholder.
#[derive(Debug, Clone)]
pub enum Binding {
    /// Plain value available immediately.
    Value(String),
    /// Secret value available immediately; redacted in previews and logs.
    Secret(SecretString),
    /// Value produced asynchronously by the embedding program.
    Deferred(Deferred),
}

impl Binding {
    /// Build a plain binding.
    pub fn value(text: impl Into<String>) -> Self {
        Binding::Value(text.into())
    }

    /// Build a secret binding.
    pub fn secret(text: impl Into<SecretString>) -> Self {
        Binding::Secret(text.into())
    }

    /// Whether the eventual value must stay out of previews and logs.
    pub fn is_secret(&self) -> bool {
        match self {
            Binding::Value(_) => false,
            Binding::Secret(_) => true,
            Binding::Deferred(deferred) => deferred.is_secret(),
        }
    }
}

/// Handle for a value that arrives after external provisioning completes.
///
/// Cloneable; every clone observes the same resolution. The producer side
/// is a [`DeferredResolver`], created together with the handle.
#[derive(Clone)]
pub struct Deferred {
    name: String,
    secret: bool,
    receiver: watch::Receiver<Option<String>>,
}

/// Producer side of a [`Deferred`] value. Resolving consumes the resolver;
/// dropping it unresolved makes every waiter fail with `ResourceNotReady`.
pub struct DeferredResolver {
    sender: watch::Sender<Option<String>>,
}

// The channel may already hold a secret value, so neither side exposes it
// through Debug.
impl std::fmt::Debug for Deferred {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Deferred")
            .field("name", &self.name)
            .field("secret", &self.secret)
            .field("resolved", &self.receiver.borrow().is_some())
            .finish()
    }
}

impl std::fmt::Debug for DeferredResolver {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("DeferredResolver")
    }
}

impl Deferred {
    /// Create a pending value and its resolver.
    pub fn pending(name: impl Into<String>) -> (DeferredResolver, Deferred) {
        Self::new(name, false)
    }

    /// Create a pending secret value and its resolver.
    pub fn pending_secret(name: impl Into<String>) -> (DeferredResolver, Deferred) {
        Self::new(name, true)
    }

    fn new(name: impl Into<String>, secret: bool) -> (DeferredResolver, Deferred) {
        let (sender, receiver) = watch::channel(None);
        (
            DeferredResolver { sender },
            Deferred {
                name: name.into(),
                secret,
                receiver,
            },
        )
    }

    /// The binding name this value belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the eventual value is a secret.
    pub fn is_secret(&self) -> bool {
        self.secret
    }

    /// The value right now, if already resolved.
    pub fn current(&self) -> Option<String> {
        self.receiver.borrow().clone()
    }

    /// Wait until the producer resolves the value.
    pub async fn await_value(&self) -> Result<String, BootstrapError> {
        let mut receiver = self.receiver.clone();
        match receiver.wait_for(|value| value.is_some()).await {
            Ok(value) => Ok(value.as_ref().expect("guarded by wait_for").clone()),
            Err(_closed) => Err(BootstrapError::ResourceNotReady { name: self.name.clone() }),
        }
    }
}

impl DeferredResolver {
    /// Supply the value, waking every waiting clone of the handle.
    pub fn resolve(self, value: impl Into<String>) {
        let _ = self.sender.send(Some(value.into()));
    }
}

/// Fully resolved bindings, ready for rendering.
#[derive(Default, Clone)]
pub struct ResolvedBindings {
    values: IndexMap<String, ResolvedValue>,
}

#[derive(Clone)]
struct ResolvedValue {
    text: String,
    secret: bool,
}

impl ResolvedBindings {
    /// The resolved value for `name`, if bound.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|value| value.text.as_str())
    }

    /// Whether `name` is bound to a secret.
    pub fn is_secret(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(|value| value.secret)
    }

    fn insert(&mut self, name: String, text: String, secret: bool) {
        self.values.insert(name, ResolvedValue { text, secret });
    }
}

impl std::fmt::Debug for ResolvedBindings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = formatter.debug_map();
        for (name, value) in &self.values {
            if value.secret {
                map.entry(name, &REDACTED_PLACEHOLDER);
            } else {
                map.entry(name, &value.text);
            }
        }
        map.finish()
    }
}

/// The pre-render resolution barrier.
///
/// Awaits every deferred binding, preserving authoring order in the
/// result. Fails with `ResourceNotReady` when a producer is dropped
/// without resolving, and with `TimedOut` when `deadline` lapses first.
pub async fn resolve_bindings(bindings: &Bindings, deadline: Duration) -> Result<ResolvedBindings, BootstrapError> {
    let barrier = async {
        let mut resolved = ResolvedBindings::default();
        for (name, binding) in bindings {
            match binding {
                Binding::Value(text) => resolved.insert(name.clone(), text.clone(), false),
                Binding::Secret(secret) => resolved.insert(name.clone(), secret.expose().to_string(), true),
                Binding::Deferred(deferred) => {
                    let text = deferred.await_value().await?;
                    resolved.insert(name.clone(), text, deferred.is_secret());
                }
            }
        }
        Ok(resolved)
    };
    match tokio::time::timeout(deadline, barrier).await {
        Ok(result) => result,
        Err(_elapsed) => Err(BootstrapError::TimedOut {
            operation: "binding resolution".into(),
            deadline,
        }),
    }
}

/// Non-blocking view of bindings for previews: deferred values that have
/// not resolved yet appear as `<pending:name>`.
pub fn preview_bindings(bindings: &Bindings) -> ResolvedBindings {
    let mut resolved = ResolvedBindings::default();
    for (name, binding) in bindings {
        match binding {
            Binding::Value(text) => resolved.insert(name.clone(), text.clone(), false),
            Binding::Secret(secret) => resolved.insert(name.clone(), secret.expose().to_string(), true),
            Binding::Deferred(deferred) => {
                let text = deferred
                    .current()
                    .unwrap_or_else(|| format!("<pending:{}>", deferred.name()));
                resolved.insert(name.clone(), text, deferred.is_secret());
            }
        }
    }
    resolved
}

/// Render `source` by substituting every `${{ name }}` placeholder.
///
/// A placeholder with no binding is an error; values are inserted exactly
/// as bound, with no escaping beyond what the template itself contains.
pub fn render_template(template: &str, source: &str, bindings: &ResolvedBindings) -> Result<String, BootstrapError> {
    render_inner(template, source, bindings, false)
}

/// Like [`render_template`], but secret bindings render as the redaction
/// placeholder. Used for previews that may end up on an operator's screen.
pub fn render_template_redacted(template: &str, source: &str, bindings: &ResolvedBindings) -> Result<String, BootstrapError> {
    render_inner(template, source, bindings, true)
}

fn render_inner(template: &str, source: &str, bindings: &ResolvedBindings, redact: bool) -> Result<String, BootstrapError> {
    let mut rendered = String::with_capacity(source.len());
    let mut remainder = source;

    while let Some(start) = remainder.find("${{") {
        rendered.push_str(&remainder[..start]);
        let after_start = &remainder[start + 3..];
        let Some(end) = after_start.find("}}") else {
            return Err(template_error(template, "unterminated '${{' placeholder"));
        };
        let name = after_start[..end].trim();
        if name.is_empty() {
            return Err(template_error(template, "empty placeholder"));
        }
        let Some(value) = bindings.get(name) else {
            return Err(template_error(template, &format!("no binding for placeholder '{name}'")));
        };
        if redact && bindings.is_secret(name) {
            rendered.push_str(REDACTED_PLACEHOLDER);
        } else {
            rendered.push_str(value);
        }
        remainder = &after_start[end + 2..];
    }

    rendered.push_str(remainder);
    Ok(rendered)
}

fn template_error(template: &str, reason: &str) -> BootstrapError {
    BootstrapError::Template {
        template: template.to_string(),
        reason: reason.to_string(),
    }
}
