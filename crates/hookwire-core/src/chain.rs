//! Handler chain assembly and wiring.
//!
//! A [`HandlerChain`] is an ordered list of handlers. Each handler declares
//! the capabilities it provides and requires, and registers hooks at typed
//! [`ExtensionPoint`]s. [`HandlerChain::wire`] validates the requirements,
//! resolves every extension point into an ordered hook list once, and
//! returns a [`WiredChain`] that protocols read from while serving.
//!
//! ```ignore
//! let chain = HandlerChain::new()
//!     .with(StartTlsCapability)
//!     .with(RecipientPolicy::new(domains))
//!     .wire()?;
//! let rcpt_hooks = chain.hooks(&RCPT_HOOK);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::WiringError;
use crate::hook::HookList;

/// A named feature offered by a handler.
///
/// Capabilities serve two purposes: they satisfy other handlers'
/// requirements at wiring time, and advertised ones are announced to
/// clients (EHLO keywords, IMAP capabilities). Two capabilities are equal
/// when their names are equal ignoring ASCII case.
#[derive(Debug, Clone, Copy)]
pub struct Capability {
    name: &'static str,
    advertise: bool,
}

impl Capability {
    /// Creates a capability that is advertised to clients.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            advertise: true,
        }
    }

    /// Creates a capability used only for wiring, never advertised.
    #[must_use]
    pub const fn internal(name: &'static str) -> Self {
        Self {
            name,
            advertise: false,
        }
    }

    /// Returns the capability name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if clients should see this capability.
    #[must_use]
    pub const fn is_advertised(&self) -> bool {
        self.advertise
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(other.name)
    }
}

impl Eq for Capability {}

impl Hash for Capability {
    fn hash<S: Hasher>(&self, state: &mut S) {
        for byte in self.name.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A named stage where hooks of type `H` can be registered.
///
/// Declared as constants by protocol crates:
///
/// ```ignore
/// pub const RCPT_HOOK: ExtensionPoint<dyn RcptHook> = ExtensionPoint::new("rcpt");
/// ```
pub struct ExtensionPoint<H: ?Sized> {
    name: &'static str,
    singleton: bool,
    _hook: PhantomData<fn() -> Arc<H>>,
}

impl<H: ?Sized> ExtensionPoint<H> {
    /// Declares an extension point accepting any number of hooks.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            singleton: false,
            _hook: PhantomData,
        }
    }

    /// Declares an extension point accepting at most one hook.
    ///
    /// The SMTP, LMTP and IMAP points are all multi-hook; this is for
    /// handler crates declaring their own points.
    #[must_use]
    pub const fn singleton(name: &'static str) -> Self {
        Self {
            name,
            singleton: true,
            _hook: PhantomData,
        }
    }

    /// Returns the extension point name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if at most one hook may be registered.
    #[must_use]
    pub const fn is_singleton(&self) -> bool {
        self.singleton
    }
}

impl<H: ?Sized> Clone for ExtensionPoint<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: ?Sized> Copy for ExtensionPoint<H> {}

impl<H: ?Sized> fmt::Debug for ExtensionPoint<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPoint")
            .field("name", &self.name)
            .field("singleton", &self.singleton)
            .finish()
    }
}

/// A unit of business logic that can be added to a [`HandlerChain`].
pub trait Handler: Send + Sync + 'static {
    /// Name used in logs and wiring errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Capabilities this handler offers to the chain.
    fn provides(&self) -> &[Capability] {
        &[]
    }

    /// Capabilities that some other handler in the chain must provide.
    fn requires(&self) -> &[Capability] {
        &[]
    }

    /// Registers this handler's hooks.
    ///
    /// # Errors
    ///
    /// Returns an error if a registration conflicts with the chain.
    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError>;
}

struct Entry {
    hook_type: TypeId,
    singleton: bool,
    hooks: Box<dyn Any + Send + Sync>,
}

/// Registration target passed to [`Handler::register`].
pub struct ExtensionPoints {
    entries: HashMap<&'static str, Entry>,
    registering: String,
}

impl ExtensionPoints {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            registering: String::new(),
        }
    }

    /// Appends `hook` to the extension point.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::DuplicateSingleton`] if the point accepts one
    /// hook and already has it, or [`WiringError::HookTypeMismatch`] if the
    /// name was registered with a different hook type.
    pub fn add<H>(&mut self, point: &ExtensionPoint<H>, hook: Arc<H>) -> Result<(), WiringError>
    where
        H: ?Sized + Send + Sync + 'static,
    {
        let entry = self.entries.entry(point.name).or_insert_with(|| Entry {
            hook_type: TypeId::of::<Vec<Arc<H>>>(),
            singleton: point.singleton,
            hooks: Box::new(Vec::<Arc<H>>::new()),
        });

        if entry.hook_type != TypeId::of::<Vec<Arc<H>>>() || entry.singleton != point.singleton {
            return Err(WiringError::HookTypeMismatch { point: point.name });
        }
        let hooks = entry
            .hooks
            .downcast_mut::<Vec<Arc<H>>>()
            .ok_or(WiringError::HookTypeMismatch { point: point.name })?;

        if entry.singleton && !hooks.is_empty() {
            return Err(WiringError::DuplicateSingleton {
                point: point.name,
                handler: self.registering.clone(),
            });
        }
        hooks.push(hook);
        Ok(())
    }

    fn get<H>(&self, point: &ExtensionPoint<H>) -> Option<&Vec<Arc<H>>>
    where
        H: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .get(point.name)
            .and_then(|entry| entry.hooks.downcast_ref::<Vec<Arc<H>>>())
    }
}

impl fmt::Debug for ExtensionPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort_unstable();
        f.debug_struct("ExtensionPoints")
            .field("points", &names)
            .finish()
    }
}

/// An ordered, not yet validated list of handlers.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler.
    #[must_use]
    pub fn with<H: Handler>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Appends a shared handler.
    pub fn add(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    /// Inserts a handler at `index`, so its hooks run before later ones.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&mut self, index: usize, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(index, handler);
        self
    }

    /// Returns the number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if the chain has no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Validates the chain and resolves every extension point.
    ///
    /// A requirement is only satisfied by a different handler than the one
    /// declaring it. Consumes the chain, so wiring happens once.
    ///
    /// # Errors
    ///
    /// Returns the first [`WiringError`] found.
    pub fn wire(self) -> Result<WiredChain, WiringError> {
        for (index, handler) in self.handlers.iter().enumerate() {
            for required in handler.requires() {
                let satisfied = self
                    .handlers
                    .iter()
                    .enumerate()
                    .any(|(other, h)| other != index && h.provides().contains(required));
                if !satisfied {
                    return Err(WiringError::MissingCapability {
                        handler: handler.name().to_string(),
                        capability: *required,
                    });
                }
            }
        }

        let mut points = ExtensionPoints::new();
        let mut capabilities: Vec<Capability> = Vec::new();
        for handler in &self.handlers {
            points.registering = handler.name().to_string();
            Arc::clone(handler).register(&mut points)?;
            for capability in handler.provides() {
                if !capabilities.contains(capability) {
                    capabilities.push(*capability);
                }
            }
        }
        points.registering.clear();

        tracing::info!(
            handlers = self.handlers.len(),
            points = points.entries.len(),
            capabilities = capabilities.len(),
            "handler chain wired"
        );

        Ok(WiredChain {
            handlers: self.handlers,
            points,
            capabilities,
        })
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("HandlerChain")
            .field("handlers", &names)
            .finish()
    }
}

/// A validated chain. Immutable and shared by all connections.
pub struct WiredChain {
    handlers: Vec<Arc<dyn Handler>>,
    points: ExtensionPoints,
    capabilities: Vec<Capability>,
}

impl WiredChain {
    /// Returns the hooks registered at `point`, in registration order.
    ///
    /// An extension point nobody registered at yields an empty list.
    #[must_use]
    pub fn hooks<H>(&self, point: &ExtensionPoint<H>) -> HookList<H>
    where
        H: ?Sized + Send + Sync + 'static,
    {
        let hooks = self.points.get(point).cloned().unwrap_or_default();
        HookList::new(point.name, hooks)
    }

    /// Returns `true` if some handler provides `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Returns `true` if some handler provides a capability named `name`.
    #[must_use]
    pub fn has_capability_named(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|capability| capability.name.eq_ignore_ascii_case(name))
    }

    /// Iterates over every provided capability, first provider order.
    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    /// Iterates over the capabilities to announce to clients.
    pub fn advertised(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter().filter(|c| c.is_advertised())
    }

    /// Iterates over the handlers in chain order.
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.handlers.iter()
    }
}

impl fmt::Debug for WiredChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("WiredChain")
            .field("handlers", &names)
            .field("points", &self.points)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::hook::{HookOutcome, HookResult, HookReturnCode};

    trait Greet: Send + Sync {
        fn greet(&self) -> HookOutcome;
    }

    trait Audit: Send + Sync {
        fn audit(&self) -> HookOutcome;
    }

    const GREET: ExtensionPoint<dyn Greet> = ExtensionPoint::new("greet");
    const AUDIT: ExtensionPoint<dyn Audit> = ExtensionPoint::singleton("audit");
    const GREET_AS_AUDIT: ExtensionPoint<dyn Audit> = ExtensionPoint::new("greet");

    const FOO: Capability = Capability::new("Foo");
    const SECRET: Capability = Capability::internal("secret");

    struct Greeter {
        result: HookResult,
        provides: Vec<Capability>,
        requires: Vec<Capability>,
    }

    impl Greeter {
        fn new(result: HookResult) -> Self {
            Self {
                result,
                provides: Vec::new(),
                requires: Vec::new(),
            }
        }

        fn providing(mut self, capability: Capability) -> Self {
            self.provides.push(capability);
            self
        }

        fn requiring(mut self, capability: Capability) -> Self {
            self.requires.push(capability);
            self
        }
    }

    impl Greet for Greeter {
        fn greet(&self) -> HookOutcome {
            Ok(self.result.clone())
        }
    }

    impl Handler for Greeter {
        fn name(&self) -> &str {
            "greeter"
        }

        fn provides(&self) -> &[Capability] {
            &self.provides
        }

        fn requires(&self) -> &[Capability] {
            &self.requires
        }

        fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
            points.add(&GREET, self as Arc<dyn Greet>)
        }
    }

    struct Auditor;

    impl Audit for Auditor {
        fn audit(&self) -> HookOutcome {
            Ok(HookResult::ok())
        }
    }

    impl Handler for Auditor {
        fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
            points.add(&AUDIT, self as Arc<dyn Audit>)
        }
    }

    struct Confused;

    impl Audit for Confused {
        fn audit(&self) -> HookOutcome {
            Ok(HookResult::declined())
        }
    }

    impl Handler for Confused {
        fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
            points.add(&GREET_AS_AUDIT, self as Arc<dyn Audit>)
        }
    }

    #[test]
    fn test_hooks_resolved_in_chain_order() {
        let chain = HandlerChain::new()
            .with(Greeter::new(HookResult::declined()))
            .with(Greeter::new(HookResult::deny()))
            .with(Greeter::new(HookResult::ok()))
            .wire()
            .unwrap();

        let hooks = chain.hooks(&GREET);
        assert_eq!(hooks.len(), 3);
        let result = hooks.run(Greet::greet).unwrap();
        assert_eq!(result.code(), HookReturnCode::Deny);
    }

    #[test]
    fn test_unregistered_point_is_empty() {
        let chain = HandlerChain::new().wire().unwrap();
        assert!(chain.hooks(&AUDIT).is_empty());
    }

    #[test]
    fn test_missing_capability_fails() {
        let err = HandlerChain::new()
            .with(Greeter::new(HookResult::ok()).requiring(FOO))
            .wire()
            .unwrap_err();

        assert_eq!(
            err,
            WiringError::MissingCapability {
                handler: "greeter".to_string(),
                capability: FOO,
            }
        );
        assert!(err.to_string().contains("Foo"));
    }

    #[test]
    fn test_requirement_not_satisfied_by_itself() {
        let result = HandlerChain::new()
            .with(Greeter::new(HookResult::ok()).providing(FOO).requiring(FOO))
            .wire();
        assert!(result.is_err());
    }

    #[test]
    fn test_requirement_satisfied_by_other_handler() {
        let chain = HandlerChain::new()
            .with(Greeter::new(HookResult::ok()).requiring(FOO))
            .with(Greeter::new(HookResult::ok()).providing(FOO))
            .wire()
            .unwrap();
        assert!(chain.has_capability(&FOO));
        assert!(chain.has_capability_named("foo"));
    }

    #[test]
    fn test_capability_names_ignore_case() {
        const LOWER: Capability = Capability::new("foo");
        assert_eq!(LOWER, FOO);

        let chain = HandlerChain::new()
            .with(Greeter::new(HookResult::ok()).requiring(LOWER))
            .with(Greeter::new(HookResult::ok()).providing(FOO).providing(LOWER))
            .wire()
            .unwrap();
        assert!(chain.has_capability(&LOWER));
        assert!(chain.has_capability_named("FOO"));
        assert_eq!(chain.capabilities().count(), 1);
    }

    #[test]
    fn test_duplicate_singleton_fails() {
        let err = HandlerChain::new()
            .with(Auditor)
            .with(Auditor)
            .wire()
            .unwrap_err();
        assert!(matches!(
            err,
            WiringError::DuplicateSingleton { point: "audit", .. }
        ));
    }

    #[test]
    fn test_conflicting_hook_types_fail() {
        let err = HandlerChain::new()
            .with(Greeter::new(HookResult::ok()))
            .with(Confused)
            .wire()
            .unwrap_err();
        assert_eq!(err, WiringError::HookTypeMismatch { point: "greet" });
    }

    #[test]
    fn test_internal_capabilities_not_advertised() {
        let chain = HandlerChain::new()
            .with(Greeter::new(HookResult::ok()).providing(FOO))
            .with(Greeter::new(HookResult::ok()).providing(SECRET).providing(FOO))
            .wire()
            .unwrap();

        let all: Vec<_> = chain.capabilities().map(Capability::name).collect();
        assert_eq!(all, ["Foo", "secret"]);
        let advertised: Vec<_> = chain.advertised().map(Capability::name).collect();
        assert_eq!(advertised, ["Foo"]);
    }

    #[test]
    fn test_insert_runs_first() {
        let mut chain = HandlerChain::new().with(Greeter::new(HookResult::ok()));
        chain.insert(0, Arc::new(Greeter::new(HookResult::deny_soft())));
        assert_eq!(chain.len(), 2);

        let chain = chain.wire().unwrap();
        let result = chain.hooks(&GREET).run(Greet::greet).unwrap();
        assert_eq!(result.code(), HookReturnCode::DenySoft);
    }
}
