//! External collaborators consumed as lookup callbacks (spec §6).
//!
//! The decoder never implements a real class registry, compact-id
//! resolver, or proxy/reference builder — those are supplied by the
//! application. This module only defines the trait seams.

use crate::class::AnyClass;
use crate::exception::UserException;

/// `typeId -> constructed instance`, i.e. the application's class factory
/// registry. Returning `None` tells the decoder to fall back to slicing.
pub trait ClassResolver {
    /// Attempt to construct a fresh, default-initialized instance for
    /// `type_id`.
    fn resolve(&self, type_id: &str) -> Option<Box<dyn AnyClass>>;
}

/// `compactId -> typeId`, a pure lookup with no allocation side effects.
pub trait CompactIdResolver {
    /// Resolve a compact id to the type-id it was negotiated to mean.
    fn resolve(&self, compact_id: i32) -> Option<String>;
}

/// `typeId -> constructed exception`, tried before the general registry
/// when throwing a user exception (spec §4.7).
pub trait ExceptionFactory {
    /// Attempt to construct a fresh instance for `type_id`.
    fn resolve(&self, type_id: &str) -> Option<Box<dyn UserException>>;
}

/// An object identity: a name plus an optional category, as carried on
/// the wire ahead of a proxy's reference data (spec §4.8).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    /// Object name. An empty name means "no proxy" (a null reference).
    pub name: String,
    /// Object category (often empty).
    pub category: String,
}

impl Identity {
    /// A null identity: empty name, empty category.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.name.is_empty()
    }
}

/// Builds the caller's concrete proxy type `P` from a decoded identity.
/// Stands in for "the proxy/reference builder" spec §1 scopes out of this
/// crate: no endpoint list, no communicator, just identity in, `P` out.
pub trait ProxyFactory<P> {
    /// Build a proxy for a non-null identity just read off the wire.
    fn build(&self, identity: Identity) -> P;
}

impl<P, F: Fn(Identity) -> P> ProxyFactory<P> for F {
    fn build(&self, identity: Identity) -> P {
        self(identity)
    }
}
