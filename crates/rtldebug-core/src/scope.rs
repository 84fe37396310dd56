//! Scopes of the design hierarchy.

use futures::FutureExt as _;
use futures::future::BoxFuture;
use rtldebug_types::{Location, SCOPE_SEPARATOR, ScopeDescription, Variable};

use crate::error::SessionError;
use crate::session::Session;

/// One level of the design hierarchy.
///
/// Children are not fetched until asked for: [`scopes`](Self::scopes) and
/// [`variables`](Self::variables) return futures that do nothing until
/// awaited. Listings are memoized by the session.
#[derive(Clone)]
pub struct Scope {
    full_name: String,
    description: ScopeDescription,
    session: Session,
}

impl Scope {
    pub(crate) const fn new(full_name: String, description: ScopeDescription, session: Session) -> Self {
        Self {
            full_name,
            description,
            session,
        }
    }

    /// Full hierarchical name; empty for the root.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Name of the scope inside its parent.
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit_once(SCOPE_SEPARATOR)
            .map_or(self.full_name.as_str(), |(_, leaf)| leaf)
    }

    /// Name of the module this scope instantiates, when known.
    pub fn module_name(&self) -> Option<&str> {
        self.description.definition.name.as_deref()
    }

    /// Where the module is defined.
    pub fn definition_location(&self) -> Option<Location> {
        self.description
            .definition
            .src
            .as_deref()
            .and_then(Location::parse)
    }

    /// Where the module is instantiated.
    pub fn instantiation_location(&self) -> Option<Location> {
        self.description
            .instantiation
            .src
            .as_deref()
            .and_then(Location::parse)
    }

    /// The raw description.
    pub const fn description(&self) -> &ScopeDescription {
        &self.description
    }

    /// Immediate child scopes, fetched when the future is awaited.
    pub fn scopes(&self) -> BoxFuture<'static, Result<Vec<Self>, SessionError>> {
        let session = self.session.clone();
        let name = self.full_name.clone();
        async move { session.scopes_in(&name).await }.boxed()
    }

    /// Items directly inside this scope, fetched when the future is awaited.
    pub fn variables(&self) -> BoxFuture<'static, Result<Vec<Variable>, SessionError>> {
        let session = self.session.clone();
        let name = self.full_name.clone();
        async move { session.variables_in(&name).await }.boxed()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("full_name", &self.full_name)
            .field("module", &self.module_name())
            .finish_non_exhaustive()
    }
}
