//! Scope and item discovery.
//!
//! Listings are memoized per scope for the lifetime of the session. The
//! namespace of a simulation does not change while it is being debugged,
//! so nothing here is ever invalidated.

use std::collections::BTreeMap;
use std::sync::Arc;

use rtldebug_types::{
    Command, ItemDescription, Response, SCOPE_SEPARATOR, ScopeDescription, Variable,
};
use tracing::debug;

use super::Session;
use crate::error::SessionError;
use crate::scope::Scope;

impl Session {
    /// Descriptions of the items directly inside `scope`, keyed by full name.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the listing cannot be fetched.
    pub async fn list_items_in(
        &self,
        scope: &str,
    ) -> Result<Arc<BTreeMap<String, ItemDescription>>, SessionError> {
        let cached = self.inner.namespace.lock().items.get(scope).cloned();
        if let Some(items) = cached {
            return Ok(items);
        }
        let response = self
            .perform(Command::ListItems {
                scope: Some(scope.to_owned()),
            })
            .await?;
        let items = match response {
            Response::ListItems { items } => Arc::new(items),
            other => return Err(SessionError::unexpected("list_items", &other)),
        };
        debug!(scope, count = items.len(), "Listed items");
        let mut namespace = self.inner.namespace.lock();
        Ok(Arc::clone(
            namespace
                .items
                .entry(scope.to_owned())
                .or_insert(items),
        ))
    }

    /// Descriptions of the immediate child scopes of `scope`, keyed by full
    /// name. The root scope is `""`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the listing cannot be fetched.
    pub async fn list_scopes_in(
        &self,
        scope: &str,
    ) -> Result<Arc<BTreeMap<String, ScopeDescription>>, SessionError> {
        let cached = self.inner.namespace.lock().scopes.get(scope).cloned();
        if let Some(scopes) = cached {
            return Ok(scopes);
        }
        let listed = self.fetch_scopes(scope).await?;
        let children: BTreeMap<String, ScopeDescription> = listed
            .into_iter()
            .filter(|(name, _)| is_immediate_child(scope, name))
            .collect();
        debug!(scope, count = children.len(), "Listed scopes");
        let mut namespace = self.inner.namespace.lock();
        Ok(Arc::clone(
            namespace
                .scopes
                .entry(scope.to_owned())
                .or_insert_with(|| Arc::new(children)),
        ))
    }

    /// The root scope of the design.
    ///
    /// Simulations whose top level is synthesized by the agent have no root
    /// entry; those get placeholder metadata.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the listing cannot be fetched.
    pub async fn root_scope(&self) -> Result<Scope, SessionError> {
        let cached = self.inner.namespace.lock().root.clone();
        let description = match cached {
            Some(description) => description,
            None => {
                let mut listed = self.fetch_scopes("").await?;
                let description = listed.remove("").unwrap_or_else(|| {
                    debug!("Server has no root scope entry; using placeholder");
                    ScopeDescription::placeholder()
                });
                self.inner
                    .namespace
                    .lock()
                    .root
                    .get_or_insert(description)
                    .clone()
            }
        };
        Ok(Scope::new(String::new(), description, self.clone()))
    }

    /// Immediate child scopes of `scope` as model objects.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the listing cannot be fetched.
    pub async fn scopes_in(&self, scope: &str) -> Result<Vec<Scope>, SessionError> {
        let scopes = self.list_scopes_in(scope).await?;
        Ok(scopes
            .iter()
            .map(|(name, description)| Scope::new(name.clone(), description.clone(), self.clone()))
            .collect())
    }

    /// Items directly inside `scope` as model objects.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the listing cannot be fetched.
    pub async fn variables_in(&self, scope: &str) -> Result<Vec<Variable>, SessionError> {
        let items = self.list_items_in(scope).await?;
        Ok(items
            .iter()
            .map(|(name, description)| Variable::from_description(name.clone(), description))
            .collect())
    }

    /// Look up one item by its full name.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the enclosing scope cannot be listed.
    pub async fn variable(&self, full_name: &str) -> Result<Option<Variable>, SessionError> {
        let scope = full_name
            .rsplit_once(SCOPE_SEPARATOR)
            .map_or("", |(scope, _)| scope);
        let items = self.list_items_in(scope).await?;
        Ok(items
            .get(full_name)
            .map(|description| Variable::from_description(full_name, description)))
    }

    async fn fetch_scopes(
        &self,
        scope: &str,
    ) -> Result<BTreeMap<String, ScopeDescription>, SessionError> {
        let response = self
            .perform(Command::ListScopes {
                scope: Some(scope.to_owned()),
            })
            .await?;
        match response {
            Response::ListScopes { scopes } => Ok(scopes),
            other => Err(SessionError::unexpected("list_scopes", &other)),
        }
    }
}

/// Whether `name` is an immediate child of the scope `parent`.
fn is_immediate_child(parent: &str, name: &str) -> bool {
    if parent.is_empty() {
        return !name.is_empty() && !name.contains(SCOPE_SEPARATOR);
    }
    name.strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix(SCOPE_SEPARATOR))
        .is_some_and(|leaf| !leaf.is_empty() && !leaf.contains(SCOPE_SEPARATOR))
}
