//! The authenticated actor behind a call
//!
//! Principals are produced by the upstream authentication stage and only read
//! by the interceptor. A connection-scoped principal is shared by every call
//! on that connection, so the locale profile slot uses interior mutability.

use crate::locale::Locale;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Answers "may this actor perform these operations on this resource"
pub trait Principal: Send + Sync + fmt::Debug {
    fn is_authorized(&self, resource: &str, operations: &BTreeSet<String>) -> bool;

    /// Locale currently recorded in the profile
    fn locale(&self) -> Option<Locale>;

    /// Record the caller's locale in the profile
    fn set_locale(&self, locale: Locale);
}

/// Principal backed by an explicit grant table
///
/// Authorized when every required operation is granted on the resource.
#[derive(Debug)]
pub struct GrantedPrincipal {
    pub user_id: Uuid,
    pub username: String,
    grants: HashMap<String, HashSet<String>>,
    locale: RwLock<Option<Locale>>,
}

impl GrantedPrincipal {
    pub fn new(user_id: Uuid, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            grants: HashMap::new(),
            locale: RwLock::new(None),
        }
    }

    /// Grant operations on a resource
    pub fn grant<I, S>(mut self, resource: impl Into<String>, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grants
            .entry(resource.into())
            .or_default()
            .extend(operations.into_iter().map(Into::into));
        self
    }
}

impl Principal for GrantedPrincipal {
    fn is_authorized(&self, resource: &str, operations: &BTreeSet<String>) -> bool {
        match self.grants.get(resource) {
            Some(granted) => operations.iter().all(|op| granted.contains(op)),
            None => false,
        }
    }

    fn locale(&self) -> Option<Locale> {
        self.locale.read().clone()
    }

    fn set_locale(&self, locale: Locale) {
        *self.locale.write() = Some(locale);
    }
}
