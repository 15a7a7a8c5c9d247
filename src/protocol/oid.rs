//! Object identifiers: namespaced slash-separated paths.
//!
//! An [`Oid`] is concrete when it names exactly one object. A `*` (or empty)
//! component makes it generic; generic components are filled in with
//! [`Oid::resolve`]. Connections key their attributes by concrete oids.

use crate::error::{constants, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace of oids parsed without a `namespace:` prefix
pub const DEFAULT_NAMESPACE: &str = "endpoint";

/// Placeholder for a generic component
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Oid {
    namespace: String,
    path: Vec<String>,
}

fn is_generic(component: &str) -> bool {
    component.is_empty() || component == WILDCARD
}

fn invalid(what: &str, oid: impl fmt::Display) -> ProtocolError {
    ProtocolError::InvalidOid(format!("{what}: {oid}"))
}

impl Oid {
    /// Build an oid from its parts; the path must not be empty
    pub fn new<I, S>(namespace: impl Into<String>, path: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path: Vec<String> = path.into_iter().map(Into::into).collect();
        if path.is_empty() {
            return Err(ProtocolError::InvalidOid(constants::ERR_OID_EMPTY.into()));
        }
        Ok(Self {
            namespace: namespace.into(),
            path,
        })
    }

    /// Parse `[namespace:]/a/b/c`
    pub fn of(text: &str) -> Result<Self> {
        text.parse()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Always false: an oid has at least one component
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn first(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or_default()
    }

    pub fn last(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// True when no component is generic
    pub fn is_concrete(&self) -> bool {
        !self.path.iter().any(|c| is_generic(c))
    }

    /// Extend the path by one component, keeping the namespace
    pub fn child(&self, component: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(component.into());
        Self {
            namespace: self.namespace.clone(),
            path,
        }
    }

    /// Keep the first `len` components
    pub fn head(&self, len: usize) -> Result<Self> {
        if len == 0 || len > self.path.len() {
            return Err(invalid(constants::ERR_OID_LENGTH, self));
        }
        Ok(Self {
            namespace: self.namespace.clone(),
            path: self.path[..len].to_vec(),
        })
    }

    /// Oid one component shorter, `None` at the root
    pub fn parent(&self) -> Option<Self> {
        (self.path.len() > 1)
            .then(|| self.head(self.path.len() - 1).ok())
            .flatten()
    }

    /// Whether `self` lies at or below `ancestor` in the same namespace
    pub fn is_child_of(&self, ancestor: &Oid) -> bool {
        self.namespace == ancestor.namespace && self.path.starts_with(&ancestor.path)
    }

    /// Components of `self` below `ancestor`
    pub fn relativize(&self, ancestor: &Oid) -> Result<Vec<String>> {
        if !self.is_child_of(ancestor) {
            return Err(invalid(constants::ERR_OID_NOT_CHILD, self));
        }
        Ok(self.path[ancestor.path.len()..].to_vec())
    }

    /// Fill generic components from left to right.
    ///
    /// Surplus components are ignored; generic components left over stay
    /// generic.
    pub fn resolve(&self, components: &[&str]) -> Result<Self> {
        let slots: Vec<usize> = self.generic_slots().collect();
        self.fill(slots.into_iter(), components)
    }

    /// Fill the rightmost generic components, keeping the order given
    pub fn resolve_last(&self, components: &[&str]) -> Result<Self> {
        let slots: Vec<usize> = self.generic_slots().collect();
        let skip = slots.len().saturating_sub(components.len());
        let offset = components.len().saturating_sub(slots.len());
        self.fill(slots.into_iter().skip(skip), &components[offset..])
    }

    fn generic_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.path
            .iter()
            .enumerate()
            .filter(|(_, c)| is_generic(c))
            .map(|(i, _)| i)
    }

    fn fill(&self, slots: impl Iterator<Item = usize>, components: &[&str]) -> Result<Self> {
        if self.is_concrete() {
            return Err(invalid(constants::ERR_OID_CONCRETE, self));
        }

        let mut path = self.path.clone();
        for (slot, component) in slots.zip(components) {
            path[slot] = (*component).to_string();
        }
        Ok(Self {
            namespace: self.namespace.clone(),
            path,
        })
    }
}

impl FromStr for Oid {
    type Err = ProtocolError;

    fn from_str(text: &str) -> Result<Self> {
        let (namespace, path) = match text.split_once(':') {
            Some((namespace, path)) if !namespace.is_empty() => (namespace, path),
            Some(_) => return Err(invalid(constants::ERR_OID_NAMESPACE, text)),
            None => (DEFAULT_NAMESPACE, text),
        };

        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(invalid(constants::ERR_OID_EMPTY, text));
        }
        Self::new(namespace, path.split('/'))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.namespace)?;
        for component in &self.path {
            let component = if component.is_empty() { WILDCARD } else { component };
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}
