//! Handler descriptors and the role-grouped result handed to the schema layer.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::handler::Callback;

/// Role a handler plays in the schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum HandlerRole {
    Query,
    Mutation,
    Subscription,
    FieldResolver,
    Unclassified,
}

impl HandlerRole {
    /// Query, mutation and subscription handlers sit on the schema root types.
    pub fn is_root_operation(self) -> bool {
        matches!(
            self,
            HandlerRole::Query | HandlerRole::Mutation | HandlerRole::Subscription
        )
    }
}

impl fmt::Display for HandlerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandlerRole::Query => "Query",
            HandlerRole::Mutation => "Mutation",
            HandlerRole::Subscription => "Subscription",
            HandlerRole::FieldResolver => "FieldResolver",
            HandlerRole::Unclassified => "Unclassified",
        };
        f.write_str(s)
    }
}

/// One discovered handler.
///
/// Descriptors are values: binding produces a new descriptor carrying the callback
/// rather than filling the field in place.
#[derive(Clone)]
pub struct HandlerDescriptor {
    pub role: HandlerRole,
    pub method_name: &'static str,
    /// Schema-visible name; the method name unless the declaration overrides it.
    pub field_name: String,
    /// Owning object type of a field resolver.
    pub parent_type: Option<&'static str>,
    pub is_delegated: bool,
    callback: Option<Callback>,
}

impl HandlerDescriptor {
    pub fn new(role: HandlerRole, method_name: &'static str, is_delegated: bool) -> Self {
        Self {
            role,
            method_name,
            field_name: method_name.to_string(),
            parent_type: None,
            is_delegated,
            callback: None,
        }
    }

    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    pub fn with_parent_type(mut self, parent: Option<&'static str>) -> Self {
        self.parent_type = parent;
        self
    }

    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn callback(&self) -> Option<&Callback> {
        self.callback.as_ref()
    }

    /// Classification identity, stable across discovery passes.
    pub fn key(&self) -> (HandlerRole, &'static str, bool) {
        (self.role, self.method_name, self.is_delegated)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("role", &self.role)
            .field("method_name", &self.method_name)
            .field("field_name", &self.field_name)
            .field("parent_type", &self.parent_type)
            .field("is_delegated", &self.is_delegated)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Printable row of the discovery result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HandlerSummary {
    pub role: HandlerRole,
    pub field_name: String,
    pub method_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<&'static str>,
    pub is_delegated: bool,
}

/// Descriptors grouped by role; order within a group is discovery order.
#[derive(Clone, Default)]
pub struct ResolverGroups {
    groups: BTreeMap<HandlerRole, Vec<HandlerDescriptor>>,
}

impl ResolverGroups {
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = HandlerDescriptor>) -> Self {
        let mut groups: BTreeMap<HandlerRole, Vec<HandlerDescriptor>> = BTreeMap::new();
        for d in descriptors {
            groups.entry(d.role).or_default().push(d);
        }
        Self { groups }
    }

    pub fn get(&self, role: HandlerRole) -> &[HandlerDescriptor] {
        self.groups.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First handler of `role` exposed under `field_name`.
    pub fn find(&self, role: HandlerRole, field_name: &str) -> Option<&HandlerDescriptor> {
        self.get(role).iter().find(|d| d.field_name == field_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (HandlerRole, &[HandlerDescriptor])> {
        self.groups.iter().map(|(r, v)| (*r, v.as_slice()))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &HandlerDescriptor> {
        self.groups.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> Vec<HandlerSummary> {
        self.descriptors()
            .map(|d| HandlerSummary {
                role: d.role,
                field_name: d.field_name.clone(),
                method_name: d.method_name,
                parent_type: d.parent_type,
                is_delegated: d.is_delegated,
            })
            .collect()
    }
}

impl fmt::Debug for ResolverGroups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<String, usize> = self
            .groups
            .iter()
            .map(|(r, v)| (r.to_string(), v.len()))
            .collect();
        f.debug_struct("ResolverGroups")
            .field("counts", &counts)
            .finish()
    }
}
