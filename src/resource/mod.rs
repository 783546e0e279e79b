//! Resource data model: type identifiers, tenancy, identity and change events.


use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

/// Structured type identifier, compared field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceType {
    pub group: String,
    pub group_version: String,
    pub kind: String,
}

impl ResourceType {
    pub fn new(
        group: impl Into<String>,
        group_version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            group_version: group_version.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.group_version, self.kind)
    }
}

/// Isolation boundary a resource lives in. An empty `peer_name` means local.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Tenancy {
    pub partition: String,
    pub namespace: String,
    pub peer_name: String,
}

impl Tenancy {
    pub fn new(
        partition: impl Into<String>,
        namespace: impl Into<String>,
        peer_name: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            namespace: namespace.into(),
            peer_name: peer_name.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.peer_name.is_empty()
    }
}

impl fmt::Display for Tenancy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let peer = if self.is_local() { "local" } else { self.peer_name.as_str() };
        write!(f, "{}.{}.{}", self.partition, self.namespace, peer)
    }
}

/// Full identity of a resource.
///
/// `uid` is assigned by the store and changes when the name slot is
/// recreated; CAS identity only looks at [`StoreKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceId {
    pub uid: String,
    pub name: String,
    pub resource_type: ResourceType,
    pub tenancy: Tenancy,
}

impl ResourceId {
    pub fn new(
        name: impl Into<String>,
        resource_type: ResourceType,
        tenancy: Tenancy,
    ) -> Self {
        Self {
            uid: String::new(),
            name: name.into(),
            resource_type,
            tenancy,
        }
    }

    pub fn with_uid(
        mut self,
        uid: impl Into<String>,
    ) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn key(&self) -> StoreKey {
        StoreKey {
            resource_type: self.resource_type.clone(),
            tenancy: self.tenancy.clone(),
            name: self.name.clone(),
        }
    }
}

/// Key the backend serializes writes on: (Type, Tenancy, Name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub resource_type: ResourceType,
    pub tenancy: Tenancy,
    pub name: String,
}

impl fmt::Display for StoreKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}/{}", self.resource_type, self.tenancy, self.name)
    }
}

/// A versioned resource.
///
/// `version` is an opaque token. On writes it carries nothing the store
/// trusts; the committed copy returned by the backend holds the new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub owner: Option<ResourceId>,
    pub version: String,
    pub metadata: HashMap<String, String>,
    pub data: Bytes,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_data(
        mut self,
        data: impl Into<Bytes>,
    ) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_owner(
        mut self,
        owner: ResourceId,
    ) -> Self {
        self.owner = Some(owner);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Created or updated
    Upsert,
    Delete,
}

/// Post-commit notification fanned out to matching subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub resource: Resource,
}

impl ChangeEvent {
    pub fn upsert(resource: Resource) -> Self {
        Self {
            operation: Operation::Upsert,
            resource,
        }
    }

    pub fn delete(resource: Resource) -> Self {
        Self {
            operation: Operation::Delete,
            resource,
        }
    }
}

/// Type + tenancy + name-prefix filter shared by listing and watching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct WatchFilter {
    pub resource_type: ResourceType,
    pub tenancy: Tenancy,
    /// Empty matches every name
    pub name_prefix: String,
}

impl WatchFilter {
    pub fn new(
        resource_type: ResourceType,
        tenancy: Tenancy,
        name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            tenancy,
            name_prefix: name_prefix.into(),
        }
    }

    pub fn matches(
        &self,
        id: &ResourceId,
    ) -> bool {
        id.resource_type == self.resource_type
            && id.tenancy == self.tenancy
            && id.name.starts_with(&self.name_prefix)
    }
}
