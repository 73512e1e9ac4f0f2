//! Repository object handles shared between the result list and actions
//!
//! A [`Target`] is owned by the surrounding result-list component. Actions
//! read it and update only its status flags, version token and enabled flag.
//! Exclusive ownership for the duration of an action is expressed with a
//! [`TargetClaim`], taken at dispatch time.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Repository object identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    /// Create a new target id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque version token, only ever compared for equality
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionToken(pub String);

impl VersionToken {
    /// Create a token from its textual form
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Derive a token from a status response body.
    ///
    /// Bare strings are taken verbatim; any other JSON value is compared by
    /// its serialized form.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(token) => Self(token.clone()),
            Value::Null => Self::default(),
            other => Self(other.to_string()),
        }
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known status flags
pub mod status {
    /// Object is visible to the public
    pub const PUBLISHED: &str = "published";
    /// Object is in the trash
    pub const DELETED: &str = "deleted";
    /// Object has been permanently removed
    pub const DESTROYED: &str = "destroyed";
}

/// Well-known permission names
pub mod permission {
    /// May publish or unpublish
    pub const PUBLISH: &str = "publish";
    /// May move to and restore from the trash
    pub const DELETE: &str = "delete";
    /// May permanently remove
    pub const DESTROY: &str = "destroy";
    /// May request a search index rebuild
    pub const REINDEX: &str = "reindex";
    /// May move between containers
    pub const MOVE: &str = "move";
}

/// One repository object as seen by the result list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Object identifier
    pub id: TargetId,
    /// Version token of the last observed authoritative record
    pub version: VersionToken,
    /// Status flags (published, deleted, ...)
    pub status: BTreeSet<String>,
    /// Permissions the current user holds on the object
    pub permissions: BTreeSet<String>,
    /// Whether the object is a collection containing other objects
    #[serde(default)]
    pub collection: bool,
    /// Whether controls for this object accept input
    pub enabled: bool,
    /// Whether the object is selected in the result list
    pub selected: bool,
}

impl Target {
    /// Create an enabled, unselected target with no flags
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: TargetId::new(id),
            version: VersionToken::new(version),
            status: BTreeSet::new(),
            permissions: BTreeSet::new(),
            collection: false,
            enabled: true,
            selected: false,
        }
    }

    /// Builder: add status flags
    pub fn with_status<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.status.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Builder: add permissions
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Builder: mark selected
    pub fn selected(mut self) -> Self {
        self.selected = true;
        self
    }

    /// Builder: mark as collection
    pub fn as_collection(mut self) -> Self {
        self.collection = true;
        self
    }

    /// Check a status flag
    pub fn has_status(&self, flag: &str) -> bool {
        self.status.contains(flag)
    }

    /// Check a permission
    pub fn can(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Shared, mutable handle to a [`Target`]
#[derive(Debug, Clone)]
pub struct TargetHandle {
    record: Arc<RwLock<Target>>,
    busy: Arc<AtomicBool>,
}

impl TargetHandle {
    /// Wrap a target record
    pub fn new(target: Target) -> Self {
        Self {
            record: Arc::new(RwLock::new(target)),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identifier of the wrapped target
    pub fn id(&self) -> TargetId {
        self.record.read().id.clone()
    }

    /// Copy of the current record
    pub fn snapshot(&self) -> Target {
        self.record.read().clone()
    }

    /// Read the record through a closure
    pub fn read<R>(&self, f: impl FnOnce(&Target) -> R) -> R {
        f(&self.record.read())
    }

    /// Update the record through a closure
    pub fn update<R>(&self, f: impl FnOnce(&mut Target) -> R) -> R {
        f(&mut self.record.write())
    }

    /// Set the enabled flag
    pub fn set_enabled(&self, enabled: bool) {
        self.record.write().enabled = enabled;
    }

    /// Whether an action currently owns this target
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim exclusive ownership; `None` when another action holds it.
    pub fn try_claim(&self) -> Option<TargetClaim> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TargetClaim {
                handle: self.clone(),
            })
    }

    /// Whether two handles refer to the same record
    pub fn same_as(&self, other: &TargetHandle) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }
}

/// Ownership of a busy target; released on drop
#[derive(Debug)]
pub struct TargetClaim {
    handle: TargetHandle,
}

impl TargetClaim {
    /// The claimed target
    pub fn handle(&self) -> &TargetHandle {
        &self.handle
    }
}

impl Drop for TargetClaim {
    fn drop(&mut self) {
        self.handle.busy.store(false, Ordering::Release);
    }
}

/// Target shape carried by a dispatched event
#[derive(Debug, Clone)]
pub enum TargetSelection {
    /// A single object
    One(TargetHandle),
    /// A candidate set for a batch action
    Many(Vec<TargetHandle>),
}

impl TargetSelection {
    /// All handles regardless of shape
    pub fn handles(&self) -> Vec<TargetHandle> {
        match self {
            Self::One(handle) => vec![handle.clone()],
            Self::Many(handles) => handles.clone(),
        }
    }

    /// Identifiers of every handle
    pub fn ids(&self) -> Vec<TargetId> {
        match self {
            Self::One(handle) => vec![handle.id()],
            Self::Many(handles) => handles.iter().map(TargetHandle::id).collect(),
        }
    }

    /// Whether the selection references the given id
    pub fn contains(&self, id: &TargetId) -> bool {
        match self {
            Self::One(handle) => &handle.id() == id,
            Self::Many(handles) => handles.iter().any(|handle| &handle.id() == id),
        }
    }
}
