//! Repository operations and their wire contracts
//!
//! Each [`Operation`] fixes the permission it needs, which objects it applies
//! to, the requests that perform it, and the status change it leaves behind.
//! Single-target and batch actions are both built from these definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

use super::confirm::ConfirmSpec;
use super::error::{ActionError, ActionResult};
use super::target::{Target, TargetId, permission, status};
use super::transport::{ApiPaths, Method, RemoteRequest};

/// State-changing repository operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    /// Make an object public
    Publish,
    /// Withdraw an object from public view
    Unpublish,
    /// Move an object to the trash
    Delete,
    /// Take an object out of the trash
    Restore,
    /// Permanently remove a trashed object
    Destroy,
    /// Rebuild the search index entry for an object
    Reindex,
    /// Move an object to another container
    Move,
}

impl Operation {
    /// Every operation
    pub const ALL: [Operation; 7] = [
        Self::Publish,
        Self::Unpublish,
        Self::Delete,
        Self::Restore,
        Self::Destroy,
        Self::Reindex,
        Self::Move,
    ];

    /// Event name of the single-target action
    pub fn name(self) -> &'static str {
        match self {
            Self::Publish => "Publish",
            Self::Unpublish => "Unpublish",
            Self::Delete => "Delete",
            Self::Restore => "Restore",
            Self::Destroy => "Destroy",
            Self::Reindex => "Reindex",
            Self::Move => "Move",
        }
    }

    /// Lowercase verb, used in batch paths and match texts
    pub fn verb(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Unpublish => "unpublish",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Destroy => "destroy",
            Self::Reindex => "reindex",
            Self::Move => "move",
        }
    }

    /// Word used in success messages
    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Publish => "Published",
            Self::Unpublish => "Unpublished",
            Self::Delete => "Deleted",
            Self::Restore => "Restored",
            Self::Destroy => "Destroyed",
            Self::Reindex => "Reindexed",
            Self::Move => "Moved",
        }
    }

    /// Permission the user must hold on the object
    pub fn permission(self) -> &'static str {
        match self {
            Self::Publish | Self::Unpublish => permission::PUBLISH,
            Self::Delete | Self::Restore => permission::DELETE,
            Self::Destroy => permission::DESTROY,
            Self::Reindex => permission::REINDEX,
            Self::Move => permission::MOVE,
        }
    }

    /// Whether the object's status allows the operation
    pub fn eligible(self, target: &Target) -> bool {
        if target.has_status(status::DESTROYED) {
            return false;
        }
        let published = target.has_status(status::PUBLISHED);
        let deleted = target.has_status(status::DELETED);
        match self {
            Self::Publish => !published && !deleted,
            Self::Unpublish => published && !deleted,
            Self::Delete | Self::Move => !deleted,
            Self::Restore | Self::Destroy => deleted,
            Self::Reindex => true,
        }
    }

    /// Batch membership test: selected, enabled, permitted and eligible
    pub fn is_valid_target(self, target: &Target) -> bool {
        target.selected && target.enabled && target.can(self.permission()) && self.eligible(target)
    }

    /// Apply the completed operation to the in-memory status flags
    pub fn apply(self, target: &mut Target) {
        match self {
            Self::Publish => {
                target.status.insert(status::PUBLISHED.to_string());
            }
            Self::Unpublish => {
                target.status.remove(status::PUBLISHED);
            }
            Self::Delete => {
                target.status.insert(status::DELETED.to_string());
            }
            Self::Restore => {
                target.status.remove(status::DELETED);
            }
            Self::Destroy => {
                target.status.insert(status::DESTROYED.to_string());
            }
            Self::Reindex | Self::Move => {}
        }
    }

    /// Whether a successful work response already means completion.
    ///
    /// Everything except Destroy is applied asynchronously and observed by
    /// polling; a destroyed object has no version left to poll.
    pub fn completes_synchronously(self) -> bool {
        matches!(self, Self::Destroy)
    }

    fn single_template(self) -> (Method, &'static str) {
        match self {
            Self::Publish => (Method::Put, "object/{idPath}/publish"),
            Self::Unpublish => (Method::Delete, "object/{idPath}/publish"),
            Self::Delete => (Method::Delete, "object/{idPath}"),
            Self::Restore => (Method::Put, "object/{idPath}/restore"),
            Self::Destroy => (Method::Delete, "object/{idPath}/destroy"),
            Self::Reindex => (Method::Put, "object/{idPath}/reindex"),
            Self::Move => (Method::Put, "object/{idPath}/move"),
        }
    }

    /// Work request for one object
    pub fn single_request(
        self,
        paths: &ApiPaths,
        id: &TargetId,
        fields: &Map<String, Value>,
    ) -> ActionResult<RemoteRequest> {
        let (method, template) = self.single_template();
        let request = RemoteRequest::new(method, paths.resolve(template, id));
        match self {
            Self::Move => Ok(request.with_body(json!({ "destination": destination(fields)? }))),
            _ => Ok(request),
        }
    }

    /// Single work request covering every id
    pub fn batch_request(
        self,
        paths: &ApiPaths,
        ids: &[TargetId],
        fields: &Map<String, Value>,
    ) -> ActionResult<RemoteRequest> {
        let mut body = json!({ "ids": ids });
        if self == Self::Move {
            body["destination"] = json!(destination(fields)?);
        }
        Ok(RemoteRequest::new(Method::Post, paths.batch(self.verb())).with_body(body))
    }

    /// Prompt shown before acting on one object, if the operation confirms
    pub fn confirm_spec(self, target: &Target) -> Option<ConfirmSpec> {
        let id = &target.id;
        match self {
            Self::Delete => Some(ConfirmSpec::new(format!("Move {id} to the trash?")).confirm_label("Delete")),
            Self::Destroy => Some(
                ConfirmSpec::new(format!(
                    "Permanently destroy {id}? This cannot be undone. Type \"destroy\" to continue."
                ))
                .confirm_label("Destroy")
                .require_match(self.verb()),
            ),
            Self::Move => Some(ConfirmSpec::new(format!("Move {id} to a new location?")).confirm_label("Move")),
            _ => None,
        }
    }

    /// Prompt shown before acting on a resolved batch
    pub fn batch_confirm_spec(self, targets: &[Target]) -> ConfirmSpec {
        let mut prompt = format!("{} {}?", self.name(), count_noun(targets.len()));
        let collections = targets.iter().filter(|target| target.collection).count();
        match collections {
            0 => {}
            1 => prompt.push_str(" 1 object is a collection; this applies to everything it contains."),
            n => prompt.push_str(&format!(
                " {n} objects are collections; this applies to everything they contain."
            )),
        }
        if self == Self::Destroy {
            prompt.push_str(" This cannot be undone.");
        }

        let spec = ConfirmSpec::new(prompt).confirm_label(self.name());
        if collections > 0 || self == Self::Destroy {
            let verb = self.verb();
            ConfirmSpec {
                prompt_text: format!("{} Type \"{verb}\" to continue.", spec.prompt_text),
                ..spec.require_match(verb)
            }
        } else {
            spec
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// "1 object" / "3 objects"
pub fn count_noun(count: usize) -> String {
    if count == 1 {
        "1 object".to_string()
    } else {
        format!("{count} objects")
    }
}

fn destination(fields: &Map<String, Value>) -> ActionResult<String> {
    fields
        .get("destination")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ActionError::InvalidEvent("move requires a destination".to_string()))
}
