//! Confirmation gate collaborator
//!
//! Confirmable actions ask a [`ConfirmationGate`] before sending any work.
//! Irreversible operations set `confirm_match_text`, in which case the user
//! must type that exact text (case-sensitive) before confirmation counts.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// What the gate shows the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmSpec {
    /// Question shown to the user
    pub prompt_text: String,
    /// Label of the confirm button
    pub confirm_text: String,
    /// Label of the cancel button
    pub cancel_text: String,
    /// Text the user must type before the confirm button is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_match_text: Option<String>,
    /// UI element the prompt is anchored to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

impl ConfirmSpec {
    /// Prompt with default button labels
    pub fn new(prompt_text: impl Into<String>) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            confirm_text: "Confirm".to_string(),
            cancel_text: "Cancel".to_string(),
            confirm_match_text: None,
            anchor: None,
        }
    }

    /// Set the confirm button label
    pub fn confirm_label(mut self, text: impl Into<String>) -> Self {
        self.confirm_text = text.into();
        self
    }

    /// Require the user to type `text`
    pub fn require_match(mut self, text: impl Into<String>) -> Self {
        self.confirm_match_text = Some(text.into());
        self
    }

    /// Anchor the prompt to a UI element
    pub fn anchored_to(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    /// Whether the entered text satisfies the match requirement
    pub fn accepts(&self, entered: Option<&str>) -> bool {
        match &self.confirm_match_text {
            None => true,
            Some(expected) => entered == Some(expected.as_str()),
        }
    }
}

/// The `confirm` field of a dispatched event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfirmPolicy {
    /// `confirm: false`; never prompt
    Skip,
    /// Field absent; prompt only when the action itself is confirmable
    #[default]
    ActionDefault,
    /// `confirm: true`; always prompt, with the action's text when it has one
    Required,
    /// Explicit prompt supplied by the caller
    Custom(ConfirmSpec),
}

impl From<bool> for ConfirmPolicy {
    fn from(confirm: bool) -> Self {
        if confirm { Self::Required } else { Self::Skip }
    }
}

impl From<ConfirmSpec> for ConfirmPolicy {
    fn from(spec: ConfirmSpec) -> Self {
        Self::Custom(spec)
    }
}

impl ConfirmPolicy {
    /// Prompt to show, given the action's own default prompt
    pub fn resolve(&self, action_default: Option<ConfirmSpec>) -> Option<ConfirmSpec> {
        match self {
            Self::Skip => None,
            Self::ActionDefault => action_default,
            Self::Required => {
                Some(action_default.unwrap_or_else(|| ConfirmSpec::new("Are you sure?")))
            }
            Self::Custom(spec) => Some(spec.clone()),
        }
    }
}

/// Answer from the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateReply {
    /// User pressed confirm, with whatever text they typed
    Confirmed {
        /// Text in the match field
        entered: Option<String>,
    },
    /// User dismissed the prompt
    Cancelled,
}

/// Presents confirmation prompts
pub trait ConfirmationGate: Send + Sync {
    /// Show the prompt and wait for the user's answer
    fn open(&self, spec: ConfirmSpec) -> BoxFuture<'_, GateReply>;
}

/// Ask the gate and enforce the match text; false on cancel or mismatch.
pub async fn request_confirmation(gate: &dyn ConfirmationGate, spec: ConfirmSpec) -> bool {
    let check = spec.clone();
    match gate.open(spec).await {
        GateReply::Confirmed { entered } if check.accepts(entered.as_deref()) => true,
        GateReply::Confirmed { .. } => {
            tracing::debug!(prompt = %check.prompt_text, "confirmation text did not match");
            false
        }
        GateReply::Cancelled => false,
    }
}

/// Prompt state for gate implementations.
///
/// Tracks the typed text and only lets confirmation through once it matches.
#[derive(Debug, Clone)]
pub struct ConfirmPrompt {
    spec: ConfirmSpec,
    entered: String,
}

impl ConfirmPrompt {
    /// Start a prompt
    pub fn new(spec: ConfirmSpec) -> Self {
        Self {
            spec,
            entered: String::new(),
        }
    }

    /// The prompt being shown
    pub fn spec(&self) -> &ConfirmSpec {
        &self.spec
    }

    /// Replace the typed text
    pub fn input(&mut self, text: impl Into<String>) {
        self.entered = text.into();
    }

    /// Whether the confirm button is enabled
    pub fn confirm_enabled(&self) -> bool {
        self.spec.accepts(Some(&self.entered))
    }

    /// Press confirm; `on_confirm` runs only when enabled.
    pub fn confirm<F: FnOnce()>(&self, on_confirm: F) -> bool {
        if !self.confirm_enabled() {
            return false;
        }
        on_confirm();
        true
    }

    /// The reply this prompt produces when confirmed
    pub fn reply(&self) -> GateReply {
        if self.confirm_enabled() {
            GateReply::Confirmed {
                entered: Some(self.entered.clone()),
            }
        } else {
            GateReply::Cancelled
        }
    }
}

/// Gate that confirms every prompt, typing the match text when required
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl ConfirmationGate for AutoConfirm {
    fn open(&self, spec: ConfirmSpec) -> BoxFuture<'_, GateReply> {
        Box::pin(async move {
            GateReply::Confirmed {
                entered: spec.confirm_match_text,
            }
        })
    }
}
