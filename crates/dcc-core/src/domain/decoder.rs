//! Decoder definitions: which functions a decoder exposes, what they are
//! called, and whether each one latches or springs back.

use serde::{Deserialize, Serialize};

use crate::domain::locomotive::{FunctionAction, FunctionIndex};

/// Metadata for a single decoder function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub index: FunctionIndex,
    /// Label shown on the throttle, e.g. "Headlight" or "Horn".
    pub name: String,
    #[serde(default)]
    pub action: FunctionAction,
}

/// A named decoder model with its function map.
///
/// Functions not listed here still exist on the wire; they simply have no
/// label and default to [`FunctionAction::Toggle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderDefinition {
    pub name: String,
    #[serde(default)]
    pub functions: Vec<FunctionDefinition>,
}

impl DecoderDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Builder-style helper used by tests and the default roster.
    #[must_use]
    pub fn with_function(
        mut self,
        index: FunctionIndex,
        name: impl Into<String>,
        action: FunctionAction,
    ) -> Self {
        self.functions.push(FunctionDefinition {
            index,
            name: name.into(),
            action,
        });
        self
    }

    fn find(&self, index: FunctionIndex) -> Option<&FunctionDefinition> {
        self.functions.iter().find(|f| f.index == index)
    }

    /// Toggle or momentary behaviour of `index`; unlisted functions toggle.
    pub fn action_for(&self, index: FunctionIndex) -> FunctionAction {
        self.find(index).map(|f| f.action).unwrap_or_default()
    }

    /// Label of `index`, if the decoder names it.
    pub fn name_for(&self, index: FunctionIndex) -> Option<&str> {
        self.find(index).map(|f| f.name.as_str())
    }
}
