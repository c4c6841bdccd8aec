use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether a custom attribute block asks for a new warehouse attribute or
/// points at one that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CreateOrExisting {
    #[default]
    New,
    Existing,
}

/// Synchronization bookkeeping attached to a custom attribute block.
///
/// Holds the warehouse identifiers resolved by earlier saves so that later
/// saves update the same resources instead of creating duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct AttributeBinding {
    #[serde(default)]
    pub mode: CreateOrExisting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termlist_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_website_id: Option<i64>,
    /// Set by the editor when the block's settings change between saves.
    #[serde(default)]
    pub dirty: bool,
}

impl AttributeBinding {
    pub fn existing(attribute_id: i64) -> Self {
        Self {
            mode: CreateOrExisting::Existing,
            attribute_id: Some(attribute_id),
            ..Self::default()
        }
    }

    /// A block needs a new warehouse attribute when it says so, or when it
    /// has never been given an attribute id.
    pub fn needs_creation(&self) -> bool {
        self.mode == CreateOrExisting::New || self.attribute_id.is_none()
    }

    pub fn apply(&mut self, patch: BindingPatch) {
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(attribute_id) = patch.attribute_id {
            self.attribute_id = Some(attribute_id);
        }
        if let Some(termlist_id) = patch.termlist_id {
            self.termlist_id = Some(termlist_id);
        }
        if let Some(link_id) = patch.attributes_website_id {
            self.attributes_website_id = Some(link_id);
        }
        if let Some(dirty) = patch.dirty {
            self.dirty = dirty;
        }
    }
}

/// Partial update for an [`AttributeBinding`]; `None` leaves a field as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindingPatch {
    pub mode: Option<CreateOrExisting>,
    pub attribute_id: Option<i64>,
    pub termlist_id: Option<i64>,
    pub attributes_website_id: Option<i64>,
    pub dirty: Option<bool>,
}

impl BindingPatch {
    pub fn link(link_id: i64) -> Self {
        Self {
            attributes_website_id: Some(link_id),
            ..Self::default()
        }
    }

    pub fn clean() -> Self {
        Self {
            dirty: Some(false),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binding_needs_creation() {
        assert!(AttributeBinding::default().needs_creation());
        assert!(!AttributeBinding::existing(4).needs_creation());
    }

    #[test]
    fn existing_mode_without_id_still_needs_creation() {
        let binding = AttributeBinding {
            mode: CreateOrExisting::Existing,
            ..AttributeBinding::default()
        };
        assert!(binding.needs_creation());
    }

    #[test]
    fn patch_only_overwrites_given_fields() {
        let mut binding = AttributeBinding {
            termlist_id: Some(9),
            dirty: true,
            ..AttributeBinding::existing(3)
        };
        binding.apply(BindingPatch::link(77));
        assert_eq!(binding.attribute_id, Some(3));
        assert_eq!(binding.termlist_id, Some(9));
        assert_eq!(binding.attributes_website_id, Some(77));
        assert!(binding.dirty);

        binding.apply(BindingPatch::clean());
        assert!(!binding.dirty);
    }
}
