use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static BLOCK_AFFIXES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data_entry_|_block$").expect("block id pattern is valid")
});

/// Block plugin id of the submit buttons block, which carries no data.
pub const SUBMIT_BUTTONS_BLOCK: &str = "data_entry_submit_buttons_block";

/// Warehouse entity a custom attribute is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeEntity {
    Sample,
    Occurrence,
}

impl AttributeEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeEntity::Sample => "sample",
            AttributeEntity::Occurrence => "occurrence",
        }
    }

    /// Prefix used in posted field names, e.g. `smpAttr:12`.
    pub fn field_prefix(&self) -> &'static str {
        match self {
            AttributeEntity::Sample => "smpAttr",
            AttributeEntity::Occurrence => "occAttr",
        }
    }

    /// Collection holding the attribute definitions.
    pub fn attributes_resource(&self) -> String {
        format!("{}_attributes", self.as_str())
    }

    /// Collection holding the attribute to website/survey links.
    pub fn links_resource(&self) -> String {
        format!("{}_attributes_websites", self.as_str())
    }

    /// Name of the foreign key a link uses to point at its attribute.
    pub fn link_attribute_key(&self) -> String {
        format!("{}_attribute_id", self.as_str())
    }
}

impl fmt::Display for AttributeEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One case per control family that can be placed on a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    DatePicker,
    Location,
    Map,
    OccurrenceComment,
    PlaceSearch,
    SampleComment,
    CustomAttribute(AttributeEntity),
    SpatialRef,
    SpeciesList,
    SpeciesMultiplace,
    SpeciesSingle,
    SubmitButtons,
    Other(String),
}

impl ControlKind {
    /// Resolve a block plugin id such as `data_entry_sample_comment_block`.
    pub fn from_block_id(id: &str) -> Self {
        Self::from_type_tag(&type_tag(id))
    }

    pub fn from_type_tag(tag: &str) -> Self {
        match tag {
            "date_picker" => ControlKind::DatePicker,
            "location" => ControlKind::Location,
            "map" => ControlKind::Map,
            "occurrence_comment" => ControlKind::OccurrenceComment,
            "occurrence_custom_attribute" => {
                ControlKind::CustomAttribute(AttributeEntity::Occurrence)
            }
            "place_search" => ControlKind::PlaceSearch,
            "sample_comment" => ControlKind::SampleComment,
            "sample_custom_attribute" => ControlKind::CustomAttribute(AttributeEntity::Sample),
            "spatial_ref" => ControlKind::SpatialRef,
            "species_list" => ControlKind::SpeciesList,
            "species_multiplace" => ControlKind::SpeciesMultiplace,
            "species_single" => ControlKind::SpeciesSingle,
            "submit_buttons" => ControlKind::SubmitButtons,
            other => ControlKind::Other(other.to_string()),
        }
    }

    /// The `type` tag published for descriptors of this kind.
    pub fn type_tag(&self) -> String {
        let tag = match self {
            ControlKind::DatePicker => "date_picker",
            ControlKind::Location => "location",
            ControlKind::Map => "map",
            ControlKind::OccurrenceComment => "occurrence_comment",
            ControlKind::PlaceSearch => "place_search",
            ControlKind::SampleComment => "sample_comment",
            ControlKind::CustomAttribute(AttributeEntity::Sample) => "sample_custom_attribute",
            ControlKind::CustomAttribute(AttributeEntity::Occurrence) => {
                "occurrence_custom_attribute"
            }
            ControlKind::SpatialRef => "spatial_ref",
            ControlKind::SpeciesList => "species_list",
            ControlKind::SpeciesMultiplace => "species_multiplace",
            ControlKind::SpeciesSingle => "species_single",
            ControlKind::SubmitButtons => "submit_buttons",
            ControlKind::Other(tag) => return tag.clone(),
        };
        tag.to_string()
    }

    pub fn attribute_entity(&self) -> Option<AttributeEntity> {
        match self {
            ControlKind::CustomAttribute(entity) => Some(*entity),
            _ => None,
        }
    }

    pub fn is_species_grid(&self) -> bool {
        matches!(
            self,
            ControlKind::SpeciesList | ControlKind::SpeciesMultiplace
        )
    }

    /// Controls that must be filled in unless the block says otherwise.
    pub fn required_by_default(&self) -> bool {
        matches!(
            self,
            ControlKind::DatePicker | ControlKind::SpatialRef | ControlKind::SpeciesSingle
        )
    }
}

/// Strips the `data_entry_` prefix and `_block` suffix from a block id.
pub fn type_tag(block_id: &str) -> String {
    BLOCK_AFFIXES.replace_all(block_id, "").into_owned()
}

/// Custom attribute data types, stored on blocks as single letter codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Date,
    VagueDate,
    Boolean,
    Lookup,
    Unknown(String),
}

impl DataType {
    pub fn from_code(code: &str) -> Self {
        match code {
            "I" => DataType::Integer,
            "F" => DataType::Float,
            "T" => DataType::Text,
            "D" => DataType::Date,
            "V" => DataType::VagueDate,
            "B" => DataType::Boolean,
            "L" => DataType::Lookup,
            other => DataType::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            DataType::Integer => "I",
            DataType::Float => "F",
            DataType::Text => "T",
            DataType::Date => "D",
            DataType::VagueDate => "V",
            DataType::Boolean => "B",
            DataType::Lookup => "L",
            DataType::Unknown(code) => code,
        }
    }

    /// Verbose name published as `data_type`.
    pub fn verbose(&self) -> &str {
        match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Text => "text",
            DataType::Date => "date",
            DataType::VagueDate => "vague_date",
            DataType::Boolean => "boolean",
            DataType::Lookup => "lookup",
            DataType::Unknown(code) => code,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_strips_prefix_and_suffix() {
        assert_eq!(type_tag("data_entry_sample_comment_block"), "sample_comment");
        assert_eq!(type_tag("data_entry_block_block"), "block");
        assert_eq!(type_tag("custom_thing"), "custom_thing");
    }

    #[test]
    fn custom_attribute_kinds_resolve_entity() {
        let kind = ControlKind::from_block_id("data_entry_occurrence_custom_attribute_block");
        assert_eq!(kind.attribute_entity(), Some(AttributeEntity::Occurrence));
        assert_eq!(kind.type_tag(), "occurrence_custom_attribute");
    }

    #[test]
    fn unknown_kinds_keep_their_tag() {
        let kind = ControlKind::from_block_id("data_entry_photo_block");
        assert_eq!(kind, ControlKind::Other("photo".into()));
        assert_eq!(kind.type_tag(), "photo");
    }

    #[test]
    fn data_type_codes_round_trip_to_names() {
        assert_eq!(DataType::from_code("L").verbose(), "lookup");
        assert_eq!(DataType::from_code("V").verbose(), "vague_date");
        assert_eq!(DataType::from_code("X").verbose(), "X");
    }
}
