use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LayoutError;
use crate::spec::binding::AttributeBinding;
use crate::spec::kind::ControlKind;

/// Content type of pages that hold a data entry form layout.
pub const FORM_CONTENT_TYPE: &str = "iform_layout_builder_form";

/// Raw option values saved by the layout editor for one block.
pub type BlockConfig = Map<String, Value>;

/// Recording form flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FormType {
    Single,
    List,
    Multiplace,
}

impl FormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormType::Single => "single",
            FormType::List => "list",
            FormType::Multiplace => "multiplace",
        }
    }

    /// Label used by the app, e.g. `list_species_form`.
    pub fn label(&self) -> String {
        format!("{}_species_form", self.as_str())
    }
}

impl FromStr for FormType {
    type Err = LayoutError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "single" => Ok(FormType::Single),
            "list" => Ok(FormType::List),
            "multiplace" => Ok(FormType::Multiplace),
            other => Err(LayoutError::UnrecognisedFormType(other.to_string())),
        }
    }
}

/// Who last changed the page and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RevisionInfo {
    pub revision_id: i64,
    pub updated_by_uid: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by_id: Option<i64>,
    pub updated_on: String,
}

/// One data entry form page and its layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Page {
    pub id: u64,
    pub title: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw form type code; see [`Page::form_type`].
    pub form_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_method_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_sample_method_id: Option<i64>,
    #[serde(default)]
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_alias: Option<String>,
    #[serde(default)]
    pub available_for_groups: bool,
    #[serde(default)]
    pub created_by_uid: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionInfo>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

fn default_content_type() -> String {
    FORM_CONTENT_TYPE.to_string()
}

impl Page {
    pub fn form_type(&self) -> Result<FormType, LayoutError> {
        self.form_type.parse()
    }

    pub fn is_form(&self) -> bool {
        self.content_type == FORM_CONTENT_TYPE
    }

    /// Path alias without surrounding slashes, falling back to `node/<id>`.
    pub fn alias(&self) -> String {
        self.path_alias
            .as_deref()
            .map(|alias| alias.trim_matches('/'))
            .filter(|alias| !alias.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("node/{}", self.id))
    }

    pub fn block(&self, position: BlockPosition) -> Option<&Block> {
        self.sections
            .get(position.section)
            .and_then(|section| section.components.get(position.component))
    }

    pub fn block_mut(&mut self, position: BlockPosition) -> Option<&mut Block> {
        self.sections
            .get_mut(position.section)
            .and_then(|section| section.components.get_mut(position.component))
    }
}

/// A layout section; its components are spread over named regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Section {
    pub layout_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub components: Vec<Block>,
}

/// One placed control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Block {
    /// Block plugin id, e.g. `data_entry_date_picker_block`.
    pub kind: String,
    pub region: String,
    #[serde(default)]
    pub weight: i64,
    #[serde(default)]
    pub configuration: BlockConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<AttributeBinding>,
}

impl Block {
    pub fn new(kind: impl Into<String>, region: impl Into<String>, weight: i64) -> Self {
        Self {
            kind: kind.into(),
            region: region.into(),
            weight,
            configuration: BlockConfig::new(),
            binding: None,
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.configuration.insert(format!("option_{key}"), value.into());
        self
    }

    pub fn with_binding(mut self, binding: AttributeBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn control_kind(&self) -> ControlKind {
        ControlKind::from_block_id(&self.kind)
    }

    /// Raw `option_<key>` value.
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.configuration.get(&format!("option_{key}"))
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.option(key)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    }

    /// Editor checkboxes are stored as 0/1, `"0"`/`"1"` or booleans.
    pub fn option_flag(&self, key: &str) -> bool {
        self.option(key).map(value_flag).unwrap_or(false)
    }

    pub fn option_i64(&self, key: &str) -> Option<i64> {
        self.option(key).and_then(value_i64)
    }

    pub fn set_option(&mut self, key: &str, value: impl Into<Value>) {
        self.configuration
            .insert(format!("option_{key}"), value.into());
    }

    pub fn binding(&self) -> AttributeBinding {
        self.binding.clone().unwrap_or_default()
    }

    pub fn binding_mut(&mut self) -> &mut AttributeBinding {
        self.binding.get_or_insert_with(AttributeBinding::default)
    }
}

/// Location of a block inside a page's sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPosition {
    pub section: usize,
    pub component: usize,
}

pub fn value_flag(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => matches!(text.trim(), "1" | "true" | "t"),
        _ => false,
    }
}

pub fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(num) => num.as_i64().or_else(|| num.as_f64().map(|n| n as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
