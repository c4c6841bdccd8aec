//! Block configuration to field descriptor mapping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::LayoutError;
use crate::lookups::{self, Term, split_terms_text};
use crate::remote::RemoteResourceClient;
use crate::spec::kind::{ControlKind, DataType};
use crate::spec::page::{Block, FormType, value_flag, value_i64};

/// Editor and plugin bookkeeping keys that are never published.
const DROPPED_KEYS: &[&str] = &[
    "id",
    "context_mapping",
    "provider",
    "label",
    "label_display",
    "mode",
    "option_create_or_existing",
    "option_data_type",
    "option_lookup_options_terms",
    "option_lookup_options_control",
    "option_text_options_control",
];

/// Descriptor members that configuration options may not overwrite.
const RESERVED_NAMES: &[&str] = &["type", "field_name", "control_type", "validation", "controls"];

const BOOLEAN_OPTIONS: &[&str] = &["required", "lockable", "allow_vague_dates"];

const GRID_COLUMN_OPTIONS: &[&str] = &[
    "absence_column",
    "comments_column",
    "media_column",
    "sensitivity_column",
    "spatial_ref_per_row",
    "species_list_mode",
];

const SENSITIVITY_BLURS: &[(i64, &str)] = &[
    (100, "Blur to 100m"),
    (1000, "Blur to 1km"),
    (2000, "Blur to 2km"),
    (10000, "Blur to 10km"),
    (100000, "Blur to 100km"),
];

pub const TAXON_FIELD: &str = "occurrence:taxa_taxon_list_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Validation {
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_future: Option<bool>,
}

impl Validation {
    pub fn required(required: bool) -> Self {
        Self {
            required,
            ..Self::default()
        }
    }
}

/// Normalised description of one control as published to the recording app.
///
/// Options that have no dedicated member are flattened into the same object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FieldDescriptor {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<Vec<Term>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<FieldDescriptor>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl FieldDescriptor {
    fn control(kind: &str, field_name: &str, control_type: &str, label: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            field_name: Some(field_name.to_string()),
            control_type: Some(control_type.to_string()),
            label: Some(label.to_string()),
            validation: Some(Validation::required(false)),
            ..Self::default()
        }
    }

    /// A hidden input posting a fixed value.
    pub fn hidden(field_name: &str, default_value: impl Into<Value>, required: bool) -> Self {
        Self {
            field_name: Some(field_name.to_string()),
            control_type: Some("hidden".into()),
            default_value: Some(default_value.into()),
            validation: required.then(|| Validation::required(true)),
            ..Self::default()
        }
    }

    /// Inline stand-in for a control whose descriptor could not be built.
    pub fn warning(kind: &str, reason: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            control_type: Some("warning".into()),
            label: Some(format!("Invalid control: {reason}")),
            ..Self::default()
        }
    }

    pub fn type_tag(&self) -> &str {
        self.kind.as_deref().unwrap_or_default()
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn option_flag(&self, key: &str) -> bool {
        self.option(key).map(value_flag).unwrap_or(false)
    }

    pub fn option_i64(&self, key: &str) -> Option<i64> {
        self.option(key).and_then(value_i64).filter(|id| *id != 0)
    }

    pub fn is_required(&self) -> bool {
        self.validation
            .as_ref()
            .map(|validation| validation.required)
            .unwrap_or(false)
    }
}

/// Request-scoped inputs the builder would otherwise read from ambient state.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub form_type: FormType,
    pub published: bool,
    pub master_checklist_id: Option<i64>,
    /// Already validated extra taxon attribute columns for scratchpad rows.
    pub taxon_attributes: Option<&'a str>,
    pub no_termlist_cache: bool,
}

impl BuildContext<'_> {
    fn master_checklist(&self) -> i64 {
        self.master_checklist_id.unwrap_or(0)
    }
}

/// Maps one block's configuration to its descriptor.
///
/// Species grids come back without their row controls; those depend on the
/// rest of the layout and are attached by [`attach_grid_controls`].
pub fn build_field_descriptor<C>(
    block: &Block,
    ctx: &BuildContext<'_>,
    client: &C,
) -> Result<FieldDescriptor, LayoutError>
where
    C: RemoteResourceClient + ?Sized,
{
    let kind = block.control_kind();
    let type_tag = kind.type_tag();
    let data_type = block.option_str("data_type").map(DataType::from_code);
    let binding = block.binding();

    let attribute_id = match kind.attribute_entity() {
        Some(_) => match binding.attribute_id {
            Some(id) => Some(id),
            None if !ctx.published => Some(0),
            None => {
                return Err(LayoutError::Descriptor {
                    kind: type_tag,
                    message: "attribute has not been created on the warehouse".into(),
                });
            }
        },
        None => None,
    };

    let mut options = Map::new();
    for (key, value) in &block.configuration {
        if is_dropped(key, data_type.as_ref()) {
            continue;
        }
        let name = option_name(key);
        if RESERVED_NAMES.contains(&name.as_str()) {
            debug!(kind = %type_tag, option = %key, "ignoring option shadowing a descriptor member");
            continue;
        }
        let value = if BOOLEAN_OPTIONS.contains(&name.as_str()) && is_zero_or_one(value) {
            Value::Bool(value_flag(value))
        } else {
            value.clone()
        };
        options.insert(name, value);
    }
    if let Some(data_type) = &data_type {
        options.insert("data_type".into(), data_type.verbose().into());
    }

    let mut terms = None;
    if let Some(attribute_id) = attribute_id {
        options.insert("attribute_id".into(), attribute_id.into());
        if let Some(link_id) = binding.attributes_website_id {
            options.insert("attributes_website_id".into(), link_id.into());
        }
        if data_type == Some(DataType::Lookup) {
            match binding.termlist_id {
                Some(termlist_id) => {
                    options.insert("termlist_id".into(), termlist_id.into());
                }
                None if !ctx.published => {
                    options.insert("termlist_id".into(), 0.into());
                    terms = block.option_str("lookup_options_terms").map(|text| {
                        split_terms_text(text)
                            .into_iter()
                            .map(|term| Term::new(0, term))
                            .collect()
                    });
                }
                None => {}
            }
        }
    }

    let label = take_string(&mut options, "label");
    let default_value = options.remove("default_value");
    options.remove("terms");

    let validation = if kind.is_species_grid() {
        None
    } else {
        let required = options
            .remove("required")
            .map(|value| value_flag(&value))
            .unwrap_or_else(|| kind.required_by_default());
        Some(Validation::required(required))
    };

    let mut descriptor = FieldDescriptor {
        field_name: field_name(&kind, block, attribute_id),
        control_type: control_type(&kind, block, data_type.as_ref()),
        kind: Some(type_tag),
        label,
        default_value,
        validation,
        terms,
        controls: Vec::new(),
        options,
    };

    if data_type == Some(DataType::Lookup)
        && let Some(termlist_id) = descriptor.option_i64("termlist_id")
    {
        descriptor.terms = Some(lookups::fetch_terms(
            client,
            termlist_id,
            ctx.no_termlist_cache,
        )?);
    }
    if kind == ControlKind::SpeciesSingle {
        descriptor = format_single_species(descriptor, ctx, client)?;
    }
    promote_validation(&mut descriptor, &kind);
    descriptor
        .options
        .retain(|_, value| !value.is_null() && value.as_str() != Some(""));
    Ok(descriptor)
}

/// Indicia field a control posts to.
pub fn field_name(kind: &ControlKind, block: &Block, attribute_id: Option<i64>) -> Option<String> {
    let name = match kind {
        ControlKind::DatePicker => "sample:date",
        ControlKind::Location => {
            if block.option_str("mode") == Some("name") {
                "sample:location_name"
            } else {
                "sample:location_id"
            }
        }
        ControlKind::Map => "sample:geom",
        ControlKind::OccurrenceComment => "occurrence:comment",
        ControlKind::SampleComment => "sample:comment",
        ControlKind::SpatialRef => "sample:entered_sref",
        ControlKind::CustomAttribute(entity) => {
            return Some(format!(
                "{}:{}",
                entity.field_prefix(),
                attribute_id.unwrap_or(0)
            ));
        }
        ControlKind::PlaceSearch
        | ControlKind::SpeciesList
        | ControlKind::SpeciesMultiplace
        | ControlKind::SpeciesSingle
        | ControlKind::SubmitButtons => return None,
        ControlKind::Other(tag) => {
            warn!(kind = %tag, "no field name known for control kind");
            return None;
        }
    };
    Some(name.to_string())
}

/// Widget used to capture a control's value.
pub fn control_type(kind: &ControlKind, block: &Block, data_type: Option<&DataType>) -> Option<String> {
    if let Some(data_type) = data_type {
        return match data_type {
            DataType::Text => Some(
                block
                    .option_str("text_options_control")
                    .map(|control| control.replace("text_input", "text"))
                    .unwrap_or_else(|| "text".into()),
            ),
            DataType::Boolean => Some("checkbox".into()),
            DataType::Lookup => Some(
                block
                    .option_str("lookup_options_control")
                    .unwrap_or("select")
                    .to_string(),
            ),
            DataType::Integer | DataType::Float => Some("number".into()),
            DataType::Date => Some("date".into()),
            DataType::VagueDate | DataType::Unknown(_) => None,
        };
    }
    let control = match kind {
        ControlKind::DatePicker => "date",
        ControlKind::Location => match block.option_str("mode")? {
            "name" => "text",
            "id_select" => "select",
            "id_autocomplete" => "autocomplete",
            _ => return None,
        },
        ControlKind::OccurrenceComment | ControlKind::SampleComment => "textarea",
        ControlKind::SpatialRef => "text",
        ControlKind::SpeciesSingle => "autocomplete",
        _ => return None,
    };
    Some(control.to_string())
}

/// Adds the row controls to a species grid descriptor.
///
/// `occurrence_attributes` are the occurrence custom attributes placed
/// elsewhere on the layout, already in weight order.
pub fn attach_grid_controls<C>(
    grid: &mut FieldDescriptor,
    occurrence_attributes: &[FieldDescriptor],
    ctx: &BuildContext<'_>,
    client: &C,
) -> Result<(), LayoutError>
where
    C: RemoteResourceClient + ?Sized,
{
    let mut species_extra = Map::new();
    if grid.option("species_list_mode").and_then(Value::as_str) == Some("scratchpadList") {
        let preload = match grid.option_i64("preloaded_scratchpad_list_id") {
            Some(list_id) => {
                lookups::scratchpad_taxa(client, list_id, true, ctx.taxon_attributes)?
            }
            None => Vec::new(),
        };
        grid.options.insert("preload_taxa".into(), Value::Array(preload));
        grid.options.remove("species_to_add_list_type");
        grid.options.remove("additional_species_scratchpad_list_id");
        let allow_additional = grid.option_flag("allow_additional_species");
        grid.options
            .insert("allow_additional_species".into(), allow_additional.into());
        if allow_additional {
            species_extra.insert("taxon_list_id".into(), ctx.master_checklist().into());
        }
    } else {
        match grid.option("species_to_add_list_type").and_then(Value::as_str) {
            Some("scratchpadList") => {
                let limit = match grid.option_i64("additional_species_scratchpad_list_id") {
                    Some(list_id) => {
                        lookups::scratchpad_taxa(client, list_id, false, ctx.taxon_attributes)?
                    }
                    None => Vec::new(),
                };
                species_extra.insert("limit_taxa_to".into(), Value::Array(limit));
            }
            Some("all") => {
                species_extra.insert("taxon_list_id".into(), ctx.master_checklist().into());
            }
            _ => {}
        }
        grid.options.remove("row_inclusion_mode");
        grid.options.remove("allow_additional_species");
        grid.options.remove("preloaded_scratchpad_list_id");
    }

    let mut controls = leading_grid_controls(grid, species_extra);
    controls.extend(occurrence_attributes.iter().cloned());
    controls.extend(trailing_grid_controls(grid));
    grid.controls = controls;
    for option in GRID_COLUMN_OPTIONS {
        grid.options.remove(*option);
    }
    Ok(())
}

fn leading_grid_controls(grid: &FieldDescriptor, species_extra: Map<String, Value>) -> Vec<FieldDescriptor> {
    let mut species = FieldDescriptor::control("species", TAXON_FIELD, "autocomplete", "Species");
    species.validation = Some(Validation::required(true));
    species.options = species_extra;
    let mut controls = vec![species];
    if grid.option_flag("absence_column") {
        controls.push(FieldDescriptor::control(
            "absence",
            "occurrence:comment:zero_abundance",
            "checkbox",
            "Absence",
        ));
    }
    controls
}

fn trailing_grid_controls(grid: &FieldDescriptor) -> Vec<FieldDescriptor> {
    let mut controls = Vec::new();
    if grid.option_flag("spatial_ref_per_row") {
        controls.push(FieldDescriptor::control(
            "spatial_ref",
            "sample:entered_sref",
            "text",
            "Spatial ref",
        ));
    }
    if grid.option_flag("comments_column") {
        controls.push(FieldDescriptor::control(
            "occurrence_comment",
            "occurrence:comment",
            "textarea",
            "Comment",
        ));
    }
    if grid.option_flag("sensitivity_column") {
        let mut sensitivity = FieldDescriptor::control(
            "sensitivity",
            "occurrence:sensitivity_precision",
            "select",
            "Sensitivity",
        );
        sensitivity.terms = Some(
            SENSITIVITY_BLURS
                .iter()
                .map(|(precision, term)| Term::new(*precision, *term))
                .collect(),
        );
        controls.push(sensitivity);
    }
    if grid.option_flag("media_column") {
        controls.push(FieldDescriptor {
            kind: Some("occurrence_photos".into()),
            label: Some("Photos".into()),
            validation: Some(Validation::required(false)),
            ..FieldDescriptor::default()
        });
    }
    controls
}

/// Nests a multiplace species grid inside a sub-sample composite.
///
/// The sub-sample holds the child sample attributes, then a hidden input
/// for the child sample method, then the grid itself as a plain species list.
pub fn wrap_sub_samples(
    mut grid: FieldDescriptor,
    child_attributes: Vec<FieldDescriptor>,
    child_sample_method_id: Option<i64>,
) -> FieldDescriptor {
    grid.kind = Some(ControlKind::SpeciesList.type_tag());
    let mut method = FieldDescriptor::hidden(
        "sample:sample_method_id",
        child_sample_method_id.unwrap_or(0),
        true,
    );
    if let Some(system) = grid.options.remove("spatial_system") {
        method.options.insert("spatial_system".into(), system);
    }
    let mut controls = child_attributes;
    controls.push(method);
    controls.push(grid);
    FieldDescriptor {
        kind: Some("sub_samples".into()),
        controls,
        ..FieldDescriptor::default()
    }
}

fn format_single_species<C>(
    mut descriptor: FieldDescriptor,
    ctx: &BuildContext<'_>,
    client: &C,
) -> Result<FieldDescriptor, LayoutError>
where
    C: RemoteResourceClient + ?Sized,
{
    match descriptor.option_i64("scratchpad_list_id") {
        None => {
            descriptor
                .options
                .insert("taxon_list_id".into(), ctx.master_checklist().into());
        }
        Some(list_id) => {
            let taxa = lookups::scratchpad_taxa(client, list_id, true, ctx.taxon_attributes)?;
            if let [only] = taxa.as_slice() {
                let taxon = only
                    .get("taxa_taxon_list_id")
                    .and_then(value_i64)
                    .unwrap_or(0);
                descriptor = FieldDescriptor {
                    kind: descriptor.kind,
                    ..FieldDescriptor::hidden(TAXON_FIELD, taxon, true)
                };
            } else {
                descriptor
                    .options
                    .insert("limit_taxa_to".into(), Value::Array(taxa));
            }
        }
    }
    descriptor.field_name = Some(TAXON_FIELD.to_string());
    Ok(descriptor)
}

fn promote_validation(descriptor: &mut FieldDescriptor, kind: &ControlKind) {
    let min = descriptor.options.remove("number_options_min");
    let max = descriptor.options.remove("number_options_max");
    let allow_future = (*kind == ControlKind::DatePicker).then_some(false);
    if min.is_none() && max.is_none() && allow_future.is_none() {
        return;
    }
    let validation = descriptor.validation.get_or_insert_with(Validation::default);
    if min.is_some() {
        validation.min = min;
    }
    if max.is_some() {
        validation.max = max;
    }
    if allow_future.is_some() {
        validation.allow_future = allow_future;
    }
}

fn is_dropped(key: &str, data_type: Option<&DataType>) -> bool {
    if DROPPED_KEYS.contains(&key) {
        return true;
    }
    match key {
        "option_existing_termlist_id" => data_type != Some(&DataType::Lookup),
        "option_number_options_min" | "option_number_options_max" => {
            !data_type.is_some_and(DataType::is_numeric)
        }
        _ => false,
    }
}

/// `option_existing_termlistId` becomes `termlist_id`.
fn option_name(key: &str) -> String {
    let bare = key
        .strip_prefix("option_")
        .map(|rest| rest.strip_prefix("existing_").unwrap_or(rest))
        .unwrap_or(key);
    let mut name = String::with_capacity(bare.len() + 4);
    for (index, ch) in bare.chars().enumerate() {
        if index > 0 && ch.is_ascii_uppercase() {
            name.push('_');
        }
        name.push(ch.to_ascii_lowercase());
    }
    name
}

fn is_zero_or_one(value: &Value) -> bool {
    match value {
        Value::Number(num) => matches!(num.as_i64(), Some(0 | 1)),
        Value::String(text) => matches!(text.as_str(), "0" | "1"),
        _ => false,
    }
}

fn take_string(options: &mut Map<String, Value>, key: &str) -> Option<String> {
    match options.remove(key) {
        Some(Value::String(text)) if !text.is_empty() => Some(text),
        Some(Value::String(_)) | Some(Value::Null) | None => None,
        Some(other) => {
            options.insert(key.to_string(), other);
            None
        }
    }
}
