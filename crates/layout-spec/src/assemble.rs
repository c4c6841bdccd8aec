//! Form schema assembly: walks a page, builds each descriptor and arranges
//! them as an ordered control list or as the layout's sections and regions.

use std::sync::LazyLock;

use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::WarehouseSettings;
use crate::descriptor::{
    BuildContext, FieldDescriptor, attach_grid_controls, build_field_descriptor, wrap_sub_samples,
};
use crate::error::LayoutError;
use crate::lookups::valid_taxon_attributes;
use crate::remote::RemoteResourceClient;
use crate::spec::kind::{AttributeEntity, ControlKind};
use crate::spec::page::{Block, FormType, Page, RevisionInfo};
use crate::walker::LayoutWalker;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

pub const SPATIAL_REF_PER_OCCURRENCE: &str = "optional_spatial_ref_per_occurrence";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// One ordered `controls` list.
    #[default]
    Flat,
    /// `form_sections` mirroring the page layout.
    Layout,
}

/// Caller supplied options for one schema request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRequest {
    pub mode: SchemaMode,
    /// Raw `taxon_attributes` filter; ignored unless it is a list of ids.
    pub taxon_attributes: Option<String>,
}

impl SchemaRequest {
    pub fn layout() -> Self {
        Self {
            mode: SchemaMode::Layout,
            ..Self::default()
        }
    }
}

/// The schema document published for a form page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormSchema {
    pub id: u64,
    pub title: String,
    pub survey_id: i64,
    #[serde(rename = "type")]
    pub form_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub created_by_uid: i64,
    pub created_by_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    pub is_published: bool,
    #[serde(flatten)]
    pub revision: Option<RevisionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controls: Option<Vec<FieldDescriptor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_sections: Option<Vec<FormSection>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormSection {
    pub layout_type: String,
    pub label: Option<String>,
    pub components: Regions,
}

/// Region name to weight ordered descriptors, in order of first appearance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Regions(Vec<(String, Vec<FieldDescriptor>)>);

impl Regions {
    pub fn get(&self, region: &str) -> Option<&[FieldDescriptor]> {
        self.0
            .iter()
            .find(|(name, _)| name == region)
            .map(|(_, controls)| controls.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn into_controls(self) -> impl Iterator<Item = FieldDescriptor> {
        self.0.into_iter().flat_map(|(_, controls)| controls)
    }
}

impl Serialize for Regions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, controls) in &self.0 {
            map.serialize_entry(name, controls)?;
        }
        map.end()
    }
}

/// Descriptors of one region keyed by slot (twice the block weight, plus one
/// for synthesized followers).
#[derive(Debug, Default)]
struct RegionSlots {
    name: String,
    slots: Vec<(i64, FieldDescriptor)>,
}

#[derive(Debug, Default)]
struct SectionSlots {
    regions: Vec<RegionSlots>,
}

impl SectionSlots {
    fn region(&mut self, name: &str) -> &mut Vec<(i64, FieldDescriptor)> {
        let index = match self.regions.iter().position(|region| region.name == name) {
            Some(index) => index,
            None => {
                self.regions.push(RegionSlots {
                    name: name.to_string(),
                    slots: Vec::new(),
                });
                self.regions.len() - 1
            }
        };
        &mut self.regions[index].slots
    }
}

/// Builds the schema document for a page.
///
/// Failures confined to one control become warning placeholders; only page
/// level problems such as an unknown form type are returned as errors.
pub fn assemble_form_schema<C>(
    page: &Page,
    settings: &WarehouseSettings,
    client: &C,
    request: &SchemaRequest,
) -> Result<FormSchema, LayoutError>
where
    C: RemoteResourceClient + ?Sized,
{
    let form_type = page.form_type()?;
    let ctx = BuildContext {
        form_type,
        published: page.published,
        master_checklist_id: settings.master_checklist_id,
        taxon_attributes: valid_taxon_attributes(request.taxon_attributes.as_deref()),
        no_termlist_cache: settings.no_termlist_cache,
    };

    let mut sections: Vec<SectionSlots> = page.sections.iter().map(|_| SectionSlots::default()).collect();
    let mut grid_attributes: Vec<(i64, FieldDescriptor)> = Vec::new();
    let mut sub_sample_attributes: Vec<(i64, FieldDescriptor)> = Vec::new();
    let mut subtype = None;

    for placed in LayoutWalker::new(page).blocks() {
        let kind = placed.block.control_kind();
        let descriptor = build_or_warn(placed.block, &kind, &ctx, client);
        if placed.block.option_flag("spatial_ref_per_row") {
            subtype = Some(SPATIAL_REF_PER_OCCURRENCE.to_string());
        }
        match kind.attribute_entity() {
            Some(AttributeEntity::Occurrence) if form_type != FormType::Single => {
                grid_attributes.push((placed.weight, descriptor));
            }
            Some(AttributeEntity::Sample)
                if form_type == FormType::Multiplace
                    && placed.block.option_flag("child_sample_attribute") =>
            {
                sub_sample_attributes.push((placed.weight, descriptor));
            }
            _ => {
                let is_warning = descriptor.control_type.as_deref() == Some("warning");
                let slots = sections[placed.section_index].region(placed.region);
                slots.push((placed.weight.saturating_mul(2), descriptor));
                if kind == ControlKind::SpatialRef
                    && !is_warning
                    && let Some(system) = spatial_system_control(placed.block, settings)
                {
                    slots.push((placed.weight.saturating_mul(2).saturating_add(1), system));
                }
            }
        }
    }

    grid_attributes.sort_by_key(|(weight, _)| *weight);
    sub_sample_attributes.sort_by_key(|(weight, _)| *weight);
    let grid_attributes: Vec<FieldDescriptor> =
        grid_attributes.into_iter().map(|(_, descriptor)| descriptor).collect();
    let sub_sample_attributes: Vec<FieldDescriptor> = sub_sample_attributes
        .into_iter()
        .map(|(_, descriptor)| descriptor)
        .collect();

    let mut form_sections = Vec::with_capacity(sections.len());
    for (section, slots) in page.sections.iter().zip(sections) {
        let mut regions = Vec::with_capacity(slots.regions.len());
        for mut region in slots.regions {
            region.slots.sort_by_key(|(slot, _)| *slot);
            let controls = region
                .slots
                .into_iter()
                .map(|(_, descriptor)| {
                    finish_grid(descriptor, page, &grid_attributes, &sub_sample_attributes, &ctx, client)
                })
                .collect();
            regions.push((region.name, controls));
        }
        form_sections.push(FormSection {
            layout_type: section.layout_id.clone(),
            label: section.label.clone(),
            components: Regions(regions),
        });
    }

    let mut schema = FormSchema {
        id: page.id,
        title: page.title.clone(),
        survey_id: page.survey_id.unwrap_or(0),
        form_type: form_type.label(),
        subtype,
        created_by_uid: page.created_by_uid,
        created_by_id: page.created_by_id.unwrap_or(0),
        created_on: page.created_on.clone(),
        is_published: page.published,
        revision: page.revision.clone(),
        description: page
            .description
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(strip_tags),
        controls: None,
        form_sections: None,
    };
    match request.mode {
        SchemaMode::Layout => schema.form_sections = Some(form_sections),
        SchemaMode::Flat => {
            let mut controls = leading_hidden_controls(page);
            for section in form_sections {
                controls.extend(section.components.into_controls());
            }
            schema.controls = Some(controls);
        }
    }
    debug!(page = page.id, mode = ?request.mode, "assembled form schema");
    Ok(schema)
}

fn build_or_warn<C>(block: &Block, kind: &ControlKind, ctx: &BuildContext<'_>, client: &C) -> FieldDescriptor
where
    C: RemoteResourceClient + ?Sized,
{
    build_field_descriptor(block, ctx, client).unwrap_or_else(|err| {
        warn!(kind = %block.kind, error = %err, "control replaced by a warning");
        FieldDescriptor::warning(&kind.type_tag(), &err.to_string())
    })
}

fn finish_grid<C>(
    mut descriptor: FieldDescriptor,
    page: &Page,
    grid_attributes: &[FieldDescriptor],
    sub_sample_attributes: &[FieldDescriptor],
    ctx: &BuildContext<'_>,
    client: &C,
) -> FieldDescriptor
where
    C: RemoteResourceClient + ?Sized,
{
    let kind = ControlKind::from_type_tag(descriptor.type_tag());
    if !kind.is_species_grid() || descriptor.control_type.as_deref() == Some("warning") {
        return descriptor;
    }
    if let Err(err) = attach_grid_controls(&mut descriptor, grid_attributes, ctx, client) {
        warn!(page = page.id, error = %err, "species grid replaced by a warning");
        return FieldDescriptor::warning(&kind.type_tag(), &err.to_string());
    }
    if kind == ControlKind::SpeciesMultiplace {
        return wrap_sub_samples(
            descriptor,
            sub_sample_attributes.to_vec(),
            page.child_sample_method_id,
        );
    }
    descriptor
}

/// Survey, input form and sample method inputs that lead a flat schema.
fn leading_hidden_controls(page: &Page) -> Vec<FieldDescriptor> {
    let mut controls = vec![
        FieldDescriptor::hidden("sample:survey_id", page.survey_id.unwrap_or(0), true),
        FieldDescriptor::hidden("sample:input_form", page.alias(), false),
    ];
    if let Some(method) = page.sample_method_id {
        controls.push(FieldDescriptor::hidden("sample:sample_method_id", method, true));
    }
    controls
}

/// Control for the spatial reference system that follows a spatial ref.
///
/// A block that picked one of the configured systems gets that system only.
pub fn spatial_system_control(block: &Block, settings: &WarehouseSettings) -> Option<FieldDescriptor> {
    let mut systems = settings.spatial_system_list();
    if let Some(chosen) = block.option_str("system")
        && systems.iter().any(|system| system == chosen)
    {
        systems = vec![chosen.to_string()];
    }
    let mut control = if systems.len() > 1 {
        let mut select = FieldDescriptor::hidden("sample:entered_sref_system", Value::Null, true);
        select.control_type = Some("select".into());
        select.default_value = None;
        select.options.insert(
            "options".into(),
            Value::Array(systems.into_iter().map(Value::String).collect()),
        );
        select.options.insert("lockable".into(), Value::Bool(true));
        select
    } else {
        let only = systems.pop()?;
        FieldDescriptor::hidden("sample:entered_sref_system", only, true)
    };
    control.kind = Some("spatial_ref_system".into());
    Some(control)
}

pub fn strip_tags(html: &str) -> String {
    HTML_TAG.replace_all(html, "").into_owned()
}
