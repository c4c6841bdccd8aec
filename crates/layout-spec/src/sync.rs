//! Reconciles a page's custom attribute blocks with the warehouse.
//!
//! Blocks are visited one at a time in layout order. Each block either gets
//! a new attribute (with its survey link) or has its existing link located,
//! created or refreshed. Afterwards any attribute still linked to the survey
//! but gone from the layout has its `required` rule lifted.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::config::{SyncPolicy, WarehouseSettings};
use crate::error::{RemoteError, SyncError};
use crate::lookups::{self, split_terms_text};
use crate::messages::Messages;
use crate::remote::{RemoteRequest, RemoteResourceClient, RemoteResponse, id_field, row_values};
use crate::spec::binding::{BindingPatch, CreateOrExisting};
use crate::spec::kind::{AttributeEntity, DataType};
use crate::spec::page::{Block, BlockPosition, FormType, Page, value_i64};
use crate::walker::LayoutWalker;

const REQUIRED_RULE: &str = "required";

/// What one synchronization pass changed on the warehouse and the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Ids of attributes created in this pass.
    pub created: Vec<i64>,
    /// Attributes whose existing survey link was found and remembered.
    pub links_cached: Vec<i64>,
    /// Attributes whose survey link was created or rewritten.
    pub links_written: Vec<i64>,
    pub attributes_updated: Vec<i64>,
    pub attributes_backfilled: Vec<i64>,
    /// Link ids whose `required` rule was lifted.
    pub unrequired: Vec<i64>,
    /// Blocks left unresolved for the next save.
    pub failed_blocks: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Block facts captured before the block is mutably borrowed.
#[derive(Debug)]
struct AttributeBlock {
    position: BlockPosition,
    entity: AttributeEntity,
    sample_method_id: Option<i64>,
}

#[derive(Debug)]
pub struct AttributeSynchronizer<'a, C: ?Sized> {
    client: &'a C,
    website_id: i64,
    policy: SyncPolicy,
    is_attribute_admin: bool,
}

impl<'a, C> AttributeSynchronizer<'a, C>
where
    C: RemoteResourceClient + ?Sized,
{
    pub fn new(client: &'a C, settings: &WarehouseSettings, is_attribute_admin: bool) -> Self {
        Self {
            client,
            website_id: settings.website_id,
            policy: settings.sync,
            is_attribute_admin,
        }
    }

    /// Runs one pass over the page, writing resolved ids back into the
    /// blocks' bindings.
    ///
    /// Link failures stop the pass with an error; bookkeeping already
    /// written to earlier blocks stays on the page so it can be saved.
    pub fn synchronize(&self, page: &mut Page, messages: &mut Messages) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        if !page.published {
            debug!(page = page.id, "unpublished page, attributes not synchronized");
            return Ok(report);
        }
        let Some(survey_id) = page.survey_id else {
            messages.error("Cannot create attributes until survey created.");
            return Err(SyncError::MissingSurvey { page_id: page.id });
        };

        let mut linked = BTreeMap::new();
        for entity in [AttributeEntity::Occurrence, AttributeEntity::Sample] {
            linked.insert(entity, lookups::attributes_for_survey(self.client, entity, survey_id)?);
        }

        let blocks = attribute_blocks(page);
        let mut seen: BTreeSet<(AttributeEntity, i64)> = BTreeSet::new();
        for target in blocks {
            let Some(block) = page.block_mut(target.position) else {
                continue;
            };
            let binding = block.binding();
            if !binding.needs_creation()
                && let Some(attribute_id) = binding.attribute_id
            {
                seen.insert((target.entity, attribute_id));
            }
            match self.sync_block(block, &target, survey_id, &mut report, messages)? {
                Some(attribute_id) => {
                    seen.insert((target.entity, attribute_id));
                }
                None => report.failed_blocks += 1,
            }
        }

        for (entity, attributes) in &linked {
            for attribute_id in attributes.keys() {
                if !seen.contains(&(*entity, *attribute_id)) {
                    self.unrequire_removed(*entity, *attribute_id, survey_id, &mut report, messages)?;
                }
            }
        }
        info!(page = page.id, survey_id, report = ?report, "attribute synchronization finished");
        Ok(report)
    }

    /// Returns the block's attribute id once resolved, `None` if the block
    /// is left for the next save.
    fn sync_block(
        &self,
        block: &mut Block,
        target: &AttributeBlock,
        survey_id: i64,
        report: &mut SyncReport,
        messages: &mut Messages,
    ) -> Result<Option<i64>, SyncError> {
        let binding = block.binding();
        let attribute_id = match binding.attribute_id {
            Some(attribute_id) if !binding.needs_creation() => attribute_id,
            _ => return Ok(self.create_attribute(block, target, survey_id, report, messages)),
        };
        let entity = target.entity;

        let mut link_id = binding.attributes_website_id;
        if link_id.is_none()
            && let Some(link) = lookups::attribute_link(self.client, entity, attribute_id, survey_id)?
            && let Some(found) = id_field(&link, "id")
        {
            debug!(%entity, attribute_id, link_id = found, "cached existing survey link");
            block.binding_mut().apply(BindingPatch::link(found));
            report.links_cached.push(attribute_id);
            link_id = Some(found);
        }

        let needs_backfill = block.option_str("data_type").is_none();
        if needs_backfill {
            if let Err(err) = self.backfill(block, entity, attribute_id) {
                let (status, message) = err.summary();
                error!(%entity, attribute_id, error = %err, "could not read existing attribute");
                messages.error(format!("Could not read attribute {attribute_id}: {status}: {message}."));
                return Ok(None);
            }
            report.attributes_backfilled.push(attribute_id);
        } else if binding.dirty && self.policy.allows_content_update(self.is_attribute_admin) {
            if self.update_attribute(block, entity, attribute_id, messages) {
                report.attributes_updated.push(attribute_id);
            }
        }

        if needs_backfill || binding.dirty || link_id.is_none() {
            let written = self.write_link(
                block,
                entity,
                attribute_id,
                link_id,
                survey_id,
                target.sample_method_id,
                messages,
            )?;
            block.binding_mut().apply(BindingPatch::link(written));
            report.links_written.push(attribute_id);
        }
        if binding.dirty {
            block.binding_mut().apply(BindingPatch::clean());
        }
        Ok(Some(attribute_id))
    }

    fn create_attribute(
        &self,
        block: &mut Block,
        target: &AttributeBlock,
        survey_id: i64,
        report: &mut SyncReport,
        messages: &mut Messages,
    ) -> Option<i64> {
        let entity = target.entity;
        let submission = attribute_submission(
            block,
            entity,
            Some(LinkScope {
                website_id: self.website_id,
                survey_id,
                sample_method_id: target.sample_method_id,
            }),
        );
        let request = RemoteRequest::post(entity.attributes_resource(), submission);
        let created = match self.client.request(&request) {
            Ok(response) if response.status == 201 => response.body,
            outcome => {
                log_failure("attribute creation failed", &request, &outcome, block);
                let (status, message) = failure_summary(outcome, &request.path);
                messages.error(format!("Attribute creation failed: {status}: {message}."));
                return None;
            }
        };

        let posted_id = row_values(&created).and_then(|values| id_field(values, "id"));
        let posted_link = created
            .get(entity.links_resource())
            .and_then(|links| links.get(0))
            .and_then(row_values)
            .and_then(|values| id_field(values, "id"));
        if let Some(attribute_id) = posted_id {
            block.binding_mut().apply(BindingPatch {
                mode: Some(CreateOrExisting::Existing),
                attribute_id: Some(attribute_id),
                attributes_website_id: posted_link,
                dirty: Some(false),
                ..BindingPatch::default()
            });
        }

        let attribute = match self.fetch_created(entity, &created) {
            Ok(values) => Some(values),
            Err(err) => {
                warn!(%entity, attribute_id = ?posted_id, error = %err, response = %created, "created attribute could not be read back");
                if posted_id.is_some() {
                    messages.warning(format!(
                        "The new {entity} attribute could not be read back, its termlist is unknown: {err}."
                    ));
                }
                None
            }
        };
        let read_id = attribute.as_ref().and_then(|values| id_field(values, "id"));
        let Some(attribute_id) = posted_id.or(read_id) else {
            error!(%entity, response = %created, "created attribute has no id");
            messages.error("Attribute creation failed: the warehouse did not return an id.");
            return None;
        };

        let link_id = posted_link.or_else(|| {
            match lookups::attribute_link(self.client, entity, attribute_id, survey_id) {
                Ok(link) => link.and_then(|link| id_field(&link, "id")),
                Err(err) => {
                    warn!(%entity, attribute_id, error = %err, "could not look up the new attribute's survey link");
                    None
                }
            }
        });
        block.binding_mut().apply(BindingPatch {
            mode: Some(CreateOrExisting::Existing),
            attribute_id: Some(attribute_id),
            termlist_id: attribute
                .as_ref()
                .and_then(|values| values.get("termlist_id"))
                .and_then(value_i64),
            attributes_website_id: link_id,
            dirty: Some(false),
        });
        report.created.push(attribute_id);
        info!(%entity, attribute_id, link_id = ?link_id, "created warehouse attribute");
        messages.status(format!(
            "A new {entity} attribute has been created on the warehouse with ID {attribute_id} for the {} control.",
            block.option_str("label").unwrap_or_default()
        ));
        Some(attribute_id)
    }

    /// Reads a freshly created attribute through its `href`.
    fn fetch_created(&self, entity: AttributeEntity, created: &Value) -> Result<Map<String, Value>, RemoteError> {
        let path = match created.get("href").and_then(Value::as_str) {
            Some(href) => href.to_string(),
            None => {
                let id = row_values(created)
                    .and_then(|values| id_field(values, "id"))
                    .ok_or_else(|| RemoteError::Malformed {
                        path: entity.attributes_resource(),
                        detail: "creation reply has neither href nor id".into(),
                    })?;
                format!("{}/{}", entity.attributes_resource(), id)
            }
        };
        let body = self.client.send(&RemoteRequest::get(path.clone()))?;
        row_values(&body).cloned().ok_or(RemoteError::Malformed {
            path,
            detail: "attribute reply is not an object".into(),
        })
    }

    /// Copies an existing attribute's definition into a block that was only
    /// just pointed at it.
    fn backfill(&self, block: &mut Block, entity: AttributeEntity, attribute_id: i64) -> Result<(), RemoteError> {
        let attribute = lookups::attribute(self.client, entity, attribute_id)?;
        let text = |key: &str| {
            attribute
                .get(key)
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        };
        if let Some(caption) = text("caption") {
            if block.option_str("label").is_none() {
                block.set_option("label", caption.clone());
            }
            block.set_option("admin_name", caption);
        }
        if let Some(description) = text("description") {
            block.set_option("admin_description", description);
        }
        if let Some(unit) = text("unit") {
            block.set_option("suffix", unit);
        }
        let data_type = text("data_type").map(|code| DataType::from_code(&code));
        if let Some(data_type) = &data_type {
            block.set_option("data_type", data_type.code());
        }
        let termlist_id = attribute.get("termlist_id").and_then(value_i64).filter(|id| *id != 0);
        if let Some(termlist_id) = termlist_id {
            block.binding_mut().apply(BindingPatch {
                termlist_id: Some(termlist_id),
                ..BindingPatch::default()
            });
            if data_type == Some(DataType::Lookup) {
                let terms = lookups::fetch_terms(self.client, termlist_id, true)?;
                let text: Vec<&str> = terms.iter().map(|term| term.term.as_str()).collect();
                block.set_option("lookup_options_terms", text.join("\n"));
            }
        }
        debug!(%entity, attribute_id, "backfilled block from existing attribute");
        Ok(())
    }

    /// Rewrites the attribute definition; failures are reported only.
    fn update_attribute(
        &self,
        block: &Block,
        entity: AttributeEntity,
        attribute_id: i64,
        messages: &mut Messages,
    ) -> bool {
        let submission = attribute_submission(block, entity, None);
        let path = format!("{}/{}", entity.attributes_resource(), attribute_id);
        let request = RemoteRequest::put(path, submission);
        match self.client.request(&request) {
            Ok(response) if response.status == 200 => {
                debug!(%entity, attribute_id, "updated warehouse attribute");
                true
            }
            outcome => {
                log_failure("attribute update failed", &request, &outcome, block);
                let (status, message) = failure_summary(outcome, &request.path);
                messages.error(format!("Attribute update failed: {status}: {message}."));
                false
            }
        }
    }

    /// Creates or updates the attribute's survey link, returning its id.
    #[allow(clippy::too_many_arguments)]
    fn write_link(
        &self,
        block: &Block,
        entity: AttributeEntity,
        attribute_id: i64,
        link_id: Option<i64>,
        survey_id: i64,
        sample_method_id: Option<i64>,
        messages: &mut Messages,
    ) -> Result<i64, SyncError> {
        let mut values = Map::new();
        values.insert(entity.link_attribute_key(), attribute_id.into());
        values.insert("website_id".into(), self.website_id.into());
        values.insert("restrict_to_survey_id".into(), survey_id.into());
        values.insert("validation_rules".into(), validation_rules(block));
        if let Some(method) = sample_method_id {
            values.insert("restrict_to_sample_method_id".into(), method.into());
        }
        let submission = json!({ "values": values });
        let request = match link_id {
            Some(link_id) => RemoteRequest::put(format!("{}/{}", entity.links_resource(), link_id), submission),
            None => RemoteRequest::post(entity.links_resource(), submission),
        };

        let outcome = self.client.request(&request);
        let written = match &outcome {
            Ok(response) if matches!(response.status, 200 | 201) => link_id.or_else(|| {
                row_values(&response.body).and_then(|values| id_field(values, "id"))
            }),
            _ => None,
        };
        if let Some(written) = written {
            debug!(%entity, attribute_id, link_id = written, "survey link written");
            return Ok(written);
        }

        log_failure("failed to link an attribute to a survey dataset", &request, &outcome, block);
        let source = match outcome {
            Ok(response) if response.is_success() => RemoteError::Malformed {
                path: request.path.clone(),
                detail: "created link has no id".into(),
            },
            Ok(response) => response
                .into_result(&request.path)
                .err()
                .unwrap_or(RemoteError::Transport("unexpected link reply".into())),
            Err(err) => err,
        };
        let (status, message) = source.summary();
        messages.error(format!(
            "Failed to link an attribute to a survey dataset: {status}: {message}."
        ));
        Err(SyncError::Link {
            attribute_id,
            source,
        })
    }

    /// Lifts the `required` rule from the survey link of an attribute that
    /// is no longer on the layout. The link and attribute are kept.
    fn unrequire_removed(
        &self,
        entity: AttributeEntity,
        attribute_id: i64,
        survey_id: i64,
        report: &mut SyncReport,
        messages: &mut Messages,
    ) -> Result<(), SyncError> {
        let Some(link) = lookups::attribute_link(self.client, entity, attribute_id, survey_id)? else {
            return Ok(());
        };
        let required = link
            .get("validation_rules")
            .and_then(Value::as_str)
            .is_some_and(|rules| rules.lines().any(|rule| rule.trim() == REQUIRED_RULE));
        let Some(link_id) = id_field(&link, "id") else {
            return Ok(());
        };
        if !required {
            return Ok(());
        }

        let request = RemoteRequest::put(
            format!("{}/{}", entity.links_resource(), link_id),
            json!({ "values": { "validation_rules": null } }),
        );
        match self.client.send(&request) {
            Ok(_) => {
                info!(%entity, attribute_id, link_id, "lifted required rule from removed attribute");
                report.unrequired.push(link_id);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                warn!(%entity, attribute_id, link_id, "survey link disappeared before it could be updated");
                messages.warning(format!(
                    "The survey link for removed {entity} attribute {attribute_id} no longer exists."
                ));
                Ok(())
            }
            Err(source) => {
                error!(%entity, attribute_id, link_id, error = %source, "failed to lift required rule");
                let (status, message) = source.summary();
                messages.error(format!(
                    "Failed to link an attribute to a survey dataset: {status}: {message}."
                ));
                Err(SyncError::Link {
                    attribute_id,
                    source,
                })
            }
        }
    }
}

/// Website and survey the initial link of a new attribute is scoped to.
#[derive(Debug, Clone, Copy)]
struct LinkScope {
    website_id: i64,
    survey_id: i64,
    sample_method_id: Option<i64>,
}

/// Custom attribute blocks in layout order, with their link restrictions.
fn attribute_blocks(page: &Page) -> Vec<AttributeBlock> {
    let multiplace = page.form_type().ok() == Some(FormType::Multiplace);
    LayoutWalker::new(page)
        .blocks()
        .filter_map(|placed| {
            let entity = placed.block.control_kind().attribute_entity()?;
            let child = multiplace
                && entity == AttributeEntity::Sample
                && placed.block.option_flag("child_sample_attribute");
            Some(AttributeBlock {
                position: placed.position,
                entity,
                sample_method_id: if child {
                    page.child_sample_method_id
                } else {
                    page.sample_method_id
                },
            })
        })
        .collect()
}

/// Body posted to create or update an attribute definition. With a scope
/// the initial survey link is included.
fn attribute_submission(block: &Block, entity: AttributeEntity, scope: Option<LinkScope>) -> Value {
    let option = |key: &str| block.option(key).cloned().unwrap_or(Value::Null);
    let data_type = block.option_str("data_type").map(DataType::from_code);
    let is_lookup = data_type == Some(DataType::Lookup);
    let multi_value = is_lookup && block.option_str("lookup_options_control") == Some("checkbox_group");

    let mut values = Map::new();
    values.insert("caption".into(), option("admin_name"));
    values.insert("description".into(), option("admin_description"));
    values.insert("data_type".into(), option("data_type"));
    values.insert("unit".into(), option("suffix"));
    values.insert("multi_value".into(), (if multi_value { "t" } else { "f" }).into());
    let termlist_id = block.binding.as_ref().and_then(|binding| binding.termlist_id);
    if is_lookup && let Some(termlist_id) = termlist_id {
        values.insert("termlist_id".into(), termlist_id.into());
    }

    let mut submission = Map::new();
    submission.insert("values".into(), Value::Object(values));
    if let Some(scope) = scope {
        let mut link = Map::new();
        link.insert("restrict_to_survey_id".into(), scope.survey_id.into());
        link.insert("website_id".into(), scope.website_id.into());
        link.insert("validation_rules".into(), validation_rules(block));
        if let Some(method) = scope.sample_method_id {
            link.insert("restrict_to_sample_method_id".into(), method.into());
        }
        submission.insert(entity.links_resource(), json!([{ "values": link }]));
    }
    if is_lookup
        && let Some(text) = block.option_str("lookup_options_terms")
    {
        submission.insert("terms".into(), json!(split_terms_text(text)));
    }
    Value::Object(submission)
}

fn validation_rules(block: &Block) -> Value {
    if block.option_flag("required") {
        Value::String(REQUIRED_RULE.into())
    } else {
        Value::Null
    }
}

fn failure_summary(outcome: Result<RemoteResponse, RemoteError>, path: &str) -> (String, String) {
    match outcome {
        Ok(response) => {
            let status = response.status;
            match response.into_result(path) {
                Err(err) => err.summary(),
                Ok(_) => (format!("HTTP {status}"), "unexpected status".into()),
            }
        }
        Err(err) => err.summary(),
    }
}

fn log_failure(
    what: &str,
    request: &RemoteRequest,
    outcome: &Result<RemoteResponse, RemoteError>,
    block: &Block,
) {
    let submission = request.body.clone().unwrap_or(Value::Null);
    let configuration = Value::Object(block.configuration.clone());
    match outcome {
        Ok(response) => error!(
            method = %request.method,
            path = %request.path,
            submission = %submission,
            status = response.status,
            response = %response.body,
            block_config = %configuration,
            "{what}"
        ),
        Err(err) => error!(
            method = %request.method,
            path = %request.path,
            submission = %submission,
            error = %err,
            block_config = %configuration,
            "{what}"
        ),
    }
}
