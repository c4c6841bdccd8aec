#![allow(missing_docs)]

mod store;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use layout_spec::{
    AttributeSynchronizer, LayoutError, Messages, RemoteError, RemoteResourceClient,
    SchemaMode, SchemaRequest, SurveyProvisioner, SyncError, SyncReport, WarehouseSettings,
    assemble_form_schema, group_pages_for_user, strip_tags,
};

pub use store::{MemoryPageStore, PageStore, StoreError};

/// Route of the single form layout resource; list entries link below it.
pub const FORM_LAYOUT_PATH: &str = "/iform_layout_builder/form_layout";

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("form layout {0} not found")]
    NotFound(u64),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("group page lookup failed: {0}")]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("json encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ResourceError {
    pub fn status(&self) -> u16 {
        match self {
            ResourceError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

/// Status code and JSON body handed back to the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    pub status: u16,
    pub body: Value,
}

impl ResourceResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn respond(result: Result<Value, ResourceError>) -> ResourceResponse {
    match result {
        Ok(body) => ResourceResponse::ok(body),
        Err(err) => {
            if err.status() >= 500 {
                warn!(error = %err, "resource request failed");
            }
            ResourceResponse {
                status: err.status(),
                body: json!({ "error": err.to_string() }),
            }
        }
    }
}

/// Query parameters accepted by the single form layout resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormLayoutQuery {
    pub layout: bool,
    pub taxon_attributes: Option<String>,
}

impl FormLayoutQuery {
    /// Parses `layout=1&taxon_attributes=4,5`. Unknown keys are ignored and
    /// `layout` counts as set unless empty or `0`.
    pub fn from_query_string(raw: &str) -> Self {
        let mut query = Self::default();
        for (key, value) in url::form_urlencoded::parse(raw.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "layout" => query.layout = !value.is_empty() && value != "0",
                "taxon_attributes" => {
                    query.taxon_attributes = Some(value.into_owned()).filter(|value| !value.is_empty())
                }
                _ => {}
            }
        }
        query
    }

    fn schema_request(&self) -> SchemaRequest {
        SchemaRequest {
            mode: if self.layout {
                SchemaMode::Layout
            } else {
                SchemaMode::Flat
            },
            taxon_attributes: self.taxon_attributes.clone(),
        }
    }
}

/// The user making a request, as known to the warehouse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CurrentUser {
    pub indicia_user_id: Option<i64>,
    pub is_attribute_admin: bool,
}

/// `GET /iform_layout_builder/form_layout/{id}`.
pub fn form_layout<S, C>(
    store: &S,
    client: &C,
    settings: &WarehouseSettings,
    page_id: u64,
    query: &FormLayoutQuery,
) -> ResourceResponse
where
    S: PageStore + ?Sized,
    C: RemoteResourceClient + ?Sized,
{
    respond(form_layout_body(store, client, settings, page_id, query))
}

fn form_layout_body<S, C>(
    store: &S,
    client: &C,
    settings: &WarehouseSettings,
    page_id: u64,
    query: &FormLayoutQuery,
) -> Result<Value, ResourceError>
where
    S: PageStore + ?Sized,
    C: RemoteResourceClient + ?Sized,
{
    let page = store
        .load(page_id)
        .filter(|page| page.is_form())
        .ok_or(ResourceError::NotFound(page_id))?;
    info!(page_id, layout = query.layout, "serving form layout");
    let schema = assemble_form_schema(&page, settings, client, &query.schema_request())?;
    serde_json::to_value(&schema).map_err(ResourceError::Encode)
}

/// One entry of the form layout list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormSummary {
    pub id: u64,
    pub title: String,
    pub survey_id: Option<i64>,
    #[serde(rename = "type")]
    pub form_type: String,
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `GET /iform_layout_builder/form_layout`.
pub fn form_layout_list<S, C>(
    store: &S,
    client: &C,
    settings: &WarehouseSettings,
    user: &CurrentUser,
) -> ResourceResponse
where
    S: PageStore + ?Sized,
    C: RemoteResourceClient + ?Sized,
{
    respond(
        form_summaries(store, client, settings, user)
            .and_then(|list| serde_json::to_value(list).map_err(ResourceError::Encode)),
    )
}

/// Published forms visible to `user`. Pages restricted to groups are only
/// listed when one of the user's group pages links to their alias.
pub fn form_summaries<S, C>(
    store: &S,
    client: &C,
    settings: &WarehouseSettings,
    user: &CurrentUser,
) -> Result<Vec<FormSummary>, ResourceError>
where
    S: PageStore + ?Sized,
    C: RemoteResourceClient + ?Sized,
{
    let group_pages = group_pages_for_user(client, user.indicia_user_id)?;
    let base = settings.base_url.trim_end_matches('/');
    let mut list = Vec::new();
    for page in store.published_form_pages() {
        if !page.published || !page.is_form() {
            continue;
        }
        let alias = page.alias();
        let groups = group_pages.get(&alias);
        if page.available_for_groups && groups.is_none() {
            continue;
        }
        let form_type = match page.form_type() {
            Ok(form_type) => form_type.label(),
            Err(err) => {
                warn!(page_id = page.id, error = %err, "listing form with unknown type");
                format!("{}_species_form", page.form_type)
            }
        };
        list.push(FormSummary {
            id: page.id,
            href: format!("{base}{FORM_LAYOUT_PATH}/{}", page.id),
            title: page.title,
            survey_id: page.survey_id,
            form_type,
            groups: groups.cloned(),
            description: page
                .description
                .as_deref()
                .map(strip_tags)
                .filter(|text| !text.is_empty()),
        });
    }
    Ok(list)
}

/// Result of saving a layout.
#[derive(Debug, Default, Serialize)]
pub struct SaveOutcome {
    pub messages: Messages,
    pub survey_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    /// Why synchronization stopped, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs after a form page is saved: makes sure the survey exists, then
/// brings the warehouse attributes in line with the layout and stores the
/// updated bookkeeping.
pub fn save_form_layout<S, C>(
    store: &mut S,
    client: &C,
    settings: &WarehouseSettings,
    actor: &CurrentUser,
    page_id: u64,
) -> Result<SaveOutcome, ResourceError>
where
    S: PageStore + ?Sized,
    C: RemoteResourceClient + ?Sized,
{
    let mut page = store
        .load(page_id)
        .filter(|page| page.is_form())
        .ok_or(ResourceError::NotFound(page_id))?;
    let mut outcome = SaveOutcome::default();

    let provisioner = SurveyProvisioner::new(client, settings.website_id);
    if let Err(err) = provisioner.ensure_survey(&mut page, &mut outcome.messages) {
        warn!(page_id, error = %err, "survey not available, skipping attribute sync");
        outcome.error = Some(err.to_string());
        return Ok(outcome);
    }

    let synchronizer = AttributeSynchronizer::new(client, settings, actor.is_attribute_admin);
    match synchronizer.synchronize(&mut page, &mut outcome.messages) {
        Ok(report) => outcome.report = Some(report),
        Err(err) => {
            log_sync_failure(page_id, &err);
            outcome.error = Some(err.to_string());
        }
    }
    outcome.survey_id = page.survey_id;
    store.save(&page)?;
    Ok(outcome)
}

fn log_sync_failure(page_id: u64, err: &SyncError) {
    match err {
        SyncError::Link { attribute_id, .. } => {
            warn!(page_id, attribute_id, error = %err, "attribute sync stopped on a link failure")
        }
        _ => warn!(page_id, error = %err, "attribute sync stopped"),
    }
}
