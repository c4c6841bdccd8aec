//! Read-only warehouse lookups used while building schemas and lists.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::messages::Messages;
use crate::remote::{RemoteRequest, RemoteResourceClient, id_field, row_values, rows};
use crate::spec::kind::AttributeEntity;
use crate::spec::page::value_i64;

pub const TERMS_RESOURCE: &str = "termlists_terms";
pub const SCRATCHPAD_TAXA_REPORT: &str = "reports/library/taxa/taxa_for_scratchpad.xml";
pub const GROUP_PAGES_REPORT: &str = "reports/library/group_pages/group_pages_for_user.xml";

static TAXON_ATTRIBUTE_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(,[0-9]+)*$").expect("taxon attribute pattern is valid"));

/// One lookup term offered by a select style control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: i64,
    pub term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_image_path: Option<String>,
}

impl Term {
    pub fn new(id: i64, term: impl Into<String>) -> Self {
        Self {
            id,
            term: term.into(),
            parent_id: None,
            preferred_image_path: None,
        }
    }

    fn from_row(row: &Map<String, Value>) -> Option<Self> {
        let id = id_field(row, "id")?;
        let term = row.get("term").and_then(Value::as_str)?.to_string();
        let parent_id = row
            .get("parent_id")
            .and_then(value_i64)
            .filter(|parent| *parent != 0);
        let preferred_image_path = row
            .get("preferred_image_path")
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
            .map(str::to_string);
        Some(Self {
            id,
            term,
            parent_id,
            preferred_image_path,
        })
    }
}

/// Splits editor-entered lookup terms, one per line, whatever the line ending.
pub fn split_terms_text(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim()
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns the filter only when it is a comma separated list of integers.
pub fn valid_taxon_attributes(raw: Option<&str>) -> Option<&str> {
    raw.filter(|candidate| TAXON_ATTRIBUTE_LIST.is_match(candidate))
}

/// Ordered, preferred terms of a termlist.
pub fn fetch_terms<C>(client: &C, termlist_id: i64, uncached: bool) -> Result<Vec<Term>, RemoteError>
where
    C: RemoteResourceClient + ?Sized,
{
    let request = RemoteRequest::get(TERMS_RESOURCE)
        .with_query("termlist_id", termlist_id)
        .with_query("view", if uncached { "list" } else { "cache" })
        .with_query("orderby", "sort_order,term")
        .with_query("preferred", "t")
        .with_query("columns", "id,term,parent_id,preferred_image_path");
    let body = client.send(&request)?;
    let terms: Vec<Term> = rows(&body).into_iter().filter_map(Term::from_row).collect();
    debug!(termlist_id, count = terms.len(), "loaded lookup terms");
    Ok(terms)
}

/// Taxon names on a scratchpad list, as report rows.
pub fn scratchpad_taxa<C>(
    client: &C,
    scratchpad_list_id: i64,
    preferred: bool,
    taxon_attributes: Option<&str>,
) -> Result<Vec<Value>, RemoteError>
where
    C: RemoteResourceClient + ?Sized,
{
    let request = RemoteRequest::get(SCRATCHPAD_TAXA_REPORT)
        .with_query("scratchpad_list_id", scratchpad_list_id)
        .with_query("language_codes", "lat,eng")
        .with_query("preferred", if preferred { "t" } else { "f" })
        .with_query("taxattrs", valid_taxon_attributes(taxon_attributes).unwrap_or(""));
    let body = client.send(&request)?;
    Ok(rows(&body)
        .into_iter()
        .map(|row| Value::Object(row.clone()))
        .collect())
}

/// Group titles keyed by the page path they link to.
pub fn group_pages_for_user<C>(
    client: &C,
    indicia_user_id: Option<i64>,
) -> Result<BTreeMap<String, Vec<String>>, RemoteError>
where
    C: RemoteResourceClient + ?Sized,
{
    let request = RemoteRequest::get(GROUP_PAGES_REPORT).with_query(
        "currentUser",
        indicia_user_id.map(|id| id.to_string()).unwrap_or_default(),
    );
    let body = client.send(&request)?;
    let mut pages: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in rows(&body) {
        let Some(path) = row.get("path").and_then(Value::as_str) else {
            continue;
        };
        let title = row
            .get("group_title")
            .and_then(Value::as_str)
            .unwrap_or_default();
        pages
            .entry(path.trim_matches('/').to_string())
            .or_default()
            .push(title.to_string());
    }
    Ok(pages)
}

/// Survey titles keyed by id.
///
/// A warehouse without the REST module answers 404; that is reported to the
/// editor and treated as an empty list.
pub fn survey_list<C>(client: &C, messages: &mut Messages) -> Result<BTreeMap<i64, String>, RemoteError>
where
    C: RemoteResourceClient + ?Sized,
{
    let body = match client.send(&RemoteRequest::get("surveys")) {
        Ok(body) => body,
        Err(err) if err.is_not_found() => {
            warn!("warehouse REST API is not available");
            messages.error("The warehouse needs the REST API module installed.");
            return Ok(BTreeMap::new());
        }
        Err(err) => return Err(err),
    };
    Ok(rows(&body)
        .into_iter()
        .filter_map(|row| {
            let id = id_field(row, "id")?;
            let title = row.get("title").and_then(Value::as_str)?;
            Some((id, title.to_string()))
        })
        .collect())
}

/// Captions of all non-public attributes of an entity, keyed by id.
pub fn attribute_captions<C>(
    client: &C,
    entity: AttributeEntity,
) -> Result<BTreeMap<i64, String>, RemoteError>
where
    C: RemoteResourceClient + ?Sized,
{
    let request = RemoteRequest::get(entity.attributes_resource()).with_query("public", "f");
    let body = client.send(&request)?;
    Ok(rows(&body)
        .into_iter()
        .filter_map(|row| {
            let id = id_field(row, "id")?;
            let caption = row.get("caption").and_then(Value::as_str).unwrap_or_default();
            Some((id, caption.to_string()))
        })
        .collect())
}

/// Attributes available to a survey, keyed by id.
pub fn attributes_for_survey<C>(
    client: &C,
    entity: AttributeEntity,
    survey_id: i64,
) -> Result<BTreeMap<i64, Map<String, Value>>, RemoteError>
where
    C: RemoteResourceClient + ?Sized,
{
    let request = RemoteRequest::get(entity.attributes_resource())
        .with_query("public", "f")
        .with_query("restrict_to_survey_id", survey_id);
    let body = client.send(&request)?;
    Ok(rows(&body)
        .into_iter()
        .filter_map(|row| Some((id_field(row, "id")?, row.clone())))
        .collect())
}

/// The link scoping an attribute to a survey, if there is one.
pub fn attribute_link<C>(
    client: &C,
    entity: AttributeEntity,
    attribute_id: i64,
    survey_id: i64,
) -> Result<Option<Map<String, Value>>, RemoteError>
where
    C: RemoteResourceClient + ?Sized,
{
    let request = RemoteRequest::get(entity.links_resource())
        .with_query(&entity.link_attribute_key(), attribute_id)
        .with_query("restrict_to_survey_id", survey_id);
    let body = client.send(&request)?;
    Ok(rows(&body).into_iter().next().cloned())
}

/// A single attribute definition.
pub fn attribute<C>(
    client: &C,
    entity: AttributeEntity,
    attribute_id: i64,
) -> Result<Map<String, Value>, RemoteError>
where
    C: RemoteResourceClient + ?Sized,
{
    let path = format!("{}/{}", entity.attributes_resource(), attribute_id);
    let body = client.send(&RemoteRequest::get(path.clone()))?;
    row_values(&body)
        .cloned()
        .ok_or_else(|| RemoteError::Malformed {
            path,
            detail: "attribute reply is not an object".into(),
        })
}
