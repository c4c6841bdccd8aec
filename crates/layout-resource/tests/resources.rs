use serde_json::{Value, json};

use layout_resource::{
    CurrentUser, FormLayoutQuery, MemoryPageStore, PageStore, form_layout, form_layout_list,
    save_form_layout,
};
use layout_spec::{
    AttributeBinding, Block, Method, Page, RecordedExchange, RecordedWarehouse,
    WarehouseSettings, lookups,
};

fn page(raw: Value) -> Page {
    serde_json::from_value(raw).expect("deserialize")
}

fn settings() -> WarehouseSettings {
    WarehouseSettings {
        website_id: 3,
        base_url: "https://recording.example.org/".into(),
        ..WarehouseSettings::default()
    }
}

fn pages() -> MemoryPageStore {
    MemoryPageStore::new(vec![
        page(json!({
            "id": 1,
            "title": "Garden birds",
            "form_type": "single",
            "survey_id": 10,
            "published": true,
            "path_alias": "/forms/garden-birds",
            "description": "<p>Birds <em>at</em> feeders.</p>"
        })),
        page(json!({
            "id": 2,
            "title": "Club moths",
            "form_type": "list",
            "survey_id": 11,
            "published": true,
            "path_alias": "/groups/moths",
            "available_for_groups": true
        })),
        page(json!({
            "id": 3,
            "title": "Bat roosts",
            "form_type": "multiplace",
            "survey_id": 12,
            "published": true,
            "path_alias": "/groups/bats",
            "available_for_groups": true
        })),
        page(json!({
            "id": 4,
            "title": "Draft",
            "form_type": "list",
            "published": false
        })),
        page(json!({
            "id": 5,
            "title": "About us",
            "content_type": "page",
            "form_type": "list",
            "published": true
        })),
    ])
}

fn group_pages(rows: Value) -> RecordedWarehouse {
    RecordedWarehouse::new(vec![
        RecordedExchange::new(Method::Get, lookups::GROUP_PAGES_REPORT, 200, rows)
            .with_query("currentUser", 9),
    ])
}

#[test]
fn list_excludes_group_pages_the_user_cannot_reach() {
    let warehouse = group_pages(json!([
        { "path": "groups/moths", "group_title": "Moth club" },
        { "path": "/groups/moths/", "group_title": "Lepidoptera society" },
        { "path": "groups/beetles", "group_title": "Beetle club" }
    ]));
    let user = CurrentUser {
        indicia_user_id: Some(9),
        ..CurrentUser::default()
    };
    let response = form_layout_list(&pages(), &warehouse, &settings(), &user);
    assert_eq!(response.status, 200);
    assert_eq!(
        response.body,
        json!([
            {
                "id": 1,
                "title": "Garden birds",
                "survey_id": 10,
                "type": "single_species_form",
                "href": "https://recording.example.org/iform_layout_builder/form_layout/1",
                "description": "Birds at feeders."
            },
            {
                "id": 2,
                "title": "Club moths",
                "survey_id": 11,
                "type": "list_species_form",
                "href": "https://recording.example.org/iform_layout_builder/form_layout/2",
                "groups": ["Moth club", "Lepidoptera society"]
            }
        ])
    );
}

#[test]
fn list_fails_when_group_pages_cannot_be_read() {
    let response = form_layout_list(
        &pages(),
        &RecordedWarehouse::default(),
        &settings(),
        &CurrentUser::default(),
    );
    assert_eq!(response.status, 500);
    assert!(response.body["error"].as_str().is_some());
}

#[test]
fn single_layout_is_flat_unless_layout_requested() {
    let store = pages();
    let warehouse = RecordedWarehouse::default();

    let flat = form_layout(&store, &warehouse, &settings(), 1, &FormLayoutQuery::default());
    assert_eq!(flat.status, 200);
    assert_eq!(flat.body["type"], "single_species_form");
    assert_eq!(flat.body["description"], "Birds at feeders.");
    assert_eq!(flat.body["controls"][1]["default_value"], "forms/garden-birds");
    assert!(flat.body.get("form_sections").is_none());

    let query = FormLayoutQuery::from_query_string("layout=1");
    let layout = form_layout(&store, &warehouse, &settings(), 1, &query);
    assert_eq!(layout.status, 200);
    assert!(layout.body["form_sections"].is_array());
    assert!(layout.body.get("controls").is_none());
}

#[test]
fn single_layout_is_404_for_missing_and_non_form_pages() {
    let store = pages();
    let warehouse = RecordedWarehouse::default();
    for id in [5, 99] {
        let response = form_layout(&store, &warehouse, &settings(), id, &FormLayoutQuery::default());
        assert_eq!(response.status, 404, "page {id}");
        assert_eq!(response.body["error"], format!("form layout {id} not found"));
    }
}

#[test]
fn single_layout_with_unknown_form_type_is_a_server_error() {
    let mut broken = page(json!({
        "id": 8,
        "title": "Broken",
        "form_type": "grid",
        "published": true
    }));
    broken.survey_id = Some(4);
    let store = MemoryPageStore::new(vec![broken]);
    let response = form_layout(
        &store,
        &RecordedWarehouse::default(),
        &settings(),
        8,
        &FormLayoutQuery::default(),
    );
    assert_eq!(response.status, 500);
    assert_eq!(response.body["error"], "unrecognised form type grid");
}

fn empty_attribute_lists() -> Vec<RecordedExchange> {
    vec![
        RecordedExchange::new(Method::Get, "occurrence_attributes", 200, json!([])),
        RecordedExchange::new(Method::Get, "sample_attributes", 200, json!([])),
    ]
}

fn trap_attribute(weight: i64) -> Block {
    Block::new("data_entry_sample_custom_attribute_block", "content", weight)
        .with_option("label", "Trap type")
        .with_option("data_type", "T")
}

fn form_page(survey_id: Option<i64>, blocks: Vec<Block>) -> Page {
    let mut page = page(json!({
        "id": 20,
        "title": "Moth trap",
        "form_type": "list",
        "published": true,
        "sections": [{ "layout_id": "layout_onecol", "components": [] }]
    }));
    page.survey_id = survey_id;
    page.sections[0].components = blocks;
    page
}

#[test]
fn save_creates_the_survey_then_stores_the_page() {
    let mut exchanges = vec![RecordedExchange::new(
        Method::Post,
        "surveys",
        201,
        json!({ "values": { "id": 88 } }),
    )];
    exchanges.extend(empty_attribute_lists());
    let warehouse = RecordedWarehouse::new(exchanges);
    let mut store = MemoryPageStore::new(vec![form_page(None, Vec::new())]);

    let outcome = save_form_layout(&mut store, &warehouse, &settings(), &CurrentUser::default(), 20)
        .expect("save");
    assert!(outcome.is_complete());
    assert_eq!(outcome.survey_id, Some(88));
    assert!(outcome.report.as_ref().is_some_and(|report| report.is_noop()));
    assert_eq!(store.load(20).and_then(|page| page.survey_id), Some(88));
    assert_eq!(outcome.messages.len(), 1);
}

#[test]
fn failed_survey_creation_skips_sync_and_storage() {
    let warehouse = RecordedWarehouse::new(vec![RecordedExchange::new(
        Method::Post,
        "surveys",
        400,
        json!({ "status": "Bad Request", "message": "title is required" }),
    )]);
    let original = form_page(None, vec![trap_attribute(0)]);
    let mut store = MemoryPageStore::new(vec![original.clone()]);

    let outcome = save_form_layout(&mut store, &warehouse, &settings(), &CurrentUser::default(), 20)
        .expect("save");
    assert!(!outcome.is_complete());
    assert!(outcome.report.is_none());
    assert!(outcome.messages.has_errors());
    assert_eq!(warehouse.requests().len(), 1);
    assert_eq!(store.get(20), Some(&original));
}

#[test]
fn save_keeps_bookkeeping_from_before_a_link_failure() {
    let mut exchanges = empty_attribute_lists();
    exchanges.push(
        RecordedExchange::new(
            Method::Get,
            "sample_attributes_websites",
            200,
            json!([{ "values": { "id": 720 } }]),
        )
        .with_query("sample_attribute_id", 72),
    );
    exchanges.push(RecordedExchange::new(
        Method::Put,
        "sample_attributes_websites/710",
        500,
        json!({ "status": "Internal Server Error", "message": "database unavailable" }),
    ));
    let warehouse = RecordedWarehouse::new(exchanges);
    let blocks = vec![
        trap_attribute(0).with_binding(AttributeBinding::existing(72)),
        trap_attribute(1).with_binding(AttributeBinding {
            attributes_website_id: Some(710),
            dirty: true,
            ..AttributeBinding::existing(71)
        }),
    ];
    let mut store = MemoryPageStore::new(vec![form_page(Some(14), blocks)]);

    let outcome = save_form_layout(&mut store, &warehouse, &settings(), &CurrentUser::default(), 20)
        .expect("save");
    assert!(!outcome.is_complete());
    assert!(outcome.report.is_none());

    let stored = store.load(20).expect("stored page");
    let components = &stored.sections[0].components;
    assert_eq!(components[0].binding().attributes_website_id, Some(720));
    assert!(components[1].binding().dirty);
}

#[test]
fn save_of_unknown_page_is_not_found() {
    let mut store = MemoryPageStore::default();
    let err = save_form_layout(
        &mut store,
        &RecordedWarehouse::default(),
        &settings(),
        &CurrentUser::default(),
        3,
    )
    .unwrap_err();
    assert_eq!(err.status(), 404);
}
