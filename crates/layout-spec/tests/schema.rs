use serde_json::{Value, json};

use layout_spec::{
    FieldDescriptor, Method, Page, RecordedExchange, RecordedWarehouse, SchemaRequest,
    WarehouseSettings, assemble_form_schema, lookups,
};

fn fixture(name: &str) -> &'static str {
    match name {
        "single_form" => include_str!("../tests/fixtures/single_form.json"),
        "list_form" => include_str!("../tests/fixtures/list_form.json"),
        "multiplace_form" => include_str!("../tests/fixtures/multiplace_form.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

fn page(name: &str) -> Page {
    serde_json::from_str(fixture(name)).expect("deserialize")
}

fn settings() -> WarehouseSettings {
    WarehouseSettings {
        website_id: 3,
        master_checklist_id: Some(101),
        spatial_systems: "OSGB,4326".into(),
        ..WarehouseSettings::default()
    }
}

fn kinds(controls: &[FieldDescriptor]) -> Vec<&str> {
    controls.iter().map(FieldDescriptor::type_tag).collect()
}

fn terms_warehouse() -> RecordedWarehouse {
    RecordedWarehouse::new(vec![
        RecordedExchange::new(
            Method::Get,
            lookups::TERMS_RESOURCE,
            200,
            json!([
                { "id": 501, "term": "Adult", "parent_id": null, "preferred_image_path": null },
                { "id": 502, "term": "Larva", "parent_id": "", "preferred_image_path": "" },
                { "id": 503, "term": "Tadpole", "parent_id": 502, "preferred_image_path": "tadpole.png" }
            ]),
        )
        .with_query("termlist_id", 42),
    ])
}

#[test]
fn single_form_flat_controls() {
    let warehouse = RecordedWarehouse::default();
    let schema = assemble_form_schema(
        &page("single_form"),
        &settings(),
        &warehouse,
        &SchemaRequest::default(),
    )
    .expect("schema");

    let encoded = serde_json::to_value(&schema).expect("encode");
    assert_eq!(encoded["type"], "single_species_form");
    assert_eq!(encoded["survey_id"], 12);
    assert_eq!(encoded["revision_id"], 57);
    assert_eq!(encoded["description"], "Count the frogs in your garden pond.");
    assert!(encoded.get("subtype").is_none());
    assert!(encoded.get("form_sections").is_none());
    assert_eq!(
        encoded["controls"],
        json!([
            {
                "control_type": "hidden",
                "field_name": "sample:survey_id",
                "default_value": 12,
                "validation": { "required": true }
            },
            {
                "control_type": "hidden",
                "field_name": "sample:input_form",
                "default_value": "forms/garden-frogs"
            },
            {
                "type": "date_picker",
                "field_name": "sample:date",
                "control_type": "date",
                "label": "Date",
                "validation": { "required": true, "allow_future": false }
            },
            {
                "type": "occurrence_custom_attribute",
                "field_name": "occAttr:7",
                "control_type": "text",
                "label": "Behaviour",
                "validation": { "required": false },
                "admin_name": "Frog behaviour",
                "data_type": "text",
                "attribute_id": 7,
                "attributes_website_id": 70
            }
        ])
    );
    assert!(warehouse.requests().is_empty());
}

#[test]
fn list_form_flat_order_follows_sections_regions_and_weights() {
    let warehouse = terms_warehouse();
    let schema = assemble_form_schema(
        &page("list_form"),
        &settings(),
        &warehouse,
        &SchemaRequest::default(),
    )
    .expect("schema");
    let controls = schema.controls.expect("controls");
    let fields: Vec<Option<&str>> = controls.iter().map(|c| c.field_name.as_deref()).collect();
    assert_eq!(
        fields,
        vec![
            Some("sample:survey_id"),
            Some("sample:input_form"),
            Some("sample:sample_method_id"),
            Some("sample:date"),
            Some("sample:entered_sref"),
            Some("sample:entered_sref_system"),
            Some("sample:comment"),
            None,
        ]
    );
    assert_eq!(controls[2].default_value, Some(json!(3)));
    assert_eq!(controls[5].control_type.as_deref(), Some("hidden"));
    assert_eq!(controls[5].default_value, Some(json!("OSGB")));
    assert!(!controls[6].is_required());
}

#[test]
fn species_grid_controls_are_ordered_and_flag_driven() {
    let warehouse = terms_warehouse();
    let schema = assemble_form_schema(
        &page("list_form"),
        &settings(),
        &warehouse,
        &SchemaRequest::layout(),
    )
    .expect("schema");
    let sections = schema.form_sections.expect("sections");
    let grid = &sections[1].components.get("content").expect("content")[0];
    assert_eq!(grid.type_tag(), "species_list");
    assert_eq!(
        kinds(&grid.controls),
        vec![
            "species",
            "absence",
            "occurrence_custom_attribute",
            "occurrence_custom_attribute",
            "occurrence_comment",
        ]
    );
    assert_eq!(grid.controls[0].options["taxon_list_id"], json!(101));
    assert_eq!(grid.controls[2].field_name.as_deref(), Some("occAttr:9"));
    assert_eq!(grid.controls[3].field_name.as_deref(), Some("occAttr:8"));
    assert_eq!(
        grid.controls[3].validation.as_ref().and_then(|v| v.min.clone()),
        Some(json!(1))
    );
    for flag in ["absence_column", "comments_column", "row_inclusion_mode", "species_list_mode"] {
        assert!(grid.option(flag).is_none(), "{flag} should be dropped");
    }
    assert_eq!(sections[0].components.names().collect::<Vec<_>>(), vec!["first", "second"]);
}

#[test]
fn lookup_terms_omit_empty_parents() {
    let warehouse = terms_warehouse();
    let schema = assemble_form_schema(
        &page("list_form"),
        &settings(),
        &warehouse,
        &SchemaRequest::layout(),
    )
    .expect("schema");
    let encoded = serde_json::to_value(&schema).expect("encode");
    let life_stage = &encoded["form_sections"][1]["components"]["content"][0]["controls"][2];
    assert_eq!(life_stage["termlist_id"], 42);
    assert_eq!(life_stage["control_type"], "select");
    let terms = life_stage["terms"].as_array().expect("terms");
    assert_eq!(terms.len(), 3);
    assert!(terms[0].get("parent_id").is_none());
    assert!(terms[1].get("parent_id").is_none());
    assert!(terms[1].get("preferred_image_path").is_none());
    assert_eq!(terms[2]["parent_id"], 502);
    assert_eq!(terms[2]["preferred_image_path"], "tadpole.png");
    assert_eq!(
        warehouse.count(Method::Get, lookups::TERMS_RESOURCE),
        1,
        "terms are read once for the one lookup control"
    );
}

#[test]
fn multiplace_grid_is_nested_in_sub_samples() {
    let warehouse = RecordedWarehouse::new(vec![RecordedExchange::new(
        Method::Get,
        lookups::SCRATCHPAD_TAXA_REPORT,
        200,
        json!([
            { "taxa_taxon_list_id": 11, "taxon": "Pieris rapae" },
            { "taxa_taxon_list_id": 12, "taxon": "Pieris napi" }
        ]),
    )
    .with_query("scratchpad_list_id", 6)]);
    let request = SchemaRequest {
        taxon_attributes: Some("4,5".into()),
        ..SchemaRequest::default()
    };
    let schema = assemble_form_schema(&page("multiplace_form"), &settings(), &warehouse, &request)
        .expect("schema");
    assert_eq!(schema.subtype.as_deref(), Some("optional_spatial_ref_per_occurrence"));
    assert_eq!(schema.form_type, "multiplace_species_form");

    let controls = schema.controls.expect("controls");
    assert_eq!(controls[1].default_value, Some(json!("node/40")));
    assert_eq!(controls[3].label.as_deref(), Some("Weather"));
    let sub_samples = &controls[4];
    assert_eq!(sub_samples.type_tag(), "sub_samples");
    assert_eq!(sub_samples.controls.len(), 3);

    let habitat = &sub_samples.controls[0];
    assert_eq!(habitat.field_name.as_deref(), Some("smpAttr:31"));
    let method = &sub_samples.controls[1];
    assert_eq!(method.field_name.as_deref(), Some("sample:sample_method_id"));
    assert_eq!(method.default_value, Some(json!(21)));
    assert_eq!(method.options["spatial_system"], json!("OSGB"));

    let grid = &sub_samples.controls[2];
    assert_eq!(grid.type_tag(), "species_list");
    assert!(grid.option("spatial_system").is_none());
    assert_eq!(grid.options["allow_additional_species"], json!(true));
    assert_eq!(grid.options["preload_taxa"].as_array().map(Vec::len), Some(2));
    assert_eq!(kinds(&grid.controls), vec!["species", "spatial_ref"]);
    assert_eq!(grid.controls[0].options["taxon_list_id"], json!(101));

    let report = &warehouse.requests()[0];
    assert_eq!(report.query_value("taxattrs"), Some("4,5"));
    assert_eq!(report.query_value("preferred"), Some("t"));
}

#[test]
fn malformed_taxon_attribute_filter_is_ignored() {
    let warehouse = RecordedWarehouse::default();
    let request = SchemaRequest {
        taxon_attributes: Some("4;drop table".into()),
        ..SchemaRequest::default()
    };
    assemble_form_schema(&page("multiplace_form"), &settings(), &warehouse, &request)
        .expect("schema");
    assert_eq!(warehouse.requests()[0].query_value("taxattrs"), Some(""));
}

#[test]
fn unknown_form_type_is_an_error() {
    let mut page = page("single_form");
    page.form_type = "grid".into();
    let err = assemble_form_schema(
        &page,
        &settings(),
        &RecordedWarehouse::default(),
        &SchemaRequest::default(),
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "unrecognised form type grid");
}

#[test]
fn unpublished_page_previews_with_placeholder_ids() {
    let mut page = page("single_form");
    page.published = false;
    if let Some(block) = page.sections[0].components.get_mut(0) {
        block.binding = None;
    }
    let schema = assemble_form_schema(
        &page,
        &settings(),
        &RecordedWarehouse::default(),
        &SchemaRequest::default(),
    )
    .expect("schema");
    let encoded = serde_json::to_value(&schema).expect("encode");
    assert_eq!(encoded["is_published"], Value::Bool(false));
    assert_eq!(encoded["controls"][3]["field_name"], "occAttr:0");
    assert_eq!(encoded["controls"][3]["attribute_id"], 0);
}
