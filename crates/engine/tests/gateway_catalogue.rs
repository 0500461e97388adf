mod common;

use common::{FIXTURE, MockTransport, Step, gateway};
use eogate_engine::ErrorKind;
use eogate_engine::config::{CatalogSnapshot, load_config_from_str};
use eogate_types::QueryableType;
use serde_json::json;

#[tokio::test]
async fn product_queryable_replaces_provider_default() {
    let transport = MockTransport::new();
    transport.script("gamma", vec![Step::Json(json!({}))]);
    let gateway = gateway(&transport);

    let queryables = gateway.list_queryables(Some("gamma"), "S2_MSI_L2A").await.unwrap();
    let cloud = &queryables["cloudCover"];
    assert!(cloud.required);
    assert_eq!(cloud.default, None);
    assert_eq!(cloud.description, None);
    assert_eq!(cloud.source_provider.as_deref(), Some("gamma"));
}

#[tokio::test]
async fn provider_default_applies_without_override() {
    let transport = MockTransport::new();
    transport.script("gamma", vec![Step::Json(json!({}))]);
    let gateway = gateway(&transport);

    let queryables = gateway.list_queryables(Some("gamma"), "S2_MSI_L1C").await.unwrap();
    let cloud = &queryables["cloudCover"];
    assert!(!cloud.required);
    assert_eq!(cloud.default, Some(json!(100)));
    assert!(queryables["productType"].required);
}

#[tokio::test]
async fn constraints_narrow_and_are_cached() {
    let transport = MockTransport::new();
    transport.script(
        "gamma",
        vec![Step::Json(json!({"platform": ["S2A", "S2B"], "orbitDirection": ["ascending"]}))],
    );
    let gateway = gateway(&transport);

    for _ in 0..2 {
        let queryables = gateway.list_queryables(Some("gamma"), "S2_MSI_L2A").await.unwrap();
        assert_eq!(queryables["platform"].allowed_values, Some(vec![json!("S2A"), json!("S2B")]));
        assert!(!queryables.contains_key("orbitDirection"));
    }
    let calls = transport.calls_to("gamma");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, "https://gamma.example/constraints/sentinel-2-l2a");
}

#[tokio::test]
async fn failed_constraints_fetch_does_not_narrow() {
    let transport = MockTransport::new();
    let gateway = gateway(&transport);

    let queryables = gateway.list_queryables(Some("gamma"), "S2_MSI_L2A").await.unwrap();
    assert_eq!(queryables["platform"].allowed_values, None);
}

#[tokio::test]
async fn merged_queryables_prefer_higher_priority() {
    let transport = MockTransport::new();
    let gateway = gateway(&transport);

    let queryables = gateway.list_queryables(None, "S2_MSI_L1C").await.unwrap();
    let cloud = &queryables["cloudCover"];
    assert_eq!(cloud.source_provider.as_deref(), Some("alpha"));
    assert_eq!(cloud.value_type, QueryableType::String);
    assert_eq!(queryables["platform"].source_provider.as_deref(), Some("gamma"));
    assert_eq!(queryables["geometry"].value_type, QueryableType::Geometry);
}

#[test]
fn priority_changes_publish_a_new_snapshot() {
    let transport = MockTransport::new();
    let gateway = gateway(&transport);
    assert_eq!(gateway.available_providers(None), vec!["alpha", "beta", "gamma"]);
    let before = gateway.snapshot();

    gateway.set_priority("gamma", 10).unwrap();
    assert_eq!(gateway.available_providers(None), vec!["gamma", "alpha", "beta"]);
    assert_eq!(gateway.snapshot().version, before.version + 1);
    assert_eq!(before.provider("gamma").unwrap().priority, 0);

    let error = gateway.set_priority("delta", 1).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::UnknownProvider);
}

#[test]
fn invalid_document_is_rejected() {
    let transport = MockTransport::new();
    let gateway = gateway(&transport);
    let mut document = load_config_from_str(FIXTURE).unwrap();
    document.providers[1].name = "alpha".to_string();

    let error = gateway.update_providers_config(document).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert_eq!(gateway.snapshot().version, 1);
}

#[test]
fn product_types_list_aliases_and_providers() {
    let transport = MockTransport::new();
    let gateway = gateway(&transport);

    let product_types = gateway.list_product_types(None).unwrap();
    let names: Vec<&str> = product_types.iter().map(|summary| summary.name.as_str()).collect();
    assert_eq!(names, vec!["S2_MSI_L1C", "S1_SAR_GRD", "S2_MSI_L2A"]);
    assert_eq!(product_types[0].aliases, vec!["S2_L1C"]);
    assert_eq!(product_types[0].providers, vec!["alpha", "beta", "gamma"]);

    assert_eq!(gateway.available_providers(Some("S2_MSI_L2A")), vec!["gamma"]);
    let error = gateway.list_product_types(Some("delta")).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::UnknownProvider);
}

#[test]
fn sample_providers_file_compiles() {
    let document = load_config_from_str(include_str!("../../../demos/providers.yaml")).unwrap();
    let snapshot = CatalogSnapshot::compile(document, 1);
    assert!(snapshot.excluded.is_empty(), "{:?}", snapshot.excluded);
    assert_eq!(snapshot.providers.len(), 2);
    assert!(snapshot.provider("earth_search").unwrap().offers("S2_L2A"));
}
