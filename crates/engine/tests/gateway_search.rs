mod common;

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use common::{MockTransport, Step, features, gateway};
use eogate_engine::config::load_config_from_str;
use eogate_engine::{ConfiguredAuth, ErrorKind, Gateway, GatewayError, SearchMode, SearchRequest, TransportError};
use eogate_types::{BoundingBox, Geometry, ProviderQuery};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn sentinel2_request() -> SearchRequest {
    SearchRequest::new("S2_MSI_L1C")
        .with_geometry(Geometry::BoundingBox(BoundingBox::new(1.0, 43.0, 2.0, 44.0).unwrap()))
        .with_time_range(
            Some(Utc.with_ymd_and_hms(2021, 1, 1, 10, 20, 30).unwrap()),
            Some(Utc.with_ymd_and_hms(2021, 1, 15, 23, 59, 59).unwrap()),
        )
}

fn echo_alpha(query: &ProviderQuery) -> Value {
    let bounds: Vec<f64> = query
        .param("box")
        .unwrap()
        .split(',')
        .map(|value| value.parse().unwrap())
        .collect();
    let (west, south, east, north) = (bounds[0], bounds[1], bounds[2], bounds[3]);
    json!({
        "features": [{
            "id": "S2A_ECHO",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[west, south], [east, south], [east, north], [west, north], [west, south]]]
            },
            "properties": {
                "productType": query.param("productType"),
                "startDate": query.param("startDate"),
                "completionDate": query.param("completionDate"),
            }
        }]
    })
}

#[tokio::test]
async fn built_values_come_back_through_extraction() {
    let transport = MockTransport::new();
    transport.script("alpha", vec![Step::Echo(echo_alpha)]);
    let gateway = gateway(&transport);

    let results = gateway
        .search(&sentinel2_request(), SearchMode::OnePage)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let product = &results.products[0];
    assert_eq!(product.id.as_deref(), Some("S2A_ECHO"));
    assert_eq!(product.provider, "alpha");
    assert_eq!(product.product_type, "S2_MSI_L1C");
    // Dates are sent with day precision.
    assert_eq!(product.start, Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()));
    assert_eq!(product.end, Some(Utc.with_ymd_and_hms(2021, 1, 15, 0, 0, 0).unwrap()));
    assert_eq!(product.geometry.as_ref().unwrap().bounds().as_array(), [1.0, 43.0, 2.0, 44.0]);

    let sent = transport.calls_to("alpha");
    assert_eq!(sent[0].param("productType"), Some("S2MSI1C"));
    assert_eq!(sent[0].param("maxRecords"), Some("2"));
    assert_eq!(sent[0].param("page"), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn timed_out_provider_falls_back_and_pages_are_followed() {
    let transport = MockTransport::new();
    transport.script("alpha", vec![Step::Hang]);
    transport.script(
        "beta",
        vec![Step::Json(features(&["b1", "b2"])), Step::Json(features(&["b3"]))],
    );
    let gateway = gateway(&transport);

    let results = gateway
        .search(&sentinel2_request(), SearchMode::AllPages)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    let ids: Vec<_> = results.iter().filter_map(|product| product.id.clone()).collect();
    assert_eq!(ids, vec!["b1", "b2", "b3"]);
    let context = &results.context;
    assert_eq!(context.candidates, vec!["alpha", "beta", "gamma"]);
    assert_eq!(context.current_index, 1);
    assert_eq!(context.provider(), Some("beta"));
    assert_eq!(context.errors.len(), 1);
    assert_eq!(context.errors[0].provider, "alpha");
    assert_eq!(context.errors[0].error.kind(), ErrorKind::Transport);
    assert_eq!(context.pages_fetched, 2);
    assert!(context.terminal);

    let beta = transport.calls_to("beta");
    assert_eq!(beta.len(), 2);
    assert_eq!(beta[1].param("page"), Some("2"));
    assert!(transport.calls_to("gamma").is_empty());
}

#[tokio::test]
async fn short_page_ends_the_walk() {
    let transport = MockTransport::new();
    transport.script("beta", vec![Step::Json(features(&["b1"]))]);
    let gateway = gateway(&transport);

    let results = gateway
        .search(&sentinel2_request().with_provider("beta"), SearchMode::AllPages)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(transport.calls_to("beta").len(), 1);
}

#[tokio::test]
async fn missing_required_field_sends_nothing() {
    let transport = MockTransport::new();
    let gateway = gateway(&transport);

    let error = gateway
        .search(&SearchRequest::new("S1_SAR_GRD"), SearchMode::OnePage)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::IncompleteQuery);
    assert!(matches!(&error, GatewayError::IncompleteQuery { missing, .. } if missing == &vec!["polarization".to_string()]));
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_fallback_reports_every_provider_in_order() {
    let transport = MockTransport::new();
    transport.script("alpha", vec![Step::Hang]);
    transport.script("beta", vec![Step::Fail(TransportError::http_status(503, "maintenance"))]);
    transport.script("gamma", vec![Step::Body("<html>gateway error</html>")]);
    let gateway = gateway(&transport);

    let error = gateway
        .search(&sentinel2_request(), SearchMode::OnePage)
        .await
        .unwrap_err();
    let GatewayError::FallbackExhausted { product_type, attempts } = error else {
        panic!("expected FallbackExhausted");
    };
    assert_eq!(product_type, "S2_MSI_L1C");
    let summary: Vec<(&str, ErrorKind)> = attempts
        .iter()
        .map(|failure| (failure.provider.as_str(), failure.error.kind()))
        .collect();
    assert_eq!(summary, vec![
        ("alpha", ErrorKind::Transport),
        ("beta", ErrorKind::Transport),
        ("gamma", ErrorKind::Extraction),
    ]);
}

#[tokio::test]
async fn unauthorized_provider_is_skipped() {
    let transport = MockTransport::new();
    transport.script("alpha", vec![Step::Fail(TransportError::http_status(401, "Unauthorized"))]);
    transport.script("beta", vec![Step::Json(features(&["b1"]))]);
    let gateway = gateway(&transport);

    let results = gateway.search(&sentinel2_request(), SearchMode::OnePage).await.unwrap();
    assert_eq!(results.context.errors[0].error.kind(), ErrorKind::Auth);
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn empty_result_is_not_an_error() {
    let transport = MockTransport::new();
    transport.script("alpha", vec![Step::Json(json!({"features": []}))]);
    let gateway = gateway(&transport);

    let results = gateway.search(&sentinel2_request(), SearchMode::AllPages).await.unwrap();
    assert!(results.is_empty());
    assert!(results.context.errors.is_empty());
    assert_eq!(results.context.provider(), Some("alpha"));
    assert!(results.next_cursor.is_none());
}

#[tokio::test]
async fn alias_resolves_to_the_declared_product_type() {
    let transport = MockTransport::new();
    transport.script("beta", vec![Step::Json(features(&["b1"]))]);
    let gateway = gateway(&transport);

    let results = gateway
        .search(&SearchRequest::new("S2_L1C"), SearchMode::OnePage)
        .await
        .unwrap();
    assert_eq!(results.context.candidates, vec!["beta"]);
    assert_eq!(transport.calls_to("beta")[0].param("productType"), Some("S2MSI1C"));
}

#[tokio::test]
async fn post_json_provider_counts_from_the_first_page() {
    let transport = MockTransport::new();
    transport.script(
        "gamma",
        vec![Step::Json(json!({
            "features": [{"id": "g1", "collection": "sentinel-2-l1c"}],
            "context": {"matched": 57}
        }))],
    );
    let gateway = gateway(&transport);

    let request = sentinel2_request().with_provider("gamma").with_count(true);
    let results = gateway.search(&request, SearchMode::OnePage).await.unwrap();
    assert_eq!(results.total_count, Some(57));

    let body = transport.calls_to("gamma")[0].body.clone().unwrap();
    assert_eq!(body["collections"], json!("sentinel-2-l1c"));
    assert_eq!(body["intersects"]["type"], json!("Polygon"));
    assert_eq!(body["limit"], json!(10));
    assert_eq!(body["page"], json!(1));
}

#[tokio::test]
async fn count_only_fetches_one_item() {
    let transport = MockTransport::new();
    transport.script(
        "gamma",
        vec![Step::Json(json!({"features": [{"id": "g1"}], "context": {"matched": 1234}}))],
    );
    let gateway = gateway(&transport);

    let results = gateway
        .search(&SearchRequest::new("S2_MSI_L1C").with_provider("gamma"), SearchMode::CountOnly)
        .await
        .unwrap();
    assert_eq!(results.total_count, Some(1234));
    assert!(results.is_empty());
    assert_eq!(transport.calls_to("gamma")[0].body.as_ref().unwrap()["limit"], json!(1));
}

#[tokio::test]
async fn cancelled_search_makes_no_calls() {
    let transport = MockTransport::new();
    transport.script("alpha", vec![Step::Json(features(&["a1"]))]);
    let gateway = gateway(&transport);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = gateway
        .search_with_cancel(&sentinel2_request(), SearchMode::AllPages, cancel)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn all_providers_search_reports_each_provider() {
    let transport = MockTransport::new();
    transport.script("alpha", vec![Step::Hang]);
    transport.script("beta", vec![Step::Json(features(&["b1"]))]);
    transport.script("gamma", vec![Step::Json(json!({"features": [{"id": "g1"}, {"id": "g2"}]}))]);
    let gateway = gateway(&transport);

    let results = gateway
        .search_all_providers(&sentinel2_request(), SearchMode::OnePage, CancellationToken::new())
        .await
        .unwrap();
    let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);

    let GatewayError::FallbackExhausted { attempts, .. } = results[0].1.as_ref().unwrap_err() else {
        panic!("alpha should have failed");
    };
    assert_eq!(attempts.len(), 1);
    assert_eq!(results[1].1.as_ref().unwrap().len(), 1);
    assert_eq!(results[2].1.as_ref().unwrap().len(), 2);
}

#[tokio::test]
async fn batch_keeps_request_order() {
    let transport = MockTransport::new();
    transport.script(
        "beta",
        vec![Step::Json(features(&["b1"])), Step::Json(features(&["b2"]))],
    );
    let gateway = gateway(&transport);

    let requests = vec![
        SearchRequest::new("S2_MSI_L1C").with_provider("beta"),
        SearchRequest::new("S1_SAR_GRD").with_provider("beta"),
    ];
    let results = gateway
        .search_batch(requests, SearchMode::OnePage, CancellationToken::new())
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap().len(), 1);
    assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::IncompleteQuery);
}

#[tokio::test]
async fn alias_without_native_name_sends_the_declared_product_type() {
    let document = load_config_from_str(
        r#"
providers:
  - name: delta
    search:
      api_endpoint: https://delta.example/search
      metadata_mapping:
        productType: [productType, $.properties.productType]
        id: $.id
    products:
      S2_MSI_L1C:
        aliases: [S2_L1C]
"#,
    )
    .unwrap();
    let transport = MockTransport::new();
    transport.script("delta", vec![Step::Json(json!({"features": [{"id": "d1"}]}))]);
    let gateway = Gateway::new(document, transport.clone(), Arc::new(ConfiguredAuth));

    let results = gateway
        .search(&SearchRequest::new("S2_L1C"), SearchMode::OnePage)
        .await
        .unwrap();
    assert_eq!(transport.calls_to("delta")[0].param("productType"), Some("S2_MSI_L1C"));
    assert_eq!(results.products[0].product_type, "S2_MSI_L1C");
}

#[tokio::test]
async fn cancellation_between_pages_stops_the_walk() {
    let transport = MockTransport::new();
    let cancel = CancellationToken::new();
    let on_first_page = cancel.clone();
    transport.script(
        "beta",
        vec![
            Step::Then(Box::new(move || on_first_page.cancel()), features(&["b1", "b2"])),
            Step::Json(features(&["b3"])),
        ],
    );
    let gateway = gateway(&transport);

    let error = gateway
        .search_with_cancel(&sentinel2_request().with_provider("beta"), SearchMode::AllPages, cancel)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn panicking_provider_keeps_its_row_in_the_report() {
    let transport = MockTransport::new();
    transport.script("alpha", vec![Step::Panic]);
    transport.script("beta", vec![Step::Json(features(&["b1"]))]);
    transport.script("gamma", vec![Step::Json(json!({"features": [{"id": "g1"}]}))]);
    let gateway = gateway(&transport);

    let results = gateway
        .search_all_providers(&sentinel2_request(), SearchMode::OnePage, CancellationToken::new())
        .await
        .unwrap();
    let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    let error = results[0].1.as_ref().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_eq!(error.provider(), Some("alpha"));
    assert_eq!(results[1].1.as_ref().unwrap().len(), 1);
}
