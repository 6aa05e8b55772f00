//! Pagination and retry behaviour of the query executor.

use std::time::Duration;

use fhir_graph::query::{ExecutorOptions, QueryExecutor};
use fhir_graph::store::ResourceStore;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_options() -> ExecutorOptions {
    ExecutorOptions {
        request_timeout: Duration::from_millis(150),
        connect_timeout: Duration::from_millis(150),
        max_attempts: 3,
        retry_delay: Duration::from_millis(10),
        max_pages: 50,
    }
}

fn page(ids: &[&str], next: Option<String>) -> Value {
    let links: Vec<Value> = next
        .into_iter()
        .map(|url| json!({"relation": "next", "url": url}))
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "link": links,
        "entry": ids
            .iter()
            .map(|id| json!({"resource": {"resourceType": "Observation", "id": id}}))
            .collect::<Vec<_>>(),
    })
}

#[tokio::test]
async fn follows_next_links_across_three_pages() {
    let server = MockServer::start().await;
    let base = server.uri();
    for (route, ids, next) in [
        ("/Observation", vec!["o1", "o2"], Some(format!("{base}/page/2"))),
        ("/page/2", vec!["o3", "o4"], Some(format!("{base}/page/3"))),
        ("/page/3", vec!["o5"], None),
    ] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(&ids, next)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let store = ResourceStore::in_memory().unwrap();
    let executor = QueryExecutor::new(&store, fast_options()).unwrap();
    let got = executor
        .execute(&format!("{base}/Observation?code=1234"))
        .await
        .unwrap();

    let ids: Vec<&str> = got.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["o1", "o2", "o3", "o4", "o5"]);
    assert_eq!(store.counts_by_type().unwrap()["Observation"], 5);
    let m = executor.metrics().snapshot();
    assert_eq!(m.queries_issued, 1);
    assert_eq!(m.pages_fetched, 3);
}

#[tokio::test]
async fn always_timing_out_gives_up_after_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Observation"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&["o1"], None))
                .set_delay(Duration::from_millis(600)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let store = ResourceStore::in_memory().unwrap();
    let executor = QueryExecutor::new(&store, fast_options()).unwrap();
    let got = executor
        .execute(&format!("{}/Observation", server.uri()))
        .await
        .unwrap();

    assert!(got.is_empty());
    assert_eq!(store.count().unwrap(), 0);
    let m = executor.metrics().snapshot();
    assert_eq!(m.timeout_retries, 2);
    assert_eq!(m.queries_gave_up, 1);
}

#[tokio::test]
async fn timeout_then_success_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Observation"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&["slow"], None))
                .set_delay(Duration::from_millis(600)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Observation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["o1"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let store = ResourceStore::in_memory().unwrap();
    let executor = QueryExecutor::new(&store, fast_options()).unwrap();
    let got = executor
        .execute(&format!("{}/Observation", server.uri()))
        .await
        .unwrap();

    assert_eq!(got.len(), 1);
    assert_eq!(got[0].id(), "o1");
    let m = executor.metrics().snapshot();
    assert_eq!(m.timeout_retries, 1);
    assert_eq!(m.queries_gave_up, 0);
}

#[tokio::test]
async fn give_up_on_a_later_page_keeps_earlier_pages() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/Observation"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(page(&["o1"], Some(format!("{base}/page/2")))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page/2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&["o2"], None))
                .set_delay(Duration::from_millis(600)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let store = ResourceStore::in_memory().unwrap();
    let executor = QueryExecutor::new(&store, fast_options()).unwrap();
    let got = executor
        .execute(&format!("{base}/Observation"))
        .await
        .unwrap();

    assert_eq!(got.len(), 1);
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(executor.metrics().snapshot().queries_gave_up, 1);
}
