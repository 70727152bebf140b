//! Read-through caching against a mocked origin.
//!
//! Uses the in-process cache backend so no Redis is needed.

use std::time::Duration;

use cmsgate_server::config::OriginConfig;
use cmsgate_server::{
    CacheStore, CanonicalQuery, ContentService, OriginClient, OriginError, Provenance,
};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn origin_for(server: &MockServer) -> OriginClient {
    OriginClient::new(&OriginConfig {
        url: server.uri(),
        token: Some("origin-token".into()),
        ..OriginConfig::default()
    })
    .expect("origin client")
}

fn service(server: &MockServer) -> ContentService {
    ContentService::new(CacheStore::new_memory(Duration::from_secs(60)), origin_for(server))
}

#[tokio::test]
async fn second_collection_read_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .and(header("authorization", "Bearer origin-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": 1}]})))
        .expect(1)
        .mount(&server)
        .await;

    let content = service(&server);
    let query = CanonicalQuery::default();

    let first = content.get_collection("articles", &query).await.unwrap();
    assert_eq!(first.provenance, Provenance::Miss);

    let second = content.get_collection("articles", &query).await.unwrap();
    assert_eq!(second.provenance, Provenance::Hit);
    assert_eq!(first.payload, second.payload);
}

#[tokio::test]
async fn query_order_does_not_split_cache_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .and(query_param("sort", "title"))
        .and(query_param("locale", "en"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let content = service(&server);
    let a = CanonicalQuery::parse("sort=title&locale=en");
    let b = CanonicalQuery::parse("?locale=en&sort=title");

    assert!(!content.get_collection("articles", &a).await.unwrap().is_hit());
    assert!(content.get_collection("articles", &b).await.unwrap().is_hit());
}

#[tokio::test]
async fn single_and_page_reads_are_cached_separately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": 7}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/pages"))
        .and(query_param("filters[slug][$eq]", "about-us"))
        .and(query_param("populate", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"slug": "about-us"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let content = service(&server);
    let none = CanonicalQuery::default();

    assert_eq!(
        content.get_single("articles", "7", &none).await.unwrap().provenance,
        Provenance::Miss
    );
    assert_eq!(
        content.get_single("articles", "7", &none).await.unwrap().provenance,
        Provenance::Hit
    );
    assert_eq!(
        content.get_page_by_slug("about-us").await.unwrap().provenance,
        Provenance::Miss
    );
    assert_eq!(
        content.get_page_by_slug("about-us").await.unwrap().provenance,
        Provenance::Hit
    );
}

#[tokio::test]
async fn preview_never_touches_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles/3"))
        .and(query_param("publicationState", "preview"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"draft": true}})))
        .expect(2)
        .mount(&server)
        .await;

    let content = service(&server);
    for _ in 0..2 {
        let outcome = content.get_preview("articles", "3").await.unwrap();
        assert_eq!(outcome.provenance, Provenance::Bypass);
    }
    assert_eq!(content.cache().local_len(), Some(0));
}

#[tokio::test]
async fn origin_errors_propagate_and_are_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(2)
        .mount(&server)
        .await;

    let content = service(&server);
    let query = CanonicalQuery::default();

    for _ in 0..2 {
        match content.get_collection("missing", &query).await {
            Err(OriginError::Status { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "not found");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }
    assert_eq!(content.cache().local_len(), Some(0));
}

#[tokio::test]
async fn bypass_store_always_reaches_the_origin() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(3)
        .mount(&server)
        .await;

    let content = ContentService::new(
        CacheStore::bypass(Duration::from_secs(60)),
        origin_for(&server),
    );
    let query = CanonicalQuery::default();
    for _ in 0..3 {
        let outcome = content.get_collection("articles", &query).await.unwrap();
        assert_eq!(outcome.provenance, Provenance::Miss);
    }
}

#[tokio::test]
async fn invalidation_drops_type_entries_but_keeps_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/articles/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": 1}})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/pages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let content = service(&server);
    let none = CanonicalQuery::default();

    content.get_collection("articles", &none).await.unwrap();
    content.get_single("articles", "1", &none).await.unwrap();
    content.get_page_by_slug("home").await.unwrap();

    let deleted = content.invalidate_cache("articles").await.unwrap();
    assert_eq!(deleted, 2);

    assert!(!content.get_collection("articles", &none).await.unwrap().is_hit());
    assert!(!content.get_single("articles", "1", &none).await.unwrap().is_hit());
    assert!(content.get_page_by_slug("home").await.unwrap().is_hit());

    // Nothing left to match for an unrelated type
    assert_eq!(content.invalidate_cache("authors").await.unwrap(), 0);
}

#[tokio::test]
async fn page_slug_naming_a_type_survives_invalidation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pages"))
        .and(query_param("filters[slug][$eq]", "promo:articles:spring"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": 5}]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let content = service(&server);
    content.get_page_by_slug("promo:articles:spring").await.unwrap();
    content
        .get_collection("articles", &CanonicalQuery::default())
        .await
        .unwrap();

    assert_eq!(content.invalidate_cache("articles").await.unwrap(), 1);
    assert!(
        content
            .get_page_by_slug("promo:articles:spring")
            .await
            .unwrap()
            .is_hit()
    );
}
