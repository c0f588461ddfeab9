//! Outbound clients against local stand-ins for the external services.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use ssdam::clients::guidance::has_guidance_shape;
use ssdam::clients::vision::MSG_NOTHING_RECOGNIZED;
use ssdam::clients::{
    Classification, ClientError, GuidanceClient, GuidanceOutcome, GuidanceRequest, Language,
    LocalSearchClient, OpenDataClient, OpenDataPayload, OpenDataQuery, ResponseFormat, Service,
    VisionClient,
};
use ssdam::config::{GuidanceConfig, OpenDataConfig, SearchConfig, VisionConfig};

const PREDICT_PATH: &str = "/customvision/v3.0/Prediction/proj/classify/iterations/Iteration1/image";

fn vision(base: &str) -> VisionClient {
    VisionClient::new(VisionConfig {
        endpoint: Some(format!("{}/", base)),
        prediction_key: Some("pk".into()),
        project_id: Some("proj".into()),
        iteration: "Iteration1".into(),
        timeout: Duration::from_secs(5),
    })
}

async fn predict(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    if headers.get("Prediction-Key").and_then(|v| v.to_str().ok()) != Some("pk") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"code": "Unauthorized"})));
    }
    let predictions = if body.as_ref() == b"blank" {
        json!([])
    } else {
        json!([
            {"tagName": "can", "probability": 0.12, "tagId": "1"},
            {"tagName": "pet_bottle", "probability": 0.87, "tagId": "2"},
            {"tagName": "paper", "probability": 0.01, "tagId": "3"}
        ])
    };
    (StatusCode::OK, Json(json!({"id": "x", "project": "proj", "predictions": predictions})))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vision_returns_best_prediction() {
    let base = common::spawn(Router::new().route(PREDICT_PATH, post(predict))).await;
    let client = vision(&base);

    let result = tokio::task::spawn_blocking(move || client.classify(b"jpeg bytes")).await.unwrap();
    assert_eq!(result, Classification::Tag { tag: "pet_bottle".into(), probability: 0.87 });
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vision_empty_predictions() {
    let base = common::spawn(Router::new().route(PREDICT_PATH, post(predict))).await;
    let client = vision(&base);

    let result = tokio::task::spawn_blocking(move || client.classify(b"blank")).await.unwrap();
    assert_eq!(result, Classification::error(MSG_NOTHING_RECOGNIZED));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vision_http_error_is_error_result() {
    let base = common::spawn(Router::new().route(PREDICT_PATH, post(predict))).await;
    let client = VisionClient::new(VisionConfig {
        prediction_key: Some("wrong".into()),
        ..vision_config(&base)
    });

    let result = tokio::task::spawn_blocking(move || client.classify(b"jpeg")).await.unwrap();
    match result {
        Classification::Error { error } => assert!(error.contains("401"), "{}", error),
        other => panic!("expected error, got {:?}", other),
    }
}

fn vision_config(base: &str) -> VisionConfig {
    VisionConfig {
        endpoint: Some(base.to_string()),
        prediction_key: Some("pk".into()),
        project_id: Some("proj".into()),
        iteration: "Iteration1".into(),
        timeout: Duration::from_secs(5),
    }
}

// ─── Guidance ────────────────────────────────────────────────────

fn guidance(base: &str) -> GuidanceClient {
    GuidanceClient::new(GuidanceConfig {
        endpoint: base.to_string(),
        api_key: Some("sk-test".into()),
        model: "gpt-4o-mini".into(),
        timeout: Duration::from_secs(5),
    })
}

async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["temperature"], 0.3);
    assert_eq!(body["messages"][0]["role"], "system");
    let user = body["messages"][1]["content"].as_str().unwrap_or_default().to_string();

    let content = format!(
        "```markdown\n### 분리배출 방법\n\n♻️ {}\n🧼 내용물을 **비우고** 헹굽니다.\n🏷️ 라벨을 제거합니다.\n\
         🚮 압착해 부피를 줄입니다.\n📦 지정된 수거함에 배출합니다.\n```",
        user
    );
    (StatusCode::OK, Json(json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]})))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_guidance_generated_and_normalised() {
    let base = common::spawn(Router::new().route("/chat/completions", post(completions))).await;
    let client = guidance(&base);

    let outcome = tokio::task::spawn_blocking(move || {
        client.generate(&GuidanceRequest::new("pet_bottle", Some(0.92), Language::Ko))
    })
    .await
    .unwrap();

    match &outcome {
        GuidanceOutcome::Generated(text) => {
            assert!(has_guidance_shape(text), "{}", text);
            assert!(!text.contains("```"));
            assert!(text.contains("pet_bottle"));
        }
        other => panic!("expected generated text, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_guidance_backend_error_is_localized_text() {
    let base = common::spawn(Router::new().route(
        "/chat/completions",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream down") }),
    ))
    .await;
    let client = guidance(&base);

    let outcome = tokio::task::spawn_blocking(move || {
        client.generate(&GuidanceRequest::new("can", None, Language::En))
    })
    .await
    .unwrap();

    assert!(outcome.is_failure());
    assert!(outcome.text().starts_with("❌ Failed to generate"));
    assert!(outcome.text().contains("500"));
}

// ─── Open data ───────────────────────────────────────────────────

async fn open_data(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    if params.get("serviceKey").map(String::as_str) != Some("svc") {
        return (StatusCode::FORBIDDEN, "SERVICE_KEY_IS_NOT_REGISTERED_ERROR").into_response();
    }
    if params.get("returnType").map(String::as_str) == Some("xml") {
        return "<response><body><items/></body></response>".into_response();
    }
    let item = json!({
        "kndNm": params.get("kndNm").cloned().unwrap_or_default(),
        "bzentyNm": "수거업체",
        "pageNo": params.get("pageNo").cloned().unwrap_or_default(),
    });
    Json(json!({"response": {"header": {"resultCode": "00"}, "body": {"items": {"item": item}, "totalCount": 1}}}))
        .into_response()
}

fn open_data_client(base: &str, key: Option<&str>) -> OpenDataClient {
    OpenDataClient::new(OpenDataConfig {
        service_key: key.map(Into::into),
        recycling_url: format!("{}/recycling", base),
        dropoff_url: Some(format!("{}/dropoff", base)),
        timeout: Duration::from_secs(5),
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_open_data_single_item_envelope() {
    let base = common::spawn(Router::new().route("/recycling", get(open_data))).await;
    let client = open_data_client(&base, Some("svc"));
    let query = OpenDataQuery::new(Service::RecyclingCollectors)
        .page(2)
        .filter("kndNm", "폐휴대폰")
        .unwrap();

    let payload = tokio::task::spawn_blocking(move || client.fetch(&query)).await.unwrap().unwrap();
    let items = payload.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["kndNm"], "폐휴대폰");
    assert_eq!(items[0]["pageNo"], "2");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_open_data_xml_is_text() {
    let base = common::spawn(Router::new().route("/recycling", get(open_data))).await;
    let client = open_data_client(&base, Some("svc"));
    let query = OpenDataQuery::new(Service::RecyclingCollectors).format(ResponseFormat::Xml);

    let payload = tokio::task::spawn_blocking(move || client.fetch(&query)).await.unwrap().unwrap();
    match payload {
        OpenDataPayload::Text(body) => assert!(body.starts_with("<response>")),
        other => panic!("expected text, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_open_data_non_2xx_is_status_error() {
    let base = common::spawn(Router::new().route("/recycling", get(open_data))).await;
    let client = open_data_client(&base, Some("wrong"));
    let query = OpenDataQuery::new(Service::RecyclingCollectors);

    let err = tokio::task::spawn_blocking(move || client.fetch(&query)).await.unwrap().unwrap_err();
    match err {
        ClientError::Status { code, body } => {
            assert_eq!(code, 403);
            assert!(body.contains("SERVICE_KEY"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

// ─── Local search ────────────────────────────────────────────────

async fn local_search(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let id = headers.get("X-Naver-Client-Id").and_then(|v| v.to_str().ok());
    let secret = headers.get("X-Naver-Client-Secret").and_then(|v| v.to_str().ok());
    if id != Some("cid") || secret != Some("csecret") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"errorCode": "024"})));
    }
    assert_eq!(params.get("display").map(String::as_str), Some("10"));
    assert_eq!(params.get("sort").map(String::as_str), Some("random"));
    let query = params.get("query").cloned().unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({
            "total": 2,
            "items": [
                {"title": format!("<b>{}</b> 상점", query), "category": "생활>잡화", "address": "지번 1",
                 "roadAddress": "도로 1", "link": "https://shop.example"},
                {"title": "리필샵", "category": "<b>제로웨이스트</b>", "address": "지번 2",
                 "roadAddress": "", "link": ""}
            ]
        })),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_local_search_cleans_results() {
    let base = common::spawn(Router::new().route("/v1/search/local.json", get(local_search))).await;
    let client = LocalSearchClient::new(SearchConfig {
        endpoint: format!("{}/v1/search/local.json", base),
        client_id: Some("cid".into()),
        client_secret: Some("csecret".into()),
        timeout: Duration::from_secs(5),
    });

    let shops = tokio::task::spawn_blocking(move || client.shops_in("마포구")).await.unwrap().unwrap();
    assert_eq!(shops.len(), 2);
    assert_eq!(shops[0].title, "마포구 제로웨이스트 상점");
    assert_eq!(shops[0].address, "도로 1");
    assert_eq!(shops[1].category, "제로웨이스트");
    assert_eq!(shops[1].address, "지번 2");
}
