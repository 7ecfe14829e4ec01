use std::time::Duration;

use serde_json::json;
use structured_batch::{BatchError, GenerationCall, GenerationClient, OpenAiClient, SamplingParams};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn call() -> GenerationCall {
    GenerationCall {
        system_prompt: "Return JSON only.".to_string(),
        user_prompt: "Topic: rivers".to_string(),
        sampling: SamplingParams {
            temperature: 1.2,
            top_p: 0.5,
            presence_penalty: 0.4,
            frequency_penalty: -0.3,
            max_tokens: 321,
        },
    }
}

fn client(server: &MockServer) -> OpenAiClient {
    OpenAiClient::builder("sk-test")
        .with_api_base(format!("{}/v1", server.uri()))
        .with_model("test-model")
        .with_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}
        ]
    })
}

#[tokio::test]
async fn forwards_generation_parameters_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "messages": [
                {"role": "system", "content": "Return JSON only."},
                {"role": "user", "content": "Topic: rivers"}
            ],
            "temperature": 1.2,
            "top_p": 0.5,
            "presence_penalty": 0.4,
            "frequency_penalty": -0.3,
            "max_tokens": 321
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(r#"{"q": "Nile?"}"#)))
        .expect(1)
        .mount(&server)
        .await;

    let text = client(&server).generate(&call()).await.unwrap();
    assert_eq!(text, r#"{"q": "Nile?"}"#);
}

#[tokio::test]
async fn server_error_maps_to_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "upstream exploded", "type": "server_error"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).generate(&call()).await.unwrap_err();
    assert!(matches!(
        err,
        BatchError::Service { status: 500, ref message } if message == "upstream exploded"
    ));
}

#[tokio::test]
async fn too_many_requests_maps_to_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = client(&server).generate(&call()).await.unwrap_err();
    assert!(matches!(err, BatchError::RateLimited { ref message } if message == "slow down"));
}

#[tokio::test]
async fn missing_content_is_an_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client(&server).generate(&call()).await.unwrap_err();
    assert!(matches!(err, BatchError::EmptyResponse));
}

#[tokio::test]
async fn slow_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = OpenAiClient::builder("sk-test")
        .with_api_base(format!("{}/v1", server.uri()))
        .with_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let err = client.generate(&call()).await.unwrap_err();
    assert!(matches!(err, BatchError::Http(ref e) if e.is_timeout()));
}
