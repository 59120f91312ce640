//! HTTP-level provider tests against a mock backend.

use prompt_studio::{GenerationParams, LmProvider, OpenAiProvider, Pricing, StudioError};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_for(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new(
        Some("sk-test".to_string()),
        Some(server.uri()),
        "gpt-4o".to_string(),
        "cl100k_base".to_string(),
        Pricing {
            input_per_1k: 0.0025,
            output_per_1k: 0.01,
        },
    )
    .unwrap()
}

fn chat_completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [ { "message": { "role": "assistant", "content": content } } ],
        "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 },
        "model": "gpt-4o"
    })
}

#[tokio::test]
async fn successful_completion_parses_text_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({ "model": "gpt-4o" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("4")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let response = provider
        .complete("2+2=?", &GenerationParams::default())
        .await
        .unwrap();

    assert_eq!(response.text, "4");
    let usage = response.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 12);
    assert_eq!(usage.completion_tokens, 3);
}

#[tokio::test]
async fn unauthorized_maps_to_authentication_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider
        .complete("q", &GenerationParams::default())
        .await
        .unwrap_err();
    assert!(matches!(error, StudioError::AuthenticationFailed { .. }));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn rate_limit_maps_to_transient_with_server_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "17")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider
        .complete("q", &GenerationParams::default())
        .await
        .unwrap_err();
    match error {
        StudioError::RateLimited {
            retry_after_seconds,
        } => assert_eq!(retry_after_seconds, 17),
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_retryable_request_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider
        .complete("q", &GenerationParams::default())
        .await
        .unwrap_err();
    assert!(matches!(error, StudioError::RequestFailed { .. }));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn client_errors_are_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request shape"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider
        .complete("q", &GenerationParams::default())
        .await
        .unwrap_err();
    assert!(matches!(error, StudioError::Validation { .. }));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn malformed_body_is_a_parsing_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider
        .complete("q", &GenerationParams::default())
        .await
        .unwrap_err();
    assert!(matches!(error, StudioError::ResponseParsing { .. }));
}

#[tokio::test]
async fn missing_api_key_fails_construction() {
    let result = OpenAiProvider::new(
        None,
        None,
        "gpt-4o".to_string(),
        "cl100k_base".to_string(),
        Pricing::default(),
    );
    assert!(matches!(result, Err(StudioError::Configuration { .. })));
}
