//! HTTP collaborators against a mock server

use std::sync::Arc;

use serde_json::json;
use sous_live::services::HttpTokenProvider;
use sous_live::vision::{AnalysisClient, FrameAnalyzer};
use sous_live::{ContentKind, Error, RecipeExtractor, TokenCache, TokenProvider};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_token_is_issued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "auth_tokens/abc123",
            "expiresAt": "2099-01-01T00:00:00Z",
            "uses": 1
        })))
        .mount(&server)
        .await;

    let provider = HttpTokenProvider::new(format!("{}/api/token", server.uri()));
    let token = provider.fetch().await.unwrap();

    assert_eq!(token.expose(), "auth_tokens/abc123");
    assert_eq!(token.uses_remaining, Some(1));
    assert!(token.expires_at.is_some());
}

#[tokio::test]
async fn test_token_error_body_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "API key not configured" })),
        )
        .mount(&server)
        .await;

    let provider = HttpTokenProvider::new(server.uri());
    let err = provider.fetch().await.unwrap_err();

    assert!(matches!(err, Error::Auth(ref m) if m == "API key not configured"));
}

#[tokio::test]
async fn test_token_rejection_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let provider = HttpTokenProvider::new(server.uri());
    let err = provider.fetch().await.unwrap_err();

    assert!(matches!(err, Error::Auth(_)));
    assert!(err.to_string().contains("unauthorized"));
}

#[tokio::test]
async fn test_single_use_token_is_fetched_per_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token": "t", "uses": 1 })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let cache = TokenCache::new(Arc::new(HttpTokenProvider::new(server.uri())));
    cache.acquire().await.unwrap();
    cache.acquire().await.unwrap();
}

#[tokio::test]
async fn test_recipe_is_extracted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/extract-recipe"))
        .and(body_partial_json(json!({ "type": "url" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "recipe": {
                "title": "Shakshuka",
                "ingredients": ["6 eggs", "1 can tomatoes"],
                "instructions": ["Simmer the sauce", "Crack in the eggs"],
                "servings": "4",
                "cookTime": "25 min"
            }
        })))
        .mount(&server)
        .await;

    let extractor = RecipeExtractor::new(format!("{}/api/extract-recipe", server.uri()));
    let recipe = extractor
        .extract("https://example.com/shakshuka", ContentKind::Url)
        .await
        .unwrap();

    assert_eq!(recipe.title, "Shakshuka");
    assert_eq!(recipe.instructions.len(), 2);
    assert_eq!(recipe.cook_time.as_deref(), Some("25 min"));
    assert!(recipe.prep_time.is_none());
}

#[tokio::test]
async fn test_extraction_rate_limit_is_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({ "error": "Too many requests, try again in a minute" })),
        )
        .mount(&server)
        .await;

    let err = RecipeExtractor::new(server.uri())
        .extract("2 eggs, whisk", ContentKind::Text)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RateLimit(ref m) if m == "Too many requests, try again in a minute"));
}

#[tokio::test]
async fn test_extraction_quota_is_distinct() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(402).set_body_json(json!({ "error": "Monthly quota used up" })),
        )
        .mount(&server)
        .await;

    let err = RecipeExtractor::new(server.uri())
        .extract("2 eggs, whisk", ContentKind::Text)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::QuotaExceeded(ref m) if m == "Monthly quota used up"));
}

#[tokio::test]
async fn test_extraction_garbage_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = RecipeExtractor::new(server.uri())
        .extract("https://example.com", ContentKind::Url)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Parse(ref m) if m.contains("<html>oops</html>")));
}

#[tokio::test]
async fn test_analysis_parses_suggestion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/analyze-frame"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "description": "Onions softening in a pan",
            "timerSuggestion": { "label": "Onions", "durationSeconds": 300, "reason": "sweat them" }
        })))
        .mount(&server)
        .await;

    let client = AnalysisClient::new(format!("{}/api/analyze-frame", server.uri()));
    let analysis = client.analyze(vec![0xFF, 0xD8, 0xFF], None).await.unwrap();

    assert_eq!(analysis.description, "Onions softening in a pan");
    assert_eq!(analysis.timer_suggestion.unwrap().label, "Onions");
    assert!(!analysis.degraded);
}

#[tokio::test]
async fn test_analysis_string_duration_keeps_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "description": "Water is at a rolling boil",
            "timerSuggestion": { "label": "Pasta", "durationSeconds": "600" }
        })))
        .mount(&server)
        .await;

    let analysis = AnalysisClient::new(server.uri())
        .analyze(vec![0xFF, 0xD8, 0xFF], None)
        .await
        .unwrap();

    assert!(!analysis.degraded);
    assert_eq!(analysis.description, "Water is at a rolling boil");
    assert_eq!(analysis.timer_suggestion.unwrap().label, "Pasta");
}

#[tokio::test]
async fn test_analysis_falls_back_to_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("The pan looks hot."))
        .mount(&server)
        .await;

    let analysis = AnalysisClient::new(server.uri())
        .analyze(vec![1, 2, 3], None)
        .await
        .unwrap();

    assert!(analysis.degraded);
    assert_eq!(analysis.description, "The pan looks hot.");
    assert!(analysis.timer_suggestion.is_none());
}

#[tokio::test]
async fn test_analysis_rate_limit_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({ "error": "slow down" })))
        .mount(&server)
        .await;

    let err = AnalysisClient::new(server.uri())
        .analyze(vec![1], None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RateLimit(_)));
}
