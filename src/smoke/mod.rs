//! HTTP smoke checks against the application's routes.
//!
//! Known routes must answer 200 with a body. Unknown routes must fail at
//! transport level, answer 200, or answer with an error indicator in the body.

use anyhow::{Context, Result};
use log::debug;
use std::time::Duration;
use tokio::time::Instant;

/// What a route is expected to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// 200 with a non-empty body
    Ok,
    /// 200 with a JSON object body, whatever the content type says
    JsonObject,
    /// Graceful rejection of an unknown route or bad input
    ErrorIndicator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCheck {
    pub path: String,
    pub expect: Expectation,
}

impl EndpointCheck {
    pub fn new(path: &str, expect: Expectation) -> Self {
        Self {
            path: path.to_string(),
            expect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub path: String,
    pub passed: bool,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub detail: String,
}

/// Routes of the game and the invalid inputs it must survive
pub fn default_checks() -> Vec<EndpointCheck> {
    let mut checks: Vec<EndpointCheck> = [
        "/",
        "/path-selection",
        "/game/pipeline",
        "/game/runner",
        "/game/query",
        "/game/farm",
        "/game/tower",
        "/game/behavioral",
        "/modal/story",
    ]
    .iter()
    .map(|p| EndpointCheck::new(p, Expectation::Ok))
    .collect();
    checks.insert(2, EndpointCheck::new("/career-map", Expectation::JsonObject));

    checks.extend(
        [
            "/invalid-endpoint",
            "/game/unknown",
            "/path-selection?invalidParam=123",
            "/game/pipeline?badinput=!!@@###",
        ]
        .iter()
        .map(|p| EndpointCheck::new(p, Expectation::ErrorIndicator)),
    );
    checks
}

/// True when a non-200 body explains itself
pub fn has_error_indicator(content_type: &str, body: &str) -> bool {
    if content_type.contains("json") {
        return match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => {
                map.contains_key("error") || map.contains_key("message")
            }
            _ => false,
        };
    }
    let text = body.to_lowercase();
    ["error", "not found", "invalid", "fail"]
        .iter()
        .any(|kw| text.contains(kw))
}

fn judge(check: &EndpointCheck, status: u16, content_type: &str, body: &str) -> (bool, String) {
    match check.expect {
        Expectation::Ok => {
            if status != 200 {
                (false, format!("expected 200, got {}", status))
            } else if body.is_empty() {
                (false, "empty response body".to_string())
            } else {
                (true, "ok".to_string())
            }
        }
        Expectation::JsonObject => {
            if status != 200 {
                (false, format!("expected 200, got {}", status))
            } else {
                match serde_json::from_str::<serde_json::Value>(body) {
                    Ok(serde_json::Value::Object(_)) => (true, "json object".to_string()),
                    Ok(_) => (false, "JSON body is not an object".to_string()),
                    Err(e) => (false, format!("invalid JSON: {}", e)),
                }
            }
        }
        Expectation::ErrorIndicator => {
            if status == 200 {
                (true, "accepted".to_string())
            } else if has_error_indicator(content_type, body) {
                (true, format!("rejected with {} and an error message", status))
            } else {
                (false, format!("status {} without an error message", status))
            }
        }
    }
}

/// Run one check. Transport failures only pass for `ErrorIndicator` checks.
pub async fn check_endpoint(
    client: &reqwest::Client,
    base_url: &str,
    check: &EndpointCheck,
    timeout: Duration,
) -> CheckResult {
    let url = format!("{}{}", base_url.trim_end_matches('/'), check.path);
    let started = Instant::now();
    let mut request = client.get(&url).timeout(timeout);
    if check.expect == Expectation::JsonObject {
        request = request.header(reqwest::header::ACCEPT, "application/json");
    }
    let response = request.send().await;

    let (passed, status, detail) = match response {
        Err(e) if e.is_timeout() => (false, None, format!("timed out after {:?}", timeout)),
        Err(e) => (
            check.expect == Expectation::ErrorIndicator,
            None,
            format!("request failed: {}", e),
        ),
        Ok(resp) => {
            let status = resp.status().as_u16();
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            match resp.text().await {
                Ok(body) => {
                    let (passed, detail) = judge(check, status, &content_type, &body);
                    (passed, Some(status), detail)
                }
                Err(e) => (false, Some(status), format!("failed to read body: {}", e)),
            }
        }
    };

    let elapsed = started.elapsed();
    let (passed, detail) = if passed && elapsed > timeout {
        (false, format!("response took {:?}, over {:?}", elapsed, timeout))
    } else {
        (passed, detail)
    };
    debug!("GET {} -> {:?} in {:?}: {}", url, status, elapsed, detail);

    CheckResult {
        path: check.path.clone(),
        passed,
        status,
        elapsed_ms: elapsed.as_millis() as u64,
        detail,
    }
}

/// Run `checks` in order against `base_url`
pub async fn run_checks(
    base_url: &str,
    checks: &[EndpointCheck],
    timeout: Duration,
) -> Result<Vec<CheckResult>> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .build()
        .context("Failed to build HTTP client")?;

    let mut results = Vec::with_capacity(checks.len());
    for check in checks {
        results.push(check_endpoint(&client, base_url, check, timeout).await);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_indicator_json() {
        assert!(has_error_indicator("application/json", r#"{"error":"nope"}"#));
        assert!(has_error_indicator("application/json; charset=utf-8", r#"{"message":"x"}"#));
        assert!(!has_error_indicator("application/json", r#"{"status":404}"#));
        assert!(!has_error_indicator("application/json", "<html>error</html>"));
    }

    #[test]
    fn test_error_indicator_text() {
        assert!(has_error_indicator("text/html", "<h1>404 Not Found</h1>"));
        assert!(has_error_indicator("text/plain", "Invalid parameter"));
        assert!(!has_error_indicator("text/html", "<h1>Welcome</h1>"));
    }

    #[test]
    fn test_judge_json_object() {
        let check = EndpointCheck::new("/career-map", Expectation::JsonObject);
        assert!(judge(&check, 200, "application/json", "{}").0);
        assert!(!judge(&check, 200, "application/json", "[1,2]").0);
        assert!(judge(&check, 200, "text/plain", r#"{"levels":[]}"#).0);
        assert!(!judge(&check, 200, "text/html", "<div id=root></div>").0);
        assert!(!judge(&check, 200, "application/json", "").0);
        assert!(!judge(&check, 500, "application/json", "{}").0);
    }

    #[test]
    fn test_judge_invalid_endpoint() {
        let check = EndpointCheck::new("/invalid-endpoint", Expectation::ErrorIndicator);
        assert!(judge(&check, 200, "text/html", "<div id=root></div>").0);
        assert!(judge(&check, 404, "text/plain", "Not Found").0);
        assert!(!judge(&check, 404, "text/plain", "").0);
    }

    async fn serve_fixture(career_map_json: bool) -> String {
        use axum::http::{header, HeaderMap, StatusCode};
        use axum::response::{Html, IntoResponse};
        use axum::routing::get;
        use axum::{Json, Router};

        let mut app = Router::new().route(
            "/career-map",
            get(move |headers: HeaderMap| async move {
                let wants_json = headers
                    .get(header::ACCEPT)
                    .and_then(|v| v.to_str().ok())
                    .map_or(false, |v| v.contains("application/json"));
                if career_map_json && wants_json {
                    Json(serde_json::json!({})).into_response()
                } else {
                    Html("<div id=\"root\"></div>").into_response()
                }
            }),
        );
        for path in [
            "/",
            "/path-selection",
            "/game/pipeline",
            "/game/runner",
            "/game/query",
            "/game/farm",
            "/game/tower",
            "/game/behavioral",
            "/modal/story",
        ] {
            app = app.route(path, get(|| async { "<div id=\"root\"></div>" }));
        }
        let app = app.fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_default_checks_against_fixture() {
        let base_url = serve_fixture(true).await;
        let results = run_checks(&base_url, &default_checks(), Duration::from_secs(5))
            .await
            .unwrap();

        for r in &results {
            assert!(r.passed, "{} failed: {}", r.path, r.detail);
        }
        let unknown = results.iter().find(|r| r.path == "/game/unknown").unwrap();
        assert_eq!(unknown.status, Some(404));
        assert_eq!(results[2].detail, "json object");
    }

    #[tokio::test]
    async fn test_career_map_serving_html_fails() {
        let base_url = serve_fixture(false).await;
        let checks = vec![EndpointCheck::new("/career-map", Expectation::JsonObject)];
        let results = run_checks(&base_url, &checks, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!results[0].passed);
        assert_eq!(results[0].status, Some(200));
        assert!(results[0].detail.starts_with("invalid JSON"), "{}", results[0].detail);
    }

    #[tokio::test]
    async fn test_refused_connection_only_passes_error_checks() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let checks = vec![
            EndpointCheck::new("/", Expectation::Ok),
            EndpointCheck::new("/invalid-endpoint", Expectation::ErrorIndicator),
        ];
        let results = run_checks(&base_url, &checks, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!results[0].passed);
        assert!(results[1].passed);
        assert_eq!(results[1].status, None);
    }

    #[test]
    fn test_default_checks() {
        let checks = default_checks();
        assert_eq!(checks.len(), 14);
        assert_eq!(checks[2], EndpointCheck::new("/career-map", Expectation::JsonObject));
        assert_eq!(
            checks.iter().filter(|c| c.expect == Expectation::ErrorIndicator).count(),
            4
        );
    }
}
