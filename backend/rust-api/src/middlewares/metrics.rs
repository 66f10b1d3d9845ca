use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency per method, route and status.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// Collapses ids into `{id}` so label cardinality stays bounded.
/// The segment after `live-quizzes` is always an id, whatever its shape.
fn normalize_path(path: &str) -> String {
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let is_id = previous == "live-quizzes" && !segment.is_empty()
                || is_uuid_like(segment)
                || is_numeric_id(segment);
            previous = segment;
            if is_id {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/v1/live-quizzes/550e8400-e29b-41d4-a716-446655440000/start"),
            "/api/v1/live-quizzes/{id}/start"
        );
        assert_eq!(
            normalize_path("/api/v1/live-quizzes/quiz-abc/roster"),
            "/api/v1/live-quizzes/{id}/roster"
        );
        assert_eq!(normalize_path("/api/v1/live-quizzes"), "/api/v1/live-quizzes");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_is_uuid_like() {
        assert!(is_uuid_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid_like("not-a-uuid"));
    }
}
