use axum::{
    body::Body,
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};

/// Content types that are streamed to the client untouched.
const PASSTHROUGH_TYPES: [&str; 3] = ["application/pdf", "text/csv", "application/octet-stream"];

pub async fn wrap_response_middleware(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path().to_string();
    let res = next.run(req).await;

    let content_type = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !path.starts_with("/api") || PASSTHROUGH_TYPES.iter().any(|t| content_type.contains(t)) {
        return Ok(res);
    }

    let status = res.status();
    let is_json = content_type.contains("application/json");
    let (mut parts, body) = res.into_parts();

    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let wrapped = envelope(status, is_json, &bytes);
    let new_bytes = serde_json::to_vec(&wrapped).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    parts.headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    parts.headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(new_bytes.len()));

    Ok(Response::from_parts(parts, Body::from(new_bytes)))
}

/// Normalises a body into `{success, data}` / `{success, error}`.
pub fn envelope(status: StatusCode, is_json: bool, bytes: &[u8]) -> Value {
    let fallback = status.to_string();

    if is_json {
        let data: Value = serde_json::from_slice(bytes).unwrap_or(Value::Null);

        // Already standardised (e.g. HarvestError bodies).
        if data.as_object().map_or(false, |o| o.contains_key("success")) {
            return data;
        }

        return if status.is_success() {
            json!({ "success": true, "data": data })
        } else {
            let msg = data
                .as_str()
                .or_else(|| data.get("error").and_then(|v| v.as_str()))
                .unwrap_or(&fallback)
                .to_string();
            json!({ "success": false, "error": msg })
        };
    }

    let msg = String::from_utf8_lossy(bytes).to_string();
    if status.is_success() {
        if bytes.is_empty() {
            json!({ "success": true, "data": null })
        } else {
            json!({ "success": true, "data": msg })
        }
    } else {
        json!({
            "success": false,
            "error": if msg.is_empty() { fallback } else { msg }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_json_success() {
        let v = envelope(StatusCode::OK, true, br#"{"total": 3}"#);
        assert_eq!(v, json!({"success": true, "data": {"total": 3}}));
    }

    #[test]
    fn test_keeps_standardised_errors() {
        let body = br#"{"success": false, "error": "Farm not found"}"#;
        let v = envelope(StatusCode::NOT_FOUND, true, body);
        assert_eq!(v["error"], "Farm not found");
    }

    #[test]
    fn test_plain_text_failure() {
        let v = envelope(StatusCode::UNPROCESSABLE_ENTITY, false, b"bad payload");
        assert_eq!(v, json!({"success": false, "error": "bad payload"}));
    }

    #[test]
    fn test_empty_success() {
        let v = envelope(StatusCode::OK, false, b"");
        assert_eq!(v, json!({"success": true, "data": null}));
    }
}
