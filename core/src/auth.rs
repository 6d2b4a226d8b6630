use base64::Engine;

/// `Authorization` header value for HTTP Basic auth.
/// Format: `Basic ` + base64(`username:password`).
pub fn basic_authorization(username: &str, password: &str) -> String {
    let raw = format!("{username}:{password}");
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
    )
}
