//! Page shown in the browser when the storefront cannot render a request.
//!
//! The page subscribes to the hot-reload channel, so the next successful
//! edit reloads it.

/// Build the HTML for a failed render of `path`.
///
/// Both `path` and `message` are escaped; they may contain markup from
/// template errors.
pub fn render_error_page(path: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Render failed</title>
  <style>
    body {{ background: #1e1e1e; color: #f0f0f0; font-family: ui-monospace, monospace; padding: 2rem; }}
    h1 {{ color: #ff6b6b; font-size: 1.25rem; }}
    pre {{ background: #2a2a2a; padding: 1rem; white-space: pre-wrap; }}
  </style>
</head>
<body>
  <h1>Failed to render {path}</h1>
  <pre>{message}</pre>
  <p>Save a file to retry.</p>
  <script src="{script}"></script>
</body>
</html>
"#,
        path = html_escape(path),
        message = html_escape(message),
        script = super::proxy::HOT_RELOAD_SCRIPT_PATH,
    )
}

/// Escape `&`, `<`, `>`, `"` and `'`.
pub fn html_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
