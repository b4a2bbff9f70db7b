//! Built-in HTML pages.
//!
//! The server renders two pages itself: the auto-submitting form used by
//! the `form_post` response mode, and a minimal error page for authorization
//! errors that cannot be sent back to the client. Hosts that want their own
//! markup turn these off through `use_default_form` and
//! `application_can_display_errors`.

use crate::error::ErrorResponse;
use crate::message::OpenIdConnectMessage;

const STYLES: &str = r#"
body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    background: #f4f5f7;
    color: #1c1f2a;
    display: flex;
    justify-content: center;
    align-items: center;
    min-height: 100vh;
    margin: 0;
}

.card {
    background: #fff;
    border-radius: 8px;
    box-shadow: 0 2px 8px rgba(0, 0, 0, 0.08);
    padding: 2rem;
    max-width: 420px;
    text-align: center;
}

.error-title { font-size: 1.25rem; font-weight: 600; margin-bottom: 0.75rem; }
.error-description { color: #4a4f5c; margin-bottom: 1rem; }
.error-code { font-family: monospace; color: #8a8f9c; font-size: 0.875rem; }
"#;

fn html_page(title: &str, body_attrs: &str, content: &str) -> String {
    let mut html = String::with_capacity(content.len() + 1024);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str("    <title>");
    html.push_str(&html_escape(title));
    html.push_str("</title>\n    <style>");
    html.push_str(STYLES);
    html.push_str("</style>\n</head>\n<body");
    html.push_str(body_attrs);
    html.push_str(">\n");
    html.push_str(content);
    html.push_str("\n</body>\n</html>");
    html
}

/// Renders a form that posts `parameters` to `redirect_uri` on load.
///
/// A submit button is kept for user-agents with scripting disabled.
#[must_use]
pub fn render_form_post(redirect_uri: &str, parameters: &OpenIdConnectMessage) -> String {
    let mut content = String::with_capacity(512);
    content.push_str("<form method=\"post\" action=\"");
    content.push_str(&html_escape(redirect_uri));
    content.push_str("\">\n");
    for (name, value) in parameters.iter() {
        content.push_str("    <input type=\"hidden\" name=\"");
        content.push_str(&html_escape(name));
        content.push_str("\" value=\"");
        content.push_str(&html_escape(value));
        content.push_str("\" />\n");
    }
    content.push_str("    <noscript><button type=\"submit\">Continue</button></noscript>\n");
    content.push_str("</form>");

    html_page(
        "Submit this form",
        " onload=\"javascript:document.forms[0].submit()\"",
        &content,
    )
}

/// Renders the default authorization error page.
#[must_use]
pub fn render_error_page(error: &ErrorResponse) -> String {
    let mut content = String::with_capacity(512);
    content.push_str("<div class=\"card\">\n");
    content.push_str("<div class=\"error-title\">Authorization Error</div>\n");
    if let Some(ref description) = error.error_description {
        content.push_str("<div class=\"error-description\">");
        content.push_str(&html_escape(description));
        content.push_str("</div>\n");
    }
    content.push_str("<div class=\"error-code\">");
    content.push_str(&html_escape(&error.error));
    content.push_str("</div>\n");
    if let Some(ref uri) = error.error_uri {
        content.push_str("<a href=\"");
        content.push_str(&html_escape(uri));
        content.push_str("\">More information</a>\n");
    }
    content.push_str("</div>");

    html_page("Error", "", &content)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_form_post() {
        let parameters: OpenIdConnectMessage =
            [("code", "c1"), ("state", "a\"b")].into_iter().collect();
        let html = render_form_post("https://client.example/cb", &parameters);

        assert!(html.contains("action=\"https://client.example/cb\""));
        assert!(html.contains("name=\"code\" value=\"c1\""));
        assert!(html.contains("value=\"a&quot;b\""));
        assert!(html.contains("document.forms[0].submit()"));
    }

    #[test]
    fn test_render_error_page() {
        let html = render_error_page(
            &ErrorResponse::new("invalid_request").with_description("Missing <client_id>"),
        );
        assert!(html.contains("invalid_request"));
        assert!(html.contains("Missing &lt;client_id&gt;"));
        assert!(html.contains("Authorization Error"));
        assert!(!html.contains("More information"));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("a&b"), "a&amp;b");
        assert_eq!(html_escape("'x'"), "&#39;x&#39;");
    }
}
