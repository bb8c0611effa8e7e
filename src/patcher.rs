//! Location patcher.
//!
//! Rewrites HTML so a proxied app observes a root-relative URL instead of
//! the `/ar-proxy/{id}` prefix it was actually served under. This is a
//! deliberately minimal byte-level rewrite, not a DOM rewrite — the
//! security-critical part is the JS-string escaping, isolated in
//! [`escape_js_string`] so it gets reviewed and tested as one unit rather
//! than scattered across ad hoc interpolation sites.

/// Whether a `Content-Type` value denotes HTML that should be patched.
pub fn is_html_content(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("text/html"))
        .unwrap_or(false)
}

/// Escape a string for safe interpolation inside a single-quoted JS string
/// literal embedded in an inline `<script>` tag. Handles backslashes, both
/// quote kinds, CR, LF, and `<`/`>` to defeat `</script>` breakout.
pub fn escape_js_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '<' => out.push_str("\\u003C"),
            '>' => out.push_str("\\u003E"),
            other => out.push(other),
        }
    }
    out
}

/// Inject a safe inline script so a proxied app, on load, rewrites the
/// browser URL to a root-relative pathname and exposes a debug context
/// object.
///
/// Injection point preference: immediately after `<head …>`, else after
/// `<html …>`, else prepended to the document.
pub fn inject_location_patch(html: &str, identifier: &str, gateway_host: &str) -> String {
    let script = build_patch_script(identifier, gateway_host);

    if let Some(pos) = find_tag_end(html, "<head") {
        let mut out = String::with_capacity(html.len() + script.len());
        out.push_str(&html[..pos]);
        out.push_str(&script);
        out.push_str(&html[pos..]);
        return out;
    }

    if let Some(pos) = find_tag_end(html, "<html") {
        let mut out = String::with_capacity(html.len() + script.len());
        out.push_str(&html[..pos]);
        out.push_str(&script);
        out.push_str(&html[pos..]);
        return out;
    }

    format!("{script}{html}")
}

/// Find the byte offset right after the `>` that closes a `<tag ...>` open
/// tag (case-insensitive, tolerant of attributes before `>`).
fn find_tag_end(html: &str, tag_prefix: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find(&tag_prefix.to_ascii_lowercase())?;
    let close = lower[start..].find('>')?;
    Some(start + close + 1)
}

fn build_patch_script(identifier: &str, gateway_host: &str) -> String {
    let identifier_escaped = escape_js_string(identifier);
    let gateway_host_escaped = escape_js_string(gateway_host);

    format!(
        r#"<script>(function(){{
  var __arProxy = {{
    identifier: '{identifier_escaped}',
    gatewayHost: '{gateway_host_escaped}',
    simulatedOrigin: 'https://' + '{gateway_host_escaped}'
  }};
  var prefix = '/ar-proxy/' + __arProxy.identifier;
  var pathname = window.location.pathname;
  var intended = pathname.indexOf(prefix) === 0 ? pathname.slice(prefix.length) : '/';
  if (intended === '') {{ intended = '/'; }}
  window.history.replaceState(window.history.state, '', intended + window.location.search + window.location.hash);
  window.__AR_PROXY_DEBUG__ = __arProxy;
}})();</script>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_html_content_matches_with_charset() {
        assert!(is_html_content("text/html; charset=utf-8"));
        assert!(is_html_content("TEXT/HTML"));
        assert!(!is_html_content("application/javascript"));
    }

    #[test]
    fn escape_js_string_handles_all_special_chars() {
        let input = "a\\b'c\"d\re\nf<g>h";
        let escaped = escape_js_string(input);
        assert_eq!(escaped, "a\\\\b\\'c\\\"d\\re\\nf\\u003Cg\\u003Eh");
    }

    #[test]
    fn escape_js_string_defeats_script_breakout() {
        let malicious = "</script><script>alert(1)</script>";
        let escaped = escape_js_string(malicious);
        assert!(!escaped.contains("</script>"));
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
    }

    #[test]
    fn injects_after_head_tag_when_present() {
        let html = "<html><head><title>t</title></head><body></body></html>";
        let patched = inject_location_patch(html, "app.example", "gateway.example");
        let head_pos = patched.find("<head>").unwrap();
        let script_pos = patched.find("<script>").unwrap();
        assert!(script_pos > head_pos);
        assert!(patched.contains("app.example"));
    }

    #[test]
    fn injects_after_html_tag_when_no_head() {
        let html = "<html><body></body></html>";
        let patched = inject_location_patch(html, "app.example", "gateway.example");
        let html_pos = patched.find("<html>").unwrap();
        let script_pos = patched.find("<script>").unwrap();
        assert!(script_pos > html_pos);
    }

    #[test]
    fn prepends_when_no_head_or_html_tag() {
        let html = "<body>just a fragment</body>";
        let patched = inject_location_patch(html, "app.example", "gateway.example");
        assert!(patched.starts_with("<script>"));
    }

    #[test]
    fn identifier_is_never_interpreted_as_code() {
        let malicious_id = "x'; alert(document.cookie); var y='";
        let patched = inject_location_patch("<html></html>", malicious_id, "gateway.example");
        // Every single quote in the payload must survive only as `\'`, so no
        // bare `'` remains that could terminate the literal early.
        let marker = "identifier: '";
        let start = patched.find(marker).unwrap() + marker.len();
        let literal = &patched[start..patched[start..].find("',").unwrap() + start];
        assert_eq!(literal.matches('\'').count(), literal.matches("\\'").count());
    }
}
