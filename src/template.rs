use crate::config::SessionConfig;

const OPEN: &str = "<%";
const CLOSE: &str = "%>";

/// Expands placeholders in a task's resource URL against the session configuration.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, raw: &str, session: &SessionConfig) -> String;
}

/// Replaces `<%TOKEN%>` placeholders, every occurrence of each.
///
/// | token        | value                      |
/// |--------------|----------------------------|
/// | `TEST_ID`    | `session.test.id`          |
/// | `DATACENTER` | `session.server.datacenter`|
///
/// Whitespace just inside the delimiters is ignored. Unknown tokens, and an opening `<%`
/// without a closing `%>`, are left in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenTemplate;

impl TokenTemplate {
    fn value<'a>(token: &str, session: &'a SessionConfig) -> Option<&'a str> {
        match token {
            "TEST_ID" => Some(&session.test.id),
            "DATACENTER" => Some(&session.server.datacenter),
            _ => None,
        }
    }
}

impl TemplateEngine for TokenTemplate {
    fn render(&self, raw: &str, session: &SessionConfig) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(start) = rest.find(OPEN) {
            let inner = &rest[start + OPEN.len()..];
            let Some(end) = inner.find(CLOSE) else {
                break;
            };
            out.push_str(&rest[..start]);
            let token = inner[..end].trim();
            match Self::value(token, session) {
                Some(value) => out.push_str(value),
                None => {
                    tracing::warn!(token, resource = raw, "Unknown template token left unexpanded");
                    out.push_str(&rest[start..start + OPEN.len() + end + CLOSE.len()]);
                }
            }
            rest = &inner[end + CLOSE.len()..];
        }
        out.push_str(rest);
        out
    }
}
