//! HTML document shell.

use serde_json::Value;

/// Element id of the hydration payload script.
pub const STATE_SCRIPT_ID: &str = "__ANAPHASE_STATE__";

/// Head content for the document.
#[derive(Debug, Clone, Default)]
pub struct HeadContent {
    /// Page title.
    pub title: Option<String>,
    /// Meta tags.
    pub meta: Vec<(String, String)>,
    /// Inline style blocks.
    pub styles: Vec<String>,
}

impl HeadContent {
    /// Create head content with a title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    /// Add a meta tag.
    pub fn with_meta(mut self, name: &str, content: &str) -> Self {
        self.meta.push((name.to_string(), content.to_string()));
        self
    }

    /// Add inline CSS.
    pub fn with_style(mut self, css: impl Into<String>) -> Self {
        self.styles.push(css.into());
        self
    }

    /// Render head content to HTML.
    pub fn render(&self) -> String {
        let mut html = String::new();

        if let Some(title) = &self.title {
            html.push_str(&format!("<title>{}</title>\n", escape_html(title)));
        }

        for (name, content) in &self.meta {
            html.push_str(&format!(
                r#"<meta name="{}" content="{}">"#,
                escape_html(name),
                escape_html(content)
            ));
            html.push('\n');
        }

        for css in &self.styles {
            html.push_str(&format!("<style>{css}</style>\n"));
        }

        html
    }
}

/// A complete server-rendered document.
#[derive(Debug, Clone)]
pub struct Document {
    /// Head content.
    pub head: HeadContent,
    /// Rendered body markup.
    pub body: String,
    /// Hydration payload, serialized into a JSON script tag.
    pub state: Option<Value>,
}

impl Document {
    /// Create a document.
    pub fn new(head: HeadContent, body: impl Into<String>) -> Self {
        Self {
            head,
            body: body.into(),
            state: None,
        }
    }

    /// Attach the hydration payload.
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Render the document.
    pub fn render(&self) -> String {
        let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n");
        html.push_str("<meta charset=\"utf-8\">\n");
        html.push_str(&self.head.render());
        html.push_str("</head>\n<body>\n<div id=\"__anaphase\">");
        html.push_str(&self.body);
        html.push_str("</div>\n");

        if let Some(state) = &self.state {
            html.push_str(&format!(
                "<script id=\"{STATE_SCRIPT_ID}\" type=\"application/json\">{}</script>\n",
                script_safe_json(state)
            ));
        }

        html.push_str("</body>\n</html>");
        html
    }
}

/// Text safe inside element bodies and quoted attribute values.
pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// JSON that cannot close the surrounding script element.
fn script_safe_json(value: &Value) -> String {
    value
        .to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_head_render() {
        let head = HeadContent::new("Shop <1>")
            .with_meta("viewport", "width=device-width")
            .with_style("body { margin: 0; }");

        let html = head.render();
        assert!(html.contains("<title>Shop &lt;1&gt;</title>"));
        assert!(html.contains(r#"<meta name="viewport" content="width=device-width">"#));
        assert!(html.contains("<style>body { margin: 0; }</style>"));
    }

    #[test]
    fn test_document_render() {
        let html = Document::new(HeadContent::new("Home"), "<main>hi</main>").render();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<div id=\"__anaphase\"><main>hi</main></div>"));
        assert!(!html.contains(STATE_SCRIPT_ID));
        assert!(html.ends_with("</html>"));
    }

    #[test]
    fn test_state_script_is_escaped() {
        let doc = Document::new(HeadContent::default(), "")
            .with_state(json!({"note": "</script><script>alert(1)</script>"}));
        let html = doc.render();

        assert!(html.contains(STATE_SCRIPT_ID));
        assert!(!html.contains("</script><script>alert"));

        let start = html.find("application/json\">").unwrap() + "application/json\">".len();
        let end = html[start..].find("</script>").unwrap() + start;
        let parsed: Value = serde_json::from_str(&html[start..end]).unwrap();
        assert_eq!(parsed["note"], "</script><script>alert(1)</script>");
    }
}
