use core::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Marker appended to every rendered embed footer.
pub const STICKY_MARKER: &str = "📌 Sticky message";

/// What a sticky posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StickyContent {
    Text { text: String },
    Embed(EmbedSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedSpec {
    pub title: String,
    pub description: String,
    /// 24-bit RGB.
    pub color: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Platform-neutral rendering: a plain body plus optional HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub body: String,
    pub html: Option<String>,
}

impl StickyContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn render(&self) -> RenderedMessage {
        match self {
            Self::Text { text } => RenderedMessage {
                body: text.clone(),
                html: None,
            },
            Self::Embed(embed) => embed.render(),
        }
    }

    /// One-line description for status replies and logs.
    #[must_use]
    pub fn summary(&self, max: usize) -> String {
        let raw = match self {
            Self::Text { text } => format!("text: {text}"),
            Self::Embed(embed) => format!("embed: {}", embed.title),
        };
        let compact = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if compact.chars().count() > max {
            let mut cut: String = compact.chars().take(max).collect();
            cut.push('…');
            cut
        } else {
            compact
        }
    }
}

impl EmbedSpec {
    pub const DEFAULT_TITLE: &'static str = "Sticky Message";
    pub const DEFAULT_COLOR: u32 = 0x0034_98db;

    #[must_use]
    pub fn footer_line(&self) -> String {
        match self.footer.as_deref().map(str::trim) {
            Some(footer) if !footer.is_empty() => format!("{footer} • {STICKY_MARKER}"),
            _ => STICKY_MARKER.to_owned(),
        }
    }

    fn render(&self) -> RenderedMessage {
        let footer = self.footer_line();

        let mut body = format!("{}\n{}", self.title, self.description);
        if let Some(url) = &self.thumbnail {
            _ = write!(body, "\n[thumbnail] {url}");
        }
        if let Some(url) = &self.image {
            _ = write!(body, "\n[image] {url}");
        }
        _ = write!(body, "\n{footer}");

        let mut html = format!(
            "<blockquote><font data-mx-color=\"#{:06x}\">▌</font><strong>{}</strong><br>{}",
            self.color & 0x00ff_ffff,
            escape_html(&self.title),
            escape_html(&self.description).replace('\n', "<br>"),
        );
        if let Some(url) = &self.thumbnail {
            let url = escape_html(url);
            _ = write!(html, "<br><a href=\"{url}\">thumbnail</a>");
        }
        if let Some(url) = &self.image {
            let url = escape_html(url);
            _ = write!(html, "<br><a href=\"{url}\">image</a>");
        }
        _ = write!(html, "<br><sub>{}</sub></blockquote>", escape_html(&footer));

        RenderedMessage {
            body,
            html: Some(html),
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embed() -> EmbedSpec {
        EmbedSpec {
            title: "Rules".to_owned(),
            description: "Be nice\n<no spam>".to_owned(),
            color: 0x00ff_0000,
            footer: Some("Mods".to_owned()),
            thumbnail: None,
            image: Some("https://example.org/a.png".to_owned()),
        }
    }

    #[test]
    fn text_renders_verbatim() {
        let rendered = StickyContent::text("hello <b>").render();
        assert_eq!(rendered.body, "hello <b>");
        assert!(rendered.html.is_none());
    }

    #[test]
    fn embed_renders_footer_marker_and_escapes_html() {
        let rendered = StickyContent::Embed(embed()).render();
        assert!(rendered.body.starts_with("Rules\nBe nice"));
        assert!(rendered.body.ends_with("Mods • 📌 Sticky message"));
        assert!(rendered.body.contains("[image] https://example.org/a.png"));

        let html = rendered.html.unwrap();
        assert!(html.contains("data-mx-color=\"#ff0000\""));
        assert!(html.contains("&lt;no spam&gt;"));
        assert!(html.contains("Be nice<br>"));
        assert!(!html.contains("thumbnail"));
    }

    #[test]
    fn footer_defaults_to_marker() {
        let mut spec = embed();
        spec.footer = Some("   ".to_owned());
        assert_eq!(spec.footer_line(), STICKY_MARKER);
    }

    #[test]
    fn content_is_tagged_in_json() {
        let json = serde_json::to_value(StickyContent::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hi"}));

        let json = serde_json::to_value(StickyContent::Embed(embed())).unwrap();
        assert_eq!(json["type"], "embed");
        assert_eq!(json["title"], "Rules");
        assert!(json.get("thumbnail").is_none());
    }

    #[test]
    fn summary_truncates() {
        let content = StickyContent::text("a   very long\nmessage body");
        assert_eq!(content.summary(12), "text: a very…");
    }
}
