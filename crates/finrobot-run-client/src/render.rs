//! Turns a [`DisplayDocument`] into displayable blocks and file previews.

use std::collections::HashSet;
use std::fmt::Write as _;

use pulldown_cmark::{Options, Parser, html};
use serde_json::Value;
use tracing::debug;

use crate::config::ClientConfig;
use crate::history::{DisplayDocument, FileDescriptor};

/// Preview policy of a generated file, derived from its extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    Image,
    Pdf,
    Markdown,
    Text,
    Other,
}

impl FileKind {
    /// Accepts `png`, `.png` or `PNG`.
    pub fn from_extension(extension: &str) -> Self {
        let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "bmp" => Self::Image,
            "pdf" => Self::Pdf,
            "md" | "markdown" => Self::Markdown,
            "txt" | "csv" | "json" | "log" | "py" | "yaml" | "yml" | "xml" | "html" => Self::Text,
            _ => Self::Other,
        }
    }

    fn of(file: &FileDescriptor) -> Self {
        if !file.extension.trim().is_empty() {
            return Self::from_extension(&file.extension);
        }
        match file.name.rsplit_once('.') {
            Some((_, ext)) => Self::from_extension(ext),
            None => Self::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Other => "file",
        }
    }
}

/// One message with displayable content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentBlock {
    pub role: Option<String>,
    pub name: Option<String>,
    pub markdown: String,
    pub html: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePreview {
    pub name: String,
    /// Absolute URL: base URL plus the server-provided path, unchanged.
    pub url: String,
    pub kind: FileKind,
    pub size_human: String,
    pub modified_time: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderedDocument {
    pub blocks: Vec<ContentBlock>,
    pub files: Vec<FilePreview>,
}

/// Expanded/collapsed flags of text previews, keyed by file URL.
#[derive(Clone, Debug, Default)]
pub struct PreviewToggles {
    expanded: HashSet<String>,
}

impl PreviewToggles {
    /// Flips the flag and returns the new state.
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.expanded.remove(key) {
            false
        } else {
            self.expanded.insert(key.to_string());
            true
        }
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        self.expanded.contains(key)
    }
}

/// Renders a live or historical document. Inputs are never modified.
pub fn render(document: &DisplayDocument, config: &ClientConfig) -> RenderedDocument {
    let (items, files): (Vec<&Value>, Vec<FileDescriptor>) = match document {
        DisplayDocument::Current(None) => return RenderedDocument::default(),
        DisplayDocument::Current(Some(result)) => (live_items(result), live_files(result)),
        DisplayDocument::Historical(record) => (
            record.messages.iter().collect(),
            record
                .generated_files
                .as_ref()
                .map(|g| g.files.clone())
                .unwrap_or_default(),
        ),
    };

    let blocks = items.into_iter().filter_map(content_block).collect();
    let files = files
        .iter()
        .map(|file| FilePreview {
            name: file.name.clone(),
            url: config.resolve_asset(&file.url),
            kind: FileKind::of(file),
            size_human: file.size_human.clone(),
            modified_time: file.modified_time.clone(),
        })
        .collect();
    RenderedDocument { blocks, files }
}

fn live_items(result: &Value) -> Vec<&Value> {
    match result.get("result").unwrap_or(result) {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn live_files(result: &Value) -> Vec<FileDescriptor> {
    let Some(Value::Array(files)) = result.get("generated_files").and_then(|g| g.get("files"))
    else {
        return Vec::new();
    };
    files
        .iter()
        .filter_map(|file| match serde_json::from_value(file.clone()) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!(error = %e, "skipping unreadable file descriptor");
                None
            }
        })
        .collect()
}

fn content_block(item: &Value) -> Option<ContentBlock> {
    let (role, name, content) = match item {
        Value::Object(map) => (
            text_field(item, "role"),
            text_field(item, "name").or_else(|| text_field(item, "tool_name")),
            map.get("content")?,
        ),
        other => (None, None, other),
    };
    let markdown = content_markdown(content)?;
    Some(ContentBlock {
        role,
        name,
        html: markdown_to_html(&markdown),
        markdown,
    })
}

fn text_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn content_markdown(content: &Value) -> Option<String> {
    let markdown = match content {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => ["text", "content", "value"]
                    .iter()
                    .find_map(|key| part.get(*key).and_then(Value::as_str))
                    .map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => {
            let pretty = serde_json::to_string_pretty(content).unwrap_or_else(|_| content.to_string());
            format!("```json\n{pretty}\n```")
        }
        other => other.to_string(),
    };
    (!markdown.trim().is_empty()).then_some(markdown)
}

/// CommonMark to HTML with tables and strikethrough enabled.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(markdown, options));
    out
}

impl RenderedDocument {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.files.is_empty()
    }

    /// Standalone HTML report.
    ///
    /// `inline_markdown` supplies fetched markdown file bodies by URL; files
    /// without one fall back to a link.
    pub fn to_html(
        &self,
        title: &str,
        toggles: &PreviewToggles,
        inline_markdown: &dyn Fn(&str) -> Option<String>,
    ) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n",
            escape(title)
        );
        for block in &self.blocks {
            out.push_str("<section class=\"message\">\n");
            if let Some(header) = block_header(block) {
                let _ = writeln!(out, "<h3>{}</h3>", escape(&header));
            }
            out.push_str(&block.html);
            out.push_str("</section>\n");
        }
        if !self.files.is_empty() {
            out.push_str("<section class=\"files\">\n<h2>Generated files</h2>\n");
            for file in &self.files {
                out.push_str(&file_html(file, toggles, inline_markdown));
            }
            out.push_str("</section>\n");
        }
        out.push_str("</body>\n</html>\n");
        out
    }

    /// Plain-text view for terminals.
    pub fn to_terminal(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            let header = block_header(block).unwrap_or_else(|| "message".to_string());
            let _ = writeln!(out, "── {header} ──");
            out.push_str(block.markdown.trim_end());
            out.push_str("\n\n");
        }
        if !self.files.is_empty() {
            out.push_str("Generated files:\n");
            for file in &self.files {
                let _ = write!(out, "  [{}] {}", file.kind.label(), file.name);
                if !file.size_human.is_empty() {
                    let _ = write!(out, " ({})", file.size_human);
                }
                let _ = writeln!(out, "\n      {}", file.url);
            }
        }
        out
    }
}

fn block_header(block: &ContentBlock) -> Option<String> {
    match (&block.role, &block.name) {
        (Some(role), Some(name)) => Some(format!("{role} · {name}")),
        (Some(role), None) => Some(role.clone()),
        (None, Some(name)) => Some(name.clone()),
        (None, None) => None,
    }
}

fn file_html(
    file: &FilePreview,
    toggles: &PreviewToggles,
    inline_markdown: &dyn Fn(&str) -> Option<String>,
) -> String {
    let url = escape(&file.url);
    let name = escape(&file.name);
    let link = format!("<a href=\"{url}\" download>{name}</a>");
    let body = match file.kind {
        FileKind::Image => format!("<figure><img src=\"{url}\" alt=\"{name}\"><figcaption>{link}</figcaption></figure>"),
        FileKind::Pdf => {
            format!("<embed src=\"{url}\" type=\"application/pdf\" width=\"100%\" height=\"600\">\n<p>{link}</p>")
        }
        FileKind::Markdown => match inline_markdown(&file.url) {
            Some(markdown) => format!("<article>{}</article>\n<p>{link}</p>", markdown_to_html(&markdown)),
            None => format!("<p>{link}</p>"),
        },
        FileKind::Text => {
            let open = if toggles.is_expanded(&file.url) { " open" } else { "" };
            format!(
                "<details{open}><summary>{name}</summary><iframe src=\"{url}\" width=\"100%\" height=\"400\"></iframe></details>\n<p>{link}</p>"
            )
        }
        FileKind::Other => format!("<p>{link}</p>"),
    };
    let meta = [file.size_human.as_str(), file.modified_time.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(escape)
        .collect::<Vec<_>>()
        .join(" · ");
    if meta.is_empty() {
        format!("<div class=\"file\">{body}</div>\n")
    } else {
        format!("<div class=\"file\">{body}<small>{meta}</small></div>\n")
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{GeneratedFiles, HistoryRecord};
    use serde_json::json;

    fn config() -> ClientConfig {
        ClientConfig::new("http://localhost:8000")
    }

    fn no_markdown(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn blank_and_null_contents_produce_no_blocks() {
        let document = DisplayDocument::Current(Some(json!({
            "result": [
                {"role": "user", "content": null},
                {"role": "assistant", "content": "   \n"},
                {"role": "assistant", "name": "Analyst", "content": "## Revenue\n| q | v |\n|---|---|\n| 1 | 2 |"},
                {"role": "tool", "tool_name": "get_quote", "content": [{"type": "text", "text": "AAPL 190"}]},
                {"role": "tool", "content": {"ticker": "AAPL"}}
            ]
        })));
        let rendered = render(&document, &config());
        assert_eq!(rendered.blocks.len(), 3);
        assert_eq!(rendered.blocks[0].name.as_deref(), Some("Analyst"));
        assert!(rendered.blocks[0].html.contains("<table>"));
        assert_eq!(rendered.blocks[1].name.as_deref(), Some("get_quote"));
        assert_eq!(rendered.blocks[1].markdown, "AAPL 190");
        assert!(rendered.blocks[2].markdown.starts_with("```json"));
    }

    #[test]
    fn file_urls_are_base_url_plus_server_path() {
        let paths = [
            "/static/output/agent_annual_report/20250501_103000/chart.png",
            "/static/output/x/report final.pdf",
            "static/output/x/notes.md",
        ];
        let files: Vec<Value> = paths
            .iter()
            .map(|p| json!({"name": p.rsplit('/').next(), "url": p, "extension": ""}))
            .collect();
        let document = DisplayDocument::Current(Some(json!({
            "result": [],
            "generated_files": {"files": files}
        })));
        let rendered = render(&document, &config());
        assert_eq!(rendered.files.len(), 3);
        assert_eq!(
            rendered.files[0].url,
            "http://localhost:8000/static/output/agent_annual_report/20250501_103000/chart.png"
        );
        assert_eq!(rendered.files[1].url, "http://localhost:8000/static/output/x/report final.pdf");
        assert_eq!(rendered.files[2].url, "http://localhost:8000/static/output/x/notes.md");
        let kinds: Vec<FileKind> = rendered.files.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, [FileKind::Image, FileKind::Pdf, FileKind::Markdown]);
    }

    #[test]
    fn historical_records_render_messages_and_files() {
        let record = HistoryRecord {
            id: "t1".into(),
            messages: vec![json!({"role": "assistant", "content": "done"})],
            generated_files: Some(GeneratedFiles {
                files: vec![FileDescriptor {
                    name: "data.csv".into(),
                    url: "/static/output/a/data.csv".into(),
                    extension: ".csv".into(),
                    size_human: "1.2 KB".into(),
                    ..FileDescriptor::default()
                }],
            }),
            ..HistoryRecord::default()
        };
        let document = DisplayDocument::Historical(record.clone());
        let rendered = render(&document, &config());
        assert_eq!(rendered.blocks.len(), 1);
        assert_eq!(rendered.files[0].kind, FileKind::Text);
        assert_eq!(document, DisplayDocument::Historical(record));
    }

    #[test]
    fn bare_string_result_is_one_block() {
        let rendered = render(&DisplayDocument::Current(Some(json!({"result": "plain answer"}))), &config());
        assert_eq!(rendered.blocks.len(), 1);
        assert_eq!(rendered.blocks[0].role, None);
        assert!(render(&DisplayDocument::Current(None), &config()).is_empty());
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(FileKind::from_extension(".JPEG"), FileKind::Image);
        assert_eq!(FileKind::from_extension("svg"), FileKind::Image);
        assert_eq!(FileKind::from_extension("yml"), FileKind::Text);
        assert_eq!(FileKind::from_extension("xlsx"), FileKind::Other);
    }

    #[test]
    fn html_report_previews_by_kind() {
        let document = DisplayDocument::Current(Some(json!({
            "result": [{"role": "assistant", "content": "**ok**"}],
            "generated_files": {"files": [
                {"name": "c.png", "url": "/static/c.png", "extension": ".png"},
                {"name": "r.pdf", "url": "/static/r.pdf", "extension": ".pdf"},
                {"name": "s.md", "url": "/static/s.md", "extension": ".md"},
                {"name": "l.txt", "url": "/static/l.txt", "extension": ".txt"},
                {"name": "d.zip", "url": "/static/d.zip", "extension": ".zip"}
            ]}
        })));
        let rendered = render(&document, &config());
        let mut toggles = PreviewToggles::default();
        assert!(toggles.toggle("http://localhost:8000/static/l.txt"));

        let report = rendered.to_html("run <1>", &toggles, &|url: &str| {
            url.ends_with("s.md").then(|| "# Summary".to_string())
        });
        assert!(report.contains("<title>run &lt;1&gt;</title>"));
        assert!(report.contains("<strong>ok</strong>"));
        assert!(report.contains("<img src=\"http://localhost:8000/static/c.png\""));
        assert!(report.contains("type=\"application/pdf\""));
        assert!(report.contains("<h1>Summary</h1>"));
        assert!(report.contains("<details open>"));
        assert!(report.contains("href=\"http://localhost:8000/static/d.zip\" download"));

        assert!(!toggles.toggle("http://localhost:8000/static/l.txt"));
        let collapsed = rendered.to_html("run", &toggles, &no_markdown);
        assert!(collapsed.contains("<details>"));
    }

    #[test]
    fn terminal_view_lists_blocks_and_files() {
        let document = DisplayDocument::Current(Some(json!({
            "result": [{"role": "assistant", "name": "Expert", "content": "Buy."}],
            "generated_files": {"files": [{"name": "c.png", "url": "/static/c.png", "size_human": "3 KB"}]}
        })));
        let text = render(&document, &config()).to_terminal();
        assert!(text.contains("── assistant · Expert ──\nBuy."));
        assert!(text.contains("[image] c.png (3 KB)"));
        assert!(text.contains("http://localhost:8000/static/c.png"));
    }
}
