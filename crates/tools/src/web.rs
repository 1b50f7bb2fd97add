//! Web tools: DuckDuckGo search and readable page extraction.

use std::time::Duration;

use async_trait::async_trait;
use dewey_core::error::ToolError;
use dewey_core::tool::{ParamType, Tool, ToolResult, ToolSchema};
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; Dewey/0.1)";
const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// Longest page text handed back to the model.
const MAX_PAGE_CHARS: usize = 20_000;

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn failed(tool: &str, reason: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason: reason.to_string(),
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub body: String,
    pub href: String,
}

/// Search the web through DuckDuckGo's HTML endpoint (no API key).
pub struct SearchWebTool {
    client: reqwest::Client,
    max_results: usize,
}

impl SearchWebTool {
    pub fn new(max_results: usize, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            max_results,
        }
    }
}

#[async_trait]
impl Tool for SearchWebTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web. Returns the top results, each as title, snippet and link."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().param("query", ParamType::String, "The search query")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let url = format!("{SEARCH_URL}?q={}", urlencoding::encode(query));
        debug!(query, "Searching the web");

        let html = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed("search_web", e))?
            .text()
            .await
            .map_err(|e| failed("search_web", e))?;

        let hits = parse_search_results(&html, self.max_results);
        if hits.is_empty() {
            return Ok(ToolResult::ok(format!("No results found for: {query}")));
        }
        let text = hits
            .iter()
            .map(|h| format!("{}\n{}\n{}", h.title, h.body, h.href))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ToolResult::ok(text))
    }
}

/// Text between the end of the opening tag that carries `class` and the next `<`.
fn element_text<'a>(chunk: &'a str, class: &str) -> Option<&'a str> {
    let after_class = chunk.split_once(class)?.1;
    let after_tag = after_class.split_once('>')?.1;
    Some(after_tag.split_once('<').map_or(after_tag, |(text, _)| text))
}

/// Value of the `href` attribute on the element carrying `class`.
fn element_href<'a>(chunk: &'a str, class: &str) -> Option<&'a str> {
    let (before, after) = chunk.split_once(class)?;
    // The attribute may sit on either side of the class attribute.
    let tag_start = before.rfind('<').map_or("", |i| &before[i..]);
    let tag_end = after.split_once('>').map_or(after, |(t, _)| t);
    [tag_start, tag_end].into_iter().find_map(|part| {
        let rest = part.split_once("href=\"")?.1;
        rest.split_once('"').map(|(v, _)| v)
    })
}

/// Resolve DuckDuckGo's `/l/?uddg=<target>` redirect links.
fn resolve_link(href: &str) -> String {
    let target = href
        .split_once("uddg=")
        .map(|(_, rest)| rest.split('&').next().unwrap_or(rest));
    match target {
        Some(encoded) => urlencoding::decode(encoded)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| encoded.to_string()),
        None if href.starts_with("//") => format!("https:{href}"),
        None => href.to_string(),
    }
}

/// Extract hits from DuckDuckGo result HTML.
pub fn parse_search_results(html: &str, limit: usize) -> Vec<SearchHit> {
    html.split("result__body")
        .skip(1)
        .filter_map(|chunk| {
            let title = decode_entities(element_text(chunk, "class=\"result__a\"")?.trim());
            if title.is_empty() {
                return None;
            }
            let body = element_text(chunk, "class=\"result__snippet\"")
                .map(|s| decode_entities(s.trim()))
                .unwrap_or_default();
            let href = element_href(chunk, "class=\"result__a\"")
                .map(resolve_link)
                .unwrap_or_default();
            Some(SearchHit { title, body, href })
        })
        .take(limit)
        .collect()
}

/// Fetch a page and return its readable text.
pub struct ReadablePageTool {
    client: reqwest::Client,
}

impl ReadablePageTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
        }
    }
}

#[async_trait]
impl Tool for ReadablePageTool {
    fn name(&self) -> &str {
        "get_readable_page_contents"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its main text content, without markup."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().param("url", ParamType::String, "The page URL (http or https)")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let url = arguments["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidArguments(format!(
                "'{url}' is not an http(s) URL"
            )));
        }

        debug!(url, "Fetching page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed("get_readable_page_contents", e))?;

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|ct| ct.contains("html"));
        let body = response
            .text()
            .await
            .map_err(|e| failed("get_readable_page_contents", e))?;

        let text = if is_html { readable_text(&body) } else { body };
        Ok(ToolResult::ok(truncate(&text, MAX_PAGE_CHARS)))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n[content truncated at {max_chars} characters]", &text[..cut]),
        None => text.to_string(),
    }
}

/// Elements whose content is never readable text.
const SKIPPED: &[&str] = &["script", "style", "noscript", "nav", "header", "footer", "svg", "form"];

/// Elements that start a new line.
const BLOCKS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "blockquote", "pre", "table", "ul", "ol",
];

/// Strip markup from HTML, keeping block structure as line breaks.
pub fn readable_text(html: &str) -> String {
    let mut out = String::new();
    let mut skip_depth: Vec<&str> = Vec::new();
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        if skip_depth.is_empty() {
            out.push_str(&rest[..open]);
        }
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let tag = &rest[open + 1..open + close];
        rest = &rest[open + close + 1..];

        let closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        if let Some(&skipped) = SKIPPED.iter().find(|s| **s == name) {
            if closing {
                if skip_depth.last() == Some(&skipped) {
                    skip_depth.pop();
                }
            } else if !tag.ends_with('/') {
                skip_depth.push(skipped);
            }
            continue;
        }
        if skip_depth.is_empty() && BLOCKS.contains(&name.as_str()) {
            out.push('\n');
        }
    }
    if skip_depth.is_empty() {
        out.push_str(rest);
    }

    decode_entities(&out)
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
