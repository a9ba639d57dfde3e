//! Fetch 工具：抓取 URL 并提取可读正文
//!
//! GET 请求带超时与浏览器 User-Agent；HTML 响应用 html2text 提取文本（失败时回退到简易去标签），
//! 去除 BOM，超过 max_chars 时截断并追加 ...[truncated]。

use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use serde_json::Value;

use crate::tools::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let lower_head: String = s.chars().take(64).collect::<String>().to_lowercase();
    lower_head.starts_with("<!doctype")
        || lower_head.starts_with("<html")
        || (s.contains('<')
            && (s.contains("</") || s.contains("<meta") || s.contains("<head") || s.contains("<title")))
}

fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

/// 去 BOM、HTML 转文本、截断
pub fn extract_readable(body: &str, max_chars: usize) -> String {
    let body = body.strip_prefix('\u{FEFF}').unwrap_or(body);
    let text = if looks_like_html(body) {
        html_to_text(body)
    } else {
        body.to_string()
    };
    let text = text.trim();
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text.to_string()
    }
}

/// fetch 工具：参数 {"url": "https://..."}
pub struct FetchTool {
    client: Client,
    max_chars: usize,
}

impl FetchTool {
    pub fn new(timeout_secs: u64, max_chars: usize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self { client, max_chars }
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        Ok(extract_readable(&body, self.max_chars))
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page and extract its readable text. Args: {\"url\": \"https://...\"}."
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if url.is_empty() {
            return Err("Missing url".to_string());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("Unsupported URL scheme: {}", url));
        }
        tracing::info!(url = %url, "fetch tool");
        self.fetch(url).await
    }
}
