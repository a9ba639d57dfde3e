//! Web 搜索：多提供方依次回退
//!
//! 按配置顺序尝试 Tavily（TAVILY_API_KEY）、Serper（SERPER_API_KEY），最后抓取 DuckDuckGo HTML 页面。
//! 未配置 Key 的提供方直接跳过；某个提供方出错或无结果时尝试下一个。

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;

use crate::config::SearchSection;
use crate::tools::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// 搜索提供方
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, String>;
}

fn str_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Tavily 搜索 API
pub struct TavilyProvider {
    client: Client,
    api_key: String,
}

impl TavilyProvider {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, String> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "include_answer": false,
        });
        let resp = self
            .client
            .post("https://api.tavily.com/search")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Tavily request failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("Tavily API error: HTTP {}", status.as_u16()));
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse Tavily response: {}", e))?;
        Ok(parse_tavily(&data, max_results))
    }
}

fn parse_tavily(data: &Value, max_results: usize) -> Vec<SearchHit> {
    data.get("results")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .take(max_results)
                .map(|item| SearchHit {
                    title: str_field(item, "title"),
                    url: str_field(item, "url"),
                    snippet: str_field(item, "content"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Serper（Google 结果）API
pub struct SerperProvider {
    client: Client,
    api_key: String,
}

impl SerperProvider {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SearchProvider for SerperProvider {
    fn name(&self) -> &str {
        "serper"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, String> {
        let resp = self
            .client
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query, "num": max_results }))
            .send()
            .await
            .map_err(|e| format!("Serper request failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("Serper API error: HTTP {}", status.as_u16()));
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse Serper response: {}", e))?;
        Ok(parse_serper(&data, max_results))
    }
}

fn parse_serper(data: &Value, max_results: usize) -> Vec<SearchHit> {
    data.get("organic")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .take(max_results)
                .map(|item| SearchHit {
                    title: str_field(item, "title"),
                    url: str_field(item, "link"),
                    snippet: str_field(item, "snippet"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// DuckDuckGo HTML 页面抓取（无需 Key，最后兜底）
pub struct DuckDuckGoProvider {
    client: Client,
}

impl DuckDuckGoProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, String> {
        let resp = self
            .client
            .get("https://html.duckduckgo.com/html/")
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| format!("DuckDuckGo request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("DuckDuckGo error: HTTP {}", resp.status().as_u16()));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        Ok(parse_duckduckgo_html(&html, max_results))
    }
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(out.split_whitespace().collect::<Vec<_>>().join(" ").trim())
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}

/// DuckDuckGo 的结果链接是 `//duckduckgo.com/l/?uddg=<编码后的真实地址>` 形式的跳转
fn resolve_duckduckgo_href(href: &str) -> String {
    let href = decode_entities(href);
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.clone()
    };
    reqwest::Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(href)
}

static DDG_LINK_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).ok()
});

static DDG_SNIPPET_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</(?:a|div|td)>"#).ok()
});

fn parse_duckduckgo_html(html: &str, max_results: usize) -> Vec<SearchHit> {
    let (Some(link_re), Some(snippet_re)) = (DDG_LINK_RE.as_ref(), DDG_SNIPPET_RE.as_ref()) else {
        return Vec::new();
    };

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .map(|c| strip_tags(&c[1]))
        .collect();

    link_re
        .captures_iter(html)
        .take(max_results)
        .enumerate()
        .map(|(i, c)| SearchHit {
            title: strip_tags(&c[2]),
            url: resolve_duckduckgo_href(&c[1]),
            snippet: snippets.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

/// 多提供方搜索；依次尝试直到某一个返回非空结果
pub struct WebSearch {
    providers: Vec<Arc<dyn SearchProvider>>,
}

impl WebSearch {
    pub fn new(providers: Vec<Arc<dyn SearchProvider>>) -> Self {
        Self { providers }
    }

    /// 按 [tools.search] 配置构造；缺少 Key 的提供方跳过
    pub fn from_config(cfg: &SearchSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        let key = |env: &str| std::env::var(env).ok().filter(|k| !k.trim().is_empty());

        let mut providers: Vec<Arc<dyn SearchProvider>> = Vec::new();
        for name in &cfg.providers {
            match name.to_lowercase().as_str() {
                "tavily" => match key(&cfg.tavily_api_key_env) {
                    Some(k) => providers.push(Arc::new(TavilyProvider::new(client.clone(), k))),
                    None => tracing::debug!("{} not set, skipping tavily", cfg.tavily_api_key_env),
                },
                "serper" => match key(&cfg.serper_api_key_env) {
                    Some(k) => providers.push(Arc::new(SerperProvider::new(client.clone(), k))),
                    None => tracing::debug!("{} not set, skipping serper", cfg.serper_api_key_env),
                },
                "duckduckgo" => providers.push(Arc::new(DuckDuckGoProvider::new(client.clone()))),
                other => tracing::warn!(provider = other, "Unknown search provider, ignored"),
            }
        }
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, String> {
        let query: String = query
            .chars()
            .filter(|c| !c.is_control() || *c == ' ')
            .collect();
        let query = query.trim();
        if query.is_empty() {
            return Err("Search query cannot be empty".to_string());
        }
        if self.providers.is_empty() {
            return Err("No search provider configured".to_string());
        }

        let mut errors = Vec::new();
        for provider in &self.providers {
            match provider.search(query, max_results).await {
                Ok(hits) if !hits.is_empty() => {
                    tracing::info!(provider = provider.name(), hits = hits.len(), "search ok");
                    return Ok(hits);
                }
                Ok(_) => errors.push(format!("{}: no results", provider.name())),
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "search provider failed");
                    errors.push(format!("{}: {}", provider.name(), e));
                }
            }
        }
        Err(format!("All search providers failed ({})", errors.join("; ")))
    }
}

/// 将结果渲染为编号 Markdown 列表
pub fn format_hits(query: &str, hits: &[SearchHit]) -> String {
    let mut out = format!("Search results for \"{}\":\n\n", query);
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}]({})\n   {}\n",
            i + 1,
            hit.title,
            hit.url,
            hit.snippet
        ));
    }
    out.trim_end().to_string()
}

/// search 工具：参数 {"query": "...", "max_results": 5}
pub struct SearchTool {
    search: WebSearch,
    default_max_results: usize,
}

impl SearchTool {
    pub fn new(search: WebSearch, default_max_results: usize) -> Self {
        Self {
            search,
            default_max_results: default_max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Web search by keywords. Args: {\"query\": \"...\", \"max_results\": 5}."
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n.clamp(1, 10) as usize)
            .unwrap_or(self.default_max_results);
        let hits = self.search.search(&query, max_results).await?;
        Ok(format_hits(&query, &hits))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeProvider {
        name: &'static str,
        result: Result<Vec<SearchHit>, String>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(name: &'static str, result: Result<Vec<SearchHit>, String>) -> Arc<Self> {
            Arc::new(Self {
                name,
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SearchProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn hit(title: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            url: format!("https://example.com/{title}"),
            snippet: "snippet".into(),
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let failing = FakeProvider::new("a", Err("boom".into()));
        let empty = FakeProvider::new("b", Ok(vec![]));
        let good = FakeProvider::new("c", Ok(vec![hit("rust")]));
        let search = WebSearch::new(vec![failing.clone(), empty.clone(), good.clone()]);

        let hits = search.search("rust", 5).await.unwrap();
        assert_eq!(hits, vec![hit("rust")]);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(empty.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let search = WebSearch::new(vec![FakeProvider::new("a", Err("down".into()))]);
        let err = search.search("q", 3).await.unwrap_err();
        assert!(err.contains("a: down"));
        assert!(WebSearch::new(vec![]).search("q", 3).await.is_err());
        assert!(search.search("   ", 3).await.is_err());
    }

    #[tokio::test]
    async fn test_search_tool_formats_list() {
        let search = WebSearch::new(vec![FakeProvider::new(
            "a",
            Ok(vec![hit("one"), hit("two")]),
        )]);
        let tool = SearchTool::new(search, 5);
        let out = tool
            .execute(serde_json::json!({"query": "rust async"}))
            .await
            .unwrap();
        assert!(out.starts_with("Search results for \"rust async\""));
        assert!(out.contains("1. [one](https://example.com/one)"));
        assert!(out.contains("2. [two]"));
        assert!(tool.execute(serde_json::json!({})).await.is_err());
    }

    #[test]
    fn test_parse_api_payloads() {
        let tavily = serde_json::json!({"results": [{"title": "T", "url": "https://t", "content": "c"}]});
        assert_eq!(parse_tavily(&tavily, 5)[0].snippet, "c");
        let serper = serde_json::json!({"organic": [
            {"title": "S1", "link": "https://s1", "snippet": "x"},
            {"title": "S2", "link": "https://s2", "snippet": "y"}
        ]});
        let hits = parse_serper(&serper, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://s1");
    }

    #[test]
    fn test_parse_duckduckgo_html() {
        let html = r#"
<div class="result">
  <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">The <b>Rust</b> Language</a>
  <a class="result__snippet" href="x">A language empowering <b>everyone</b>.</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://doc.rust-lang.org/book/">The Book</a>
  <a class="result__snippet" href="y">Learn Rust &amp; more</a>
</div>"#;
        let hits = parse_duckduckgo_html(html, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "The Rust Language");
        assert_eq!(hits[0].url, "https://www.rust-lang.org/");
        assert_eq!(hits[0].snippet, "A language empowering everyone.");
        assert_eq!(hits[1].url, "https://doc.rust-lang.org/book/");
        assert_eq!(hits[1].snippet, "Learn Rust & more");
    }

    #[test]
    fn test_from_config_skips_missing_keys() {
        let cfg = SearchSection {
            providers: vec!["tavily".into(), "duckduckgo".into()],
            tavily_api_key_env: "SCOUT_TEST_MISSING_TAVILY_KEY".into(),
            ..SearchSection::default()
        };
        let search = WebSearch::from_config(&cfg);
        assert_eq!(search.provider_names(), vec!["duckduckgo".to_string()]);
    }
}
