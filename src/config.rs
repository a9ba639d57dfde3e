//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCOUT__*` 覆盖（双下划线表示嵌套，如 `SCOUT__SERVER__PORT=9000`）。
//! API Key 不写进配置文件，配置里只记录读取哪个环境变量（如 `GROQ_API_KEY`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsSection,
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// [llm] 段：快速后端与高质量后端
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub fast: BackendSection,
    #[serde(default)]
    pub quality: BackendSection,
    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            fast: BackendSection::default(),
            quality: BackendSection::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// [llm.fast] / [llm.quality]：未设置的字段由对应后端的默认值补齐（见 llm::providers）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BackendSection {
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: Option<String>,
    /// 两次请求最小间隔（毫秒）
    pub min_interval_ms: Option<u64>,
    /// 限流时总调用次数上限
    pub max_attempts: Option<u32>,
    /// 指数退避基数（毫秒）
    pub backoff_base_ms: Option<u64>,
}

/// [orchestrator] 段：重试次数、步骤间隔、调度方式
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// Plan→Execute→Verify 最多尝试几轮
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 步骤之间的固定停顿（毫秒）
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    /// sequential（按计划顺序）或 dependency（按依赖拓扑序）
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_step_delay_ms() -> u64 {
    1000
}

fn default_scheduler() -> String {
    "sequential".to_string()
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            step_delay_ms: default_step_delay_ms(),
            scheduler: default_scheduler(),
        }
    }
}

/// [tools] 段：工具超时、抓取与搜索
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub search: SearchSection,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            fetch: FetchSection::default(),
            search: SearchSection::default(),
        }
    }
}

/// [tools.fetch] 段：抓取 URL 的超时与最大字符数
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_fetch_chars")]
    pub max_chars: usize,
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_max_fetch_chars() -> usize {
    8000
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            max_chars: default_max_fetch_chars(),
        }
    }
}

/// [tools.search] 段：搜索提供方顺序与凭据环境变量
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// 依次尝试的提供方：tavily / serper / duckduckgo
    #[serde(default = "default_search_providers")]
    pub providers: Vec<String>,
    #[serde(default = "default_tavily_env")]
    pub tavily_api_key_env: String,
    #[serde(default = "default_serper_env")]
    pub serper_api_key_env: String,
}

fn default_max_results() -> usize {
    5
}

fn default_search_providers() -> Vec<String> {
    vec!["tavily".into(), "serper".into(), "duckduckgo".into()]
}

fn default_tavily_env() -> String {
    "TAVILY_API_KEY".to_string()
}

fn default_serper_env() -> String {
    "SERPER_API_KEY".to_string()
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            max_results: default_max_results(),
            providers: default_search_providers(),
            tavily_api_key_env: default_tavily_env(),
            serper_api_key_env: default_serper_env(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SCOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCOUT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCOUT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
