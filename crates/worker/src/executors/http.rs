use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use taskbus_core::{
    traits::{TaskContext, TaskExecutor, TaskResult},
    Result, TaskbusError,
};
use tracing::{error, info};

pub const HTTP_REQUEST_TASK_TYPE: &str = "http_request";

/// 响应体写入执行结果时的最大长度
const MAX_RESPONSE_BODY_CHARS: usize = 4096;

/// HTTP任务参数，取自任务的 `context`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTaskParams {
    /// 请求URL
    pub url: String,
    /// HTTP方法，默认GET
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 字符串按原样发送，其他JSON值按JSON发送
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl HttpTaskParams {
    pub fn from_context(ctx: &TaskContext) -> Result<Self> {
        serde_json::from_value(ctx.context.clone())
            .map_err(|e| TaskbusError::InvalidTaskParams(format!("解析HTTP任务参数失败: {e}")))
    }

    pub fn method(&self) -> String {
        self.method
            .as_deref()
            .unwrap_or("GET")
            .to_uppercase()
    }
}

/// HTTP请求执行器
pub struct HttpRequestExecutor {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpRequestExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            default_timeout: Duration::from_secs(30),
        }
    }

    fn request(&self, params: &HttpTaskParams) -> Result<reqwest::RequestBuilder> {
        let method = params.method();
        let builder = match method.as_str() {
            "GET" => self.client.get(&params.url),
            "POST" => self.client.post(&params.url),
            "PUT" => self.client.put(&params.url),
            "DELETE" => self.client.delete(&params.url),
            "PATCH" => self.client.patch(&params.url),
            "HEAD" => self.client.head(&params.url),
            _ => {
                return Err(TaskbusError::InvalidTaskParams(format!(
                    "不支持的HTTP方法: {method}"
                )));
            }
        };

        let timeout = params
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let mut builder = builder.timeout(timeout);

        for (key, value) in &params.headers {
            builder = builder.header(key, value);
        }

        builder = match &params.body {
            None => builder,
            Some(serde_json::Value::String(text)) => builder.body(text.clone()),
            Some(value) => builder.json(value),
        };

        Ok(builder)
    }
}

impl Default for HttpRequestExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for HttpRequestExecutor {
    fn task_type(&self) -> &str {
        HTTP_REQUEST_TASK_TYPE
    }

    fn name(&self) -> &str {
        "HTTP请求"
    }

    fn description(&self) -> &str {
        "向指定URL发送HTTP请求，2xx视为成功"
    }

    fn validate_context(&self, ctx: &TaskContext) -> Result<()> {
        let params = HttpTaskParams::from_context(ctx)?;
        if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
            return Err(TaskbusError::InvalidTaskParams(format!(
                "URL必须是HTTP(S)格式: {}",
                params.url
            )));
        }
        self.request(&params).map(|_| ())
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let params = HttpTaskParams::from_context(ctx)?;
        let method = params.method();
        info!(
            "执行HTTP任务: execution_id={}, method={}, url={}",
            ctx.execution_id, method, params.url
        );

        let response = match self.request(&params)?.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("HTTP任务请求失败: execution_id={}, error={}", ctx.execution_id, e);
                return Ok(TaskResult::failure(format!("HTTP请求失败: {e}")));
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("读取响应体失败: {e}"));
        let body: String = body.chars().take(MAX_RESPONSE_BODY_CHARS).collect();
        let data = json!({
            "method": method,
            "url": params.url,
            "status": status.as_u16(),
            "body": body,
        });

        let result = if status.is_success() {
            TaskResult::success(format!("HTTP {method} {} 返回 {}", params.url, status.as_u16()))
        } else {
            TaskResult::failure(format!("HTTP请求失败，状态码: {}", status.as_u16()))
        };
        Ok(result.with_data(data))
    }
}
