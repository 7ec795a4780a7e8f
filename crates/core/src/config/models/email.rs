use serde::{Deserialize, Serialize};

/// 邮件发送后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmailBackend {
    /// 只写日志，用于开发和测试环境
    #[default]
    Console,
    Smtp,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub backend: EmailBackend,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_starttls: bool,
    pub from_address: String,
    pub from_name: String,
    /// 重置密码和邮箱验证链接的前缀
    pub frontend_url: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            backend: EmailBackend::Console,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_starttls: true,
            from_address: "noreply@taskbus.local".to_string(),
            from_name: "Taskbus".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

impl EmailConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.from_address.is_empty() || !self.from_address.contains('@') {
            return Err(anyhow::anyhow!("发件人地址无效: {}", self.from_address));
        }

        if !self.frontend_url.starts_with("http://") && !self.frontend_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!("前端地址必须是HTTP(S)格式"));
        }

        if self.backend == EmailBackend::Smtp {
            if self.smtp_host.is_empty() {
                return Err(anyhow::anyhow!("SMTP主机不能为空"));
            }
            if self.smtp_port == 0 {
                return Err(anyhow::anyhow!("SMTP端口必须大于0"));
            }
            if self.smtp_username.is_some() != self.smtp_password.is_some() {
                return Err(anyhow::anyhow!("SMTP用户名和密码必须同时配置"));
            }
        }

        Ok(())
    }

    /// 去掉末尾斜杠的前端地址
    pub fn frontend_base(&self) -> &str {
        self.frontend_url.trim_end_matches('/')
    }
}
