use std::sync::Arc;

use async_trait::async_trait;
use taskbus_core::{
    models::{EmailMessage, EmailVerificationMessage, PasswordResetEmailMessage},
    traits::{EmailSender, MessageHandler},
    Result,
};
use html_escape::{encode_double_quoted_attribute, encode_text};
use tracing::info;

use crate::messages::EmailJob;

fn html_link(url: &str) -> String {
    format!(
        "<p><a href=\"{}\">{}</a></p>",
        encode_double_quoted_attribute(url),
        encode_text(url)
    )
}

/// 邮件队列处理器
///
/// 重置密码和邮箱验证邮件的链接以 `frontend_url` 为前缀。
pub struct EmailHandler {
    sender: Arc<dyn EmailSender>,
    frontend_url: String,
}

impl EmailHandler {
    pub fn new(sender: Arc<dyn EmailSender>, frontend_url: impl Into<String>) -> Self {
        Self {
            sender,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn password_reset_url(&self, token: &str) -> String {
        format!(
            "{}/reset-password?token={}",
            self.frontend_url,
            urlencoding::encode(token)
        )
    }

    pub fn verification_url(&self, token: &str) -> String {
        format!(
            "{}/verify-email?token={}",
            self.frontend_url,
            urlencoding::encode(token)
        )
    }

    async fn send_plain(&self, message: EmailMessage) -> Result<()> {
        self.sender
            .send(
                &message.to_email,
                &message.subject,
                &message.html_content,
                message.text_content.as_deref(),
            )
            .await?;
        info!("邮件已发送: {} -> {}", message.subject, message.to_email);
        Ok(())
    }

    async fn send_password_reset(&self, message: PasswordResetEmailMessage) -> Result<()> {
        let url = self.password_reset_url(&message.reset_token);
        let html = format!(
            "<p>{}，您好：</p>\
             <p>我们收到了重置密码的请求，请点击下面的链接设置新密码：</p>\
             {}\
             <p>如果这不是您本人的操作，请忽略此邮件。</p>",
            encode_text(&message.username),
            html_link(&url)
        );
        let text = format!(
            "{}，您好：\n请访问以下链接重置密码：\n{url}\n如果这不是您本人的操作，请忽略此邮件。",
            message.username
        );

        self.sender
            .send(&message.to_email, "重置您的密码", &html, Some(&text))
            .await?;
        info!("密码重置邮件已发送: {}", message.to_email);
        Ok(())
    }

    async fn send_verification(&self, message: EmailVerificationMessage) -> Result<()> {
        let url = self.verification_url(&message.verification_token);
        let html = format!(
            "<p>{}，欢迎注册！</p>\
             <p>请点击下面的链接验证您的邮箱地址：</p>\
             {}",
            encode_text(&message.username),
            html_link(&url)
        );
        let text = format!(
            "{}，欢迎注册！\n请访问以下链接验证邮箱：\n{url}",
            message.username
        );

        self.sender
            .send(&message.to_email, "验证您的邮箱地址", &html, Some(&text))
            .await?;
        info!("邮箱验证邮件已发送: {}", message.to_email);
        Ok(())
    }
}

#[async_trait]
impl MessageHandler<EmailJob> for EmailHandler {
    async fn handle(&self, message: EmailJob) -> Result<()> {
        match message {
            EmailJob::Plain(message) => self.send_plain(message).await,
            EmailJob::PasswordReset(message) => self.send_password_reset(message).await,
            EmailJob::Verification(message) => self.send_verification(message).await,
        }
    }
}
