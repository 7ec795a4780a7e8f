use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use taskbus_core::{
    config::{EmailBackend, EmailConfig},
    traits::EmailSender,
    Result, TaskbusError,
};
use tracing::{debug, info};

/// 控制台邮件发送器，只把邮件内容写入日志
#[derive(Debug, Default, Clone)]
pub struct ConsoleEmailSender;

#[async_trait]
impl EmailSender for ConsoleEmailSender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> Result<()> {
        info!(
            to = %to,
            subject = %subject,
            "[console] 邮件未实际发送\n{}",
            text_body.unwrap_or(html_body)
        );
        Ok(())
    }
}

/// SMTP邮件发送器
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let builder = if config.smtp_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| TaskbusError::Configuration(format!("SMTP配置无效: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        let mut builder = builder.port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let address = config
            .from_address
            .parse()
            .map_err(|e| TaskbusError::Configuration(format!("发件人地址无效: {e}")))?;

        Ok(Self {
            transport: builder.build(),
            from: Mailbox::new(Some(config.from_name.clone()), address),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> Result<()> {
        let recipient: Mailbox = to
            .parse()
            .map_err(|e| TaskbusError::Email(format!("收件人地址无效 {to}: {e}")))?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject);

        let message = match text_body {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(
                text.to_string(),
                html_body.to_string(),
            )),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(html_body.to_string()),
        }
        .map_err(|e| TaskbusError::Email(format!("构建邮件失败: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| TaskbusError::Email(format!("发送邮件到 {to} 失败: {e}")))?;

        debug!("邮件已发送: {} -> {}", subject, to);
        Ok(())
    }
}

/// 按配置选择邮件发送器
pub fn build_email_sender(config: &EmailConfig) -> Result<Arc<dyn EmailSender>> {
    match config.backend {
        EmailBackend::Console => Ok(Arc::new(ConsoleEmailSender)),
        EmailBackend::Smtp => Ok(Arc::new(SmtpEmailSender::new(config)?)),
    }
}
