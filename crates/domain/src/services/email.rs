use async_trait::async_trait;
use riberry_core::RiberryResult;
use tracing::info;

/// 待发送的邮件
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
    pub mime_type: String,
    pub sender: String,
    pub recipients: Vec<String>,
}

/// 邮件发送协作方
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> RiberryResult<()>;
}

/// 仅记录日志的邮件发送器，用于未接入SMTP的部署
#[derive(Debug, Default, Clone)]
pub struct LoggingEmailSender;

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send(&self, message: &EmailMessage) -> RiberryResult<()> {
        info!(
            subject = %message.subject,
            sender = %message.sender,
            recipients = ?message.recipients,
            "邮件未发送（未配置SMTP）"
        );
        Ok(())
    }
}
