//! Noop トランスポート実装
//!
//! メールを実際に送信せず、ログ出力のみ行う。

use async_trait::async_trait;
use mailroom_domain::mail::{EmailMessage, SendReceipt, TransportError};

use super::MailTransport;

/// Noop トランスポート（ログ出力のみ）
#[derive(Debug, Clone)]
pub struct NoopTransport;

#[async_trait]
impl MailTransport for NoopTransport {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "Noop: メール送信をスキップ"
        );
        Ok(SendReceipt::default())
    }
}
