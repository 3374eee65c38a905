//! SMTP トランスポート実装
//!
//! lettre の `AsyncSmtpTransport` を使用してメールを送信する。
//! 開発環境では Mailpit（ローカル SMTP サーバー）に接続する。

use async_trait::async_trait;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mailroom_domain::mail::{EmailMessage, SendReceipt, TransportError};

use super::{MailTransport, build_mime_message};

/// SMTP トランスポート
pub struct SmtpTransport {
    transport:    AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpTransport {
    /// 新しい SMTP トランスポートを作成する
    ///
    /// # 引数
    ///
    /// - `host`: SMTP サーバーのホスト名（例: "localhost"）
    /// - `port`: SMTP サーバーのポート番号（例: 1025 for Mailpit）
    /// - `from_address`: 送信元メールアドレス
    pub fn new(host: &str, port: u16, from_address: String) -> Self {
        // builder_dangerous: TLS なしで接続（Mailpit 等のローカル SMTP 向け）
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();

        Self {
            transport,
            from_address,
        }
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        let mime = build_mime_message(&self.from_address, message)?;

        let response = self.transport.send(mime).await.map_err(|e| {
            if e.is_permanent() {
                TransportError::Permanent(format!("SMTP 送信失敗: {e}"))
            } else {
                TransportError::Transient(format!("SMTP 送信失敗: {e}"))
            }
        })?;

        Ok(SendReceipt {
            provider_message_id: response.first_line().map(str::to_string),
        })
    }
}
