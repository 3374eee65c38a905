//! # メール送信トランスポート
//!
//! 「メールを 1 通送る」処理を抽象化する。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: `MailTransport` trait でメール送信を抽象化し、
//!   ディスパッチャには依存として注入する（テストではモックに差し替え）
//! - **4 つの実装**:
//!   - Gmail API（利用者ごとの委任トークン。対話的な単発送信向け）
//!   - SES（サービス認証情報。無人の一括送信向け）
//!   - SMTP（Mailpit 開発用）
//!   - Noop（ログのみ）
//! - **起動時に選択**: 一括送信用の実装は `MAIL_TRANSPORT` で起動時に 1 つ選ぶ
//! - **リトライしない**: 失敗の一時的/恒久的の区別は報告用

mod gmail;
mod noop;
mod ses;
mod smtp;

use async_trait::async_trait;
pub use gmail::{DEFAULT_GMAIL_API_BASE_URL, GmailTransport};
use lettre::message::{Mailbox, Message, MultiPart, SinglePart, header::ContentType};
use mailroom_domain::mail::{EmailMessage, SendReceipt, TransportError};
pub use noop::NoopTransport;
pub use ses::SesTransport;
pub use smtp::SmtpTransport;

/// メール送信トレイト
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// メールを 1 通送信する
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError>;
}

/// 差出人の Mailbox を組み立てる（表示名があれば `表示名 <アドレス>`）
pub(crate) fn sender_mailbox(
    from_address: &str,
    display_name: Option<&str>,
) -> Result<Mailbox, TransportError> {
    let address = from_address
        .parse()
        .map_err(|e| TransportError::Permanent(format!("送信元アドレス不正: {e}")))?;
    let name = display_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    Ok(Mailbox::new(name, address))
}

/// RFC 5322 形式のメッセージ（text/plain + text/html の multipart/alternative）を組み立てる
pub(crate) fn build_mime_message(
    from_address: &str,
    message: &EmailMessage,
) -> Result<Message, TransportError> {
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| TransportError::Permanent(format!("宛先アドレス不正: {e}")))?;

    Message::builder()
        .from(sender_mailbox(
            from_address,
            message.from_display_name.as_deref(),
        )?)
        .to(to)
        .subject(&message.subject)
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(message.text_body.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(message.html_body.clone()),
                ),
        )
        .map_err(|e| TransportError::Permanent(format!("メッセージ構築失敗: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage::new(
            "tanaka@example.com",
            "春の新着物件",
            "<p>こんにちは</p>",
            Some("佐藤 花子".to_string()),
        )
    }

    #[test]
    fn test_mimeメッセージに差出人表示名と件名が含まれる() {
        let formatted = build_mime_message("noreply@mailroom.example.com", &message())
            .unwrap()
            .formatted();
        let raw = String::from_utf8_lossy(&formatted);

        assert!(raw.contains("noreply@mailroom.example.com"));
        assert!(raw.contains("tanaka@example.com"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn test_不正な宛先はpermanent() {
        let mut message = message();
        message.to = "bad-email".to_string();

        let result = build_mime_message("noreply@mailroom.example.com", &message);

        assert!(matches!(result, Err(TransportError::Permanent(_))));
    }

    #[test]
    fn test_空の表示名は無視される() {
        let mailbox = sender_mailbox("noreply@mailroom.example.com", Some("  ")).unwrap();
        assert_eq!(mailbox.name, None);
    }
}
