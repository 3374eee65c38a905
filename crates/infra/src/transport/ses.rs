//! SES トランスポート実装
//!
//! AWS SES v2 API を使用してメールを送信する。
//! サービス認証情報で動くため、無人の一括送信で使用する。

use async_trait::async_trait;
use aws_sdk_sesv2::{
    Client,
    error::ProvideErrorMetadata,
    types::{Body, Content, Destination, EmailContent, Message},
};
use mailroom_domain::mail::{EmailMessage, SendReceipt, TransportError};

use super::{MailTransport, sender_mailbox};

/// SES トランスポート
pub struct SesTransport {
    client:       Client,
    from_address: String,
}

impl SesTransport {
    /// 新しい SES トランスポートを作成する
    ///
    /// `from_address` は SES で検証済みであること。
    pub fn new(client: Client, from_address: String) -> Self {
        Self {
            client,
            from_address,
        }
    }
}

fn content(data: &str, what: &str) -> Result<Content, TransportError> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|e| TransportError::Permanent(format!("{what}構築失敗: {e}")))
}

#[async_trait]
impl MailTransport for SesTransport {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        let from = sender_mailbox(&self.from_address, message.from_display_name.as_deref())?;
        let destination = Destination::builder().to_addresses(&message.to).build();
        let email_content = EmailContent::builder()
            .simple(
                Message::builder()
                    .subject(content(&message.subject, "件名")?)
                    .body(
                        Body::builder()
                            .html(content(&message.html_body, "HTML 本文")?)
                            .text(content(&message.text_body, "テキスト本文")?)
                            .build(),
                    )
                    .build(),
            )
            .build();

        let output = self
            .client
            .send_email()
            .from_email_address(from.to_string())
            .destination(destination)
            .content(email_content)
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                classify_failure(e.code(), status, format!("SES 送信失敗: {e}"))
            })?;

        Ok(SendReceipt {
            provider_message_id: output.message_id().map(str::to_string),
        })
    }
}

/// SES のエラーコードと HTTP ステータスから失敗を分類する
///
/// 応答が得られなかった場合（接続失敗・タイムアウト）は一時的な失敗とする。
fn classify_failure(code: Option<&str>, status: Option<u16>, detail: String) -> TransportError {
    match code {
        Some("TooManyRequestsException" | "LimitExceededException" | "Throttling") => {
            TransportError::Quota(detail)
        }
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "InvalidClientTokenId"
            | "ExpiredTokenException",
        ) => TransportError::Auth(detail),
        _ => match status {
            None => TransportError::Transient(detail),
            Some(s) if s >= 500 => TransportError::Transient(detail),
            Some(_) => TransportError::Permanent(detail),
        },
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SesTransport>();
    }

    #[rstest]
    #[case(Some("TooManyRequestsException"), Some(429), "quota")]
    #[case(Some("LimitExceededException"), Some(400), "quota")]
    #[case(Some("AccessDeniedException"), Some(403), "auth")]
    #[case(Some("MessageRejected"), Some(400), "permanent")]
    #[case(Some("InternalFailure"), Some(500), "transient")]
    #[case(None, None, "transient")]
    fn test_sesの失敗を分類する(
        #[case] code: Option<&str>,
        #[case] status: Option<u16>,
        #[case] expected: &str,
    ) {
        let error = classify_failure(code, status, "detail".to_string());

        assert_eq!(error.kind_label(), expected);
    }
}
