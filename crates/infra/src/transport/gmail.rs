//! Gmail API トランスポート実装
//!
//! 利用者から委任されたアクセストークンで Gmail API の `messages.send` を呼ぶ。
//! RFC 5322 メッセージを組み立て、base64url（パディングなし）で符号化して 1 通ずつ送る。
//! 利用者ごとの送信クォータの対象。
//!
//! トークンは要求ごとに異なるため、インスタンスは要求ごとに作成する。

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use mailroom_domain::mail::{EmailMessage, SendReceipt, TransportError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{MailTransport, build_mime_message};

/// Gmail API の既定ベース URL
pub const DEFAULT_GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com";

#[derive(Debug, Serialize)]
struct SendRequest {
    raw: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

/// Gmail API トランスポート
pub struct GmailTransport {
    client:       reqwest::Client,
    api_base_url: String,
    access_token: String,
    from_address: String,
}

impl GmailTransport {
    /// 新しい Gmail API トランスポートを作成する
    ///
    /// # 引数
    ///
    /// - `client`: 共有する HTTP クライアント
    /// - `api_base_url`: Gmail API のベース URL（末尾スラッシュなし）
    /// - `access_token`: 利用者から委任された OAuth アクセストークン
    /// - `from_address`: 送信元メールアドレス（委任元アカウントのアドレス）
    pub fn new(
        client: reqwest::Client,
        api_base_url: impl Into<String>,
        access_token: impl Into<String>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            from_address: from_address.into(),
        }
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        let mime = build_mime_message(&self.from_address, message)?;
        let request = SendRequest {
            raw: URL_SAFE_NO_PAD.encode(mime.formatted()),
        };
        let url = format!("{}/gmail/v1/users/me/messages/send", self.api_base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Transient(format!("Gmail API 接続失敗: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: SendResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Transient(format!("Gmail API 応答の解析失敗: {e}")))?;

        Ok(SendReceipt {
            provider_message_id: body.id,
        })
    }
}

/// Gmail API の失敗ステータスを分類する
fn classify_status(status: StatusCode, body: &str) -> TransportError {
    let detail = format!("Gmail API {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => TransportError::Quota(detail),
        s if s.is_server_error() => TransportError::Transient(detail),
        _ => TransportError::Permanent(detail),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GmailTransport>();
    }

    #[rstest]
    #[case(401, "auth")]
    #[case(403, "auth")]
    #[case(429, "quota")]
    #[case(500, "transient")]
    #[case(503, "transient")]
    #[case(400, "permanent")]
    #[case(404, "permanent")]
    fn test_ステータスコードを失敗種別に分類する(#[case] status: u16, #[case] expected: &str) {
        let status = StatusCode::from_u16(status).unwrap();

        assert_eq!(classify_status(status, "").kind_label(), expected);
    }

    #[test]
    fn test_ベースurlの末尾スラッシュを除去する() {
        let transport = GmailTransport::new(
            reqwest::Client::new(),
            "https://gmail.googleapis.com/",
            "token",
            "me@example.com",
        );

        assert_eq!(transport.api_base_url, "https://gmail.googleapis.com");
    }
}
