//! # 単発テンプレート送信ハンドラ
//!
//! ## エンドポイント
//!
//! - `POST /emails/send` - テンプレートを描画して送信する（`action`: `test` / `bulk`）
//!
//! 呼び出し元の委任トークンを `Authorization: Bearer <token>` で受け取り、
//! リクエストごとに送信トランスポートを作る。

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use mailroom_domain::{
    mail::{Consultant, EmailSubject},
    recipient::Recipient,
};
use mailroom_infra::{GmailTransport, MailTransport};
use serde::Deserialize;

use crate::{
    error::CampaignError,
    usecase::{SendAction, TemplateSendInput, TemplateSendUseCase},
};

/// 委任トークンから送信トランスポートを作るファクトリ
pub trait DelegatedTransportFactory: Send + Sync {
    fn create(&self, access_token: &str, from_address: &str) -> Box<dyn MailTransport>;
}

/// Gmail API のトランスポートを作るファクトリ
pub struct GmailTransportFactory {
    client:       reqwest::Client,
    api_base_url: String,
}

impl GmailTransportFactory {
    pub fn new(client: reqwest::Client, api_base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into(),
        }
    }
}

impl DelegatedTransportFactory for GmailTransportFactory {
    fn create(&self, access_token: &str, from_address: &str) -> Box<dyn MailTransport> {
        Box::new(GmailTransport::new(
            self.client.clone(),
            self.api_base_url.as_str(),
            access_token,
            from_address,
        ))
    }
}

/// 単発送信 API の共有状態
pub struct EmailState {
    pub usecase:              TemplateSendUseCase,
    pub transports:           Arc<dyn DelegatedTransportFactory>,
    /// コンサルタントのアドレスが無い場合の送信元
    pub default_from_address: String,
}

/// 単発送信のリクエスト
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTemplateRequest {
    pub action:      SendAction,
    pub subject:     Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub params:      serde_json::Value,
    #[serde(default)]
    pub recipients:  Vec<Recipient>,
    #[serde(default)]
    pub consultant:  Consultant,
    pub base_url:    Option<String>,
}

/// POST /emails/send
///
/// ## レスポンス
///
/// - `200 OK`: `{success, sent, failed, errors}`
/// - `400 Bad Request`: 件名・テンプレート・配信先の欠落
/// - `401 Unauthorized`: Bearer トークンが無い、または送信時に拒否された
/// - `404 Not Found`: 一括送信で配信停止とアドレス検証の後に配信先が残らない
pub async fn send_template_email(
    State(state): State<Arc<EmailState>>,
    headers: HeaderMap,
    Json(req): Json<SendTemplateRequest>,
) -> Result<impl IntoResponse, CampaignError> {
    let subject = EmailSubject::new(req.subject.unwrap_or_default())?;
    let template_id = req
        .template_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| CampaignError::Validation("テンプレート ID は必須です".to_string()))?;
    if req.action == SendAction::Bulk && req.recipients.is_empty() {
        return Err(CampaignError::Validation("配信先は 1 件以上必要です".to_string()));
    }

    let access_token = bearer_token(&headers)
        .ok_or_else(|| CampaignError::Unauthorized("Bearer トークンが必要です".to_string()))?;

    let from_address = req
        .consultant
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .unwrap_or(state.default_from_address.as_str())
        .to_string();
    let transport = state.transports.create(access_token, &from_address);

    let input = TemplateSendInput {
        action: req.action,
        subject,
        template_id,
        params: req.params,
        recipients: req.recipients,
        consultant: req.consultant,
        base_url: req.base_url,
    };
    let result = state.usecase.execute(input, transport.as_ref()).await?;

    Ok((StatusCode::OK, Json(result)))
}

/// `Authorization: Bearer <token>` からトークンを取り出す
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::{Router, body::Body, http::Request, routing::post};
    use chrono::DateTime;
    use mailroom_domain::{
        clock::{Clock, FixedClock},
        mail::TransportError,
    };
    use mailroom_infra::mock::{
        MockMailTransport,
        MockSentRecordRepository,
        MockUnsubscribeRepository,
    };
    use mailroom_shared::ErrorResponse;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tower::ServiceExt;

    use super::*;
    use crate::usecase::{
        PersonalizerConfig,
        TemplatePersonalizer,
        TeraTemplateRenderer,
        UnsubscribeFilter,
    };

    /// 作成要求を記録し、共有のモックトランスポートを返すファクトリ
    #[derive(Default)]
    struct StubTransportFactory {
        transport: MockMailTransport,
        requests:  Mutex<Vec<(String, String)>>,
    }

    impl DelegatedTransportFactory for StubTransportFactory {
        fn create(&self, access_token: &str, from_address: &str) -> Box<dyn MailTransport> {
            self.requests
                .lock()
                .unwrap()
                .push((access_token.to_string(), from_address.to_string()));
            Box::new(self.transport.clone())
        }
    }

    fn create_test_app(factory: Arc<StubTransportFactory>) -> Router {
        let clock = Arc::new(FixedClock::new(
            DateTime::from_timestamp(1_772_355_600, 0).unwrap(),
        )) as Arc<dyn Clock>;
        let usecase = TemplateSendUseCase::new(
            Arc::new(TeraTemplateRenderer::new().unwrap()),
            UnsubscribeFilter::new(Arc::new(MockUnsubscribeRepository::new())),
            Arc::new(MockSentRecordRepository::new()),
            TemplatePersonalizer::new(PersonalizerConfig::new("https://mail.example.com")),
            clock,
        );
        let state = Arc::new(EmailState {
            usecase,
            transports: factory,
            default_from_address: "noreply@mailroom.example.com".to_string(),
        });

        Router::new()
            .route("/emails/send", post(send_template_email))
            .with_state(state)
    }

    fn send_request(token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(axum::http::Method::POST)
            .uri("/emails/send")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    fn bulk_body() -> serde_json::Value {
        serde_json::json!({
            "action": "bulk",
            "subject": "Nouveautés de mars",
            "templateId": "newsletter",
            "params": {"headline": "Nouveautés de mars"},
            "recipients": [{"email": "a@example.com"}, {"email": "b@example.com"}],
            "consultant": {"name": "Claire Martin", "email": "claire@agency.example.com"}
        })
    }

    async fn response_body<T: serde::de::DeserializeOwned>(
        response: axum::http::Response<Body>,
    ) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_send_一括送信の結果を返す() {
        let factory = Arc::new(StubTransportFactory::default());
        let sut = create_test_app(factory.clone());

        let response = sut
            .oneshot(send_request(Some("token-123"), bulk_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = response_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["sent"], 2);
        assert_eq!(body["failed"], 0);
        assert_eq!(
            *factory.requests.lock().unwrap(),
            vec![(
                "token-123".to_string(),
                "claire@agency.example.com".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_post_send_トークンが無ければ401() {
        let factory = Arc::new(StubTransportFactory::default());
        let sut = create_test_app(factory.clone());

        let response = sut.oneshot(send_request(None, bulk_body())).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = response_body(response).await;
        assert_eq!(body.status, 401);
        assert!(factory.transport.sent_to().is_empty());
    }

    #[tokio::test]
    async fn test_post_send_送信時の認証エラーは401() {
        let factory = Arc::new(StubTransportFactory::default());
        factory
            .transport
            .fail_for("a@example.com", TransportError::Auth("invalid_grant".to_string()));
        let sut = create_test_app(factory.clone());

        let response = sut
            .oneshot(send_request(Some("expired"), bulk_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(factory.transport.sent_to(), vec!["a@example.com"]);
    }

    #[tokio::test]
    async fn test_post_send_配信可能な配信先が無ければ404() {
        let factory = Arc::new(StubTransportFactory::default());
        let sut = create_test_app(factory.clone());
        let mut body = bulk_body();
        body["recipients"] =
            serde_json::json!([{"email": "bad-email"}, {"email": "user@localhost"}]);

        let response = sut
            .oneshot(send_request(Some("token-123"), body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorResponse = response_body(response).await;
        assert_eq!(body.status, 404);
        assert!(factory.transport.sent_to().is_empty());
    }

    #[rstest]
    #[case::件名なし("subject")]
    #[case::テンプレートなし("templateId")]
    #[case::配信先なし("recipients")]
    #[tokio::test]
    async fn test_post_send_必須項目が無ければ400(#[case] missing: &str) {
        let factory = Arc::new(StubTransportFactory::default());
        let sut = create_test_app(factory.clone());
        let mut body = bulk_body();
        body.as_object_mut().unwrap().remove(missing);

        let response = sut
            .oneshot(send_request(Some("token-123"), body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(factory.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_send_テスト送信はコンサルタントにのみ送る() {
        let factory = Arc::new(StubTransportFactory::default());
        let sut = create_test_app(factory.clone());
        let mut body = bulk_body();
        body["action"] = serde_json::json!("test");

        let response = sut
            .oneshot(send_request(Some("token-123"), body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = response_body(response).await;
        assert_eq!(body["sent"], 1);
        assert_eq!(
            factory.transport.sent_to(),
            vec!["claire@agency.example.com"]
        );
    }

    #[rstest]
    #[case(Some("Bearer abc"), Some("abc"))]
    #[case(Some("bearer abc "), Some("abc"))]
    #[case(Some("Basic abc"), None)]
    #[case(Some("Bearer "), None)]
    #[case(None, None)]
    fn test_bearer_tokenの取り出し(#[case] header: Option<&str>, #[case] expected: Option<&str>) {
        let mut headers = HeaderMap::new();
        if let Some(value) = header {
            headers.insert(AUTHORIZATION, value.parse().unwrap());
        }

        assert_eq!(bearer_token(&headers), expected);
    }
}
