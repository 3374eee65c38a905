//! # 単発テンプレート送信
//!
//! キャンペーン台帳を使わない、テンプレート 1 つの送信。
//! 呼び出し元ユーザーの委任認証情報（Bearer トークン）で送信する。
//!
//! - `test`: コンサルタント自身のアドレスに件名 `[TEST] ` 付きで 1 通だけ送る。送信済み記録は残さない
//! - `bulk`: 配信停止フィルタ → アドレス検証 → 送信済み記録による重複排除 → 送信 → 送信済み記録。
//!   フィルタと検証の後に配信先が残らなければ送信せず `NotFound` を返す
//!
//! 認証エラーは送信不可能を意味するため、その時点でリクエスト全体を中断する。

use std::sync::Arc;

use mailroom_domain::{
    clock::Clock,
    mail::{Consultant, EmailMessage, EmailSubject, TransportError},
    recipient::{Recipient, has_valid_domain},
    sent_record::{SentRecord, TemplateKey},
};
use mailroom_infra::{MailTransport, repository::SentRecordRepository};
use mailroom_shared::{
    event_log::{error, event},
    log_business_event,
};
use serde::{Deserialize, Serialize};

use super::{
    personalizer::{PersonalizeInput, TemplatePersonalizer},
    template_renderer::TemplateRenderer,
    unsubscribe_filter::UnsubscribeFilter,
};
use crate::error::CampaignError;

const TEST_SUBJECT_PREFIX: &str = "[TEST] ";

/// 送信アクション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SendAction {
    Test,
    Bulk,
}

/// 単発テンプレート送信の入力
#[derive(Debug, Clone)]
pub struct TemplateSendInput {
    pub action:      SendAction,
    pub subject:     EmailSubject,
    pub template_id: String,
    pub params:      serde_json::Value,
    pub recipients:  Vec<Recipient>,
    pub consultant:  Consultant,
    pub base_url:    Option<String>,
}

/// 配信先ごとのエラー
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendErrorEntry {
    pub email:  String,
    pub reason: String,
}

/// 単発テンプレート送信の結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateSendResult {
    pub success: bool,
    pub sent:    usize,
    pub failed:  usize,
    pub errors:  Vec<SendErrorEntry>,
}

impl TemplateSendResult {
    fn fail(&mut self, email: &str, reason: impl Into<String>) {
        self.failed += 1;
        self.errors.push(SendErrorEntry {
            email:  email.to_string(),
            reason: reason.into(),
        });
    }
}

/// 単発テンプレート送信ユースケース
pub struct TemplateSendUseCase {
    renderer:           Arc<dyn TemplateRenderer>,
    unsubscribe_filter: UnsubscribeFilter,
    sent_records:       Arc<dyn SentRecordRepository>,
    personalizer:       TemplatePersonalizer,
    clock:              Arc<dyn Clock>,
}

impl TemplateSendUseCase {
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        unsubscribe_filter: UnsubscribeFilter,
        sent_records: Arc<dyn SentRecordRepository>,
        personalizer: TemplatePersonalizer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            renderer,
            unsubscribe_filter,
            sent_records,
            personalizer,
            clock,
        }
    }

    /// テンプレートを描画して送信する
    ///
    /// `transport` はリクエストごとに呼び出し元の認証情報で作られる。
    pub async fn execute(
        &self,
        input: TemplateSendInput,
        transport: &dyn MailTransport,
    ) -> Result<TemplateSendResult, CampaignError> {
        if input.template_id.trim().is_empty() {
            return Err(CampaignError::Validation("テンプレート ID は必須です".to_string()));
        }
        let template = self.renderer.render(&input.template_id, &input.params)?;

        let result = match input.action {
            SendAction::Test => self.send_test(&input, &template, transport).await?,
            SendAction::Bulk => self.send_bulk(&input, &template, transport).await?,
        };

        let action: &'static str = input.action.into();
        let outcome = if result.success {
            event::result::SUCCESS
        } else {
            event::result::FAILURE
        };
        log_business_event!(
            event.category = event::category::TEMPLATE_SEND,
            event.action = event::action::TEMPLATE_SEND_COMPLETED,
            event.entity_type = event::entity_type::SENT_RECORD,
            event.result = outcome,
            template_send.action = action,
            template_send.template_id = %input.template_id,
            template_send.sent = result.sent,
            template_send.failed = result.failed,
            "テンプレート送信完了"
        );

        Ok(result)
    }

    async fn send_test(
        &self,
        input: &TemplateSendInput,
        template: &str,
        transport: &dyn MailTransport,
    ) -> Result<TemplateSendResult, CampaignError> {
        let to = input
            .consultant
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                CampaignError::Validation("テスト送信にはコンサルタントのメールアドレスが必要です".to_string())
            })?;

        let mut recipient = Recipient::new(to);
        recipient.name = input.consultant.name.clone();
        let subject = format!("{TEST_SUBJECT_PREFIX}{}", input.subject);

        let mut result = TemplateSendResult::default();
        self.send_one(input, template, &recipient, &subject, transport, &mut result)
            .await?;
        result.success = result.failed == 0;
        Ok(result)
    }

    async fn send_bulk(
        &self,
        input: &TemplateSendInput,
        template: &str,
        transport: &dyn MailTransport,
    ) -> Result<TemplateSendResult, CampaignError> {
        if input.recipients.is_empty() {
            return Err(CampaignError::Validation("配信先は 1 件以上必要です".to_string()));
        }

        let filtered = self
            .unsubscribe_filter
            .filter(input.recipients.clone())
            .await;
        tracing::debug!(removed = filtered.removed, "配信停止済みの配信先を除外");
        let deliverable = filtered
            .recipients
            .iter()
            .filter(|r| has_valid_domain(&r.email))
            .count();
        if deliverable == 0 {
            return Err(CampaignError::NotFound(
                "配信停止とアドレス検証の後に配信可能な配信先が残っていません".to_string(),
            ));
        }
        let template_key = TemplateKey::new(&input.template_id, input.subject.as_str());

        let mut result = TemplateSendResult::default();
        for recipient in &filtered.recipients {
            let email = recipient.normalized_email();

            if !has_valid_domain(&email) {
                result.fail(&recipient.email, "メールアドレスの形式が不正です");
                continue;
            }

            match self.sent_records.exists(&email, &template_key).await {
                Ok(true) => {
                    tracing::debug!(recipient = %email, template_key = %template_key, "送信済みのためスキップ");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        error.category = error::category::INFRASTRUCTURE,
                        error.kind = error::kind::DATABASE,
                        error = %e,
                        recipient = %email,
                        "送信済み記録の確認に失敗"
                    );
                    result.fail(&email, format!("送信済み記録の確認に失敗しました: {e}"));
                    continue;
                }
            }

            let delivered = self
                .send_one(
                    input,
                    template,
                    recipient,
                    input.subject.as_str(),
                    transport,
                    &mut result,
                )
                .await?;
            if !delivered {
                continue;
            }

            let record = SentRecord::new(
                &email,
                template_key.clone(),
                input.subject.as_str(),
                self.clock.now(),
            );
            if let Err(e) = self.sent_records.record(&record).await {
                tracing::warn!(
                    error.category = error::category::INFRASTRUCTURE,
                    error.kind = error::kind::DATABASE,
                    error = %e,
                    recipient = %email,
                    "送信済み記録の書き込みに失敗"
                );
            }
        }

        result.success = result.failed == 0;
        Ok(result)
    }

    /// 1 通送信して結果に反映する（送信できたら `true`）
    ///
    /// 認証エラーのみ `Err` を返してリクエスト全体を中断する。
    async fn send_one(
        &self,
        input: &TemplateSendInput,
        template: &str,
        recipient: &Recipient,
        subject: &str,
        transport: &dyn MailTransport,
        result: &mut TemplateSendResult,
    ) -> Result<bool, CampaignError> {
        let email = recipient.normalized_email();

        let html = match self.personalizer.personalize(&PersonalizeInput {
            template,
            recipient,
            consultant: &input.consultant,
            campaign_id: None,
            base_url: input.base_url.as_deref(),
        }) {
            Ok(html) => html,
            Err(e) => {
                result.fail(&email, e.to_string());
                return Ok(false);
            }
        };

        let message = EmailMessage::new(
            email.clone(),
            subject,
            html,
            input.consultant.name.clone(),
        );
        match transport.send(&message).await {
            Ok(_) => {
                result.sent += 1;
                Ok(true)
            }
            Err(TransportError::Auth(detail)) => {
                tracing::warn!(
                    error.category = error::category::EXTERNAL_SERVICE,
                    error.kind = error::kind::MAIL_TRANSPORT,
                    detail = %detail,
                    "送信の認証に失敗したため中断します"
                );
                Err(CampaignError::Unauthorized(
                    "メール送信の認証情報が無効です".to_string(),
                ))
            }
            Err(e) => {
                tracing::warn!(
                    error.category = error::category::EXTERNAL_SERVICE,
                    error.kind = error::kind::MAIL_TRANSPORT,
                    transport.failure = e.kind_label(),
                    error = %e,
                    recipient = %email,
                    "送信失敗"
                );
                result.fail(&email, e.to_string());
                Ok(false)
            }
        }
    }
}
