//! # キャンペーンディスパッチャ
//!
//! 配信先リストを 1 件ずつ順に処理し、集計結果を返す。
//!
//! ## 配信先ごとの処理
//!
//! ```text
//! 配信停止済み？ ──yes──→ UNSUBSCRIBED（送信済みでなければ failed 記録）
//!   │no
//! アドレス不正？ ──yes──→ INVALID_DOMAIN（failed 記録）
//!   │no
//! 送信済み？ ─────yes──→ ALREADY_SENT（記録しない）
//!   │no
//! パーソナライズ → 送信 ──失敗──→ SEND_FAILED（failed 記録）
//!   │成功
//! DELIVERED（delivered 記録）
//! ```
//!
//! ## 設計方針
//!
//! - **逐次処理**: 同時に進行する I/O は常に 1 つ。ワーカープールは持たない
//! - **失敗の隔離**: 配信先ごとのエラーは `errors[]` に変換し、次の配信先へ進む
//! - **リトライしない**: 一時的な失敗もそのまま失敗として集計する
//! - **記録は入力順**: 配信停止の判定は事前に読み込んだ集合で行い、ループは元の入力順に回す
//!
//! 同じキャンペーンに対する同時実行は想定しない。送信済み確認と記録の書き込みが
//! 原子的でないため、同時実行では同じ配信先に二重送信しうる。

use std::sync::Arc;

use mailroom_domain::{
    campaign::CampaignId,
    clock::Clock,
    delivery::DeliveryRecord,
    dispatch::{DispatchRunId, DispatchStage, DispatchSummary, RecipientOutcome},
    mail::{Consultant, EmailMessage, EmailSubject},
    recipient::{Recipient, has_valid_domain},
};
use mailroom_infra::{MailTransport, repository::CampaignRepository};
use mailroom_shared::{
    event_log::{error, event},
    log_business_event,
};
use tracing::Instrument;

use super::{
    contact_ledger::ContactLedger,
    personalizer::{PersonalizeInput, TemplatePersonalizer},
    recorder::DeliveryRecorder,
    unsubscribe_filter::{UnsubscribeFilter, UnsubscribeSet},
};
use crate::error::CampaignError;

/// 記録上のスキップ理由
const REASON_UNSUBSCRIBED: &str = "unsubscribed";
const REASON_INVALID_DOMAIN: &str = "invalid_domain";

/// ディスパッチの入力
#[derive(Debug, Clone)]
pub struct DispatchInput {
    pub campaign_id: CampaignId,
    pub recipients:  Vec<Recipient>,
    pub subject:     EmailSubject,
    pub html:        String,
    pub consultant:  Consultant,
    /// トラッキングと絶対 URL 化のベース URL
    pub base_url:    Option<String>,
}

/// キャンペーンディスパッチャ
pub struct CampaignDispatcher {
    campaigns:          Arc<dyn CampaignRepository>,
    unsubscribe_filter: UnsubscribeFilter,
    contact_ledger:     ContactLedger,
    personalizer:       TemplatePersonalizer,
    transport:          Arc<dyn MailTransport>,
    recorder:           DeliveryRecorder,
    clock:              Arc<dyn Clock>,
}

impl CampaignDispatcher {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        unsubscribe_filter: UnsubscribeFilter,
        contact_ledger: ContactLedger,
        personalizer: TemplatePersonalizer,
        transport: Arc<dyn MailTransport>,
        recorder: DeliveryRecorder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaigns,
            unsubscribe_filter,
            contact_ledger,
            personalizer,
            transport,
            recorder,
            clock,
        }
    }

    /// 配信ランを実行する
    ///
    /// キャンペーンが存在しない場合と、配信可能な配信先が残らない場合は
    /// 送信前に `NotFound` を返す。それ以外は常に集計結果を返す。
    pub async fn dispatch(&self, input: DispatchInput) -> Result<DispatchSummary, CampaignError> {
        if input.recipients.is_empty() {
            return Err(CampaignError::Validation("配信先は 1 件以上必要です".to_string()));
        }
        if input.html.trim().is_empty() {
            return Err(CampaignError::Validation("本文は必須です".to_string()));
        }

        if self.campaigns.find_by_id(&input.campaign_id).await?.is_none() {
            return Err(CampaignError::NotFound(format!(
                "キャンペーンが見つかりません: {}",
                input.campaign_id
            )));
        }

        let unsubscribed = self.unsubscribe_filter.load().await;
        let deliverable = input
            .recipients
            .iter()
            .filter(|r| has_valid_domain(&r.email) && !unsubscribed.contains(&r.email))
            .count();
        if deliverable == 0 {
            return Err(CampaignError::NotFound(
                "配信停止とアドレス検証の後に配信可能な配信先が残っていません".to_string(),
            ));
        }

        let run_id = DispatchRunId::new();
        let span = tracing::info_span!(
            "dispatch",
            campaign_id = %input.campaign_id,
            run_id = %run_id
        );

        self.run(&input, &unsubscribed, deliverable)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        input: &DispatchInput,
        unsubscribed: &UnsubscribeSet,
        deliverable: usize,
    ) -> Result<DispatchSummary, CampaignError> {
        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::DISPATCH_STARTED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %input.campaign_id,
            event.result = event::result::SUCCESS,
            dispatch.total = input.recipients.len(),
            dispatch.deliverable = deliverable,
            "配信ラン開始"
        );

        let mut summary = DispatchSummary::new(input.recipients.len());
        for recipient in &input.recipients {
            let outcome = self
                .process_recipient(input, recipient, unsubscribed, &mut summary)
                .await;
            summary.tally(&outcome);
        }

        let result = if summary.failed == 0 {
            event::result::SUCCESS
        } else {
            event::result::FAILURE
        };
        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::DISPATCH_COMPLETED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %input.campaign_id,
            event.result = result,
            dispatch.successful = summary.successful,
            dispatch.failed = summary.failed,
            dispatch.skipped = summary.skipped.total(),
            "配信ラン完了"
        );

        Ok(summary)
    }

    /// 配信先 1 件を終端状態まで処理する（エラーは `summary.errors` に積む）
    async fn process_recipient(
        &self,
        input: &DispatchInput,
        recipient: &Recipient,
        unsubscribed: &UnsubscribeSet,
        summary: &mut DispatchSummary,
    ) -> RecipientOutcome {
        let email = recipient.normalized_email();
        let campaign_id = &input.campaign_id;

        if unsubscribed.contains(&email) {
            self.log_skipped(&email, REASON_UNSUBSCRIBED);
            // 送信済みの記録は配信停止で上書きしない
            match self.contact_ledger.already_sent(campaign_id, &email).await {
                Ok(true) => {}
                Ok(false) => {
                    self.record_failed(campaign_id, recipient, REASON_UNSUBSCRIBED, summary)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(
                        error.category = error::category::INFRASTRUCTURE,
                        error.kind = error::kind::DATABASE,
                        error = %e,
                        recipient = %email,
                        "送信済み確認に失敗したため、配信停止の記録を書き込みません"
                    );
                }
            }
            return RecipientOutcome::Unsubscribed;
        }

        if !has_valid_domain(&email) {
            self.log_skipped(&email, REASON_INVALID_DOMAIN);
            summary.push_error(
                &recipient.email,
                DispatchStage::Validation,
                "メールアドレスの形式が不正です",
            );
            self.record_failed(campaign_id, recipient, REASON_INVALID_DOMAIN, summary)
                .await;
            return RecipientOutcome::InvalidDomain;
        }

        match self.contact_ledger.already_sent(campaign_id, &email).await {
            Ok(true) => {
                self.log_skipped(&email, "already_sent");
                return RecipientOutcome::AlreadySent;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    error.category = error::category::INFRASTRUCTURE,
                    error.kind = error::kind::DATABASE,
                    error = %e,
                    recipient = %email,
                    "送信済み確認に失敗"
                );
                let reason = format!("送信済み確認に失敗しました: {e}");
                summary.push_error(&email, DispatchStage::Ledger, reason.clone());
                return RecipientOutcome::SendFailed { reason };
            }
        }

        let html = match self.personalizer.personalize(&PersonalizeInput {
            template:    &input.html,
            recipient,
            consultant:  &input.consultant,
            campaign_id: Some(campaign_id),
            base_url:    input.base_url.as_deref(),
        }) {
            Ok(html) => html,
            Err(e) => {
                tracing::error!(
                    error.category = error::category::INFRASTRUCTURE,
                    error.kind = error::kind::PERSONALIZATION,
                    error = %e,
                    recipient = %email,
                    "パーソナライズに失敗"
                );
                let reason = e.to_string();
                summary.push_error(&email, DispatchStage::Personalize, reason.clone());
                self.record_failed(campaign_id, recipient, &reason, summary)
                    .await;
                return RecipientOutcome::SendFailed { reason };
            }
        };

        let message = EmailMessage::new(
            email.clone(),
            input.subject.as_str(),
            html,
            input.consultant.name.clone(),
        );

        match self.transport.send(&message).await {
            Ok(receipt) => {
                log_business_event!(
                    event.category = event::category::DELIVERY,
                    event.action = event::action::DELIVERY_SENT,
                    event.entity_type = event::entity_type::DELIVERY_RECORD,
                    event.result = event::result::SUCCESS,
                    recipient = %email,
                    provider_message_id = receipt.provider_message_id.as_deref().unwrap_or(""),
                    "配信成功"
                );
                let record = DeliveryRecord::delivered(recipient, self.clock.now());
                self.record(campaign_id, &record, summary).await;
                RecipientOutcome::Delivered
            }
            Err(e) => {
                log_business_event!(
                    event.category = event::category::DELIVERY,
                    event.action = event::action::DELIVERY_FAILED,
                    event.entity_type = event::entity_type::DELIVERY_RECORD,
                    event.result = event::result::FAILURE,
                    recipient = %email,
                    error.category = error::category::EXTERNAL_SERVICE,
                    error.kind = error::kind::MAIL_TRANSPORT,
                    transport.failure = e.kind_label(),
                    transport.transient = e.is_transient(),
                    error = %e,
                    "配信失敗"
                );
                let reason = e.to_string();
                summary.push_error(&email, DispatchStage::Send, reason.clone());
                self.record_failed(campaign_id, recipient, &reason, summary)
                    .await;
                RecipientOutcome::SendFailed { reason }
            }
        }
    }

    async fn record_failed(
        &self,
        campaign_id: &CampaignId,
        recipient: &Recipient,
        reason: &str,
        summary: &mut DispatchSummary,
    ) {
        let record = DeliveryRecord::failed(recipient, reason, self.clock.now());
        self.record(campaign_id, &record, summary).await;
    }

    /// 記録の失敗は配信結果を変えず、`errors[]` にのみ積む
    async fn record(
        &self,
        campaign_id: &CampaignId,
        record: &DeliveryRecord,
        summary: &mut DispatchSummary,
    ) {
        if let Err(e) = self.recorder.record(campaign_id, record).await {
            tracing::error!(
                error.category = error::category::INFRASTRUCTURE,
                error.kind = error::kind::DATABASE,
                error = %e,
                recipient = %record.email(),
                "配信記録の書き込みに失敗"
            );
            summary.push_error(
                record.email(),
                DispatchStage::Record,
                format!("配信記録の書き込みに失敗しました: {e}"),
            );
        }
    }

    fn log_skipped(&self, email: &str, reason: &str) {
        log_business_event!(
            event.category = event::category::DELIVERY,
            event.action = event::action::DELIVERY_SKIPPED,
            event.entity_type = event::entity_type::DELIVERY_RECORD,
            event.result = event::result::SKIPPED,
            recipient = %email,
            skip.reason = reason,
            "配信をスキップ"
        );
    }
}
