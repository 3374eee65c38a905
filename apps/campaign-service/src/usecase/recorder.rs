//! # 配信記録
//!
//! 配信先ごとの配信記録と、キャンペーンの集計カウンターを書き込む。
//!
//! ## 書き込み経路
//!
//! 1. **原子的な経路**: キャンペーンの現在のカウンターと既存の記録を読み、記録の upsert と
//!    カウンターの遷移を 1 トランザクションで適用する → [`RecordOutcome::Committed`]
//! 2. **縮退経路**: 1 が失敗した場合（競合・一時障害）、記録のみを書き込む →
//!    [`RecordOutcome::RecordOnly`]。カウンターの正確さを可用性と引き換えにする
//!
//! 記録 ID はメールアドレスから決定的に導出されるため、記録の書き込みは冪等。
//! 既存の記録を上書きする場合、カウンターは旧状態から新状態へ 1 件移る。
//! 読み取り後にカウンターか記録の状態が変わっていればトランザクションは競合で失敗する。
//!
//! `delivered` の記録を書き込んだ後は、連絡済み通知を別タスクで発行する。
//! 通知の失敗はログに出すだけで、結果には影響しない。

use std::sync::Arc;

use mailroom_domain::{
    campaign::{Campaign, CampaignId},
    clock::Clock,
    delivery::{DeliveryRecord, DeliveryStatus},
    dispatch::RecordOutcome,
};
use mailroom_infra::{
    ContactNotifier,
    InfraError,
    contact_notifier::ContactedEvent,
    repository::{CampaignRepository, CounterUpdate, DeliveryLedger},
};
use mailroom_shared::{
    event_log::{error, event},
    log_business_event,
};

/// 配信記録ユースケース
pub struct DeliveryRecorder {
    campaigns: Arc<dyn CampaignRepository>,
    ledger:    Arc<dyn DeliveryLedger>,
    notifier:  Arc<dyn ContactNotifier>,
    clock:     Arc<dyn Clock>,
}

impl DeliveryRecorder {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        ledger: Arc<dyn DeliveryLedger>,
        notifier: Arc<dyn ContactNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaigns,
            ledger,
            notifier,
            clock,
        }
    }

    /// 配信記録を書き込む
    ///
    /// 原子的な経路と縮退経路の両方が失敗した場合のみエラーを返す。
    pub async fn record(
        &self,
        campaign_id: &CampaignId,
        record: &DeliveryRecord,
    ) -> Result<RecordOutcome, InfraError> {
        let outcome = match self.commit(campaign_id, record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    error.category = error::category::INFRASTRUCTURE,
                    error.kind = error::kind::DATABASE,
                    error = %e,
                    campaign_id = %campaign_id,
                    "カウンターを含む書き込みに失敗したため、記録のみを書き込みます"
                );
                self.ledger.put_record(campaign_id, record).await?;
                log_business_event!(
                    event.category = event::category::DELIVERY,
                    event.action = event::action::DELIVERY_RECORD_DEGRADED,
                    event.entity_type = event::entity_type::DELIVERY_RECORD,
                    event.entity_id = %record.id(),
                    event.result = event::result::SUCCESS,
                    campaign_id = %campaign_id,
                    delivery.status = %record.status(),
                    "配信記録を縮退経路で書き込み"
                );
                RecordOutcome::RecordOnly
            }
        };

        if let RecordOutcome::Committed(counters) = outcome {
            log_business_event!(
                event.category = event::category::DELIVERY,
                event.action = event::action::DELIVERY_RECORDED,
                event.entity_type = event::entity_type::DELIVERY_RECORD,
                event.entity_id = %record.id(),
                event.result = event::result::SUCCESS,
                campaign_id = %campaign_id,
                delivery.status = %record.status(),
                counters.delivered = counters.delivered,
                counters.failed = counters.failed,
                "配信記録を書き込み"
            );
        }

        if record.status() == DeliveryStatus::Delivered {
            self.spawn_contacted_notification(campaign_id, record);
        }

        Ok(outcome)
    }

    /// 記録とカウンターを 1 トランザクションで書き込む
    async fn commit(
        &self,
        campaign_id: &CampaignId,
        record: &DeliveryRecord,
    ) -> Result<RecordOutcome, InfraError> {
        let campaign = self
            .campaigns
            .find_by_id(campaign_id)
            .await?
            .ok_or_else(|| InfraError::unexpected(format!("キャンペーンが見つかりません: {campaign_id}")))?;

        let previous = self
            .ledger
            .find_record(campaign_id, record.id())
            .await?
            .map(|existing| existing.status());

        let update = counter_update(&campaign, previous, record);
        self.ledger
            .commit_with_counters(campaign_id, record, &update)
            .await?;

        Ok(RecordOutcome::Committed(update.next))
    }

    fn spawn_contacted_notification(&self, campaign_id: &CampaignId, record: &DeliveryRecord) {
        let notifier = Arc::clone(&self.notifier);
        let event = ContactedEvent {
            email:        record.email().to_string(),
            campaign_id:  campaign_id.as_str().to_string(),
            contacted_at: self.clock.now(),
        };

        tokio::spawn(async move {
            if let Err(e) = notifier.notify_contacted(&event).await {
                tracing::warn!(
                    error.category = error::category::EXTERNAL_SERVICE,
                    error.kind = error::kind::CONTACT_WEBHOOK,
                    error = %e,
                    campaign_id = %event.campaign_id,
                    "連絡済み通知に失敗"
                );
            }
        });
    }
}

/// 読み取ったキャンペーンと既存記録の状態から、記録 1 件分のカウンター更新を作る
fn counter_update(
    campaign: &Campaign,
    previous: Option<DeliveryStatus>,
    record: &DeliveryRecord,
) -> CounterUpdate {
    let expected = campaign.counters();
    let stats = if record.status() == DeliveryStatus::Delivered {
        campaign.stats().with_delivery(record.updated_at())
    } else {
        campaign.stats()
    };

    CounterUpdate {
        previous,
        expected,
        next: expected.transitioned(previous, record.status()),
        stats,
    }
}
