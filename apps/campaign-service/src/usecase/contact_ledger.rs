//! # 連絡済み台帳の確認
//!
//! 送信前に「このキャンペーンで既に連絡したか」をポイント参照で確認する。
//!
//! 失敗以外の記録（`pending` / `delivered`）があれば送信済みとみなす。
//! 確認と後続の書き込みは原子的ではない。

use std::sync::Arc;

use mailroom_domain::{campaign::CampaignId, delivery::DeliveryRecordId};
use mailroom_infra::{InfraError, repository::DeliveryLedger};

/// 連絡済み台帳
pub struct ContactLedger {
    ledger: Arc<dyn DeliveryLedger>,
}

impl ContactLedger {
    pub fn new(ledger: Arc<dyn DeliveryLedger>) -> Self {
        Self { ledger }
    }

    /// 再送を止める記録があるか
    pub async fn already_sent(
        &self,
        campaign_id: &CampaignId,
        email: &str,
    ) -> Result<bool, InfraError> {
        let record_id = DeliveryRecordId::from_email(email);
        let existing = self.ledger.find_record(campaign_id, &record_id).await?;
        Ok(existing.is_some_and(|record| record.blocks_resend()))
    }
}
