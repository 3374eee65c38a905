//! # DeliveryLedger
//!
//! キャンペーンごとの配信台帳（配信記録の集合）を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **PK = campaign_id, SK = record_id**: 記録 ID はメールアドレスから決定的に導出されるため、
//!   同じ配信先の再処理は同じアイテムを上書きする
//! - **原子的な経路**: 配信記録の Put とキャンペーンカウンターの Update を
//!   `TransactWriteItems` で同時に適用する。カウンターと上書き対象の記録の状態が
//!   「読み取り時のまま」であることを条件とし、同時更新があればトランザクション全体がキャンセルされる
//! - **縮退経路**: 記録のみの Put。カウンターの正確さより可用性を優先する場合に使う
//!
//! 重複確認（[`find_record`](DeliveryLedger::find_record)）と書き込みは原子的ではない。
//! 同じキャンペーンに対する同時実行では、両方が確認をすり抜けうる。

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    Client,
    types::{AttributeValue, Put, TransactWriteItem, Update},
};
use mailroom_domain::{
    campaign::{CampaignId, CampaignStats, DeliveryCounters},
    delivery::{DeliveryRecord, DeliveryRecordId, DeliveryRecordRow, DeliveryStatus},
};

use super::campaign_repository::{counters_to_attribute, stats_to_attribute};
use crate::{
    InfraError,
    dynamodb::{Item, get_datetime, get_opt_s, get_s},
};

/// カウンター更新の内容
///
/// `expected` は読み取り時点のカウンター、`previous` は読み取り時点の既存記録の状態
/// （記録が無ければ `None`）。書き込み時にどちらかが一致しなければ競合とする。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    pub previous: Option<DeliveryStatus>,
    pub expected: DeliveryCounters,
    pub next:     DeliveryCounters,
    pub stats:    CampaignStats,
}

/// 配信台帳リポジトリトレイト
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// 配信記録を取得する（重複確認用のポイント参照）
    async fn find_record(
        &self,
        campaign_id: &CampaignId,
        record_id: &DeliveryRecordId,
    ) -> Result<Option<DeliveryRecord>, InfraError>;

    /// キャンペーンの配信記録を一覧する（記録 ID 順）
    async fn list_records(&self, campaign_id: &CampaignId)
    -> Result<Vec<DeliveryRecord>, InfraError>;

    /// 配信記録とカウンターを 1 トランザクションで書き込む
    ///
    /// カウンターが `update.expected` から、または既存記録の状態が `update.previous` から
    /// 変わっていた場合は [`InfraErrorKind::Conflict`](crate::InfraErrorKind::Conflict) を返す。
    async fn commit_with_counters(
        &self,
        campaign_id: &CampaignId,
        record: &DeliveryRecord,
        update: &CounterUpdate,
    ) -> Result<(), InfraError>;

    /// 配信記録のみを書き込む（カウンターは更新しない）
    async fn put_record(
        &self,
        campaign_id: &CampaignId,
        record: &DeliveryRecord,
    ) -> Result<(), InfraError>;
}

/// DynamoDB 実装の DeliveryLedger
pub struct DynamoDbDeliveryLedger {
    client:           Client,
    deliveries_table: String,
    campaigns_table:  String,
}

impl DynamoDbDeliveryLedger {
    pub fn new(client: Client, deliveries_table: String, campaigns_table: String) -> Self {
        Self {
            client,
            deliveries_table,
            campaigns_table,
        }
    }
}

#[async_trait]
impl DeliveryLedger for DynamoDbDeliveryLedger {
    #[tracing::instrument(skip_all, level = "debug", fields(%campaign_id, %record_id))]
    async fn find_record(
        &self,
        campaign_id: &CampaignId,
        record_id: &DeliveryRecordId,
    ) -> Result<Option<DeliveryRecord>, InfraError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.deliveries_table)
            .key(
                "campaign_id",
                AttributeValue::S(campaign_id.as_str().to_string()),
            )
            .key("record_id", AttributeValue::S(record_id.as_str().to_string()))
            .send()
            .await
            .map_err(|e| InfraError::dynamo_db(format!("配信記録の取得に失敗: {e}")))?;

        output.item().map(convert_item_to_record).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%campaign_id))]
    async fn list_records(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<DeliveryRecord>, InfraError> {
        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.deliveries_table)
                .key_condition_expression("campaign_id = :cid")
                .expression_attribute_values(
                    ":cid",
                    AttributeValue::S(campaign_id.as_str().to_string()),
                )
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| InfraError::dynamo_db(format!("配信記録の一覧取得に失敗: {e}")))?;

            for item in output.items() {
                records.push(convert_item_to_record(item)?);
            }

            match output.last_evaluated_key() {
                Some(key) => start_key = Some(key.clone()),
                None => break,
            }
        }

        Ok(records)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%campaign_id, record_id = %record.id()))]
    async fn commit_with_counters(
        &self,
        campaign_id: &CampaignId,
        record: &DeliveryRecord,
        update: &CounterUpdate,
    ) -> Result<(), InfraError> {
        let put = Put::builder()
            .table_name(&self.deliveries_table)
            .set_item(Some(record_to_item(campaign_id, record)));
        let put = match update.previous {
            None => put.condition_expression("attribute_not_exists(record_id)"),
            Some(previous) => {
                let previous: &'static str = previous.into();
                put.condition_expression("#status = :previous_status")
                    .expression_attribute_names("#status", "status")
                    .expression_attribute_values(
                        ":previous_status",
                        AttributeValue::S(previous.to_string()),
                    )
            }
        };
        let put = put
            .build()
            .map_err(|e| InfraError::dynamo_db(format!("Put 構築エラー: {e}")))?;

        let counters_update = Update::builder()
            .table_name(&self.campaigns_table)
            .key("id", AttributeValue::S(campaign_id.as_str().to_string()))
            .update_expression("SET counters = :next, stats = :stats")
            .condition_expression(
                "counters.delivered = :delivered AND counters.pending = :pending AND counters.failed = :failed",
            )
            .expression_attribute_values(":next", counters_to_attribute(&update.next))
            .expression_attribute_values(":stats", stats_to_attribute(&update.stats))
            .expression_attribute_values(
                ":delivered",
                AttributeValue::N(update.expected.delivered.to_string()),
            )
            .expression_attribute_values(
                ":pending",
                AttributeValue::N(update.expected.pending.to_string()),
            )
            .expression_attribute_values(
                ":failed",
                AttributeValue::N(update.expected.failed.to_string()),
            )
            .build()
            .map_err(|e| InfraError::dynamo_db(format!("Update 構築エラー: {e}")))?;

        self.client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(put).build())
            .transact_items(TransactWriteItem::builder().update(counters_update).build())
            .send()
            .await
            .map_err(|e| {
                let cancelled = e
                    .as_service_error()
                    .map(|se| se.is_transaction_canceled_exception())
                    .unwrap_or(false);
                if cancelled {
                    InfraError::conflict("Campaign", campaign_id.as_str())
                } else {
                    InfraError::dynamo_db(format!("配信記録のトランザクションに失敗: {e}"))
                }
            })?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%campaign_id, record_id = %record.id()))]
    async fn put_record(
        &self,
        campaign_id: &CampaignId,
        record: &DeliveryRecord,
    ) -> Result<(), InfraError> {
        self.client
            .put_item()
            .table_name(&self.deliveries_table)
            .set_item(Some(record_to_item(campaign_id, record)))
            .send()
            .await
            .map_err(|e| InfraError::dynamo_db(format!("配信記録の書き込みに失敗: {e}")))?;

        Ok(())
    }
}

/// 配信記録を DynamoDB アイテムに変換する
fn record_to_item(campaign_id: &CampaignId, record: &DeliveryRecord) -> Item {
    let mut item = HashMap::new();
    item.insert(
        "campaign_id".to_string(),
        AttributeValue::S(campaign_id.as_str().to_string()),
    );
    item.insert(
        "record_id".to_string(),
        AttributeValue::S(record.id().as_str().to_string()),
    );
    item.insert(
        "email".to_string(),
        AttributeValue::S(record.email().to_string()),
    );
    item.insert(
        "name".to_string(),
        AttributeValue::S(record.name().to_string()),
    );
    item.insert(
        "company".to_string(),
        AttributeValue::S(record.company().to_string()),
    );
    let status: &'static str = record.status().into();
    item.insert("status".to_string(), AttributeValue::S(status.to_string()));
    if let Some(reason) = record.reason() {
        item.insert("reason".to_string(), AttributeValue::S(reason.to_string()));
    }
    item.insert(
        "timestamp".to_string(),
        AttributeValue::S(record.timestamp().to_rfc3339()),
    );
    item.insert(
        "updated_at".to_string(),
        AttributeValue::S(record.updated_at().to_rfc3339()),
    );
    item
}

/// DynamoDB アイテムを配信記録に変換する
fn convert_item_to_record(item: &Item) -> Result<DeliveryRecord, InfraError> {
    let row = DeliveryRecordRow {
        id:         get_s(item, "record_id")?,
        email:      get_s(item, "email")?,
        name:       get_opt_s(item, "name").unwrap_or_default(),
        company:    get_opt_s(item, "company").unwrap_or_default(),
        status:     get_s(item, "status")?,
        reason:     get_opt_s(item, "reason"),
        timestamp:  get_datetime(item, "timestamp")?,
        updated_at: get_datetime(item, "updated_at")?,
    };
    DeliveryRecord::from_db(row).map_err(InfraError::from)
}
