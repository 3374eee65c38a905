//! # CampaignRepository
//!
//! キャンペーンの読み書きを担当するリポジトリ。
//!
//! キャンペーンは配信より前に（このサブシステムの外で）作成される。
//! 配信パイプラインは存在確認と集計カウンターの読み取りに使う。
//! カウンターの更新は [`DeliveryLedger`](super::DeliveryLedger) が配信記録と同一トランザクションで行う。

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{Client, types::AttributeValue};
use mailroom_domain::campaign::{
    Campaign,
    CampaignId,
    CampaignRecord,
    CampaignStats,
    DeliveryCounters,
};

use crate::{
    InfraError,
    dynamodb::{Item, get_datetime, get_m, get_n_or_zero, get_opt_s, get_s, parse_datetime},
};

/// キャンペーンリポジトリトレイト
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// ID でキャンペーンを取得する
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, InfraError>;

    /// キャンペーンを作成する（カウンターは 0 で初期化）
    async fn create(&self, campaign: &Campaign) -> Result<(), InfraError>;
}

/// DynamoDB 実装の CampaignRepository
pub struct DynamoDbCampaignRepository {
    client:     Client,
    table_name: String,
}

impl DynamoDbCampaignRepository {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl CampaignRepository for DynamoDbCampaignRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(%id))]
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, InfraError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.as_str().to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| InfraError::dynamo_db(format!("キャンペーンの取得に失敗: {e}")))?;

        output.item().map(convert_item_to_campaign).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(id = %campaign.id()))]
    async fn create(&self, campaign: &Campaign) -> Result<(), InfraError> {
        let mut item = HashMap::new();
        item.insert(
            "id".to_string(),
            AttributeValue::S(campaign.id().as_str().to_string()),
        );
        item.insert(
            "name".to_string(),
            AttributeValue::S(campaign.name().to_string()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(campaign.created_at().to_rfc3339()),
        );
        item.insert("stats".to_string(), stats_to_attribute(&campaign.stats()));
        item.insert(
            "counters".to_string(),
            counters_to_attribute(&campaign.counters()),
        );

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| {
                let exists = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if exists {
                    InfraError::conflict("Campaign", campaign.id().as_str())
                } else {
                    InfraError::dynamo_db(format!("キャンペーンの作成に失敗: {e}"))
                }
            })?;

        Ok(())
    }
}

/// カウンターを DynamoDB の Map 属性に変換する
pub(crate) fn counters_to_attribute(counters: &DeliveryCounters) -> AttributeValue {
    AttributeValue::M(HashMap::from([
        (
            "delivered".to_string(),
            AttributeValue::N(counters.delivered.to_string()),
        ),
        (
            "pending".to_string(),
            AttributeValue::N(counters.pending.to_string()),
        ),
        (
            "failed".to_string(),
            AttributeValue::N(counters.failed.to_string()),
        ),
    ]))
}

/// 送信統計を DynamoDB の Map 属性に変換する
pub(crate) fn stats_to_attribute(stats: &CampaignStats) -> AttributeValue {
    let mut map = HashMap::from([(
        "emails_sent".to_string(),
        AttributeValue::N(stats.emails_sent.to_string()),
    )]);
    if let Some(last_sent) = stats.last_sent {
        map.insert(
            "last_sent".to_string(),
            AttributeValue::S(last_sent.to_rfc3339()),
        );
    }
    AttributeValue::M(map)
}

/// DynamoDB アイテムを Campaign に変換する
fn convert_item_to_campaign(item: &Item) -> Result<Campaign, InfraError> {
    let id = CampaignId::new(get_s(item, "id")?)?;
    let counters_map = get_m(item, "counters");
    let stats_map = get_m(item, "stats");

    let counters = DeliveryCounters {
        delivered: get_n_or_zero(&counters_map, "delivered")?,
        pending:   get_n_or_zero(&counters_map, "pending")?,
        failed:    get_n_or_zero(&counters_map, "failed")?,
    };
    let last_sent = get_opt_s(&stats_map, "last_sent")
        .map(|s| parse_datetime(&s, "stats.last_sent"))
        .transpose()?;
    let stats = CampaignStats {
        emails_sent: get_n_or_zero(&stats_map, "emails_sent")?,
        last_sent,
    };

    Ok(Campaign::from_db(CampaignRecord {
        id,
        name: get_opt_s(item, "name").unwrap_or_default(),
        created_at: get_datetime(item, "created_at")?,
        stats,
        counters,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DynamoDbCampaignRepository>();
    }

    #[test]
    fn test_アイテムからキャンペーンを復元する() {
        let sent_at = DateTime::from_timestamp(1_772_000_000, 0).unwrap();
        let counters = DeliveryCounters {
            delivered: 4,
            pending:   0,
            failed:    1,
        };
        let stats = CampaignStats {
            emails_sent: 4,
            last_sent:   Some(sent_at),
        };
        let mut item = Item::new();
        item.insert("id".to_string(), AttributeValue::S("spring-2026".to_string()));
        item.insert("name".to_string(), AttributeValue::S("春の新着物件".to_string()));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S("2026-03-01T09:00:00+00:00".to_string()),
        );
        item.insert("counters".to_string(), counters_to_attribute(&counters));
        item.insert("stats".to_string(), stats_to_attribute(&stats));

        let campaign = convert_item_to_campaign(&item).unwrap();

        assert_eq!(campaign.id().as_str(), "spring-2026");
        assert_eq!(campaign.name(), "春の新着物件");
        assert_eq!(campaign.counters(), counters);
        assert_eq!(campaign.stats(), stats);
    }

    #[test]
    fn test_カウンター欠落のアイテムは0として復元する() {
        let mut item = Item::new();
        item.insert("id".to_string(), AttributeValue::S("legacy".to_string()));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S("2026-03-01T09:00:00+00:00".to_string()),
        );

        let campaign = convert_item_to_campaign(&item).unwrap();

        assert_eq!(campaign.counters(), DeliveryCounters::default());
        assert_eq!(campaign.stats(), CampaignStats::default());
    }
}
