//! # キャンペーン
//!
//! 一括配信の単位となるキャンペーンと、その集計カウンターを定義する。
//!
//! ## ドメイン用語
//!
//! | 型 | ドメイン用語 | 説明 |
//! |---|------------|------|
//! | [`Campaign`] | キャンペーン | 名前付きの永続化された一括送信操作 |
//! | [`DeliveryCounters`] | 配信カウンター | 状態別（delivered / pending / failed）の配信記録数 |
//! | [`CampaignStats`] | 配信統計 | 送信成功数と最終送信日時 |
//!
//! ## 設計方針
//!
//! - **帯域外作成**: キャンペーンは配信前に別経路で作成される。配信パイプラインは
//!   存在確認と集計カウンターの更新のみを行う
//! - **カウンターの整合性**: カウンターは配信記録の状態別件数と一致する。記録の上書きでは
//!   旧状態から新状態へ 1 件移す。保証されるのは記録の原子的書き込みが成功した場合のみ

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryStatus;

define_validated_string! {
    /// キャンペーン ID
    ///
    /// ドキュメントストア上のキーとして使われる不透明な文字列。
    /// 配信パイプライン外で採番される。
    pub struct CampaignId {
        label: "キャンペーン ID",
        max_length: 128,
    }
}

/// 状態別の配信カウンター
///
/// キャンペーンドキュメントの `counters` サブレコードに対応する。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounters {
    pub delivered: u64,
    pub pending:   u64,
    pub failed:    u64,
}

impl DeliveryCounters {
    /// 指定した状態のカウンターを 1 増やした値を返す
    pub fn incremented(self, status: DeliveryStatus) -> Self {
        let mut next = self;
        match status {
            DeliveryStatus::Delivered => next.delivered += 1,
            DeliveryStatus::Pending => next.pending += 1,
            DeliveryStatus::Failed => next.failed += 1,
        }
        next
    }

    /// 記録の状態遷移を反映した値を返す
    ///
    /// 上書きされる記録があれば、その状態のカウンターを 1 減らしてから新しい状態を加算する。
    /// 同じ状態への上書きではカウンターは変わらない。
    pub fn transitioned(self, previous: Option<DeliveryStatus>, next: DeliveryStatus) -> Self {
        let mut counters = self;
        if let Some(previous) = previous {
            let bucket = match previous {
                DeliveryStatus::Delivered => &mut counters.delivered,
                DeliveryStatus::Pending => &mut counters.pending,
                DeliveryStatus::Failed => &mut counters.failed,
            };
            *bucket = bucket.saturating_sub(1);
        }
        counters.incremented(next)
    }

    /// 指定した状態のカウンター値を返す
    pub fn count_of(&self, status: DeliveryStatus) -> u64 {
        match status {
            DeliveryStatus::Delivered => self.delivered,
            DeliveryStatus::Pending => self.pending,
            DeliveryStatus::Failed => self.failed,
        }
    }

    /// カウンターの合計
    pub fn total(&self) -> u64 {
        self.delivered + self.pending + self.failed
    }
}

/// キャンペーンの配信統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    /// 送信に成功したメール数
    pub emails_sent: u64,
    /// 最後に送信に成功した日時
    pub last_sent:   Option<DateTime<Utc>>,
}

impl CampaignStats {
    /// 1 件の送信成功を反映した統計を返す
    pub fn with_delivery(self, sent_at: DateTime<Utc>) -> Self {
        Self {
            emails_sent: self.emails_sent + 1,
            last_sent:   Some(sent_at),
        }
    }
}

/// キャンペーン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Campaign {
    id:         CampaignId,
    name:       String,
    created_at: DateTime<Utc>,
    stats:      CampaignStats,
    counters:   DeliveryCounters,
}

/// DB から復元する際のキャンペーンデータ
#[derive(Debug, Clone)]
pub struct CampaignRecord {
    pub id:         CampaignId,
    pub name:       String,
    pub created_at: DateTime<Utc>,
    pub stats:      CampaignStats,
    pub counters:   DeliveryCounters,
}

impl Campaign {
    /// 新しいキャンペーンを作成する（カウンターはすべて 0）
    pub fn new(id: CampaignId, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at,
            stats: CampaignStats::default(),
            counters: DeliveryCounters::default(),
        }
    }

    /// DB のレコードから復元する
    pub fn from_db(record: CampaignRecord) -> Self {
        Self {
            id:         record.id,
            name:       record.name,
            created_at: record.created_at,
            stats:      record.stats,
            counters:   record.counters,
        }
    }

    pub fn id(&self) -> &CampaignId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn stats(&self) -> CampaignStats {
        self.stats
    }

    pub fn counters(&self) -> DeliveryCounters {
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DeliveryStatus::Delivered, DeliveryCounters { delivered: 3, pending: 1, failed: 2 })]
    #[case(DeliveryStatus::Pending, DeliveryCounters { delivered: 2, pending: 2, failed: 2 })]
    #[case(DeliveryStatus::Failed, DeliveryCounters { delivered: 2, pending: 1, failed: 3 })]
    fn test_incrementedは指定状態のみ増やす(
        #[case] status: DeliveryStatus,
        #[case] expected: DeliveryCounters,
    ) {
        let counters = DeliveryCounters {
            delivered: 2,
            pending:   1,
            failed:    2,
        };

        assert_eq!(counters.incremented(status), expected);
        assert_eq!(counters.incremented(status).total(), counters.total() + 1);
    }

    #[rstest]
    #[case::新規記録(None, DeliveryStatus::Delivered, DeliveryCounters { delivered: 3, pending: 1, failed: 2 })]
    #[case::失敗から成功(Some(DeliveryStatus::Failed), DeliveryStatus::Delivered, DeliveryCounters { delivered: 3, pending: 1, failed: 1 })]
    #[case::成功から失敗(Some(DeliveryStatus::Delivered), DeliveryStatus::Failed, DeliveryCounters { delivered: 1, pending: 1, failed: 3 })]
    #[case::同じ状態の上書き(Some(DeliveryStatus::Delivered), DeliveryStatus::Delivered, DeliveryCounters { delivered: 2, pending: 1, failed: 2 })]
    #[case::送信待ちから成功(Some(DeliveryStatus::Pending), DeliveryStatus::Delivered, DeliveryCounters { delivered: 3, pending: 0, failed: 2 })]
    fn test_transitionedは旧状態を減らし新状態を増やす(
        #[case] previous: Option<DeliveryStatus>,
        #[case] next: DeliveryStatus,
        #[case] expected: DeliveryCounters,
    ) {
        let counters = DeliveryCounters {
            delivered: 2,
            pending:   1,
            failed:    2,
        };

        assert_eq!(counters.transitioned(previous, next), expected);
    }

    #[test]
    fn test_transitionedはカウンター外の旧記録で0未満にならない() {
        let counters = DeliveryCounters::default();

        let next = counters.transitioned(Some(DeliveryStatus::Failed), DeliveryStatus::Delivered);

        assert_eq!(
            next,
            DeliveryCounters {
                delivered: 1,
                pending:   0,
                failed:    0,
            }
        );
    }

    #[test]
    fn test_with_deliveryで送信数と最終送信日時が更新される() {
        let sent_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let stats = CampaignStats::default().with_delivery(sent_at);

        assert_eq!(stats.emails_sent, 1);
        assert_eq!(stats.last_sent, Some(sent_at));
    }

    #[test]
    fn test_新規キャンペーンのカウンターは0() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let campaign = Campaign::new(CampaignId::new("spring-2026").unwrap(), "春の新着物件", now);

        assert_eq!(campaign.counters(), DeliveryCounters::default());
        assert_eq!(campaign.stats().emails_sent, 0);
        assert_eq!(campaign.id().as_str(), "spring-2026");
    }

    #[test]
    fn test_campaign_idは空文字を拒否する() {
        assert!(CampaignId::new("  ").is_err());
    }
}
