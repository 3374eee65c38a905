//! # 配信ラン
//!
//! 1 回の配信ラン（配信先リストに対するディスパッチャの 1 回の実行）の
//! 配信先ごとの結果と、ラン全体の集計結果を定義する。
//!
//! ## 配信先ごとの状態遷移
//!
//! ```text
//! PENDING ─┬─→ UNSUBSCRIBED    （終端・スキップ）
//!          ├─→ INVALID_DOMAIN  （終端・スキップ）
//!          ├─→ ALREADY_SENT    （終端・スキップ）
//!          └─→ SENDING ─┬─→ DELIVERED    （終端）
//!                       └─→ SEND_FAILED  （終端）
//! ```

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::campaign::DeliveryCounters;

define_uuid_id! {
    /// 配信ラン ID
    ///
    /// ログの相関にのみ使う。永続化はしない。
    pub struct DispatchRunId;
}

/// 配信先ごとの終端状態
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RecipientOutcome {
    /// 配信停止済みのためスキップ
    Unsubscribed,
    /// アドレスの構文が不正なためスキップ
    InvalidDomain,
    /// 同じキャンペーンで送信済みのためスキップ
    AlreadySent,
    /// 送信成功
    Delivered,
    /// 送信失敗（パーソナライズ失敗を含む）
    SendFailed { reason: String },
}

/// 失敗した処理段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DispatchStage {
    /// アドレス検証
    Validation,
    /// 台帳参照（重複確認）
    Ledger,
    /// テンプレートのパーソナライズ
    Personalize,
    /// トランスポート送信
    Send,
    /// 配信記録の書き込み
    Record,
}

/// 配信先ごとのエラー（集計結果の `errors[]` 要素）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchErrorEntry {
    pub email:  String,
    pub stage:  DispatchStage,
    pub reason: String,
}

/// スキップ件数の内訳
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedCounts {
    pub unsubscribed:   usize,
    pub already_sent:   usize,
    pub invalid_domain: usize,
}

impl SkippedCounts {
    pub fn total(&self) -> usize {
        self.unsubscribed + self.already_sent + self.invalid_domain
    }
}

/// 配信ランの集計結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub successful: usize,
    pub failed:     usize,
    pub total:      usize,
    pub skipped:    SkippedCounts,
    pub errors:     Vec<DispatchErrorEntry>,
}

impl DispatchSummary {
    /// 入力件数 `total` で空の集計を作成する
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// 配信先 1 件の終端状態を集計に反映する
    pub fn tally(&mut self, outcome: &RecipientOutcome) {
        match outcome {
            RecipientOutcome::Unsubscribed => self.skipped.unsubscribed += 1,
            RecipientOutcome::InvalidDomain => self.skipped.invalid_domain += 1,
            RecipientOutcome::AlreadySent => self.skipped.already_sent += 1,
            RecipientOutcome::Delivered => self.successful += 1,
            RecipientOutcome::SendFailed { .. } => self.failed += 1,
        }
    }

    /// 配信先ごとのエラーを追加する
    pub fn push_error(&mut self, email: &str, stage: DispatchStage, reason: impl Into<String>) {
        self.errors.push(DispatchErrorEntry {
            email: email.to_string(),
            stage,
            reason: reason.into(),
        });
    }

    /// 処理済み件数（成功 + 失敗 + スキップ）
    pub fn processed(&self) -> usize {
        self.successful + self.failed + self.skipped.total()
    }
}

/// 配信記録の書き込み結果
///
/// 原子的な経路（記録 + カウンター）が成功したか、記録のみの縮退経路に
/// フォールバックしたかを区別する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// 記録とカウンターが同一トランザクションで更新された（更新後のカウンター）
    Committed(DeliveryCounters),
    /// 記録のみ書き込まれた。カウンターは更新されていない
    RecordOnly,
}

impl RecordOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::RecordOnly)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_tallyが終端状態ごとに集計する() {
        let mut summary = DispatchSummary::new(5);

        summary.tally(&RecipientOutcome::Delivered);
        summary.tally(&RecipientOutcome::Delivered);
        summary.tally(&RecipientOutcome::InvalidDomain);
        summary.tally(&RecipientOutcome::Unsubscribed);
        summary.tally(&RecipientOutcome::SendFailed {
            reason: "550".to_string(),
        });

        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.skipped,
            SkippedCounts {
                unsubscribed:   1,
                already_sent:   0,
                invalid_domain: 1,
            }
        );
        assert_eq!(summary.processed(), summary.total);
    }

    #[test]
    fn test_集計結果はcamel_caseでシリアライズされる() {
        let summary = DispatchSummary::new(1);
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["skipped"]["alreadySent"], 0);
        assert_eq!(json["skipped"]["invalidDomain"], 0);
        assert_eq!(json["total"], 1);
    }

    #[test]
    fn test_record_onlyは縮退扱い() {
        assert!(RecordOutcome::RecordOnly.is_degraded());
        assert!(!RecordOutcome::Committed(DeliveryCounters::default()).is_degraded());
    }
}
