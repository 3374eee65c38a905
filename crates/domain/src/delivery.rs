//! # 配信記録
//!
//! キャンペーン × 配信先ごとの監査・冪等性記録（台帳エントリ）を定義する。
//!
//! ## ドメイン用語
//!
//! | 型 | ドメイン用語 | 説明 |
//! |---|------------|------|
//! | [`DeliveryRecord`] | 配信記録 | 1 配信先に対する最新の配信結果 |
//! | [`DeliveryRecordId`] | 配信記録 ID | メールアドレスから決定的に導出されるキー |
//! | [`DeliveryStatus`] | 配信状態 | pending / delivered / failed |
//!
//! ## 不変条件
//!
//! - 配信記録 ID はメールアドレスの純関数。同じ配信先の再処理は同じ記録を上書きする
//! - `reason` は `failed` の場合のみ存在する

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    DomainError,
    recipient::{Recipient, normalize_email},
};

/// 配信状態
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
    /// 送信待ち
    Pending,
    /// 送信成功
    Delivered,
    /// 送信失敗、または監査上記録すべきスキップ
    Failed,
}

/// 配信記録 ID
///
/// 正規化したメールアドレスを URL セーフ base64（パディングなし）で符号化した値。
/// `+`, `/`, `=` を含まないため、そのままドキュメントキーやパスに使える。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[display("{_0}")]
pub struct DeliveryRecordId(String);

impl DeliveryRecordId {
    /// メールアドレスから ID を導出する
    pub fn from_email(email: &str) -> Self {
        Self(URL_SAFE_NO_PAD.encode(normalize_email(email).as_bytes()))
    }

    /// 保存済みの ID 文字列から復元する
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 配信記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    id:         DeliveryRecordId,
    email:      String,
    name:       String,
    company:    String,
    status:     DeliveryStatus,
    reason:     Option<String>,
    timestamp:  DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// DB から復元する際の配信記録データ
#[derive(Debug, Clone)]
pub struct DeliveryRecordRow {
    pub id:         String,
    pub email:      String,
    pub name:       String,
    pub company:    String,
    pub status:     String,
    pub reason:     Option<String>,
    pub timestamp:  DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    fn build(
        recipient: &Recipient,
        status: DeliveryStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let email = recipient.normalized_email();
        Self {
            id: DeliveryRecordId::from_email(&email),
            email,
            name: recipient.display_name().to_string(),
            company: recipient.company_name().to_string(),
            status,
            reason,
            timestamp: now,
            updated_at: now,
        }
    }

    /// 送信成功の記録を作成する
    pub fn delivered(recipient: &Recipient, now: DateTime<Utc>) -> Self {
        Self::build(recipient, DeliveryStatus::Delivered, None, now)
    }

    /// 失敗（または監査対象のスキップ）の記録を作成する
    pub fn failed(recipient: &Recipient, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::build(recipient, DeliveryStatus::Failed, Some(reason.into()), now)
    }

    /// DB のレコードから復元する
    ///
    /// 状態文字列が不正な場合、または `reason` の有無が状態と矛盾する場合はエラー。
    pub fn from_db(row: DeliveryRecordRow) -> Result<Self, DomainError> {
        let status: DeliveryStatus = row
            .status
            .parse()
            .map_err(|_| DomainError::Validation(format!("不正な配信状態: {}", row.status)))?;

        if (status == DeliveryStatus::Failed) != row.reason.is_some() {
            return Err(DomainError::Validation(format!(
                "配信記録 {} の失敗理由が状態 {} と矛盾しています",
                row.id, status
            )));
        }

        Ok(Self {
            id: DeliveryRecordId::from_stored(row.id),
            email: row.email,
            name: row.name,
            company: row.company,
            status,
            reason: row.reason,
            timestamp: row.timestamp,
            updated_at: row.updated_at,
        })
    }

    pub fn id(&self) -> &DeliveryRecordId {
        &self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 重複送信防止の対象となる記録か（failed 以外）
    pub fn blocks_resend(&self) -> bool {
        self.status != DeliveryStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_記録idは決定的でurlセーフ() {
        let first = DeliveryRecordId::from_email("test@example.com");
        let second = DeliveryRecordId::from_email("test@example.com");

        assert_eq!(first, second);
        assert_eq!(first.as_str(), "dGVzdEBleGFtcGxlLmNvbQ");
        assert!(!first.as_str().contains(['+', '/', '=']));
    }

    #[test]
    fn test_記録idは大文字小文字と前後空白を区別しない() {
        assert_eq!(
            DeliveryRecordId::from_email(" Test@Example.com "),
            DeliveryRecordId::from_email("test@example.com")
        );
    }

    #[rstest]
    #[case("a>b?c~d@example.com")]
    #[case("ünïcödé@exämple.fr")]
    fn test_記録idはパディングや予約文字を含まない(#[case] email: &str) {
        let id = DeliveryRecordId::from_email(email);
        assert!(!id.as_str().contains(['+', '/', '=']));
    }

    #[rstest]
    fn test_deliveredは理由を持たない(now: DateTime<Utc>) {
        let record = DeliveryRecord::delivered(&Recipient::new("a@b.com").with_name("Alice"), now);

        assert_eq!(record.status(), DeliveryStatus::Delivered);
        assert_eq!(record.reason(), None);
        assert_eq!(record.name(), "Alice");
        assert!(record.blocks_resend());
    }

    #[rstest]
    fn test_failedは理由を持ち再送を妨げない(now: DateTime<Utc>) {
        let record = DeliveryRecord::failed(&Recipient::new("a@b.com"), "unsubscribed", now);

        assert_eq!(record.status(), DeliveryStatus::Failed);
        assert_eq!(record.reason(), Some("unsubscribed"));
        assert!(!record.blocks_resend());
    }

    #[rstest]
    fn test_from_dbは理由と状態の矛盾を拒否する(now: DateTime<Utc>) {
        let row = DeliveryRecordRow {
            id:         "x".to_string(),
            email:      "a@b.com".to_string(),
            name:       String::new(),
            company:    String::new(),
            status:     "delivered".to_string(),
            reason:     Some("なぜか理由がある".to_string()),
            timestamp:  now,
            updated_at: now,
        };

        assert!(DeliveryRecord::from_db(row).is_err());
    }

    #[rstest]
    fn test_from_dbは不正な状態文字列を拒否する(now: DateTime<Utc>) {
        let row = DeliveryRecordRow {
            id:         "x".to_string(),
            email:      "a@b.com".to_string(),
            name:       String::new(),
            company:    String::new(),
            status:     "bounced".to_string(),
            reason:     None,
            timestamp:  now,
            updated_at: now,
        };

        assert!(DeliveryRecord::from_db(row).is_err());
    }

    #[test]
    fn test_配信状態の文字列変換が正しい() {
        assert_eq!(DeliveryStatus::Delivered.to_string(), "delivered");
        assert_eq!(
            "failed".parse::<DeliveryStatus>().unwrap(),
            DeliveryStatus::Failed
        );
    }
}
