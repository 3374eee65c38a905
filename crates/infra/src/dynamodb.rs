//! # DynamoDB 接続管理
//!
//! Amazon DynamoDB への接続管理とテーブル作成を行う。
//!
//! ## 設計方針
//!
//! - **ローカル開発**: DynamoDB Local を使用（エンドポイントを明示）
//! - **本番環境**: 既定の認証情報プロバイダチェーン（IAM ロール）で接続
//! - **テーブル自動作成**: 起動時にテーブルが存在しなければ作成（冪等）
//!
//! ## テーブル
//!
//! | テーブル | PK | SK |
//! |---|---|---|
//! | campaigns | `id` | – |
//! | campaign_deliveries | `campaign_id` | `record_id` |
//! | unsubscribes | `email` | – |
//! | sent_emails | `email` | `template_key` |
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use mailroom_infra::dynamodb::{self, TableNames};
//!
//! async fn setup() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = dynamodb::create_client(Some("http://localhost:18000")).await;
//!     dynamodb::ensure_tables(&client, &TableNames::default()).await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;

use aws_sdk_dynamodb::{
    Client,
    types::{
        AttributeDefinition,
        AttributeValue,
        BillingMode,
        KeySchemaElement,
        KeyType,
        ScalarAttributeType,
    },
};

use crate::InfraError;

/// DynamoDB アイテム
pub(crate) type Item = HashMap<String, AttributeValue>;

/// テーブル名の組
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub campaigns:    String,
    pub deliveries:   String,
    pub unsubscribes: String,
    pub sent_emails:  String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            campaigns:    "campaigns".to_string(),
            deliveries:   "campaign_deliveries".to_string(),
            unsubscribes: "unsubscribes".to_string(),
            sent_emails:  "sent_emails".to_string(),
        }
    }
}

/// DynamoDB クライアントを作成する
///
/// `endpoint` を指定した場合は DynamoDB Local 向けにダミーの認証情報を使う。
/// 未指定の場合は既定の認証情報プロバイダチェーンとリージョン設定を使う。
pub async fn create_client(endpoint: Option<&str>) -> Client {
    let config = match endpoint {
        Some(endpoint) => {
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .endpoint_url(endpoint)
                .region(aws_config::Region::new("ap-northeast-1"))
                // DynamoDB Local はクレデンシャルを検証しないが、SDK はプロバイダが必要
                .credentials_provider(aws_sdk_dynamodb::config::Credentials::new(
                    "local", "local", None, None, "local",
                ))
                .load()
                .await
        }
        None => {
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .load()
                .await
        }
    };

    Client::new(&config)
}

/// すべてのテーブルを作成する（冪等）
pub async fn ensure_tables(client: &Client, tables: &TableNames) -> Result<(), InfraError> {
    ensure_table(client, &tables.campaigns, "id", None).await?;
    ensure_table(client, &tables.deliveries, "campaign_id", Some("record_id")).await?;
    ensure_table(client, &tables.unsubscribes, "email", None).await?;
    ensure_table(client, &tables.sent_emails, "email", Some("template_key")).await?;
    Ok(())
}

/// 文字列キーのテーブルが存在しなければ作成する（冪等）
async fn ensure_table(
    client: &Client,
    table_name: &str,
    partition_key: &str,
    sort_key: Option<&str>,
) -> Result<(), InfraError> {
    match client.describe_table().table_name(table_name).send().await {
        Ok(_) => {
            tracing::debug!("テーブル '{}' は既に存在します", table_name);
            return Ok(());
        }
        Err(err) => {
            // ResourceNotFoundException の場合のみテーブル作成に進む
            let not_found = err
                .as_service_error()
                .map(|e| e.is_resource_not_found_exception())
                .unwrap_or(false);
            if !not_found {
                return Err(InfraError::dynamo_db(format!(
                    "テーブル '{}' の確認に失敗: {}",
                    table_name, err
                )));
            }
        }
    }

    tracing::info!("テーブル '{}' を作成します", table_name);

    let mut keys = vec![(partition_key, KeyType::Hash)];
    if let Some(sort_key) = sort_key {
        keys.push((sort_key, KeyType::Range));
    }

    let mut request = client
        .create_table()
        .table_name(table_name)
        .billing_mode(BillingMode::PayPerRequest);

    for (name, key_type) in keys {
        request = request
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(name)
                    .key_type(key_type)
                    .build()
                    .map_err(|e| InfraError::dynamo_db(format!("KeySchema 構築エラー: {e}")))?,
            )
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(name)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .map_err(|e| {
                        InfraError::dynamo_db(format!("AttributeDefinition 構築エラー: {e}"))
                    })?,
            );
    }

    if let Err(err) = request.send().await {
        // ResourceInUseException は並行起動時に発生しうる（テーブルが作成中）
        let is_resource_in_use = err
            .as_service_error()
            .map(|e| e.is_resource_in_use_exception())
            .unwrap_or(false);
        if !is_resource_in_use {
            return Err(InfraError::dynamo_db(format!(
                "テーブル '{}' の作成に失敗: {}",
                table_name, err
            )));
        }
        tracing::debug!(
            "テーブル '{}' は既に作成中または存在します（ResourceInUseException）",
            table_name
        );
        return Ok(());
    }

    tracing::info!("テーブル '{}' を作成しました", table_name);

    Ok(())
}

// ===== アイテム属性の読み取りヘルパー =====

/// 文字列属性を取得する
pub(crate) fn get_s(item: &Item, key: &str) -> Result<String, InfraError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| InfraError::unexpected(format!("属性 '{key}' が見つかりません")))
}

/// 省略可能な文字列属性を取得する
pub(crate) fn get_opt_s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

/// 数値属性を取得する（欠落時は 0）
pub(crate) fn get_n_or_zero(item: &Item, key: &str) -> Result<u64, InfraError> {
    match item.get(key).and_then(|v| v.as_n().ok()) {
        Some(n) => n
            .parse()
            .map_err(|e| InfraError::unexpected(format!("属性 '{key}' のパースに失敗: {e}"))),
        None => Ok(0),
    }
}

/// Map 属性を取得する（欠落時は空）
pub(crate) fn get_m(item: &Item, key: &str) -> Item {
    item.get(key)
        .and_then(|v| v.as_m().ok())
        .cloned()
        .unwrap_or_default()
}

/// RFC 3339 の日時属性を取得する
pub(crate) fn get_datetime(
    item: &Item,
    key: &str,
) -> Result<chrono::DateTime<chrono::Utc>, InfraError> {
    parse_datetime(&get_s(item, key)?, key)
}

pub(crate) fn parse_datetime(
    value: &str,
    key: &str,
) -> Result<chrono::DateTime<chrono::Utc>, InfraError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| InfraError::unexpected(format!("属性 '{key}' の日時パースに失敗: {e}")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_欠落した数値属性は0として読む() {
        let item = Item::new();
        assert_eq!(get_n_or_zero(&item, "delivered").unwrap(), 0);
    }

    #[test]
    fn test_不正な数値属性はエラー() {
        let mut item = Item::new();
        item.insert("delivered".to_string(), AttributeValue::N("abc".to_string()));
        assert!(get_n_or_zero(&item, "delivered").is_err());
    }

    #[test]
    fn test_欠落した文字列属性はエラー() {
        let item = Item::new();
        assert!(get_s(&item, "email").is_err());
        assert_eq!(get_opt_s(&item, "email"), None);
    }

    #[test]
    fn test_rfc3339の日時を読む() {
        let mut item = Item::new();
        item.insert(
            "timestamp".to_string(),
            AttributeValue::S("2026-03-01T09:00:00+00:00".to_string()),
        );

        let dt = get_datetime(&item, "timestamp").unwrap();

        assert_eq!(dt.to_rfc3339(), "2026-03-01T09:00:00+00:00");
    }
}
