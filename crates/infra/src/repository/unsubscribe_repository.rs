//! # UnsubscribeRepository
//!
//! 配信停止エントリの読み取りを担当するリポジトリ。
//!
//! 配信停止エントリは配信停止リンクのエンドポイント（このサブシステムの外）が
//! 追記する。配信パイプラインは配信ランの開始時に全件をまとめて読み込む。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use aws_sdk_dynamodb::{Client, types::AttributeValue};
use mailroom_domain::{recipient::normalize_email, unsubscribe::UnsubscribeEntry};

use crate::{
    InfraError,
    dynamodb::{Item, get_s},
};

/// 配信停止リポジトリトレイト
#[async_trait]
pub trait UnsubscribeRepository: Send + Sync {
    /// 配信停止済みのメールアドレス（正規化済み）をすべて取得する
    async fn load_all(&self) -> Result<HashSet<String>, InfraError>;

    /// 配信停止エントリを追加する
    async fn add(&self, entry: &UnsubscribeEntry) -> Result<(), InfraError>;
}

/// DynamoDB 実装の UnsubscribeRepository
pub struct DynamoDbUnsubscribeRepository {
    client:     Client,
    table_name: String,
}

impl DynamoDbUnsubscribeRepository {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl UnsubscribeRepository for DynamoDbUnsubscribeRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn load_all(&self) -> Result<HashSet<String>, InfraError> {
        let mut emails = HashSet::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .projection_expression("email")
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| InfraError::dynamo_db(format!("配信停止リストの取得に失敗: {e}")))?;

            for item in output.items() {
                emails.insert(normalize_email(&get_s(item, "email")?));
            }

            match output.last_evaluated_key() {
                Some(key) => start_key = Some(key.clone()),
                None => break,
            }
        }

        tracing::debug!(count = emails.len(), "配信停止リストを読み込みました");

        Ok(emails)
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn add(&self, entry: &UnsubscribeEntry) -> Result<(), InfraError> {
        let item = HashMap::from([
            (
                "email".to_string(),
                AttributeValue::S(entry.email().to_string()),
            ),
            (
                "timestamp".to_string(),
                AttributeValue::S(entry.timestamp().to_rfc3339()),
            ),
        ]);

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| InfraError::dynamo_db(format!("配信停止エントリの追加に失敗: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DynamoDbUnsubscribeRepository>();
    }
}
