//! # SentRecordRepository
//!
//! 単発テンプレート送信の送信済み記録を担当するリポジトリ。
//!
//! キャンペーン台帳を持たない送信経路の重複送信防止に使う。
//! PK = email, SK = template_key（`{template_id}#{title}`）。

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{Client, types::AttributeValue};
use mailroom_domain::{
    recipient::normalize_email,
    sent_record::{SentRecord, TemplateKey},
};

use crate::InfraError;

/// 送信済み記録リポジトリトレイト
#[async_trait]
pub trait SentRecordRepository: Send + Sync {
    /// 同じテンプレートキーで送信済みか
    async fn exists(&self, email: &str, template_key: &TemplateKey) -> Result<bool, InfraError>;

    /// 送信済み記録を書き込む
    async fn record(&self, record: &SentRecord) -> Result<(), InfraError>;
}

/// DynamoDB 実装の SentRecordRepository
pub struct DynamoDbSentRecordRepository {
    client:     Client,
    table_name: String,
}

impl DynamoDbSentRecordRepository {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl SentRecordRepository for DynamoDbSentRecordRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(%template_key))]
    async fn exists(&self, email: &str, template_key: &TemplateKey) -> Result<bool, InfraError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("email", AttributeValue::S(normalize_email(email)))
            .key(
                "template_key",
                AttributeValue::S(template_key.as_str().to_string()),
            )
            .projection_expression("email")
            .send()
            .await
            .map_err(|e| InfraError::dynamo_db(format!("送信済み記録の取得に失敗: {e}")))?;

        Ok(output.item().is_some())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(template_key = %record.template_key))]
    async fn record(&self, record: &SentRecord) -> Result<(), InfraError> {
        let item = HashMap::from([
            ("email".to_string(), AttributeValue::S(record.email.clone())),
            (
                "template_key".to_string(),
                AttributeValue::S(record.template_key.as_str().to_string()),
            ),
            (
                "subject".to_string(),
                AttributeValue::S(record.subject.clone()),
            ),
            (
                "sent_at".to_string(),
                AttributeValue::S(record.sent_at.to_rfc3339()),
            ),
        ]);

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| InfraError::dynamo_db(format!("送信済み記録の書き込みに失敗: {e}")))?;

        Ok(())
    }
}
