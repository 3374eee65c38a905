//! # 連絡済み通知
//!
//! 配信記録の書き込み後に「この配信先に連絡した」ことを他の利用者（CRM 等）へ知らせる。
//!
//! 呼び出し側は fire-and-forget で使う。通知の失敗は配信結果に影響させない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::InfraError;

/// 連絡済みイベント（Webhook のペイロード）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactedEvent {
    pub email:        String,
    pub campaign_id:  String,
    pub contacted_at: DateTime<Utc>,
}

/// 連絡済み通知トレイト
#[async_trait]
pub trait ContactNotifier: Send + Sync {
    /// 連絡済みを通知する
    async fn notify_contacted(&self, event: &ContactedEvent) -> Result<(), InfraError>;
}

/// Webhook に POST する ContactNotifier
pub struct HttpContactNotifier {
    client:      reqwest::Client,
    webhook_url: String,
}

impl HttpContactNotifier {
    pub fn new(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl ContactNotifier for HttpContactNotifier {
    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %event.campaign_id))]
    async fn notify_contacted(&self, event: &ContactedEvent) -> Result<(), InfraError> {
        self.client
            .post(&self.webhook_url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Noop の ContactNotifier（Webhook 未設定時）
#[derive(Debug, Clone)]
pub struct NoopContactNotifier;

#[async_trait]
impl ContactNotifier for NoopContactNotifier {
    async fn notify_contacted(&self, event: &ContactedEvent) -> Result<(), InfraError> {
        tracing::debug!(
            campaign_id = %event.campaign_id,
            "Noop: 連絡済み通知をスキップ"
        );
        Ok(())
    }
}
