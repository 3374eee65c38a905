//! # キャンペーンハンドラ
//!
//! ## エンドポイント
//!
//! - `POST /campaigns/{id}/dispatch` - 配信ランを実行し、集計結果を返す
//! - `GET /campaigns/{id}` - キャンペーンと集計カウンター
//! - `GET /campaigns/{id}/deliveries` - 配信台帳（監査用）

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use mailroom_domain::{
    campaign::{CampaignId, DeliveryCounters},
    dispatch::DispatchSummary,
    mail::{Consultant, EmailSubject},
    recipient::Recipient,
};
use mailroom_infra::repository::{CampaignRepository, DeliveryLedger};
use mailroom_shared::ApiResponse;
use serde::{Deserialize, Serialize};

use crate::{
    error::CampaignError,
    usecase::{CampaignDispatcher, DispatchInput},
};

/// キャンペーン API の共有状態
pub struct CampaignState {
    pub campaigns:        Arc<dyn CampaignRepository>,
    pub ledger:           Arc<dyn DeliveryLedger>,
    pub dispatcher:       CampaignDispatcher,
    /// リクエストで `baseUrl` が省略された場合のベース URL
    pub default_base_url: String,
}

// --- リクエスト/レスポンス型 ---

/// 配信ランのリクエスト
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    pub subject:    Option<String>,
    pub html:       Option<String>,
    #[serde(default)]
    pub consultant: Consultant,
    pub base_url:   Option<String>,
}

/// 配信ランのレスポンス
#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: DispatchSummary,
}

/// キャンペーン統計 DTO
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStatsDto {
    pub emails_sent: u64,
    pub last_sent:   Option<DateTime<Utc>>,
}

/// キャンペーン DTO
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDto {
    pub id:         String,
    pub name:       String,
    pub created_at: DateTime<Utc>,
    pub stats:      CampaignStatsDto,
    pub counters:   DeliveryCounters,
}

/// 配信記録 DTO
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecordDto {
    pub id:         String,
    pub email:      String,
    pub name:       String,
    pub company:    String,
    pub status:     String,
    pub reason:     Option<String>,
    pub timestamp:  DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- ハンドラ ---

/// POST /campaigns/{id}/dispatch
///
/// ## レスポンス
///
/// - `200 OK`: 集計結果（配信先ごとの失敗を含む）
/// - `400 Bad Request`: 件名・本文・配信先の欠落
/// - `404 Not Found`: キャンペーンが無い、または配信可能な配信先が残らない
pub async fn dispatch_campaign(
    State(state): State<Arc<CampaignState>>,
    Path(campaign_id): Path<String>,
    Json(req): Json<DispatchRequest>,
) -> Result<impl IntoResponse, CampaignError> {
    let campaign_id = CampaignId::new(campaign_id)?;
    let subject = req
        .subject
        .ok_or_else(|| CampaignError::Validation("件名は必須です".to_string()))?;
    let html = req
        .html
        .filter(|html| !html.trim().is_empty())
        .ok_or_else(|| CampaignError::Validation("本文は必須です".to_string()))?;

    let input = DispatchInput {
        campaign_id,
        recipients: req.recipients,
        subject: EmailSubject::new(subject)?,
        html,
        consultant: req.consultant,
        base_url: req
            .base_url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| Some(state.default_base_url.clone())),
    };

    let summary = state.dispatcher.dispatch(input).await?;
    let message = format!(
        "{} 件中 {} 件を送信しました",
        summary.total, summary.successful
    );

    Ok((StatusCode::OK, Json(DispatchResponse { message, summary })))
}

/// GET /campaigns/{id}
pub async fn get_campaign(
    State(state): State<Arc<CampaignState>>,
    Path(campaign_id): Path<String>,
) -> Result<impl IntoResponse, CampaignError> {
    let campaign_id = CampaignId::new(campaign_id)?;

    let campaign = state
        .campaigns
        .find_by_id(&campaign_id)
        .await?
        .ok_or_else(|| CampaignError::NotFound(format!("キャンペーンが見つかりません: {campaign_id}")))?;

    let stats = campaign.stats();
    let response = ApiResponse::new(CampaignDto {
        id:         campaign.id().to_string(),
        name:       campaign.name().to_string(),
        created_at: campaign.created_at(),
        stats:      CampaignStatsDto {
            emails_sent: stats.emails_sent,
            last_sent:   stats.last_sent,
        },
        counters:   campaign.counters(),
    });

    Ok((StatusCode::OK, Json(response)))
}

/// GET /campaigns/{id}/deliveries
pub async fn list_deliveries(
    State(state): State<Arc<CampaignState>>,
    Path(campaign_id): Path<String>,
) -> Result<impl IntoResponse, CampaignError> {
    let campaign_id = CampaignId::new(campaign_id)?;

    if state.campaigns.find_by_id(&campaign_id).await?.is_none() {
        return Err(CampaignError::NotFound(format!(
            "キャンペーンが見つかりません: {campaign_id}"
        )));
    }

    let items: Vec<DeliveryRecordDto> = state
        .ledger
        .list_records(&campaign_id)
        .await?
        .into_iter()
        .map(|record| DeliveryRecordDto {
            id:         record.id().to_string(),
            email:      record.email().to_string(),
            name:       record.name().to_string(),
            company:    record.company().to_string(),
            status:     record.status().to_string(),
            reason:     record.reason().map(str::to_string),
            timestamp:  record.timestamp(),
            updated_at: record.updated_at(),
        })
        .collect();

    Ok((StatusCode::OK, Json(ApiResponse::new(items))))
}
