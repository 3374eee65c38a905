//! # Campaign Service エラー定義
//!
//! リクエスト全体を中断するエラーと、HTTP レスポンスへの変換を定義する。
//!
//! 配信先ごとのエラーはここには現れない。ディスパッチャが集計結果の
//! `errors[]` に変換し、配信ループは継続する。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mailroom_domain::DomainError;
use mailroom_shared::{
    ErrorResponse,
    event_log::error::{category, kind},
};
use thiserror::Error;

/// Campaign Service で発生するエラー
#[derive(Debug, Error)]
pub enum CampaignError {
    /// 必須項目の欠落・不正（送信前に中断）
    #[error("入力エラー: {0}")]
    Validation(String),

    /// 送信用の認証情報が無い、または無効（送信不可能なため中断）
    #[error("認証エラー: {0}")]
    Unauthorized(String),

    /// キャンペーンが存在しない、または配信可能な配信先が残っていない
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    /// インフラエラー
    #[error("インフラエラー: {0}")]
    Infra(#[from] mailroom_infra::InfraError),

    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl From<DomainError> for CampaignError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => Self::Validation(msg),
            DomainError::NotFound { entity_type, id } => {
                Self::NotFound(format!("{entity_type} が見つかりません: {id}"))
            }
        }
    }
}

impl IntoResponse for CampaignError {
    fn into_response(self) -> Response {
        let body = match &self {
            CampaignError::Validation(msg) => ErrorResponse::validation_error(msg.clone()),
            CampaignError::Unauthorized(msg) => ErrorResponse::unauthorized(msg.clone()),
            CampaignError::NotFound(msg) => ErrorResponse::not_found(msg.clone()),
            CampaignError::Infra(e) => {
                tracing::error!(
                    error.category = category::INFRASTRUCTURE,
                    error.kind = kind::DATABASE,
                    span_trace = %e.span_trace(),
                    "インフラエラー: {}",
                    e
                );
                ErrorResponse::internal_error()
            }
            CampaignError::Internal(msg) => {
                tracing::error!(
                    error.category = category::INFRASTRUCTURE,
                    error.kind = kind::INTERNAL,
                    "内部エラー: {}",
                    msg
                );
                ErrorResponse::internal_error()
            }
        };

        let status =
            StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CampaignError::Validation("件名は必須です".to_string()), StatusCode::BAD_REQUEST)]
    #[case(CampaignError::Unauthorized("トークンがありません".to_string()), StatusCode::UNAUTHORIZED)]
    #[case(CampaignError::NotFound("キャンペーン".to_string()), StatusCode::NOT_FOUND)]
    #[case(
        CampaignError::Infra(mailroom_infra::InfraError::dynamo_db("接続失敗")),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    #[case(CampaignError::Internal("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_エラー種別ごとのステータスコード(
        #[case] error: CampaignError,
        #[case] expected: StatusCode,
    ) {
        assert_eq!(error.into_response().status(), expected);
    }

    #[test]
    fn test_ドメインの入力エラーは400に変換される() {
        let err: CampaignError = DomainError::Validation("件名は必須です".to_string()).into();
        assert!(matches!(err, CampaignError::Validation(msg) if msg == "件名は必須です"));
    }
}
