//! # ビジネスイベントログとエラーコンテキストの構造化ヘルパー
//!
//! ログフィールドの命名規約とヘルパーマクロを提供する。
//!
//! ## ビジネスイベント
//!
//! [`log_business_event!`] マクロで出力する。`event.kind = "business_event"` マーカーが
//! 自動付与され、`jq 'select(.["event.kind"] == "business_event")'` でフィルタできる。
//!
//! ## エラーコンテキスト
//!
//! `tracing::error!` / `tracing::warn!` に `error.category` + `error.kind` フィールドを
//! 直接追加する。定数は [`error`] モジュールで提供。

/// ビジネスイベントを構造化ログとして出力する。
///
/// `event.kind = "business_event"` マーカーを自動付与し、
/// `tracing::info!` レベルで出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: イベントカテゴリ（[`event::category`] の定数を使用）
/// - `event.action`: アクション名（[`event::action`] の定数を使用）
/// - `event.result`: 結果（[`event::result`] の定数を使用）
///
/// ## 推奨フィールド
///
/// - `event.entity_type`: エンティティ種別（[`event::entity_type`] の定数を使用）
/// - `event.entity_id`: エンティティ ID（キャンペーン ID など）
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const CAMPAIGN: &str = "campaign";
        pub const DELIVERY: &str = "delivery";
        pub const TEMPLATE_SEND: &str = "template_send";
    }

    /// イベントアクション
    pub mod action {
        // キャンペーン
        pub const DISPATCH_STARTED: &str = "campaign.dispatch_started";
        pub const DISPATCH_COMPLETED: &str = "campaign.dispatch_completed";

        // 配信
        pub const DELIVERY_SENT: &str = "delivery.sent";
        pub const DELIVERY_FAILED: &str = "delivery.failed";
        pub const DELIVERY_SKIPPED: &str = "delivery.skipped";
        pub const DELIVERY_RECORDED: &str = "delivery.recorded";
        pub const DELIVERY_RECORD_DEGRADED: &str = "delivery.record_degraded";

        // テンプレート送信
        pub const TEMPLATE_SEND_COMPLETED: &str = "template_send.completed";
    }

    /// エンティティ種別
    pub mod entity_type {
        pub const CAMPAIGN: &str = "campaign";
        pub const DELIVERY_RECORD: &str = "delivery_record";
        pub const SENT_RECORD: &str = "sent_record";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
        pub const SKIPPED: &str = "skipped";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// インフラストラクチャ（DynamoDB）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部サービス呼び出し（メール送信 API、連絡先 Webhook）
        pub const EXTERNAL_SERVICE: &str = "external_service";
    }

    /// エラー種別
    pub mod kind {
        pub const DATABASE: &str = "database";
        pub const MAIL_TRANSPORT: &str = "mail_transport";
        pub const CONTACT_WEBHOOK: &str = "contact_webhook";
        pub const PERSONALIZATION: &str = "personalization";
        pub const INTERNAL: &str = "internal";
    }
}
