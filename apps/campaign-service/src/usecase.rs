//! # ユースケース層
//!
//! Campaign Service の配信パイプラインを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: リポジトリ・トランスポート・通知を `Arc<dyn Trait>` で外部から注入
//! - **薄いハンドラ**: ハンドラは薄く保ち、ロジックはユースケースに集約
//!
//! ## モジュール構成
//!
//! - `unsubscribe_filter`: 配信停止フィルタ
//! - `contact_ledger`: キャンペーン内の送信済み確認
//! - `personalizer`: 配信先ごとの本文生成
//! - `recorder`: 配信記録とカウンターの書き込み
//! - `dispatcher`: キャンペーン配信ラン
//! - `template_renderer` / `template_send`: 単発テンプレート送信

pub mod contact_ledger;
pub mod dispatcher;
pub mod personalizer;
pub mod recorder;
pub mod template_renderer;
pub mod template_send;
pub mod unsubscribe_filter;

pub use contact_ledger::ContactLedger;
pub use dispatcher::{CampaignDispatcher, DispatchInput};
pub use personalizer::{PersonalizerConfig, TemplatePersonalizer};
pub use recorder::DeliveryRecorder;
pub use template_renderer::{TemplateRenderer, TeraTemplateRenderer};
pub use template_send::{SendAction, TemplateSendInput, TemplateSendUseCase};
pub use unsubscribe_filter::UnsubscribeFilter;
