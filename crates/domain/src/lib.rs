//! # Mailroom ドメイン層
//!
//! 一括キャンペーンメール配信パイプラインのドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! - **純粋性**: I/O を一切持たない。永続化・送信はインフラ層の責務
//! - **不変条件の型表現**: 配信記録 ID はメールアドレスから決定的に導出し、
//!   失敗理由は `failed` 状態でのみ保持できるよう構築子で制約する
//! - **ドメインエラー**: 入力検証や存在確認の失敗は [`DomainError`] で表現する
//!
//! ## 依存関係の方向
//!
//! ```text
//! campaign-service → infra → domain
//!          ↘                    ↑
//!            shared ────────────┘（依存しない）
//! ```
//!
//! ## モジュール構成
//!
//! - [`campaign`] - キャンペーンと集計カウンター
//! - [`recipient`] - 配信先とドメイン検証
//! - [`delivery`] - 配信記録（台帳エントリ）
//! - [`unsubscribe`] - 配信停止エントリ
//! - [`sent_record`] - テンプレート単位の送信済み記録
//! - [`mail`] - 送信メッセージとトランスポートエラー
//! - [`dispatch`] - 配信ランの結果集計
//! - [`clock`] - 時刻プロバイダ
//! - [`error`] - ドメインエラー
//!
//! ## 使用例
//!
//! ```rust
//! use mailroom_domain::delivery::DeliveryRecordId;
//!
//! let id = DeliveryRecordId::from_email("test@example.com");
//! assert_eq!(id, DeliveryRecordId::from_email("test@example.com"));
//! assert!(!id.as_str().contains('='));
//! ```

#[macro_use]
mod macros;

pub mod campaign;
pub mod clock;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod mail;
pub mod recipient;
pub mod sent_record;
pub mod unsubscribe;

pub use error::DomainError;
