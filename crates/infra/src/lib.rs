//! # Mailroom インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 責務
//!
//! - **ドキュメントストア**: DynamoDB への接続とテーブル作成
//! - **リポジトリ実装**: キャンペーン、配信台帳、配信停止、送信済み記録
//! - **トランスポート**: メール送信（Gmail API 委任 / SES / SMTP / Noop）
//! - **連絡先通知**: 送信後の fire-and-forget Webhook
//!
//! ## 依存関係
//!
//! ```text
//! campaign-service → infra → domain
//!          ↘                  ↑
//!            shared ──────────┘ (なし)
//! ```
//!
//! ドメイン層はインフラ層に依存しない（依存性逆転の原則）。
//!
//! ## モジュール構成
//!
//! - [`dynamodb`] - DynamoDB クライアント作成とテーブル作成
//! - [`error`] - インフラ層エラー定義
//! - [`repository`] - リポジトリ実装
//! - [`transport`] - メール送信トランスポート
//! - [`contact_notifier`] - 連絡済み通知
//! - `mock` - テスト用インメモリ実装（`test-utils` feature）

pub mod contact_notifier;
pub mod dynamodb;
pub mod error;
#[cfg(feature = "test-utils")]
pub mod mock;
pub mod repository;
pub mod transport;

pub use contact_notifier::{ContactNotifier, HttpContactNotifier, NoopContactNotifier};
pub use error::{InfraError, InfraErrorKind};
pub use transport::{GmailTransport, MailTransport, NoopTransport, SesTransport, SmtpTransport};
