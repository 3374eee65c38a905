//! # リポジトリ実装
//!
//! 配信パイプラインが読み書きするドキュメントストアへのアクセスを提供する。
//!
//! ## 設計方針
//!
//! - **トレイトで抽象化**: ユースケース層はトレイト経由で利用し、テストではモックに差し替える
//! - **DynamoDB 実装**: 各トレイトに `DynamoDb*` 実装を 1 つずつ用意する

pub mod campaign_repository;
pub mod delivery_ledger;
pub mod sent_record_repository;
pub mod unsubscribe_repository;

pub use campaign_repository::{CampaignRepository, DynamoDbCampaignRepository};
pub use delivery_ledger::{CounterUpdate, DeliveryLedger, DynamoDbDeliveryLedger};
pub use sent_record_repository::{DynamoDbSentRecordRepository, SentRecordRepository};
pub use unsubscribe_repository::{DynamoDbUnsubscribeRepository, UnsubscribeRepository};
