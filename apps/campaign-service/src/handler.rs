//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュール（この `handler.rs`）で re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、配信の流れはユースケースに委譲

pub mod campaign;
pub mod email;
pub mod health;

pub use campaign::{CampaignState, dispatch_campaign, get_campaign, list_deliveries};
pub use email::{EmailState, send_template_email};
pub use health::health_check;
