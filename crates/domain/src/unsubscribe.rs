//! # 配信停止
//!
//! 配信停止（オプトアウト）エントリを定義する。
//!
//! 配信停止エントリはこのサブシステムの外（配信停止リンクのエンドポイント）で
//! 作成され、配信パイプラインからは読み取り専用として扱う。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recipient::normalize_email;

/// 配信停止エントリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeEntry {
    email:     String,
    timestamp: DateTime<Utc>,
}

impl UnsubscribeEntry {
    /// エントリを作成する。メールアドレスは正規化して保持する
    pub fn new(email: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            email: normalize_email(email),
            timestamp,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
