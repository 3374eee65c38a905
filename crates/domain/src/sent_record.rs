//! # 送信済み記録
//!
//! キャンペーンを伴わない単発テンプレート送信で使う、簡易な重複送信防止記録。
//!
//! キーは (メールアドレス, テンプレートキー)。テンプレートキーは
//! テンプレート ID と件名の複合値で、同じテンプレートでも件名が異なれば別送信とみなす。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recipient::normalize_email;

/// テンプレートキー（`{template_id}#{title}`）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[display("{_0}")]
pub struct TemplateKey(String);

impl TemplateKey {
    pub fn new(template_id: &str, title: &str) -> Self {
        Self(format!("{}#{}", template_id.trim(), title.trim()))
    }

    /// 保存済みのキー文字列から復元する
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 送信済み記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub email:        String,
    pub template_key: TemplateKey,
    pub subject:      String,
    pub sent_at:      DateTime<Utc>,
}

impl SentRecord {
    pub fn new(
        email: &str,
        template_key: TemplateKey,
        subject: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            email: normalize_email(email),
            template_key,
            subject: subject.into(),
            sent_at,
        }
    }
}
