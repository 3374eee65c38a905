//! # メール
//!
//! トランスポートに渡す送信メッセージと、トランスポートの失敗分類を定義する。
//!
//! ## 設計方針
//!
//! - **トランスポート非依存**: [`EmailMessage`] は送信方式（Gmail API / SES / SMTP）を知らない
//! - **失敗分類は報告用**: [`TransportError`] の一時的/恒久的の区別は集計とログにのみ使い、
//!   自動リトライは行わない

use serde::{Deserialize, Serialize};
use thiserror::Error;

define_validated_string! {
    /// メール件名
    ///
    /// 前後の空白を除去し、空でないことを保証する。
    pub struct EmailSubject {
        label: "件名",
        max_length: 255,
    }
}

/// 差出人側のコンサルタント情報
///
/// テンプレートのトークン置換と差出人表示名に使う。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultant {
    #[serde(default)]
    pub name:  Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// 送信メッセージ
///
/// テンプレートのパーソナライズ結果。`MailTransport` に渡される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// 送信先メールアドレス
    pub to:                String,
    /// 件名
    pub subject:           String,
    /// HTML 本文
    pub html_body:         String,
    /// プレーンテキスト本文（HTML から導出）
    pub text_body:         String,
    /// 差出人表示名
    pub from_display_name: Option<String>,
}

impl EmailMessage {
    /// HTML 本文からテキスト本文を導出してメッセージを作成する
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        from_display_name: Option<String>,
    ) -> Self {
        let html_body = html_body.into();
        let text_body = html_to_text(&html_body);
        Self {
            to: to.into(),
            subject: subject.into(),
            html_body,
            text_body,
            from_display_name,
        }
    }
}

/// 送信成功時の受領情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// プロバイダが払い出したメッセージ ID（取得できた場合）
    pub provider_message_id: Option<String>,
}

/// トランスポートの送信失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// 認証情報が無い、または無効
    #[error("認証エラー: {0}")]
    Auth(String),

    /// 送信クォータ超過
    #[error("送信クォータ超過: {0}")]
    Quota(String),

    /// 一時的な失敗（ネットワーク、5xx）
    #[error("一時的な送信失敗: {0}")]
    Transient(String),

    /// 恒久的な失敗（宛先拒否、不正なメッセージ）
    #[error("恒久的な送信失敗: {0}")]
    Permanent(String),
}

impl TransportError {
    /// 時間をおけば成功しうる失敗か
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Quota(_) | Self::Transient(_))
    }

    /// ログ・集計用の種別ラベル
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Quota(_) => "quota",
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
        }
    }
}

/// HTML からプレーンテキストを素朴に抽出する
///
/// タグを除去し、連続する空白を 1 つにまとめる。`<style>` / `<script>` の中身は捨てる。
pub fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        text.push_str(&rest[..start]);
        let after = &rest[start..];
        let lower = after.get(..8).unwrap_or(after).to_ascii_lowercase();
        let skip_until = if lower.starts_with("<style") {
            Some("</style>")
        } else if lower.starts_with("<script") {
            Some("</script>")
        } else {
            None
        };

        rest = match skip_until {
            Some(close) => match after.to_ascii_lowercase().find(close) {
                Some(end) => &after[end + close.len()..],
                None => "",
            },
            None => match after.find('>') {
                Some(end) => {
                    text.push(' ');
                    &after[end + 1..]
                }
                None => "",
            },
        };
    }
    text.push_str(rest);

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
