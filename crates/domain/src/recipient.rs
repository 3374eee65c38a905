//! # 配信先
//!
//! 配信先（受信者）と、そのアドレスに対する構文検証を定義する。
//!
//! ## 設計方針
//!
//! - **メールアドレスが同一性キー**: 1 回の配信における重複排除・台帳キーは
//!   正規化（trim + 小文字化）したメールアドレス
//! - **構文検証のみ**: DNS やメールボックスの実在確認は行わない
//! - **不正アドレスは致命的ではない**: 検証失敗は件数として集計され、配信ループは継続する

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 配信先
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    /// メールアドレス（重複排除キー）
    pub email:    String,
    /// 表示名
    #[serde(default)]
    pub name:     Option<String>,
    /// 会社名
    #[serde(default)]
    pub company:  Option<String>,
    /// 任意のメタデータ
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Recipient {
    /// メールアドレスのみを持つ配信先を作成する
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email:    email.into(),
            name:     None,
            company:  None,
            metadata: Map::new(),
        }
    }

    /// 表示名を設定する
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 会社名を設定する
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    /// 正規化したメールアドレス（trim + 小文字化）
    pub fn normalized_email(&self) -> String {
        normalize_email(&self.email)
    }

    /// 表示名（未設定なら空文字）
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// 会社名（未設定なら空文字）
    pub fn company_name(&self) -> &str {
        self.company.as_deref().unwrap_or("")
    }
}

/// メールアドレスを正規化する（trim + 小文字化）
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// ドメイン部の構文検証
///
/// `@` をちょうど 1 つ含み、その後ろに `.` がある場合のみ受け入れる。
pub fn has_valid_domain(email: &str) -> bool {
    let email = email.trim();
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(domain), None) => domain.contains('.'),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("a@b.com")]
    #[case("agent.immo@agence-exemple.fr")]
    #[case("  padded@example.com  ")]
    #[case("@example.com")]
    fn test_ドメイン検証は構文的に正しいアドレスを受け入れる(#[case] email: &str) {
        assert!(has_valid_domain(email));
    }

    #[rstest]
    #[case("bad-email", "@ なし")]
    #[case("a@b@c.com", "@ が 2 つ")]
    #[case("user@localhost", "ドメインに . なし")]
    #[case("", "空文字列")]
    #[case("user.name@", "ドメインが空")]
    fn test_ドメイン検証は不正なアドレスを拒否する(
        #[case] email: &str,
        #[case] _reason: &str,
    ) {
        assert!(!has_valid_domain(email));
    }

    #[test]
    fn test_normalized_emailは小文字化とtrimを行う() {
        let recipient = Recipient::new("  Jean.Dupont@Example.COM ");
        assert_eq!(recipient.normalized_email(), "jean.dupont@example.com");
    }

    #[test]
    fn test_jsonからメタデータ省略でデシリアライズできる() {
        let recipient: Recipient =
            serde_json::from_str(r#"{"email":"a@b.com","name":"Alice"}"#).unwrap();

        assert_eq!(recipient.display_name(), "Alice");
        assert_eq!(recipient.company_name(), "");
        assert!(recipient.metadata.is_empty());
    }
}
