//! # Campaign Service 設定
//!
//! 環境変数から Campaign Service サーバーの設定を読み込む。

use std::{env, path::PathBuf};

use mailroom_infra::{dynamodb::TableNames, transport::DEFAULT_GMAIL_API_BASE_URL};

/// Campaign Service サーバーの設定
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// バインドアドレス
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// DynamoDB エンドポイント（DynamoDB Local 使用時のみ設定）
    pub dynamodb_endpoint: Option<String>,
    /// テーブル名
    pub tables: TableNames,
    /// メール送信設定
    pub mail: MailConfig,
    /// 公開ベース URL（配信停止リンク・トラッキングのエンドポイント）
    pub public_base_url: String,
    /// 連絡済み通知の Webhook URL（未設定なら通知しない）
    pub contact_webhook_url: Option<String>,
    /// テンプレートディレクトリ（未設定なら組み込みテンプレート）
    pub template_dir: Option<PathBuf>,
    /// data URI に埋め込む画像のディレクトリ
    pub asset_dir: Option<PathBuf>,
    /// Gmail API のベース URL
    pub gmail_api_base_url: String,
}

/// メール送信の設定
///
/// `MAIL_TRANSPORT` 環境変数で一括送信用のトランスポートを切り替える:
/// - `ses`: Amazon SES v2 経由で送信（本番）
/// - `smtp`: Mailpit（開発）/ SMTP サーバー経由で送信
/// - `noop`: 送信しない（ログ出力のみ）
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// 一括送信用トランスポート（"ses" | "smtp" | "noop"）
    pub transport:    String,
    /// SMTP ホスト（transport=smtp の場合に使用）
    pub smtp_host:    String,
    /// SMTP ポート（transport=smtp の場合に使用）
    pub smtp_port:    u16,
    /// 送信元メールアドレス
    pub from_address: String,
}

impl CampaignConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = TableNames::default();
        Ok(Self {
            host: env::var("CAMPAIGN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("CAMPAIGN_PORT")?
                .parse()
                .expect("CAMPAIGN_PORT は有効なポート番号である必要があります"),
            dynamodb_endpoint: env::var("DYNAMODB_ENDPOINT").ok(),
            tables: TableNames {
                campaigns:    env::var("CAMPAIGNS_TABLE").unwrap_or(defaults.campaigns),
                deliveries:   env::var("DELIVERIES_TABLE").unwrap_or(defaults.deliveries),
                unsubscribes: env::var("UNSUBSCRIBES_TABLE").unwrap_or(defaults.unsubscribes),
                sent_emails:  env::var("SENT_EMAILS_TABLE").unwrap_or(defaults.sent_emails),
            },
            mail: MailConfig::from_env(),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            contact_webhook_url: env::var("CONTACT_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            template_dir: env::var("TEMPLATE_DIR").ok().map(PathBuf::from),
            asset_dir: env::var("ASSET_DIR").ok().map(PathBuf::from),
            gmail_api_base_url: env::var("GMAIL_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GMAIL_API_BASE_URL.to_string()),
        })
    }
}

impl MailConfig {
    /// 環境変数からメール送信設定を読み込む
    fn from_env() -> Self {
        Self {
            transport:    env::var("MAIL_TRANSPORT").unwrap_or_else(|_| "noop".to_string()),
            smtp_host:    env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            smtp_port:    env::var("SMTP_PORT")
                .unwrap_or_else(|_| "1025".to_string())
                .parse()
                .expect("SMTP_PORT は有効なポート番号である必要があります"),
            from_address: env::var("MAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "noreply@mailroom.example.com".to_string()),
        }
    }
}
