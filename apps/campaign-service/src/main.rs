//! # Campaign Service サーバー
//!
//! キャンペーンメールの一括配信と単発テンプレート送信を担当する API サーバー。
//!
//! ## 役割
//!
//! - **キャンペーン配信**: 配信停止・ドメイン検証・送信済み確認を経て一括送信し、配信記録を残す
//! - **単発送信**: 委任トークンで Gmail API から描画済みテンプレートを送信する
//! - **配信状況の参照**: キャンペーンの集計と配信記録の一覧
//!
//! ```text
//! ┌──────────┐    ┌──────────────────┐    ┌──────────────┐
//! │ Frontend │───▶│ Campaign Service │───▶│  SES / SMTP  │
//! └──────────┘    └──────────────────┘    └──────────────┘
//!                          │
//!                          ▼
//!                  ┌──────────────┐
//!                  │   DynamoDB   │
//!                  └──────────────┘
//! ```
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `CAMPAIGN_HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `CAMPAIGN_PORT` | **Yes** | ポート番号 |
//! | `DYNAMODB_ENDPOINT` | No | DynamoDB Local のエンドポイント |
//! | `MAIL_TRANSPORT` | No | 一括送信の経路（`ses` / `smtp` / `noop`、デフォルト: `noop`） |
//! | `MAIL_FROM_ADDRESS` | No | 送信元アドレス |
//! | `PUBLIC_BASE_URL` | No | 配信停止リンク・トラッキングのベース URL |
//! | `CONTACT_WEBHOOK_URL` | No | 連絡済み通知の送信先 |
//! | `TEMPLATE_DIR` | No | テンプレートディレクトリ |
//! | `ASSET_DIR` | No | 埋め込み画像のディレクトリ |
//! | `GMAIL_API_BASE_URL` | No | Gmail API のベース URL |
//!
//! ## 起動方法
//!
//! ```bash
//! # 開発環境（DynamoDB Local + Mailpit）
//! CAMPAIGN_PORT=13010 DYNAMODB_ENDPOINT=http://localhost:8000 MAIL_TRANSPORT=smtp \
//!   cargo run -p mailroom-campaign-service
//! ```

mod config;
mod error;
mod handler;
mod usecase;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use config::{CampaignConfig, MailConfig};
use handler::{
    CampaignState,
    EmailState,
    dispatch_campaign,
    email::GmailTransportFactory,
    get_campaign,
    health_check,
    list_deliveries,
    send_template_email,
};
use mailroom_domain::clock::{Clock, SystemClock};
use mailroom_infra::{
    ContactNotifier,
    HttpContactNotifier,
    MailTransport,
    NoopContactNotifier,
    NoopTransport,
    SesTransport,
    SmtpTransport,
    dynamodb,
    repository::{
        CampaignRepository,
        DeliveryLedger,
        DynamoDbCampaignRepository,
        DynamoDbDeliveryLedger,
        DynamoDbSentRecordRepository,
        DynamoDbUnsubscribeRepository,
        SentRecordRepository,
        UnsubscribeRepository,
    },
};
use mailroom_shared::observability::TracingConfig;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use usecase::{
    CampaignDispatcher,
    ContactLedger,
    DeliveryRecorder,
    PersonalizerConfig,
    TemplatePersonalizer,
    TemplateRenderer,
    TemplateSendUseCase,
    TeraTemplateRenderer,
    UnsubscribeFilter,
};

/// Campaign Service サーバーのエントリーポイント
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    // トレーシング初期化
    let tracing_config = TracingConfig::from_env("campaign-service");
    mailroom_shared::observability::init_tracing(tracing_config);
    let _tracing_guard = tracing::info_span!("app", service = "campaign-service").entered();

    // 設定読み込み
    let config = CampaignConfig::from_env().expect("設定の読み込みに失敗しました");

    tracing::info!(
        "Campaign Service サーバーを起動します: {}:{}",
        config.host,
        config.port
    );

    // DynamoDB クライアントを作成し、テーブルを用意する
    let dynamodb_client = dynamodb::create_client(config.dynamodb_endpoint.as_deref()).await;
    dynamodb::ensure_tables(&dynamodb_client, &config.tables)
        .await
        .expect("DynamoDB テーブルの準備に失敗しました");
    tracing::info!("DynamoDB に接続しました");

    // 依存コンポーネントを初期化
    let campaigns: Arc<dyn CampaignRepository> = Arc::new(DynamoDbCampaignRepository::new(
        dynamodb_client.clone(),
        config.tables.campaigns.clone(),
    ));
    let ledger: Arc<dyn DeliveryLedger> = Arc::new(DynamoDbDeliveryLedger::new(
        dynamodb_client.clone(),
        config.tables.deliveries.clone(),
        config.tables.campaigns.clone(),
    ));
    let unsubscribes: Arc<dyn UnsubscribeRepository> = Arc::new(
        DynamoDbUnsubscribeRepository::new(dynamodb_client.clone(), config.tables.unsubscribes.clone()),
    );
    let sent_records: Arc<dyn SentRecordRepository> = Arc::new(
        DynamoDbSentRecordRepository::new(dynamodb_client, config.tables.sent_emails.clone()),
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http_client = reqwest::Client::new();

    let transport = build_mail_transport(&config.mail).await;
    let notifier: Arc<dyn ContactNotifier> = match &config.contact_webhook_url {
        Some(url) => Arc::new(HttpContactNotifier::new(http_client.clone(), url.as_str())),
        None => Arc::new(NoopContactNotifier),
    };

    let personalizer = TemplatePersonalizer::new(
        PersonalizerConfig::new(config.public_base_url.as_str())
            .with_asset_dir(config.asset_dir.clone()),
    );
    let renderer: Arc<dyn TemplateRenderer> = match &config.template_dir {
        Some(dir) => Arc::new(
            TeraTemplateRenderer::from_dir(dir).expect("テンプレートの読み込みに失敗しました"),
        ),
        None => Arc::new(
            TeraTemplateRenderer::new().expect("組み込みテンプレートの読み込みに失敗しました"),
        ),
    };

    // キャンペーン配信
    let recorder = DeliveryRecorder::new(campaigns.clone(), ledger.clone(), notifier, clock.clone());
    let dispatcher = CampaignDispatcher::new(
        campaigns.clone(),
        UnsubscribeFilter::new(unsubscribes.clone()),
        ContactLedger::new(ledger.clone()),
        personalizer.clone(),
        transport,
        recorder,
        clock.clone(),
    );
    let campaign_state = Arc::new(CampaignState {
        campaigns,
        ledger,
        dispatcher,
        default_base_url: config.public_base_url.clone(),
    });

    // 単発テンプレート送信
    let template_send = TemplateSendUseCase::new(
        renderer,
        UnsubscribeFilter::new(unsubscribes),
        sent_records,
        personalizer,
        clock,
    );
    let email_state = Arc::new(EmailState {
        usecase:              template_send,
        transports:           Arc::new(GmailTransportFactory::new(
            http_client,
            config.gmail_api_base_url.as_str(),
        )),
        default_from_address: config.mail.from_address.clone(),
    });

    // ルーター構築
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/campaigns/{campaign_id}", get(get_campaign))
        .route("/campaigns/{campaign_id}/deliveries", get(list_deliveries))
        .route("/campaigns/{campaign_id}/dispatch", post(dispatch_campaign))
        .with_state(campaign_state)
        .merge(
            Router::new()
                .route("/emails/send", post(send_template_email))
                .with_state(email_state),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("アドレスのパースに失敗しました");

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Campaign Service サーバーが起動しました: {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// 一括送信用のトランスポートを設定から選ぶ
async fn build_mail_transport(config: &MailConfig) -> Arc<dyn MailTransport> {
    match config.transport.as_str() {
        "ses" => {
            let aws_config = aws_config::load_from_env().await;
            let client = aws_sdk_sesv2::Client::new(&aws_config);
            tracing::info!("一括送信に SES を使用します");
            Arc::new(SesTransport::new(client, config.from_address.clone()))
        }
        "smtp" => {
            tracing::info!(
                "一括送信に SMTP を使用します: {}:{}",
                config.smtp_host,
                config.smtp_port
            );
            Arc::new(SmtpTransport::new(
                &config.smtp_host,
                config.smtp_port,
                config.from_address.clone(),
            ))
        }
        other => {
            if other != "noop" {
                tracing::warn!(transport = other, "不明な MAIL_TRANSPORT のため noop を使用します");
            }
            Arc::new(NoopTransport)
        }
    }
}
