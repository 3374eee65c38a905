//! DynamoDB リポジトリの統合テスト
//!
//! DynamoDB Local を使用したテスト。既定ではスキップされる。
//!
//! 実行方法:
//! ```bash
//! docker run -p 18000:8000 amazon/dynamodb-local -jar DynamoDBLocal.jar -sharedDb -inMemory
//! cargo test -p mailroom-infra --test dynamodb_test -- --ignored
//! ```

use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use mailroom_domain::{
    campaign::{Campaign, CampaignId, CampaignStats, DeliveryCounters},
    delivery::{DeliveryRecord, DeliveryRecordId, DeliveryStatus},
    recipient::Recipient,
    sent_record::{SentRecord, TemplateKey},
    unsubscribe::UnsubscribeEntry,
};
use mailroom_infra::{
    InfraErrorKind,
    dynamodb::{self, TableNames},
    repository::{
        CampaignRepository,
        CounterUpdate,
        DeliveryLedger,
        DynamoDbCampaignRepository,
        DynamoDbDeliveryLedger,
        DynamoDbSentRecordRepository,
        DynamoDbUnsubscribeRepository,
        SentRecordRepository,
        UnsubscribeRepository,
    },
};
use pretty_assertions::assert_eq;

/// テスト用の DynamoDB エンドポイント
///
/// 優先順位:
/// 1. `DYNAMODB_ENDPOINT`
/// 2. `DYNAMODB_PORT` から構築
/// 3. フォールバック: `http://localhost:18000`
fn dynamodb_endpoint() -> String {
    std::env::var("DYNAMODB_ENDPOINT").unwrap_or_else(|_| {
        let port = std::env::var("DYNAMODB_PORT").unwrap_or_else(|_| "18000".to_string());
        format!("http://localhost:{port}")
    })
}

/// ランダムな接尾辞を付けたテーブル名で分離する（他テストとの競合を防止）
fn unique_tables() -> TableNames {
    let suffix = uuid::Uuid::now_v7().simple().to_string();
    TableNames {
        campaigns:    format!("test_campaigns_{suffix}"),
        deliveries:   format!("test_campaign_deliveries_{suffix}"),
        unsubscribes: format!("test_unsubscribes_{suffix}"),
        sent_emails:  format!("test_sent_emails_{suffix}"),
    }
}

async fn setup() -> (Client, TableNames) {
    let client = dynamodb::create_client(Some(&dynamodb_endpoint())).await;
    let tables = unique_tables();
    dynamodb::ensure_tables(&client, &tables)
        .await
        .expect("テーブル作成に失敗");
    (client, tables)
}

async fn cleanup(client: &Client, tables: &TableNames) {
    for name in [
        &tables.campaigns,
        &tables.deliveries,
        &tables.unsubscribes,
        &tables.sent_emails,
    ] {
        let _ = client.delete_table().table_name(name).send().await;
    }
}

fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_772_000_000, 0).unwrap()
}

#[tokio::test]
#[ignore = "DynamoDB Local が必要"]
async fn test_ensure_tablesが冪等に動作する() {
    let (client, tables) = setup().await;

    let second = dynamodb::ensure_tables(&client, &tables).await;
    assert!(second.is_ok(), "2 回目の呼び出しが失敗: {:?}", second.err());

    let describe = client
        .describe_table()
        .table_name(&tables.deliveries)
        .send()
        .await
        .unwrap();
    let key_names: Vec<String> = describe
        .table()
        .unwrap()
        .key_schema()
        .iter()
        .map(|ks| ks.attribute_name().to_string())
        .collect();
    assert_eq!(key_names, vec!["campaign_id", "record_id"]);

    cleanup(&client, &tables).await;
}

#[tokio::test]
#[ignore = "DynamoDB Local が必要"]
async fn test_配信記録とカウンターが同一トランザクションで更新される() {
    let (client, tables) = setup().await;
    let campaigns =
        DynamoDbCampaignRepository::new(client.clone(), tables.campaigns.clone());
    let ledger = DynamoDbDeliveryLedger::new(
        client.clone(),
        tables.deliveries.clone(),
        tables.campaigns.clone(),
    );
    let campaign_id = CampaignId::new("spring-2026").unwrap();
    campaigns
        .create(&Campaign::new(campaign_id.clone(), "春の新着物件", fixed_now()))
        .await
        .unwrap();

    let record = DeliveryRecord::delivered(&Recipient::new("tanaka@example.com"), fixed_now());
    let update = CounterUpdate {
        previous: None,
        expected: DeliveryCounters::default(),
        next:     DeliveryCounters::default().incremented(DeliveryStatus::Delivered),
        stats:    CampaignStats::default().with_delivery(fixed_now()),
    };
    ledger
        .commit_with_counters(&campaign_id, &record, &update)
        .await
        .unwrap();

    let campaign = campaigns.find_by_id(&campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.counters().delivered, 1);
    assert_eq!(campaign.stats().emails_sent, 1);
    assert_eq!(campaign.stats().last_sent, Some(fixed_now()));

    let stored = ledger
        .find_record(
            &campaign_id,
            &DeliveryRecordId::from_email("tanaka@example.com"),
        )
        .await
        .unwrap();
    assert_eq!(stored, Some(record));

    cleanup(&client, &tables).await;
}

#[tokio::test]
#[ignore = "DynamoDB Local が必要"]
async fn test_読み取り後にカウンターが変わっていれば競合になる() {
    let (client, tables) = setup().await;
    let campaigns =
        DynamoDbCampaignRepository::new(client.clone(), tables.campaigns.clone());
    let ledger = DynamoDbDeliveryLedger::new(
        client.clone(),
        tables.deliveries.clone(),
        tables.campaigns.clone(),
    );
    let campaign_id = CampaignId::new("spring-2026").unwrap();
    campaigns
        .create(&Campaign::new(campaign_id.clone(), "春の新着物件", fixed_now()))
        .await
        .unwrap();

    let stale = CounterUpdate {
        previous: None,
        expected: DeliveryCounters {
            delivered: 5,
            pending:   0,
            failed:    0,
        },
        next:     DeliveryCounters {
            delivered: 6,
            pending:   0,
            failed:    0,
        },
        stats:    CampaignStats::default(),
    };
    let record = DeliveryRecord::delivered(&Recipient::new("tanaka@example.com"), fixed_now());

    let err = ledger
        .commit_with_counters(&campaign_id, &record, &stale)
        .await
        .unwrap_err();

    assert!(matches!(err.kind(), InfraErrorKind::Conflict { .. }));
    // トランザクション全体がキャンセルされ、記録も書き込まれない
    assert!(ledger.list_records(&campaign_id).await.unwrap().is_empty());

    cleanup(&client, &tables).await;
}

#[tokio::test]
#[ignore = "DynamoDB Local が必要"]
async fn test_既存記録の上書きはカウンターを旧状態から新状態へ移す() {
    let (client, tables) = setup().await;
    let campaigns =
        DynamoDbCampaignRepository::new(client.clone(), tables.campaigns.clone());
    let ledger = DynamoDbDeliveryLedger::new(
        client.clone(),
        tables.deliveries.clone(),
        tables.campaigns.clone(),
    );
    let campaign_id = CampaignId::new("spring-2026").unwrap();
    campaigns
        .create(&Campaign::new(campaign_id.clone(), "春の新着物件", fixed_now()))
        .await
        .unwrap();
    let recipient = Recipient::new("tanaka@example.com");

    let failed = CounterUpdate {
        previous: None,
        expected: DeliveryCounters::default(),
        next:     DeliveryCounters::default().transitioned(None, DeliveryStatus::Failed),
        stats:    CampaignStats::default(),
    };
    ledger
        .commit_with_counters(
            &campaign_id,
            &DeliveryRecord::failed(&recipient, "timeout", fixed_now()),
            &failed,
        )
        .await
        .unwrap();

    let delivered = CounterUpdate {
        previous: Some(DeliveryStatus::Failed),
        expected: failed.next,
        next:     failed
            .next
            .transitioned(Some(DeliveryStatus::Failed), DeliveryStatus::Delivered),
        stats:    CampaignStats::default().with_delivery(fixed_now()),
    };
    ledger
        .commit_with_counters(
            &campaign_id,
            &DeliveryRecord::delivered(&recipient, fixed_now()),
            &delivered,
        )
        .await
        .unwrap();

    let campaign = campaigns.find_by_id(&campaign_id).await.unwrap().unwrap();
    assert_eq!(
        campaign.counters(),
        DeliveryCounters {
            delivered: 1,
            pending:   0,
            failed:    0,
        }
    );
    assert_eq!(ledger.list_records(&campaign_id).await.unwrap().len(), 1);

    cleanup(&client, &tables).await;
}

#[tokio::test]
#[ignore = "DynamoDB Local が必要"]
async fn test_読み取り後に記録の状態が変わっていれば競合になる() {
    let (client, tables) = setup().await;
    let campaigns =
        DynamoDbCampaignRepository::new(client.clone(), tables.campaigns.clone());
    let ledger = DynamoDbDeliveryLedger::new(
        client.clone(),
        tables.deliveries.clone(),
        tables.campaigns.clone(),
    );
    let campaign_id = CampaignId::new("spring-2026").unwrap();
    campaigns
        .create(&Campaign::new(campaign_id.clone(), "春の新着物件", fixed_now()))
        .await
        .unwrap();
    let recipient = Recipient::new("tanaka@example.com");
    // カウンターを経由せずに記録だけが書き込まれた状態
    ledger
        .put_record(
            &campaign_id,
            &DeliveryRecord::delivered(&recipient, fixed_now()),
        )
        .await
        .unwrap();

    let assumes_new = CounterUpdate {
        previous: None,
        expected: DeliveryCounters::default(),
        next:     DeliveryCounters::default().transitioned(None, DeliveryStatus::Failed),
        stats:    CampaignStats::default(),
    };
    let err = ledger
        .commit_with_counters(
            &campaign_id,
            &DeliveryRecord::failed(&recipient, "unsubscribed", fixed_now()),
            &assumes_new,
        )
        .await
        .unwrap_err();

    assert!(matches!(err.kind(), InfraErrorKind::Conflict { .. }));
    let stored = ledger
        .find_record(&campaign_id, &DeliveryRecordId::from_email("tanaka@example.com"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), DeliveryStatus::Delivered);
    assert_eq!(
        campaigns
            .find_by_id(&campaign_id)
            .await
            .unwrap()
            .unwrap()
            .counters(),
        DeliveryCounters::default()
    );

    cleanup(&client, &tables).await;
}

#[tokio::test]
#[ignore = "DynamoDB Local が必要"]
async fn test_同じ配信先の記録は上書きされる() {
    let (client, tables) = setup().await;
    let ledger = DynamoDbDeliveryLedger::new(
        client.clone(),
        tables.deliveries.clone(),
        tables.campaigns.clone(),
    );
    let campaign_id = CampaignId::new("spring-2026").unwrap();
    let recipient = Recipient::new("Tanaka@Example.com");

    ledger
        .put_record(
            &campaign_id,
            &DeliveryRecord::failed(&recipient, "timeout", fixed_now()),
        )
        .await
        .unwrap();
    ledger
        .put_record(
            &campaign_id,
            &DeliveryRecord::delivered(&Recipient::new("tanaka@example.com"), fixed_now()),
        )
        .await
        .unwrap();

    let records = ledger.list_records(&campaign_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status(), DeliveryStatus::Delivered);

    cleanup(&client, &tables).await;
}

#[tokio::test]
#[ignore = "DynamoDB Local が必要"]
async fn test_配信停止リストを正規化して読み込む() {
    let (client, tables) = setup().await;
    let repo = DynamoDbUnsubscribeRepository::new(client.clone(), tables.unsubscribes.clone());

    repo.add(&UnsubscribeEntry::new("C@D.com", fixed_now()))
        .await
        .unwrap();

    let emails = repo.load_all().await.unwrap();
    assert!(emails.contains("c@d.com"));

    cleanup(&client, &tables).await;
}

#[tokio::test]
#[ignore = "DynamoDB Local が必要"]
async fn test_送信済み記録はテンプレートキー単位で判定される() {
    let (client, tables) = setup().await;
    let repo = DynamoDbSentRecordRepository::new(client.clone(), tables.sent_emails.clone());
    let key = TemplateKey::new("newsletter", "3月号");

    repo.record(&SentRecord::new("a@b.com", key.clone(), "3月号", fixed_now()))
        .await
        .unwrap();

    assert!(repo.exists("A@B.com", &key).await.unwrap());
    assert!(
        !repo
            .exists("a@b.com", &TemplateKey::new("newsletter", "4月号"))
            .await
            .unwrap()
    );

    cleanup(&client, &tables).await;
}
