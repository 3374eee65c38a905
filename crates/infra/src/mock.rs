//! # テスト用モック
//!
//! ユースケーステストで使用するインメモリ実装。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! mailroom-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use mailroom_domain::{
    campaign::{Campaign, CampaignId, CampaignRecord},
    delivery::{DeliveryRecord, DeliveryRecordId},
    mail::{EmailMessage, SendReceipt, TransportError},
    recipient::normalize_email,
    sent_record::{SentRecord, TemplateKey},
    unsubscribe::UnsubscribeEntry,
};

use crate::{
    contact_notifier::{ContactNotifier, ContactedEvent},
    error::InfraError,
    repository::{
        CampaignRepository,
        CounterUpdate,
        DeliveryLedger,
        SentRecordRepository,
        UnsubscribeRepository,
    },
    transport::MailTransport,
};

// ===== MockCampaignRepository =====

#[derive(Clone, Default)]
pub struct MockCampaignRepository {
    campaigns: Arc<Mutex<HashMap<String, Campaign>>>,
}

impl MockCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_campaign(&self, campaign: Campaign) {
        self.campaigns
            .lock()
            .unwrap()
            .insert(campaign.id().as_str().to_string(), campaign);
    }

    /// 現在のキャンペーン（カウンター確認用）
    pub fn get(&self, id: &str) -> Option<Campaign> {
        self.campaigns.lock().unwrap().get(id).cloned()
    }

    fn apply_update(&self, id: &CampaignId, update: &CounterUpdate) -> Result<(), InfraError> {
        let mut campaigns = self.campaigns.lock().unwrap();
        let current = campaigns
            .get(id.as_str())
            .ok_or_else(|| InfraError::unexpected(format!("キャンペーンがありません: {id}")))?;
        if current.counters() != update.expected {
            return Err(InfraError::conflict("Campaign", id.as_str()));
        }
        let next = Campaign::from_db(CampaignRecord {
            id:         current.id().clone(),
            name:       current.name().to_string(),
            created_at: current.created_at(),
            stats:      update.stats,
            counters:   update.next,
        });
        campaigns.insert(id.as_str().to_string(), next);
        Ok(())
    }
}

#[async_trait]
impl CampaignRepository for MockCampaignRepository {
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, InfraError> {
        Ok(self.get(id.as_str()))
    }

    async fn create(&self, campaign: &Campaign) -> Result<(), InfraError> {
        let mut campaigns = self.campaigns.lock().unwrap();
        if campaigns.contains_key(campaign.id().as_str()) {
            return Err(InfraError::conflict("Campaign", campaign.id().as_str()));
        }
        campaigns.insert(campaign.id().as_str().to_string(), campaign.clone());
        Ok(())
    }
}

// ===== MockDeliveryLedger =====

/// 配信台帳のモック
///
/// カウンターは共有する [`MockCampaignRepository`] 上で更新する。
/// 原子的な経路は、既存記録の状態が `update.previous` と一致する場合のみ成功する。
/// 書き込まれた記録は書き込み順に `writes()` で取得できる。
#[derive(Clone, Default)]
pub struct MockDeliveryLedger {
    campaigns:      MockCampaignRepository,
    records:        Arc<Mutex<HashMap<(String, String), DeliveryRecord>>>,
    writes:         Arc<Mutex<Vec<DeliveryRecord>>>,
    fail_commit:    Arc<Mutex<bool>>,
    fail_put:       Arc<Mutex<bool>>,
    fail_find_for:  Arc<Mutex<HashSet<String>>>,
}

impl MockDeliveryLedger {
    pub fn new(campaigns: MockCampaignRepository) -> Self {
        Self {
            campaigns,
            ..Self::default()
        }
    }

    /// 既存の配信記録を登録する
    pub fn add_record(&self, campaign_id: &str, record: DeliveryRecord) {
        self.records.lock().unwrap().insert(
            (campaign_id.to_string(), record.id().as_str().to_string()),
            record,
        );
    }

    /// 原子的な経路を常に失敗させる
    pub fn fail_commits(&self) {
        *self.fail_commit.lock().unwrap() = true;
    }

    /// 記録のみの経路を常に失敗させる
    pub fn fail_puts(&self) {
        *self.fail_put.lock().unwrap() = true;
    }

    /// 指定アドレスの重複確認を失敗させる
    pub fn fail_find_for(&self, email: &str) {
        self.fail_find_for
            .lock()
            .unwrap()
            .insert(normalize_email(email));
    }

    /// 書き込み順の配信記録
    pub fn writes(&self) -> Vec<DeliveryRecord> {
        self.writes.lock().unwrap().clone()
    }

    fn store(&self, campaign_id: &CampaignId, record: &DeliveryRecord) {
        self.records.lock().unwrap().insert(
            (
                campaign_id.as_str().to_string(),
                record.id().as_str().to_string(),
            ),
            record.clone(),
        );
        self.writes.lock().unwrap().push(record.clone());
    }
}

#[async_trait]
impl DeliveryLedger for MockDeliveryLedger {
    async fn find_record(
        &self,
        campaign_id: &CampaignId,
        record_id: &DeliveryRecordId,
    ) -> Result<Option<DeliveryRecord>, InfraError> {
        let failing = self.fail_find_for.lock().unwrap().iter().any(|email| {
            DeliveryRecordId::from_email(email) == *record_id
        });
        if failing {
            return Err(InfraError::dynamo_db("台帳の参照に失敗"));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(
                campaign_id.as_str().to_string(),
                record_id.as_str().to_string(),
            ))
            .cloned())
    }

    async fn list_records(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<DeliveryRecord>, InfraError> {
        let mut records: Vec<DeliveryRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|((cid, _), _)| cid == campaign_id.as_str())
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
        Ok(records)
    }

    async fn commit_with_counters(
        &self,
        campaign_id: &CampaignId,
        record: &DeliveryRecord,
        update: &CounterUpdate,
    ) -> Result<(), InfraError> {
        if *self.fail_commit.lock().unwrap() {
            return Err(InfraError::conflict("Campaign", campaign_id.as_str()));
        }
        let current = self
            .records
            .lock()
            .unwrap()
            .get(&(
                campaign_id.as_str().to_string(),
                record.id().as_str().to_string(),
            ))
            .map(DeliveryRecord::status);
        if current != update.previous {
            return Err(InfraError::conflict("DeliveryRecord", record.id().as_str()));
        }
        self.campaigns.apply_update(campaign_id, update)?;
        self.store(campaign_id, record);
        Ok(())
    }

    async fn put_record(
        &self,
        campaign_id: &CampaignId,
        record: &DeliveryRecord,
    ) -> Result<(), InfraError> {
        if *self.fail_put.lock().unwrap() {
            return Err(InfraError::dynamo_db("配信記録の書き込みに失敗"));
        }
        self.store(campaign_id, record);
        Ok(())
    }
}

// ===== MockUnsubscribeRepository =====

#[derive(Clone, Default)]
pub struct MockUnsubscribeRepository {
    emails:      Arc<Mutex<HashSet<String>>>,
    unreachable: Arc<Mutex<bool>>,
}

impl MockUnsubscribeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_emails(emails: &[&str]) -> Self {
        let repo = Self::new();
        repo.emails
            .lock()
            .unwrap()
            .extend(emails.iter().map(|e| normalize_email(e)));
        repo
    }

    /// ストアに到達できない状態にする
    pub fn set_unreachable(&self) {
        *self.unreachable.lock().unwrap() = true;
    }
}

#[async_trait]
impl UnsubscribeRepository for MockUnsubscribeRepository {
    async fn load_all(&self) -> Result<HashSet<String>, InfraError> {
        if *self.unreachable.lock().unwrap() {
            return Err(InfraError::dynamo_db("配信停止リストに到達できません"));
        }
        Ok(self.emails.lock().unwrap().clone())
    }

    async fn add(&self, entry: &UnsubscribeEntry) -> Result<(), InfraError> {
        self.emails
            .lock()
            .unwrap()
            .insert(entry.email().to_string());
        Ok(())
    }
}

// ===== MockSentRecordRepository =====

#[derive(Clone, Default)]
pub struct MockSentRecordRepository {
    records: Arc<Mutex<Vec<SentRecord>>>,
}

impl MockSentRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&self, record: SentRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn records(&self) -> Vec<SentRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl SentRecordRepository for MockSentRecordRepository {
    async fn exists(&self, email: &str, template_key: &TemplateKey) -> Result<bool, InfraError> {
        let email = normalize_email(email);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.email == email && r.template_key == *template_key))
    }

    async fn record(&self, record: &SentRecord) -> Result<(), InfraError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ===== MockMailTransport =====

/// メール送信のモック
///
/// 送信要求を順に記録する。`fail_for` で指定した宛先への送信は指定のエラーで失敗する。
#[derive(Clone, Default)]
pub struct MockMailTransport {
    sent:     Arc<Mutex<Vec<EmailMessage>>>,
    failures: Arc<Mutex<HashMap<String, TransportError>>>,
}

impl MockMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定宛先への送信を失敗させる
    pub fn fail_for(&self, to: &str, error: TransportError) {
        self.failures
            .lock()
            .unwrap()
            .insert(normalize_email(to), error);
    }

    /// 送信を試みたメッセージ（失敗したものを含む、試行順）
    pub fn sent_messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// 送信を試みた宛先（試行順）
    pub fn sent_to(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.to.clone())
            .collect()
    }
}

#[async_trait]
impl MailTransport for MockMailTransport {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        self.sent.lock().unwrap().push(message.clone());
        match self.failures.lock().unwrap().get(&normalize_email(&message.to)) {
            Some(error) => Err(error.clone()),
            None => Ok(SendReceipt {
                provider_message_id: Some(format!("mock-{}", self.sent.lock().unwrap().len())),
            }),
        }
    }
}

// ===== MockContactNotifier =====

#[derive(Clone, Default)]
pub struct MockContactNotifier {
    events: Arc<Mutex<Vec<ContactedEvent>>>,
    fail:   Arc<Mutex<bool>>,
}

impl MockContactNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 通知を常に失敗させる
    pub fn fail_always(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn events(&self) -> Vec<ContactedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContactNotifier for MockContactNotifier {
    async fn notify_contacted(&self, event: &ContactedEvent) -> Result<(), InfraError> {
        self.events.lock().unwrap().push(event.clone());
        if *self.fail.lock().unwrap() {
            return Err(InfraError::unexpected("Webhook に到達できません"));
        }
        Ok(())
    }
}
