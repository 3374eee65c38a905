//! # 配信停止フィルタ
//!
//! 配信停止済みアドレスの集合を 1 回だけ読み込み、配信先リストから取り除く。
//!
//! ストアに到達できない場合は **fail-open**（警告ログを出し、何も除外しない）。
//! 配信停止リストの一時障害でキャンペーン全体を止めないことを優先する。

use std::{collections::HashSet, sync::Arc};

use mailroom_domain::recipient::{Recipient, normalize_email};
use mailroom_infra::repository::UnsubscribeRepository;
use mailroom_shared::event_log::error::{category, kind};

/// 読み込み済みの配信停止集合
#[derive(Debug, Clone, Default)]
pub struct UnsubscribeSet {
    emails: HashSet<String>,
}

impl UnsubscribeSet {
    pub fn new(emails: HashSet<String>) -> Self {
        Self { emails }
    }

    /// 配信停止済みか（大文字小文字・前後空白を無視）
    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&normalize_email(email))
    }
}

/// フィルタ結果
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredRecipients {
    pub recipients: Vec<Recipient>,
    pub removed:    usize,
}

/// 配信停止フィルタ
pub struct UnsubscribeFilter {
    repo: Arc<dyn UnsubscribeRepository>,
}

impl UnsubscribeFilter {
    pub fn new(repo: Arc<dyn UnsubscribeRepository>) -> Self {
        Self { repo }
    }

    /// 配信停止集合を読み込む（失敗時は空集合）
    pub async fn load(&self) -> UnsubscribeSet {
        match self.repo.load_all().await {
            Ok(emails) => UnsubscribeSet::new(emails),
            Err(e) => {
                tracing::warn!(
                    error.category = category::INFRASTRUCTURE,
                    error.kind = kind::DATABASE,
                    error = %e,
                    "配信停止リストを読み込めないため、フィルタせずに続行します"
                );
                UnsubscribeSet::default()
            }
        }
    }

    /// 配信停止済みの配信先を取り除く
    pub async fn filter(&self, recipients: Vec<Recipient>) -> FilteredRecipients {
        let set = self.load().await;
        apply(&set, recipients)
    }
}

/// 読み込み済みの集合で配信先を取り除く（入力順は保持）
pub fn apply(set: &UnsubscribeSet, recipients: Vec<Recipient>) -> FilteredRecipients {
    let before = recipients.len();
    let recipients: Vec<Recipient> = recipients
        .into_iter()
        .filter(|r| !set.contains(&r.email))
        .collect();

    FilteredRecipients {
        removed: before - recipients.len(),
        recipients,
    }
}

#[cfg(test)]
mod tests {
    use mailroom_infra::mock::MockUnsubscribeRepository;
    use pretty_assertions::assert_eq;

    use super::*;

    fn recipients(emails: &[&str]) -> Vec<Recipient> {
        emails.iter().map(|e| Recipient::new(*e)).collect()
    }

    #[tokio::test]
    async fn test_配信停止済みのアドレスを取り除く() {
        let repo = MockUnsubscribeRepository::with_emails(&["c@d.com"]);
        let sut = UnsubscribeFilter::new(Arc::new(repo));

        let result = sut
            .filter(recipients(&["a@b.com", " C@D.com ", "e@f.com"]))
            .await;

        assert_eq!(result.removed, 1);
        assert_eq!(result.recipients, recipients(&["a@b.com", "e@f.com"]));
    }

    #[tokio::test]
    async fn test_ストアに到達できなければ何も除外しない() {
        let repo = MockUnsubscribeRepository::with_emails(&["c@d.com"]);
        repo.set_unreachable();
        let sut = UnsubscribeFilter::new(Arc::new(repo));

        let result = sut.filter(recipients(&["a@b.com", "c@d.com"])).await;

        assert_eq!(result.removed, 0);
        assert_eq!(result.recipients.len(), 2);
    }

    #[test]
    fn test_空の集合では入力をそのまま返す() {
        let result = apply(&UnsubscribeSet::default(), recipients(&["a@b.com"]));

        assert_eq!(
            result,
            FilteredRecipients {
                recipients: recipients(&["a@b.com"]),
                removed:    0,
            }
        );
    }
}
