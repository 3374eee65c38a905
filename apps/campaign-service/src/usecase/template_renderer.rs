//! # テンプレートレンダラー
//!
//! テンプレート ID とパラメータから本文 HTML を生成する。
//!
//! ## 設計方針
//!
//! - **組み込みテンプレート**: `include_str!` でバイナリに埋め込む
//! - **外部テンプレート**: `TEMPLATE_DIR` が設定されていれば `{dir}/**/*.html` を読み込む
//! - **配信先ごとの値は埋め込まない**: `[NAME]` などのトークンはそのまま残し、
//!   パーソナライザが配信先ごとに置換する

use std::path::Path;

use tera::{Context, Tera};

use crate::error::CampaignError;

/// テンプレートレンダラートレイト
pub trait TemplateRenderer: Send + Sync {
    /// テンプレートを描画する
    ///
    /// 未知のテンプレート ID は `Validation` エラー。
    fn render(&self, template_id: &str, params: &serde_json::Value) -> Result<String, CampaignError>;
}

/// tera によるテンプレートレンダラー
pub struct TeraTemplateRenderer {
    engine: Tera,
}

impl TeraTemplateRenderer {
    /// 組み込みテンプレートでレンダラーを作成する
    pub fn new() -> Result<Self, CampaignError> {
        let mut engine = Tera::default();

        engine
            .add_raw_templates(vec![
                (
                    "newsletter.html",
                    include_str!("../../templates/newsletter.html"),
                ),
                (
                    "property_update.html",
                    include_str!("../../templates/property_update.html"),
                ),
            ])
            .map_err(|e| CampaignError::Internal(format!("テンプレートの登録に失敗: {e}")))?;

        Ok(Self { engine })
    }

    /// ディレクトリ配下の `*.html` を読み込んでレンダラーを作成する
    pub fn from_dir(dir: &Path) -> Result<Self, CampaignError> {
        let glob = format!("{}/**/*.html", dir.display());
        let engine = Tera::new(&glob).map_err(|e| {
            CampaignError::Internal(format!("テンプレートの読み込みに失敗 ({glob}): {e}"))
        })?;

        tracing::info!(
            template_dir = %dir.display(),
            templates = engine.get_template_names().count(),
            "テンプレートを読み込みました"
        );

        Ok(Self { engine })
    }

    fn template_name(&self, template_id: &str) -> Option<String> {
        let name = format!("{}.html", template_id.trim());
        self.engine
            .get_template_names()
            .any(|n| n == name)
            .then_some(name)
    }
}

impl TemplateRenderer for TeraTemplateRenderer {
    fn render(&self, template_id: &str, params: &serde_json::Value) -> Result<String, CampaignError> {
        let name = self.template_name(template_id).ok_or_else(|| {
            CampaignError::Validation(format!("テンプレートが見つかりません: {template_id}"))
        })?;

        let context = match params {
            serde_json::Value::Null => Context::new(),
            value => Context::from_value(value.clone()).map_err(|_| {
                CampaignError::Validation("テンプレートパラメータはオブジェクトで指定してください".to_string())
            })?,
        };

        self.engine.render(&name, &context).map_err(|e| {
            CampaignError::Validation(format!("テンプレートの描画に失敗しました ({template_id}): {e}"))
        })
    }
}
