//! # テンプレートパーソナライザ
//!
//! 描画済みテンプレート HTML を配信先ごとの本文に変換する。
//!
//! ## 変換の順序
//!
//! 1. **トークン置換**: `{{name}}` / `[CONSULTANT_NAME]` などを配信先の値（HTML エスケープ済み）で置換する。
//!    未知のトークンはそのまま残す
//! 2. **配信停止リンク**: `{{unsubscribe_url}}` / `[UNSUBSCRIBE_LINK]` を
//!    `{base}/unsubscribe?email={percent-encoded}` に置換する
//! 3. **トラッキング**（キャンペーン ID・ベース URL・メールアドレスが揃った場合のみ）:
//!    - `<body>` の最後の子として 1×1 の開封トラッキング画像を挿入する
//!    - アンカーの `href` をクリックトラッキング URL に書き換える。
//!      フラグメント、`mailto:`、`javascript:`、`tel:`、配信停止リンクは書き換えない
//! 4. **絶対 URL 化**: スキームを持たない `src` / `href` にベース URL を前置する
//! 5. **メールクライアント互換**: `<body>` とブランドブロックに背景色を属性とインラインスタイルで明示する
//!
//! 3〜5 は lol_html によるストリーミング書き換え 1 パスで行う。
//! 同じ入力からは常に同じ出力が得られる（画像の埋め込みはファイル内容にのみ依存する）。

use std::{
    path::{Component, Path, PathBuf},
    sync::LazyLock,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use mailroom_domain::{campaign::CampaignId, mail::Consultant, recipient::Recipient};
use regex::{Captures, Regex};
use thiserror::Error;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\{\{\s*(name|company|email|consultant_name|consultant_email|consultant_phone|unsubscribe_url)\s*\}\}|\[(NAME|COMPANY|EMAIL|CONSULTANT_NAME|CONSULTANT_EMAIL|CONSULTANT_PHONE|UNSUBSCRIBE_LINK)\]",
    )
    .expect("トークンの正規表現が不正です")
});

static UNSUBSCRIBE_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unsubscribe|se\s*d[ée]sinscrire|d[ée]sinscrire|\{\{\s*unsubscribe_url\s*\}\}|\[UNSUBSCRIBE_LINK\]")
        .expect("配信停止キーワードの正規表現が不正です")
});

static UNSUBSCRIBE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\.?/?(api/)?(d[ée]sinscription|opt-?out|unsub)([/?#.]|$)")
        .expect("配信停止パスの正規表現が不正です")
});

/// パーソナライズの失敗
#[derive(Debug, Error)]
pub enum PersonalizeError {
    #[error("HTML の書き換えに失敗しました: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),
}

/// ブランドブロック（背景色を明示する構造要素）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrandBlock {
    /// CSS セレクタ（例: `.brand-header`）
    pub selector: String,
    /// 背景色（例: `#0b3d91`）
    pub color:    String,
}

/// パーソナライザの設定
#[derive(Debug, Clone)]
pub struct PersonalizerConfig {
    /// ベース URL が与えられない場合の配信停止リンクのベース
    pub fallback_base_url: String,
    /// data URI に埋め込む画像のディレクトリ
    pub asset_dir:         Option<PathBuf>,
    /// `<body>` の背景色
    pub body_background:   String,
    /// 背景色を明示するブランドブロック
    pub brand_blocks:      Vec<BrandBlock>,
}

impl PersonalizerConfig {
    pub fn new(fallback_base_url: impl Into<String>) -> Self {
        Self {
            fallback_base_url: fallback_base_url.into(),
            asset_dir:         None,
            body_background:   "#ffffff".to_string(),
            brand_blocks:      vec![
                BrandBlock {
                    selector: ".brand-header".to_string(),
                    color:    "#0b3d91".to_string(),
                },
                BrandBlock {
                    selector: ".brand-footer".to_string(),
                    color:    "#f4f4f4".to_string(),
                },
            ],
        }
    }

    pub fn with_asset_dir(mut self, asset_dir: Option<PathBuf>) -> Self {
        self.asset_dir = asset_dir;
        self
    }
}

/// パーソナライズの入力
#[derive(Debug, Clone, Copy)]
pub struct PersonalizeInput<'a> {
    pub template:    &'a str,
    pub recipient:   &'a Recipient,
    pub consultant:  &'a Consultant,
    pub campaign_id: Option<&'a CampaignId>,
    pub base_url:    Option<&'a str>,
}

/// テンプレートパーソナライザ
#[derive(Debug, Clone)]
pub struct TemplatePersonalizer {
    config: PersonalizerConfig,
}

impl TemplatePersonalizer {
    pub fn new(config: PersonalizerConfig) -> Self {
        Self { config }
    }

    /// 配信先ごとの本文 HTML を生成する
    pub fn personalize(&self, input: &PersonalizeInput<'_>) -> Result<String, PersonalizeError> {
        let base_url = input
            .base_url
            .map(|b| b.trim().trim_end_matches('/'))
            .filter(|b| !b.is_empty());
        let email = input.recipient.normalized_email();

        let unsubscribe_base = base_url.unwrap_or(self.config.fallback_base_url.as_str());
        let unsubscribe_url = format!(
            "{}/unsubscribe?email={}",
            unsubscribe_base.trim_end_matches('/'),
            urlencoding::encode(&email)
        );

        let substituted = substitute_tokens(
            input.template,
            input.recipient,
            input.consultant,
            &unsubscribe_url,
        );

        let tracking = match (input.campaign_id, base_url) {
            (Some(campaign_id), Some(base)) if !email.is_empty() => Some(Tracking {
                base,
                campaign: urlencoding::encode(campaign_id.as_str()).into_owned(),
                email:    urlencoding::encode(&email).into_owned(),
            }),
            _ => None,
        };

        self.rewrite(&substituted, base_url, tracking.as_ref())
    }

    /// トラッキング・絶対 URL 化・背景色の明示を 1 パスで行う
    fn rewrite(
        &self,
        html: &str,
        base_url: Option<&str>,
        tracking: Option<&Tracking<'_>>,
    ) -> Result<String, PersonalizeError> {
        let pixel = tracking.map(Tracking::pixel_html);
        let body_background = self.config.body_background.as_str();

        let mut handlers = vec![
            element!("[href]", move |el| {
                let Some(raw) = el.get_attribute("href") else {
                    return Ok(());
                };
                let href = decode_entities(raw.trim());
                if href.is_empty() || href.starts_with('#') {
                    return Ok(());
                }

                let is_anchor = el.tag_name().eq_ignore_ascii_case("a");
                let absolute = match base_url {
                    Some(base) => absolutize(&href, base),
                    None => href.clone(),
                };
                let rewritten = match tracking {
                    Some(tracking) if is_anchor && !is_excluded_link(&href) => {
                        tracking.click_url(&absolute)
                    }
                    _ => absolute,
                };
                if rewritten != href {
                    el.set_attribute("href", &rewritten)?;
                }
                Ok(())
            }),
            element!("[src]", move |el| {
                let Some(raw) = el.get_attribute("src") else {
                    return Ok(());
                };
                let src = decode_entities(raw.trim());
                if src.is_empty() {
                    return Ok(());
                }

                if el.tag_name().eq_ignore_ascii_case("img")
                    && let Some(data_uri) = self.embed_asset(&src)
                {
                    el.set_attribute("src", &data_uri)?;
                    return Ok(());
                }
                if let Some(base) = base_url {
                    let absolute = absolutize(&src, base);
                    if absolute != src {
                        el.set_attribute("src", &absolute)?;
                    }
                }
                Ok(())
            }),
            element!("body", move |el| {
                apply_background(el, body_background)?;
                if let Some(pixel) = &pixel {
                    el.append(pixel, ContentType::Html);
                }
                Ok(())
            }),
        ];

        for block in &self.config.brand_blocks {
            let color = block.color.as_str();
            handlers.push(element!(block.selector.as_str(), move |el| {
                apply_background(el, color)?;
                Ok(())
            }));
        }

        let mut output = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: handlers,
                ..RewriteStrSettings::new()
            },
        )?;

        // <body> が無い（または閉じられていない）文書は末尾に追加する
        if let Some(pixel) = tracking.map(Tracking::pixel_html)
            && !output.contains(&pixel)
        {
            output.push_str(&pixel);
        }

        Ok(output)
    }

    /// アセットディレクトリ内の画像を data URI に変換する
    ///
    /// 相対パスでない、ディレクトリ外を指す、読み取れない、未知の形式の場合は `None`。
    fn embed_asset(&self, src: &str) -> Option<String> {
        let asset_dir = self.config.asset_dir.as_ref()?;
        if src.starts_with("//") || url::Url::parse(src).is_ok() {
            return None;
        }

        let relative = Path::new(src.split(['?', '#']).next()?.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }

        let mime = match relative.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "svg" => "image/svg+xml",
            _ => return None,
        };

        match std::fs::read(asset_dir.join(relative)) {
            Ok(bytes) => Some(format!("data:{mime};base64,{}", STANDARD.encode(bytes))),
            Err(e) => {
                tracing::debug!(src, error = %e, "画像を埋め込めないため URL のまま残します");
                None
            }
        }
    }
}

/// トラッキング用のパラメータ（パーセントエンコード済み）
struct Tracking<'a> {
    base:     &'a str,
    campaign: String,
    email:    String,
}

impl Tracking<'_> {
    fn pixel_html(&self) -> String {
        format!(
            r#"<img src="{}/api/track/open?c={}&amp;e={}" width="1" height="1" alt="" style="display:none;border:0;" />"#,
            self.base, self.campaign, self.email
        )
    }

    fn click_url(&self, original: &str) -> String {
        format!(
            "{}/api/track/click?c={}&e={}&url={}",
            self.base,
            self.campaign,
            self.email,
            urlencoding::encode(original)
        )
    }
}

/// トークンを 1 パスで置換する（置換後の値は再走査しない）
fn substitute_tokens(
    template: &str,
    recipient: &Recipient,
    consultant: &Consultant,
    unsubscribe_url: &str,
) -> String {
    TOKEN_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let token = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            match token.as_str() {
                "name" => escape_html(recipient.display_name()),
                "company" => escape_html(recipient.company_name()),
                "email" => escape_html(&recipient.normalized_email()),
                "consultant_name" => escape_html(consultant.name.as_deref().unwrap_or("")),
                "consultant_email" => escape_html(consultant.email.as_deref().unwrap_or("")),
                "consultant_phone" => escape_html(consultant.phone.as_deref().unwrap_or("")),
                "unsubscribe_url" | "unsubscribe_link" => unsubscribe_url.to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// クリックトラッキングの対象外となるリンクか
fn is_excluded_link(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("javascript:")
        || lower.starts_with("tel:")
        || UNSUBSCRIBE_KEYWORD_RE.is_match(href)
        || UNSUBSCRIBE_PATH_RE.is_match(href)
}

/// スキームを持たない URL にベース URL を前置する
fn absolutize(value: &str, base: &str) -> String {
    if value.starts_with('#') || url::Url::parse(value).is_ok() {
        return value.to_string();
    }
    if let Some(rest) = value.strip_prefix("//") {
        return format!("https://{rest}");
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        value.trim_start_matches("./").trim_start_matches('/')
    )
}

/// 要素に背景色を属性とインラインスタイルで明示する
fn apply_background(
    el: &mut lol_html::html_content::Element<'_, '_>,
    color: &str,
) -> Result<(), lol_html::errors::AttributeNameError> {
    let style = el.get_attribute("style").unwrap_or_default();
    el.set_attribute("bgcolor", color)?;
    el.set_attribute("style", &with_background_color(&style, color))?;
    Ok(())
}

/// 既存の `background-color` 宣言を置き換えたインラインスタイルを返す
fn with_background_color(style: &str, color: &str) -> String {
    let mut declarations = vec![format!("background-color: {color}")];
    declarations.extend(
        style
            .split(';')
            .map(str::trim)
            .filter(|decl| !decl.is_empty())
            .filter(|decl| {
                let property = decl.split(':').next().unwrap_or("").trim();
                !property.eq_ignore_ascii_case("background-color")
            })
            .map(str::to_string),
    );
    format!("{};", declarations.join("; "))
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// 属性値の基本的な文字参照を戻す
///
/// テンプレートエンジンの自動エスケープ（`/` → `&#x2F;` など）を含む。
fn decode_entities(value: &str) -> String {
    value
        .replace("&#x2F;", "/")
        .replace("&#47;", "/")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
