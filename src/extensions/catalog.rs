//! Catalog models and the [`Extension`] trait.
//!
//! An extension is a type implementing [`Extension`] on top of a [`Miru`]
//! facade. Every catalog operation has a default that fails with
//! [`ExtensionError::NotImplemented`]; implementations override the ones
//! they support and advertise them through [`Extension::capabilities`] so a
//! host can hide unsupported features up front.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::{QueryNode, XPathNode};
use super::error::{ExtensionError, ExtensionResult};
use super::http::ResponseBody;
use super::ipc::RequestOptions;
use super::miru::Miru;
use super::settings::SettingDescriptor;

/// The catalog operations an extension may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CatalogOperation {
    Popular,
    Latest,
    Search,
    CreateFilter,
    Detail,
    Watch,
    Tags,
    CheckUpdate,
}

impl CatalogOperation {
    pub const ALL: [CatalogOperation; 8] = [
        CatalogOperation::Popular,
        CatalogOperation::Latest,
        CatalogOperation::Search,
        CatalogOperation::CreateFilter,
        CatalogOperation::Detail,
        CatalogOperation::Watch,
        CatalogOperation::Tags,
        CatalogOperation::CheckUpdate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CatalogOperation::Popular => "popular",
            CatalogOperation::Latest => "latest",
            CatalogOperation::Search => "search",
            CatalogOperation::CreateFilter => "createFilter",
            CatalogOperation::Detail => "detail",
            CatalogOperation::Watch => "watch",
            CatalogOperation::Tags => "tags",
            CatalogOperation::CheckUpdate => "checkUpdate",
        }
    }
}

impl fmt::Display for CatalogOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of catalog operations an extension implements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<CatalogOperation>);

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, operation: CatalogOperation) -> Self {
        self.0.insert(operation);
        self
    }

    pub fn supports(&self, operation: CatalogOperation) -> bool {
        self.0.contains(&operation)
    }

    pub fn iter(&self) -> impl Iterator<Item = CatalogOperation> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<CatalogOperation> for Capabilities {
    fn from_iter<I: IntoIterator<Item = CatalogOperation>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Kind of media an extension serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchType {
    Bangumi,
    Manga,
    Fikushon,
}

impl WatchType {
    pub fn name(self) -> &'static str {
        match self {
            WatchType::Bangumi => "bangumi",
            WatchType::Manga => "manga",
            WatchType::Fikushon => "fikushon",
        }
    }
}

impl fmt::Display for WatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WatchType {
    type Err = ExtensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "bangumi" => Ok(WatchType::Bangumi),
            "manga" => Ok(WatchType::Manga),
            "fikushon" => Ok(WatchType::Fikushon),
            other => Err(ExtensionError::InvalidWatchType(other.to_string())),
        }
    }
}

/// Headers a client must send when fetching media or covers.
pub type Headers = BTreeMap<String, String>;

/// Selected filter options by filter key.
pub type FilterSelection = BTreeMap<String, Vec<String>>;

/// One entry of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeGroup {
    pub title: String,
    pub urls: Vec<Episode>,
}

/// Detail page of a title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detail {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub episodes: Vec<EpisodeGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtitle {
    #[serde(default)]
    pub language: String,
    pub title: String,
    pub url: String,
}

/// Playable video source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BangumiWatch {
    /// Stream kind: `hls`, `mp4`, `torrent` or `magnet`.
    #[serde(rename = "type")]
    pub stream_type: String,
    pub url: String,
    #[serde(default)]
    pub subtitles: Vec<Subtitle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_track: Option<String>,
}

/// Page images of a manga chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MangaWatch {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

/// Paragraphs of a novel chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FikushonWatch {
    pub content: Vec<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

/// What `watch` returns, one variant per [`WatchType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Watch {
    Bangumi(BangumiWatch),
    Manga(MangaWatch),
    Fikushon(FikushonWatch),
}

impl Watch {
    pub fn kind(&self) -> WatchType {
        match self {
            Watch::Bangumi(_) => WatchType::Bangumi,
            Watch::Manga(_) => WatchType::Manga,
            Watch::Fikushon(_) => WatchType::Fikushon,
        }
    }

    /// Decode a JSON watch payload of the given kind.
    pub fn decode(kind: WatchType, value: Value) -> ExtensionResult<Self> {
        Ok(match kind {
            WatchType::Bangumi => Watch::Bangumi(serde_json::from_value(value)?),
            WatchType::Manga => Watch::Manga(serde_json::from_value(value)?),
            WatchType::Fikushon => Watch::Fikushon(serde_json::from_value(value)?),
        })
    }
}

/// A filter offered by `createFilter`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub title: String,
    #[serde(default)]
    pub min: u32,
    #[serde(default)]
    pub max: u32,
    #[serde(rename = "default", default)]
    pub default_option: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// A loaded extension.
///
/// Implementations hold the [`Miru`] facade they were constructed with and
/// override the catalog operations they provide.
#[async_trait(?Send)]
pub trait Extension: Send {
    /// The facade this extension was loaded with.
    fn miru(&self) -> &Miru;

    /// Catalog operations this extension overrides.
    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    /// Called once after construction, before any catalog operation.
    async fn load(&mut self) -> ExtensionResult<()> {
        Ok(())
    }

    async fn popular(&self, _page: u32) -> ExtensionResult<Vec<ListItem>> {
        Err(ExtensionError::NotImplemented(CatalogOperation::Popular))
    }

    async fn latest(&self, _page: u32) -> ExtensionResult<Vec<ListItem>> {
        Err(ExtensionError::NotImplemented(CatalogOperation::Latest))
    }

    async fn search(
        &self,
        _keyword: &str,
        _page: u32,
        _filter: Option<&FilterSelection>,
    ) -> ExtensionResult<Vec<ListItem>> {
        Err(ExtensionError::NotImplemented(CatalogOperation::Search))
    }

    async fn create_filter(
        &self,
        _filter: Option<&FilterSelection>,
    ) -> ExtensionResult<BTreeMap<String, Filter>> {
        Err(ExtensionError::NotImplemented(CatalogOperation::CreateFilter))
    }

    async fn detail(&self, _url: &str) -> ExtensionResult<Detail> {
        Err(ExtensionError::NotImplemented(CatalogOperation::Detail))
    }

    async fn watch(&self, _url: &str) -> ExtensionResult<Watch> {
        Err(ExtensionError::NotImplemented(CatalogOperation::Watch))
    }

    async fn tags(&self, _url: &str) -> ExtensionResult<Vec<String>> {
        Err(ExtensionError::NotImplemented(CatalogOperation::Tags))
    }

    /// Latest update label of a title, compared by the host to detect news.
    async fn check_update(&self, _url: &str) -> ExtensionResult<String> {
        Err(ExtensionError::NotImplemented(CatalogOperation::CheckUpdate))
    }

    // Facade shortcuts.

    async fn request(
        &self,
        path: &str,
        options: Option<RequestOptions>,
    ) -> ExtensionResult<ResponseBody> {
        self.miru().request(path, options).await
    }

    async fn raw_request(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> ExtensionResult<ResponseBody> {
        self.miru().raw_request(url, options).await
    }

    fn query_selector(&self, content: &str, selector: &str) -> QueryNode {
        self.miru().query_selector(content, selector)
    }

    async fn query_selector_all(
        &self,
        content: &str,
        selector: &str,
    ) -> ExtensionResult<Vec<QueryNode>> {
        self.miru().query_selector_all(content, selector).await
    }

    fn query_xpath(&self, content: &str, expression: &str) -> XPathNode {
        self.miru().query_xpath(content, expression)
    }

    async fn get_attribute_text(
        &self,
        content: &str,
        selector: &str,
        attribute: &str,
    ) -> ExtensionResult<Option<String>> {
        self.miru()
            .get_attribute_text(content, selector, attribute)
            .await
    }

    async fn get_setting(&self, key: &str) -> ExtensionResult<Option<String>> {
        self.miru().get_setting(key).await
    }

    async fn register_setting(&self, descriptor: SettingDescriptor) -> ExtensionResult<()> {
        self.miru().register_setting(descriptor).await
    }

    async fn list_cookies(&self, url: &str) -> ExtensionResult<Vec<String>> {
        self.miru().list_cookies(url).await
    }

    async fn set_cookies(&self, url: &str, cookies: &[String]) -> ExtensionResult<()> {
        self.miru().set_cookies(url, cookies).await
    }
}
