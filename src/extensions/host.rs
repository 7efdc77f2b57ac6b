//! Extension host - manages every loaded extension.
//!
//! The ExtensionHost is responsible for:
//! - Scanning the extensions directory for `<package>.js` manifests
//! - Building one `Miru` (own bridge, endpoint task and cancellation token)
//!   per loaded extension
//! - Running `load()` once and recording load failures
//! - Serialising catalog calls per extension and checking their results

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;

use super::catalog::{
    Capabilities, CatalogOperation, Detail, Extension, Filter, FilterSelection, ListItem, Watch,
};
use super::cookies::{CookieStore, JarCookieStore};
use super::error::{ExtensionError, ExtensionResult};
use super::http::{ReqwestTransport, Transport, DEFAULT_USER_AGENT};
use super::ipc::{Bridge, HostEndpoint, HostUi, InvokeOptions, MiruContext, TracingUi};
use super::manifest::ExtensionManifest;
use super::miru::Miru;
use super::settings::{FileSettingsStore, SettingsStore, StoredSetting};
use super::storage::ExtensionStorage;
use super::ExtensionId;

/// Configuration for the extension host.
#[derive(Clone)]
pub struct ExtensionHostConfig {
    /// Directory containing `<package>.js` scripts.
    pub extensions_dir: PathBuf,

    /// Directory holding settings and per-extension data.
    pub data_dir: PathBuf,

    /// Default `User-Agent` of outgoing requests.
    pub user_agent: String,

    pub request_timeout: Duration,

    /// Deadline applied to every bridge call, `None` to wait forever.
    pub bridge_timeout: Option<Duration>,

    /// Network primitive override (optional for testing).
    pub transport: Option<Arc<dyn Transport>>,

    /// Output for snackbars and extension logs.
    pub ui: Option<Arc<dyn HostUi>>,
}

impl Default for ExtensionHostConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            extensions_dir: data_dir.join("extensions"),
            data_dir,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            bridge_timeout: Some(Duration::from_secs(60)),
            transport: None,
            ui: None,
        }
    }
}

impl std::fmt::Debug for ExtensionHostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHostConfig")
            .field("extensions_dir", &self.extensions_dir)
            .field("data_dir", &self.data_dir)
            .field("user_agent", &self.user_agent)
            .field("request_timeout", &self.request_timeout)
            .field("bridge_timeout", &self.bridge_timeout)
            .field("transport", &self.transport.is_some())
            .field("ui", &self.ui.is_some())
            .finish()
    }
}

impl ExtensionHostConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            extensions_dir: config.extensions_dir(),
            data_dir: config.data_dir(),
            user_agent: config.network.user_agent.clone(),
            request_timeout: config.request_timeout(),
            bridge_timeout: config.bridge_timeout(),
            transport: None,
            ui: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("miru"))
        .unwrap_or_else(|| PathBuf::from(shellexpand::tilde("~/.miru").as_ref()))
}

/// A running extension.
struct LoadedExtension {
    extension: Mutex<Box<dyn Extension>>,
    capabilities: Capabilities,
    /// Cancels every pending bridge call of the extension.
    cancel: CancellationToken,
    endpoint: JoinHandle<()>,
}

impl Drop for LoadedExtension {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.endpoint.abort();
    }
}

/// The extension host manages all loaded extensions.
pub struct ExtensionHost {
    /// Configuration.
    config: ExtensionHostConfig,

    /// Manifests by extension ID.
    manifests: HashMap<ExtensionId, ExtensionManifest>,

    /// Script paths by extension ID.
    script_paths: HashMap<ExtensionId, PathBuf>,

    /// Why a script could not be scanned or loaded, keyed by file stem.
    load_errors: HashMap<ExtensionId, String>,

    /// Loaded extensions by ID.
    extensions: HashMap<ExtensionId, LoadedExtension>,

    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsStore>,
    cookies: Arc<dyn CookieStore>,
    ui: Arc<dyn HostUi>,
}

impl ExtensionHost {
    /// Create a new extension host and scan the extensions directory.
    pub fn new(config: ExtensionHostConfig) -> ExtensionResult<Self> {
        let jar = Arc::new(Jar::default());
        let transport: Arc<dyn Transport> = match &config.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(ReqwestTransport::new(
                Arc::clone(&jar),
                config.user_agent.clone(),
                config.request_timeout,
            )?),
        };
        let settings = Arc::new(FileSettingsStore::new(config.data_dir.join("settings")));
        let ui: Arc<dyn HostUi> = match &config.ui {
            Some(ui) => Arc::clone(ui),
            None => Arc::new(TracingUi),
        };

        let mut host = Self {
            config,
            manifests: HashMap::new(),
            script_paths: HashMap::new(),
            load_errors: HashMap::new(),
            extensions: HashMap::new(),
            transport,
            settings,
            cookies: Arc::new(JarCookieStore::new(jar)),
            ui,
        };

        host.scan_extensions()?;
        Ok(host)
    }

    /// Create a MiruContext for an extension.
    fn create_context(&self, ext_id: &ExtensionId) -> MiruContext {
        let storage_dir = self.config.data_dir.join("data").join(ext_id);
        let storage = ExtensionStorage::new(ext_id, storage_dir);

        MiruContext::new(
            ext_id.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.settings),
            Arc::clone(&self.cookies),
            storage,
        )
        .with_ui(Arc::clone(&self.ui))
    }

    /// Scan the extensions directory and read all manifests.
    ///
    /// Scripts that fail to parse are recorded in [`Self::load_errors`] and
    /// skipped.
    pub fn scan_extensions(&mut self) -> ExtensionResult<()> {
        self.manifests.clear();
        self.script_paths.clear();
        self.load_errors.clear();

        let extensions_dir = &self.config.extensions_dir;

        if !extensions_dir.exists() {
            // No extensions directory - that's fine, just no extensions
            return Ok(());
        }

        let entries = std::fs::read_dir(extensions_dir)?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !is_script(&path) {
                continue;
            }

            match ExtensionManifest::load(&path) {
                Ok(manifest) => {
                    let ext_id = manifest.package.clone();
                    debug!(extension = %ext_id, "found extension");
                    self.script_paths.insert(ext_id.clone(), path);
                    self.manifests.insert(ext_id, manifest);
                }
                Err(e) => {
                    warn!(path = %path.display(), "skipping extension: {e}");
                    let stem = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    self.load_errors.insert(stem, e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Load `ext_id`, building the extension with `factory`.
    ///
    /// The factory receives the extension's `Miru`, already wired to a
    /// running host endpoint. `load()` runs before this returns; if it fails
    /// the extension is torn down and the failure is recorded.
    pub async fn load<E, F>(&mut self, ext_id: &str, factory: F) -> ExtensionResult<()>
    where
        E: Extension + 'static,
        F: FnOnce(Miru) -> E,
    {
        if self.extensions.contains_key(ext_id) {
            return Err(ExtensionError::AlreadyLoaded(ext_id.to_string()));
        }
        let manifest = self
            .manifests
            .get(ext_id)
            .ok_or_else(|| ExtensionError::ExtensionNotFound(ext_id.to_string()))?;
        let ext_id = manifest.package.clone();

        let cancel = CancellationToken::new();
        let mut defaults = InvokeOptions::default().with_cancel(cancel.clone());
        if let Some(deadline) = self.config.bridge_timeout {
            defaults = defaults.with_deadline(deadline);
        }

        let (bridge, receiver) = Bridge::channel(ext_id.clone());
        let bridge = bridge.with_defaults(defaults);
        let miru = Miru::new(
            ext_id.clone(),
            manifest.name.clone(),
            manifest.website.clone(),
            manifest.generation(),
            bridge,
        );

        let context = Arc::new(self.create_context(&ext_id));
        let endpoint = HostEndpoint::new(receiver, context).spawn();

        let mut extension = factory(miru);
        if let Err(e) = extension.load().await {
            warn!(extension = %ext_id, "load failed: {e}");
            cancel.cancel();
            endpoint.abort();
            let message = e.to_string();
            self.load_errors.insert(ext_id.clone(), message.clone());
            return Err(ExtensionError::LoadFailed {
                extension: ext_id,
                message,
            });
        }

        let loaded = LoadedExtension {
            capabilities: extension.capabilities(),
            extension: Mutex::new(Box::new(extension)),
            cancel,
            endpoint,
        };
        self.load_errors.remove(&ext_id);
        self.extensions.insert(ext_id.clone(), loaded);
        info!(extension = %ext_id, "extension loaded");
        Ok(())
    }

    /// Unload an extension, cancelling its pending bridge calls.
    ///
    /// Returns `false` if it was not loaded.
    pub fn unload(&mut self, ext_id: &str) -> bool {
        match self.extensions.remove(ext_id) {
            Some(_) => {
                info!(extension = ext_id, "extension unloaded");
                true
            }
            None => false,
        }
    }

    pub fn is_loaded(&self, ext_id: &str) -> bool {
        self.extensions.contains_key(ext_id)
    }

    /// Whether a loaded extension provides `operation`.
    pub fn supports(&self, ext_id: &str, operation: CatalogOperation) -> bool {
        self.extensions
            .get(ext_id)
            .is_some_and(|loaded| loaded.capabilities.supports(operation))
    }

    /// Setting keys the extension has registered since it was loaded.
    pub async fn registered_setting_keys(&self, ext_id: &str) -> ExtensionResult<Vec<String>> {
        let extension = self.loaded(ext_id)?.extension.lock().await;
        Ok(extension.miru().registered_setting_keys())
    }

    /// Stored settings of an extension, loaded or not.
    pub fn settings(&self, ext_id: &str) -> ExtensionResult<Vec<StoredSetting>> {
        self.settings.list(ext_id)
    }

    pub fn set_setting(&self, ext_id: &str, key: &str, value: &str) -> ExtensionResult<()> {
        self.settings.set(ext_id, key, value)
    }

    fn loaded(&self, ext_id: &str) -> ExtensionResult<&LoadedExtension> {
        self.extensions
            .get(ext_id)
            .ok_or_else(|| ExtensionError::ExtensionNotFound(ext_id.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Catalog
    // ─────────────────────────────────────────────────────────────────────

    pub async fn popular(&self, ext_id: &str, page: u32) -> ExtensionResult<Vec<ListItem>> {
        let extension = self.loaded(ext_id)?.extension.lock().await;
        extension.popular(page).await
    }

    pub async fn latest(&self, ext_id: &str, page: u32) -> ExtensionResult<Vec<ListItem>> {
        let extension = self.loaded(ext_id)?.extension.lock().await;
        extension.latest(page).await
    }

    pub async fn search(
        &self,
        ext_id: &str,
        keyword: &str,
        page: u32,
        filter: Option<&FilterSelection>,
    ) -> ExtensionResult<Vec<ListItem>> {
        let extension = self.loaded(ext_id)?.extension.lock().await;
        extension.search(keyword, page, filter).await
    }

    pub async fn create_filter(
        &self,
        ext_id: &str,
        filter: Option<&FilterSelection>,
    ) -> ExtensionResult<std::collections::BTreeMap<String, Filter>> {
        let extension = self.loaded(ext_id)?.extension.lock().await;
        extension.create_filter(filter).await
    }

    pub async fn detail(&self, ext_id: &str, url: &str) -> ExtensionResult<Detail> {
        let extension = self.loaded(ext_id)?.extension.lock().await;
        extension.detail(url).await
    }

    /// Resolve a playable/readable resource. The result must match the
    /// manifest's `@type`.
    pub async fn watch(&self, ext_id: &str, url: &str) -> ExtensionResult<Watch> {
        let expected = self.manifest_of(ext_id)?.watch_type()?;
        let extension = self.loaded(ext_id)?.extension.lock().await;
        let watch = extension.watch(url).await?;
        if watch.kind() != expected {
            return Err(ExtensionError::InvalidWatchType(format!(
                "{} (expected {expected})",
                watch.kind()
            )));
        }
        Ok(watch)
    }

    pub async fn tags(&self, ext_id: &str, url: &str) -> ExtensionResult<Vec<String>> {
        let extension = self.loaded(ext_id)?.extension.lock().await;
        extension.tags(url).await
    }

    pub async fn check_update(&self, ext_id: &str, url: &str) -> ExtensionResult<String> {
        let extension = self.loaded(ext_id)?.extension.lock().await;
        extension.check_update(url).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Manifests
    // ─────────────────────────────────────────────────────────────────────

    /// Get the number of scanned extensions.
    pub fn extension_count(&self) -> usize {
        self.manifests.len()
    }

    /// Get the manifest for an extension.
    pub fn get_manifest(&self, ext_id: &str) -> Option<&ExtensionManifest> {
        self.manifests.get(ext_id)
    }

    fn manifest_of(&self, ext_id: &str) -> ExtensionResult<&ExtensionManifest> {
        self.get_manifest(ext_id)
            .ok_or_else(|| ExtensionError::ExtensionNotFound(ext_id.to_string()))
    }

    /// Get all scanned manifests.
    pub fn manifests(&self) -> &HashMap<ExtensionId, ExtensionManifest> {
        &self.manifests
    }

    pub fn script_path(&self, ext_id: &str) -> Option<&Path> {
        self.script_paths.get(ext_id).map(PathBuf::as_path)
    }

    /// Scan and load failures by extension.
    pub fn load_errors(&self) -> &HashMap<ExtensionId, String> {
        &self.load_errors
    }

    /// Unload everything and rescan the extensions directory.
    pub fn reload(&mut self) -> ExtensionResult<()> {
        self.extensions.clear();
        self.scan_extensions()
    }
}

fn is_script(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "js")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tempfile::{tempdir, TempDir};

    use crate::extensions::catalog::{MangaWatch, WatchType};
    use crate::extensions::document::DocumentQuery;
    use crate::extensions::ipc::RequestOptions;
    use crate::extensions::settings::SettingDescriptor;

    /// Serves a fixed listing and records requested URLs.
    #[derive(Default)]
    struct FakeSite {
        urls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for FakeSite {
        async fn perform_request(
            &self,
            url: &str,
            _options: &RequestOptions,
        ) -> ExtensionResult<String> {
            self.urls.lock().unwrap().push(url.to_string());
            if url.contains("/broken") {
                return Err(ExtensionError::Transport("connection reset".to_string()));
            }
            Ok(r#"<ul><li><a href="/t/1">First</a></li><li><a href="/t/2">Second</a></li></ul>"#
                .to_string())
        }
    }

    struct Sample {
        miru: Miru,
    }

    #[async_trait(?Send)]
    impl Extension for Sample {
        fn miru(&self) -> &Miru {
            &self.miru
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::none()
                .with(CatalogOperation::Latest)
                .with(CatalogOperation::Watch)
        }

        async fn load(&mut self) -> ExtensionResult<()> {
            self.register_setting(
                SettingDescriptor::new("quality", "Quality").default_value("1080"),
            )
            .await
        }

        async fn latest(&self, page: u32) -> ExtensionResult<Vec<ListItem>> {
            let body = self.request(&format!("/latest/{page}"), None).await?;
            let html = body.as_raw().unwrap_or_default().to_string();

            let mut items = Vec::new();
            for node in self.query_selector_all(&html, "a").await? {
                items.push(ListItem {
                    title: node.text().await?.unwrap_or_default(),
                    url: node.attr("href").await?.unwrap_or_default(),
                    ..Default::default()
                });
            }
            Ok(items)
        }

        async fn watch(&self, url: &str) -> ExtensionResult<Watch> {
            Ok(Watch::Manga(MangaWatch {
                urls: vec![format!("{}{url}/1.jpg", self.miru.website())],
                headers: None,
            }))
        }
    }

    /// Fails in `load()` by requesting a broken page.
    struct Broken {
        miru: Miru,
    }

    #[async_trait(?Send)]
    impl Extension for Broken {
        fn miru(&self) -> &Miru {
            &self.miru
        }

        async fn load(&mut self) -> ExtensionResult<()> {
            self.request("/broken", None).await.map(|_| ())
        }
    }

    fn write_script(dir: &Path, package: &str, watch_type: &str) {
        let script = format!(
            "// @name        {package} Site\n\
             // @version     v0.0.1\n\
             // @package     {package}\n\
             // @type        {watch_type}\n\
             // @webSite     https://{package}\n\
             export default class extends Extension {{}}\n"
        );
        fs::write(dir.join(format!("{package}.js")), script).unwrap();
    }

    fn test_host(temp: &TempDir) -> (ExtensionHost, Arc<FakeSite>) {
        let extensions_dir = temp.path().join("extensions");
        fs::create_dir_all(&extensions_dir).unwrap();
        write_script(&extensions_dir, "manga.example", "manga");
        write_script(&extensions_dir, "anime.example", "bangumi");

        let site = Arc::new(FakeSite::default());
        let config = ExtensionHostConfig {
            extensions_dir,
            data_dir: temp.path().join("data"),
            bridge_timeout: Some(Duration::from_secs(5)),
            transport: Some(site.clone() as Arc<dyn Transport>),
            ..Default::default()
        };

        (ExtensionHost::new(config).unwrap(), site)
    }

    #[test]
    fn test_scan_extensions() {
        let temp = tempdir().unwrap();
        let extensions_dir = temp.path().join("extensions");
        fs::create_dir_all(&extensions_dir).unwrap();
        write_script(&extensions_dir, "manga.example", "manga");
        fs::write(extensions_dir.join("misnamed.js"), "// @package other\n").unwrap();
        fs::write(extensions_dir.join("notes.txt"), "not a script").unwrap();

        let config = ExtensionHostConfig {
            extensions_dir,
            data_dir: temp.path().join("data"),
            ..Default::default()
        };
        let host = ExtensionHost::new(config).unwrap();

        assert_eq!(host.extension_count(), 1);
        assert!(host.get_manifest("manga.example").is_some());
        assert!(host.load_errors().contains_key("misnamed"));
        assert!(host
            .script_path("manga.example")
            .unwrap()
            .ends_with("manga.example.js"));
    }

    #[test]
    fn test_nonexistent_extensions_dir() {
        let temp = tempdir().unwrap();
        let config = ExtensionHostConfig {
            extensions_dir: PathBuf::from("/nonexistent/path"),
            data_dir: temp.path().to_path_buf(),
            ..Default::default()
        };

        let host = ExtensionHost::new(config).unwrap();
        assert_eq!(host.extension_count(), 0);
    }

    #[tokio::test]
    async fn test_load_and_run_catalog() {
        let temp = tempdir().unwrap();
        let (mut host, site) = test_host(&temp);

        host.load("manga.example", |miru| Sample { miru })
            .await
            .unwrap();
        assert!(host.is_loaded("manga.example"));
        assert!(host.supports("manga.example", CatalogOperation::Latest));
        assert!(!host.supports("manga.example", CatalogOperation::Search));

        let items = host.latest("manga.example", 2).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First");
        assert_eq!(items[1].url, "/t/2");
        assert_eq!(
            site.urls.lock().unwrap().as_slice(),
            ["https://manga.example/latest/2"]
        );

        let watch = host.watch("manga.example", "/t/1").await.unwrap();
        assert_eq!(watch.kind(), WatchType::Manga);
    }

    #[tokio::test]
    async fn test_unimplemented_operations() {
        let temp = tempdir().unwrap();
        let (mut host, _) = test_host(&temp);
        host.load("manga.example", |miru| Sample { miru })
            .await
            .unwrap();

        let err = host.search("manga.example", "x", 1, None).await.unwrap_err();
        assert!(matches!(
            err,
            ExtensionError::NotImplemented(CatalogOperation::Search)
        ));
        assert_eq!(err.to_string(), "not implement search");

        let err = host.tags("manga.example", "/t/1").await.unwrap_err();
        assert_eq!(err.to_string(), "not implement tags");
    }

    #[tokio::test]
    async fn test_load_registers_settings() {
        let temp = tempdir().unwrap();
        let (mut host, _) = test_host(&temp);
        host.load("manga.example", |miru| Sample { miru })
            .await
            .unwrap();

        assert_eq!(
            host.registered_setting_keys("manga.example").await.unwrap(),
            vec!["quality"]
        );
        let stored = host.settings("manga.example").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value(), Some("1080"));

        host.set_setting("manga.example", "quality", "720").unwrap();
        assert_eq!(host.settings("manga.example").unwrap()[0].value(), Some("720"));
    }

    #[tokio::test]
    async fn test_watch_kind_must_match_manifest() {
        let temp = tempdir().unwrap();
        let (mut host, _) = test_host(&temp);
        host.load("anime.example", |miru| Sample { miru })
            .await
            .unwrap();

        assert!(matches!(
            host.watch("anime.example", "/t/1").await,
            Err(ExtensionError::InvalidWatchType(_))
        ));
    }

    #[tokio::test]
    async fn test_load_errors() {
        let temp = tempdir().unwrap();
        let (mut host, _) = test_host(&temp);

        assert!(matches!(
            host.load("missing.example", |miru| Sample { miru }).await,
            Err(ExtensionError::ExtensionNotFound(_))
        ));

        let err = host
            .load("anime.example", |miru| Broken { miru })
            .await
            .unwrap_err();
        assert!(matches!(err, ExtensionError::LoadFailed { .. }));
        assert!(!host.is_loaded("anime.example"));
        assert!(host.load_errors()["anime.example"].contains("connection reset"));

        host.load("manga.example", |miru| Sample { miru })
            .await
            .unwrap();
        assert!(matches!(
            host.load("manga.example", |miru| Sample { miru }).await,
            Err(ExtensionError::AlreadyLoaded(_))
        ));
    }

    #[tokio::test]
    async fn test_unload() {
        let temp = tempdir().unwrap();
        let (mut host, _) = test_host(&temp);
        host.load("manga.example", |miru| Sample { miru })
            .await
            .unwrap();

        assert!(host.unload("manga.example"));
        assert!(!host.unload("manga.example"));
        assert!(matches!(
            host.latest("manga.example", 1).await,
            Err(ExtensionError::ExtensionNotFound(_))
        ));

        // Can be loaded again after unloading.
        host.load("manga.example", |miru| Sample { miru })
            .await
            .unwrap();
        assert!(host.is_loaded("manga.example"));
    }
}
