//! Host side of the extension bridge.
//!
//! [`HostEndpoint`] drains the messages of one extension in arrival order and
//! answers each through [`dispatch`], the single place where an operation is
//! mapped onto a host service.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::extensions::document::{self, HostQuery};
use crate::extensions::settings::SettingDescriptor;

use super::bridge::BridgeReceiver;
use super::context::MiruContext;
use super::types::{BridgeMessage, HostError, HostReply, Operation, RequestOptions};

/// Decode argument `index` of a message.
fn arg<T: DeserializeOwned>(message: &BridgeMessage, index: usize) -> Result<T, HostError> {
    serde_json::from_value(message.arg(index).clone()).map_err(|e| {
        HostError::new(
            message.operation,
            format!("invalid argument {index}: {e}"),
        )
    })
}

fn host_error(operation: Operation) -> impl Fn(crate::extensions::ExtensionError) -> HostError {
    move |e| HostError::new(operation, e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Network Ops
// ─────────────────────────────────────────────────────────────────────────────

/// Perform `request` / `rawRequest`: `[url, options]`, replying with the body.
async fn op_request(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let url: String = arg(message, 0)?;
    let options: Option<RequestOptions> = arg(message, 1)?;
    let options = options.unwrap_or_default();

    let body = ctx
        .transport
        .perform_request(&url, &options)
        .await
        .map_err(host_error(message.operation))?;
    Ok(Value::String(body))
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings Ops
// ─────────────────────────────────────────────────────────────────────────────

/// `[key]` -> current value or null.
fn op_get_setting(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let key: String = arg(message, 0)?;
    let value = ctx
        .settings
        .get(&ctx.extension_id, &key)
        .map_err(host_error(message.operation))?;
    Ok(value.map_or(Value::Null, Value::String))
}

/// `[descriptor]`
fn op_register_setting(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let descriptor: SettingDescriptor = arg(message, 0)?;
    ctx.settings
        .register(&ctx.extension_id, descriptor)
        .map_err(host_error(message.operation))?;
    Ok(Value::Null)
}

/// `[key, value]`
fn op_set_setting(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let key: String = arg(message, 0)?;
    let value: String = arg(message, 1)?;
    ctx.settings
        .set(&ctx.extension_id, &key, &value)
        .map_err(host_error(message.operation))?;
    Ok(Value::Null)
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookie Ops
// ─────────────────────────────────────────────────────────────────────────────

/// `[url]` -> `["name=value", ...]`
fn op_list_cookies(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let url: String = arg(message, 0)?;
    let cookies = ctx
        .cookies
        .cookies(&url)
        .map_err(host_error(message.operation))?;
    Ok(Value::from(cookies))
}

/// `[url, ["name=value", ...]]`
fn op_set_cookies(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let url: String = arg(message, 0)?;
    let cookies: Vec<String> = arg(message, 1)?;
    ctx.cookies
        .set_cookies(&url, &cookies)
        .map_err(host_error(message.operation))?;
    Ok(Value::Null)
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Ops
// ─────────────────────────────────────────────────────────────────────────────

/// `[key, data]`
fn op_save_data(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let key: String = arg(message, 0)?;
    let data = message.arg(1).clone();
    ctx.storage()
        .set(&key, data)
        .map_err(host_error(message.operation))?;
    Ok(Value::Bool(true))
}

/// `[key]` -> stored value or null.
fn op_get_data(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let key: String = arg(message, 0)?;
    Ok(ctx.storage().get(&key).unwrap_or(Value::Null))
}

// ─────────────────────────────────────────────────────────────────────────────
// UI Ops
// ─────────────────────────────────────────────────────────────────────────────

fn op_snackbar(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let text: String = arg(message, 0)?;
    ctx.ui.snackbar(&ctx.extension_id, &text);
    Ok(Value::Null)
}

fn op_log(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let text: String = arg(message, 0)?;
    ctx.ui.log(&ctx.extension_id, &text);
    Ok(Value::Null)
}

/// `[data, from, to]`
fn op_convert(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    let data = message.arg(0).clone();
    let from: String = arg(message, 1)?;
    let to: String = arg(message, 2)?;
    ctx.converter
        .convert(data, &from, &to)
        .map_err(|e| HostError::new(message.operation, e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Answer one bridge message.
pub async fn dispatch(ctx: &MiruContext, message: &BridgeMessage) -> HostReply {
    match message.operation {
        Operation::Request | Operation::RawRequest => op_request(ctx, message).await,
        Operation::QuerySelector
        | Operation::QuerySelectorAll
        | Operation::RemoveSelector
        | Operation::GetAttributeText
        | Operation::QueryXPath => {
            HostQuery::decode(message.operation, &message.payload).map(document::evaluate)
        }
        Operation::GetSetting => op_get_setting(ctx, message),
        Operation::RegisterSetting => op_register_setting(ctx, message),
        Operation::SetSetting => op_set_setting(ctx, message),
        Operation::ListCookies => op_list_cookies(ctx, message),
        Operation::SetCookies => op_set_cookies(ctx, message),
        Operation::SaveData => op_save_data(ctx, message),
        Operation::GetData => op_get_data(ctx, message),
        Operation::Snackbar => op_snackbar(ctx, message),
        Operation::Convert => op_convert(ctx, message),
        Operation::Log => op_log(ctx, message),
    }
}

/// Serves the bridge of one extension.
pub struct HostEndpoint {
    receiver: BridgeReceiver,
    context: Arc<MiruContext>,
}

impl HostEndpoint {
    pub fn new(receiver: BridgeReceiver, context: Arc<MiruContext>) -> Self {
        Self { receiver, context }
    }

    /// Answer messages until every bridge handle has been dropped.
    ///
    /// Messages are handled one at a time, so replies on a channel go out in
    /// the order the calls were made.
    pub async fn run(mut self) {
        while let Some(message) = self.receiver.recv().await {
            let reply = dispatch(&self.context, &message).await;
            if let Err(e) = &reply {
                warn!(extension = %self.context.extension_id, "{e}");
            }
            self.receiver.respond(&message.channel, reply);
        }
        debug!(extension = %self.context.extension_id, "bridge endpoint stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::extensions::cookies::JarCookieStore;
    use crate::extensions::error::{ExtensionError, ExtensionResult};
    use crate::extensions::http::{HttpFacade, ResponseBody, Transport, OVERRIDE_HOST_HEADER};
    use crate::extensions::ipc::{Bridge, BridgeError, HostUi};
    use crate::extensions::settings::FileSettingsStore;
    use crate::extensions::storage::ExtensionStorage;

    /// Records every request and answers with a fixed body.
    #[derive(Default)]
    struct FakeTransport {
        calls: Mutex<Vec<(String, RequestOptions)>>,
        body: String,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn perform_request(
            &self,
            url: &str,
            options: &RequestOptions,
        ) -> ExtensionResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), options.clone()));
            if url.contains("fail") {
                return Err(ExtensionError::Transport("connection refused".to_string()));
            }
            Ok(self.body.clone())
        }
    }

    #[derive(Default)]
    struct RecordingUi {
        lines: Mutex<Vec<String>>,
    }

    impl HostUi for RecordingUi {
        fn snackbar(&self, extension: &str, message: &str) {
            self.lines.lock().unwrap().push(format!("{extension} snackbar {message}"));
        }

        fn log(&self, extension: &str, message: &str) {
            self.lines.lock().unwrap().push(format!("{extension} log {message}"));
        }
    }

    struct Fixture {
        bridge: Bridge,
        transport: Arc<FakeTransport>,
        ui: Arc<RecordingUi>,
        _temp_dir: TempDir,
    }

    fn start(body: &str) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport {
            body: body.to_string(),
            ..Default::default()
        });
        let ui = Arc::new(RecordingUi::default());

        let context = MiruContext::new(
            "pkg",
            transport.clone(),
            Arc::new(FileSettingsStore::new(temp_dir.path().join("settings"))),
            Arc::new(JarCookieStore::default()),
            ExtensionStorage::new("pkg", temp_dir.path().join("data")),
        )
        .with_ui(ui.clone());

        let (bridge, receiver) = Bridge::channel("pkg");
        HostEndpoint::new(receiver, Arc::new(context)).spawn();

        Fixture {
            bridge,
            transport,
            ui,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_override_host_never_reaches_transport() {
        let fixture = start(r#"{"items":[]}"#);
        let http = HttpFacade::new("https://main.example", fixture.bridge.clone());

        let options = RequestOptions::new()
            .header(OVERRIDE_HOST_HEADER, "https://alt.example")
            .header("Referer", "https://main.example/");
        let body = http.request("/list", Some(options)).await.unwrap();
        assert_eq!(body, ResponseBody::Json(json!({"items": []})));

        let calls = fixture.transport.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://alt.example/list");
        assert_eq!(calls[0].1.method.as_deref(), Some("get"));
        assert!(calls[0]
            .1
            .headers
            .keys()
            .all(|k| !k.eq_ignore_ascii_case(OVERRIDE_HOST_HEADER)));
    }

    #[tokio::test]
    async fn test_raw_request_returns_raw_body() {
        let fixture = start("<html>page</html>");
        let http = HttpFacade::new("https://main.example", fixture.bridge.clone());

        let body = http.raw_request("https://cdn.example/x", None).await.unwrap();
        assert_eq!(body, ResponseBody::Raw("<html>page</html>".to_string()));

        let calls = fixture.transport.calls.lock().unwrap().clone();
        assert_eq!(calls[0].0, "https://cdn.example/x");
        assert_eq!(calls[0].1.method.as_deref(), Some("GET"));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let fixture = start("");
        let http = HttpFacade::new("https://main.example", fixture.bridge.clone());

        let err = http.request("/fail", None).await.unwrap_err();
        match err {
            ExtensionError::Bridge(BridgeError::Host(host)) => {
                assert_eq!(host.operation, Operation::Request);
                assert!(host.message.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_settings_and_data() {
        let fixture = start("");
        let bridge = &fixture.bridge;

        let descriptor = json!({"key": "host", "title": "Host", "type": "input", "defaultValue": "a"});
        bridge
            .invoke(Operation::RegisterSetting, vec![descriptor])
            .await
            .unwrap();
        assert_eq!(
            bridge.invoke(Operation::GetSetting, vec![json!("host")]).await.unwrap(),
            json!("a")
        );

        bridge
            .invoke(Operation::SetSetting, vec![json!("host"), json!("b")])
            .await
            .unwrap();
        assert_eq!(
            bridge.invoke(Operation::GetSetting, vec![json!("host")]).await.unwrap(),
            json!("b")
        );

        assert!(bridge
            .invoke(Operation::SetSetting, vec![json!("nope"), json!("b")])
            .await
            .is_err());

        assert_eq!(
            bridge
                .invoke(Operation::SaveData, vec![json!("k"), json!({"n": 1})])
                .await
                .unwrap(),
            json!(true)
        );
        assert_eq!(
            bridge.invoke(Operation::GetData, vec![json!("k")]).await.unwrap(),
            json!({"n": 1})
        );
        assert_eq!(
            bridge.invoke(Operation::GetData, vec![json!("other")]).await.unwrap(),
            Value::Null
        );
    }

    #[tokio::test]
    async fn test_cookies_ui_and_convert() {
        let fixture = start("");
        let bridge = &fixture.bridge;

        bridge
            .invoke(
                Operation::SetCookies,
                vec![json!("https://site.example/"), json!(["a=1"])],
            )
            .await
            .unwrap();
        assert_eq!(
            bridge
                .invoke(Operation::ListCookies, vec![json!("https://site.example/x")])
                .await
                .unwrap(),
            json!(["a=1"])
        );

        bridge
            .invoke(Operation::Snackbar, vec![json!("saved")])
            .await
            .unwrap();
        bridge.invoke(Operation::Log, vec![json!("hello")]).await.unwrap();
        assert_eq!(
            *fixture.ui.lines.lock().unwrap(),
            vec!["pkg snackbar saved", "pkg log hello"]
        );

        assert_eq!(
            bridge
                .invoke(Operation::Convert, vec![json!([1]), json!("json"), json!("json")])
                .await
                .unwrap(),
            json!([1])
        );
    }

    #[tokio::test]
    async fn test_bad_arguments_are_host_errors() {
        let fixture = start("");

        let err = fixture
            .bridge
            .invoke(Operation::GetSetting, vec![json!(42)])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Host(ref e) if e.operation == Operation::GetSetting));

        let err = fixture
            .bridge
            .invoke(Operation::SetCookies, vec![json!("https://x.example/"), json!(["bad"])])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Host(_)));
    }
}
