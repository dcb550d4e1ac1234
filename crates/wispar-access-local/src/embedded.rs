use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wispar_access_core::{AccessModel, BoundaryMode, BridgeReply, FolderPicker, MethodCall};

use crate::backends;
use crate::config::Config;
use crate::dispatcher::BridgeDispatcher;
use crate::pending::RequestId;

/// Install a stderr subscriber unless the embedding host already has one.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// How long dropping the bridge waits for cancelled calls to report back.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

fn build_runtime() -> anyhow::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("wispar-bridge")
        .enable_all()
        .build()
        .context("Failed to create bridge runtime")
}

/// Broker instance owned by a native host.
///
/// Carries its own Tokio runtime so the host can call in from any thread.
/// Dropping it cancels outstanding picks, waits for every submitted call to
/// run its completion (null for the cancelled ones), then releases every open
/// session. Must not be dropped, or used through `call_blocking`, from inside
/// an async context or a completion callback.
pub struct EmbeddedBridge {
    runtime: Runtime,
    dispatcher: Arc<BridgeDispatcher>,
}

impl EmbeddedBridge {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        init_logging();
        let runtime = build_runtime()?;

        // Backend construction may touch the runtime (process spawning).
        let guard = runtime.enter();
        let dispatcher = backends::create_dispatcher(config)?;
        drop(guard);

        Ok(Self::assemble(runtime, dispatcher))
    }

    /// Build around an explicit picker and access model.
    pub fn with_backends(
        picker: Arc<dyn FolderPicker>,
        access: Arc<dyn AccessModel>,
        mode: BoundaryMode,
    ) -> anyhow::Result<Self> {
        init_logging();
        let runtime = build_runtime()?;
        Ok(Self::assemble(runtime, BridgeDispatcher::new(picker, access, mode)))
    }

    fn assemble(runtime: Runtime, dispatcher: BridgeDispatcher) -> Self {
        info!(
            "Bridge ready ({} model, {:?} results)",
            dispatcher.access().kind(),
            dispatcher.mode()
        );
        Self {
            runtime,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Build from the host's init JSON, e.g. `{"data_dir": "/path"}`.
    pub fn from_json(config_json: &str) -> anyhow::Result<Self> {
        let config: Config =
            serde_json::from_str(config_json).context("Invalid bridge configuration")?;
        Self::new(&config)
    }

    pub fn dispatcher(&self) -> &Arc<BridgeDispatcher> {
        &self.dispatcher
    }

    /// Start a call; `on_complete` runs once on a runtime thread.
    pub fn call<F>(&self, call: MethodCall, on_complete: F) -> RequestId
    where
        F: FnOnce(RequestId, BridgeReply) + Send + 'static,
    {
        let _guard = self.runtime.enter();
        self.dispatcher.submit(call, on_complete)
    }

    /// Run a call on the bridge runtime and wait for its reply.
    pub fn call_blocking(&self, call: &MethodCall) -> BridgeReply {
        self.runtime.block_on(self.dispatcher.call(call))
    }

    pub fn cancel(&self, id: RequestId) -> bool {
        self.dispatcher.cancel(id)
    }
}

impl Drop for EmbeddedBridge {
    fn drop(&mut self) {
        // The runtime goes right after this; no completion may be left unpolled.
        self.runtime.block_on(self.dispatcher.close(CLOSE_TIMEOUT));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::mpsc;
    use tempfile::TempDir;
    use wispar_access_core::{RawSelection, SelectionRequest};

    use crate::access::ImplicitPathAccess;

    /// Picker whose chooser never closes.
    struct StuckPicker;

    #[async_trait]
    impl FolderPicker for StuckPicker {
        fn is_available(&self) -> bool {
            true
        }

        async fn pick(&self, _request: SelectionRequest) -> Option<RawSelection> {
            std::future::pending().await
        }
    }

    fn bridge(data_dir: &TempDir, folder: &TempDir) -> EmbeddedBridge {
        let json = serde_json::json!({
            "data_dir": data_dir.path(),
            "folder": folder.path(),
        });
        EmbeddedBridge::from_json(&json.to_string()).unwrap()
    }

    #[test]
    fn test_blocking_select_and_resolve() {
        let data_dir = TempDir::new().unwrap();
        let folder = TempDir::new().unwrap();
        let bridge = bridge(&data_dir, &folder);

        let reply = bridge.call_blocking(&MethodCall::new("selectCustomDatabasePath"));
        let token = reply.result.as_str().unwrap().to_string();

        let reply = bridge.call_blocking(&MethodCall::with_argument("resolveCustomPath", token));
        assert!(reply.result.as_str().is_some());
    }

    #[test]
    fn test_async_call_completes_once() {
        let data_dir = TempDir::new().unwrap();
        let folder = TempDir::new().unwrap();
        let bridge = bridge(&data_dir, &folder);

        let (tx, rx) = mpsc::channel();
        let id = bridge.call(MethodCall::new("getExportDirectory"), move |id, reply| {
            let _ = tx.send((id, reply));
        });
        let (done, reply) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(done, id);
        assert_eq!(reply.result.as_str(), Some(&*folder.path().to_string_lossy()));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_drop_completes_pending_pick() {
        let folder = TempDir::new().unwrap();
        let access = Arc::new(ImplicitPathAccess::new());
        let bridge = EmbeddedBridge::with_backends(
            Arc::new(StuckPicker),
            access.clone(),
            BoundaryMode::Collapsed,
        )
        .unwrap();

        let (tx, rx) = mpsc::channel();
        let pick_tx = tx.clone();
        let id = bridge.call(MethodCall::new("selectCustomDatabasePath"), move |id, reply| {
            let _ = pick_tx.send((id, reply));
        });
        assert!(access.start_access(folder.path()));
        drop(tx);
        drop(bridge);

        // Fired before drop returned, exactly once, with a plain null.
        let (done, reply) = rx.try_recv().unwrap();
        assert_eq!(done, id);
        assert!(reply.result.is_null());
        assert!(reply.error.is_none());
        assert!(rx.try_recv().is_err());
        assert!(access.sessions().active().is_empty());
    }

    #[test]
    fn test_bad_config_is_an_error() {
        assert!(EmbeddedBridge::from_json(r#"{"access_model": "saf"}"#).is_err());
        assert!(EmbeddedBridge::from_json("not json").is_err());
    }
}
