//! Host bridge dispatcher.
//!
//! Routes a `MethodCall` by name to the picker or the access model and turns
//! the outcome into a `BridgeReply`. Failures never escape as faults: they
//! collapse to null/false (or a tagged error when detailed results are on),
//! and an unknown method name is answered with an explicit "not implemented".

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, instrument, warn};
use wispar_access_core::{
    AccessError, AccessModel, BoundaryMode, BridgeMethod, BridgeReply, BridgeValue, ErrorKind,
    FolderPicker, MethodCall, PersistentToken, PickPurpose, SelectionRequest,
};

use crate::pending::{PendingInfo, PendingRequests, RequestId};

pub struct BridgeDispatcher {
    picker: Arc<dyn FolderPicker>,
    access: Arc<dyn AccessModel>,
    pending: PendingRequests,
    mode: BoundaryMode,
    /// Submitted calls whose completion has not run yet
    in_flight: Arc<watch::Sender<usize>>,
}

/// Decrements the in-flight count when a submitted call finishes or is dropped.
struct InFlight(Arc<watch::Sender<usize>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl BridgeDispatcher {
    pub fn new(
        picker: Arc<dyn FolderPicker>,
        access: Arc<dyn AccessModel>,
        mode: BoundaryMode,
    ) -> Self {
        Self {
            picker,
            access,
            pending: PendingRequests::new(),
            mode,
            in_flight: Arc::new(watch::Sender::new(0)),
        }
    }

    pub fn mode(&self) -> BoundaryMode {
        self.mode
    }

    pub fn access(&self) -> &Arc<dyn AccessModel> {
        &self.access
    }

    /// Run one call to completion.
    pub async fn call(&self, call: &MethodCall) -> BridgeReply {
        let Ok(method) = call.method.parse::<BridgeMethod>() else {
            warn!("Unknown bridge method: {}", call.method);
            return BridgeReply::not_implemented(&call.method);
        };
        let (id, cancel) = self.begin(method);
        self.run(id, method, call.argument.clone(), cancel).await
    }

    /// Start a call in the background and return its id immediately.
    ///
    /// `on_complete` fires exactly once, also for superseded or cancelled
    /// picks (with a null result). Must be called within a Tokio runtime.
    pub fn submit<F>(self: &Arc<Self>, call: MethodCall, on_complete: F) -> RequestId
    where
        F: FnOnce(RequestId, BridgeReply) + Send + 'static,
    {
        let in_flight = self.track();
        let Ok(method) = call.method.parse::<BridgeMethod>() else {
            let id = self.pending.allocate();
            warn!("Unknown bridge method: {} (request {})", call.method, id);
            tokio::spawn(async move {
                on_complete(id, BridgeReply::not_implemented(&call.method));
                drop(in_flight);
            });
            return id;
        };

        let (id, cancel) = self.begin(method);
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let reply = dispatcher.run(id, method, call.argument, cancel).await;
            on_complete(id, reply);
            drop(in_flight);
        });
        id
    }

    /// Cancel a pending pick. Its completion still fires, with null.
    pub fn cancel(&self, id: RequestId) -> bool {
        let cancelled = self.pending.cancel(id);
        if cancelled {
            debug!("Cancelled request {}", id);
        }
        cancelled
    }

    pub fn outstanding(&self) -> Vec<PendingInfo> {
        self.pending.outstanding()
    }

    /// Cancel outstanding picks and close every scoped access session.
    ///
    /// Does not wait for submitted calls; see `close` for that.
    pub fn shutdown(&self) {
        let cancelled = self.pending.cancel_all();
        let released = self.access.release_all();
        info!(
            "Bridge shut down ({} pick(s) cancelled, {} session(s) released)",
            cancelled, released
        );
    }

    /// Wait until every submitted call has run its completion.
    pub async fn drain(&self) {
        let mut in_flight = self.in_flight.subscribe();
        let _ = in_flight.wait_for(|&n| n == 0).await;
    }

    /// Cancel outstanding picks, wait up to `timeout` for every submitted
    /// completion to fire, then close every scoped access session.
    pub async fn close(&self, timeout: Duration) {
        let cancelled = self.pending.cancel_all();
        if tokio::time::timeout(timeout, self.drain()).await.is_err() {
            warn!(
                "{} submitted call(s) still running after {:?}",
                *self.in_flight.borrow(),
                timeout
            );
        }
        let released = self.access.release_all();
        info!(
            "Bridge closed ({} pick(s) cancelled, {} session(s) released)",
            cancelled, released
        );
    }

    fn track(&self) -> InFlight {
        self.in_flight.send_modify(|n| *n += 1);
        InFlight(Arc::clone(&self.in_flight))
    }

    fn begin(&self, method: BridgeMethod) -> (RequestId, Option<oneshot::Receiver<()>>) {
        if method.pick_purpose().is_some() {
            let (id, cancel) = self.pending.register_pick(method);
            (id, Some(cancel))
        } else {
            (self.pending.register(method), None)
        }
    }

    #[instrument(skip_all, fields(request = %id, method = %method))]
    async fn run(
        &self,
        id: RequestId,
        method: BridgeMethod,
        argument: Option<String>,
        cancel: Option<oneshot::Receiver<()>>,
    ) -> BridgeReply {
        let outcome = match method.pick_purpose() {
            Some(purpose) => self.pick(method, purpose, cancel).await,
            None => self.scoped(method, argument.as_deref()).await,
        };
        self.pending.complete(id);

        match outcome {
            Ok(value) => BridgeReply::ok(value),
            Err(e) => {
                log_failure(method, &e);
                BridgeReply::failure(method, &e, self.mode)
            }
        }
    }

    async fn pick(
        &self,
        method: BridgeMethod,
        purpose: PickPurpose,
        cancel: Option<oneshot::Receiver<()>>,
    ) -> Result<BridgeValue, AccessError> {
        if !self.picker.is_available() {
            debug!("No folder picker available");
            return Err(AccessError::PickCancelled);
        }

        let request = SelectionRequest::folder(purpose);
        let selection = match cancel {
            Some(cancel) => tokio::select! {
                picked = self.picker.pick(request) => picked,
                _ = cancel => {
                    debug!("Pick superseded or cancelled");
                    None
                }
            },
            None => self.picker.pick(request).await,
        };
        let selection = selection.ok_or(AccessError::PickCancelled)?;

        // The fresh selection carries a grant in this process either way.
        self.access.admit_selection(&selection)?;

        match method {
            BridgeMethod::SelectCustomDatabasePath => {
                let token = self.access.create_token(&selection).await?;
                Ok(BridgeValue::String(token.into_string()))
            }
            _ => {
                let path = selection.local_path()?;
                Ok(BridgeValue::String(path_string(&path)?))
            }
        }
    }

    async fn scoped(
        &self,
        method: BridgeMethod,
        argument: Option<&str>,
    ) -> Result<BridgeValue, AccessError> {
        let argument = argument
            .filter(|a| !a.is_empty())
            .ok_or_else(|| AccessError::InvalidArgument(format!("{method} needs an argument")))?;

        match method {
            BridgeMethod::StartSecurityScopedAccess => {
                let path = PathBuf::from(argument);
                if self.access.start_access(&path) {
                    Ok(BridgeValue::Bool(true))
                } else {
                    Err(AccessError::AccessDenied { path })
                }
            }
            BridgeMethod::StopSecurityScopedAccess => {
                Ok(BridgeValue::Bool(self.access.stop_access(Path::new(argument))))
            }
            BridgeMethod::ResolveCustomPath => {
                let resolved = self
                    .access
                    .resolve_token(&PersistentToken::new(argument))
                    .await?;
                if resolved.is_stale {
                    return Err(AccessError::StaleBookmark {
                        path: resolved.absolute_path,
                    });
                }
                // Access is open now; the host owns the stop, unless we cannot hand the path over.
                match path_string(&resolved.absolute_path) {
                    Ok(path) => Ok(BridgeValue::String(path)),
                    Err(e) => {
                        self.access.stop_access(&resolved.absolute_path);
                        Err(e)
                    }
                }
            }
            BridgeMethod::GetExportDirectory | BridgeMethod::SelectCustomDatabasePath => Err(
                AccessError::InvalidArgument(format!("{method} is a picker method")),
            ),
        }
    }
}

fn path_string(path: &Path) -> Result<String, AccessError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| AccessError::Encoding(format!("{} is not valid UTF-8", path.display())))
}

fn log_failure(method: BridgeMethod, e: &AccessError) {
    match e.kind() {
        ErrorKind::PickCancelled => debug!("{}: {}", method, e),
        ErrorKind::EncodingError | ErrorKind::Io => error!("{} failed: {}", method, e),
        _ => warn!("{} failed: {}", method, e),
    }
}
