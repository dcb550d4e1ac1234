// Shared modules (used by both the CLI binary and the embedded staticlib)
pub mod access;
pub mod backends;
pub mod bookmark;
pub mod config;
pub mod dispatcher;
pub mod grants;
pub mod pending;
pub mod picker;
pub mod session;

// Embedded bridge support
pub mod embedded;

// =============================================================================
// C FFI entry points for static linking into native hosts
// =============================================================================

#[allow(unsafe_code)]
mod ffi {
    use std::ffi::{c_void, CStr, CString};
    use std::os::raw::c_char;
    use std::ptr;

    use tracing::error;
    use wispar_access_core::{BridgeReply, MethodCall};

    use crate::embedded::EmbeddedBridge;
    use crate::pending::RequestId;

    /// Completion callback: `(user_data, request_id, reply_json)`.
    /// `reply_json` is only valid for the duration of the call.
    pub type CompletionCallback =
        extern "C" fn(user_data: *mut c_void, request_id: u64, reply_json: *const c_char);

    /// Host context pointer carried to the completion thread.
    struct UserData(*mut c_void);

    // The host promises the pointer may be used from any thread.
    unsafe impl Send for UserData {}

    impl UserData {
        fn get(&self) -> *mut c_void {
            self.0
        }
    }

    fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
        if ptr.is_null() {
            return None;
        }
        unsafe { CStr::from_ptr(ptr) }.to_str().ok()
    }

    fn parse_call(call_json: *const c_char) -> Option<MethodCall> {
        let json = read_str(call_json)?;
        match serde_json::from_str(json) {
            Ok(call) => Some(call),
            Err(e) => {
                error!("Invalid bridge call: {}", e);
                None
            }
        }
    }

    fn encode_reply(reply: &BridgeReply) -> Option<CString> {
        let json = serde_json::to_string(reply).ok()?;
        CString::new(json).ok()
    }

    /// Create a bridge.
    /// config_json: null-terminated UTF-8 JSON, e.g. {"data_dir": "/path"}
    /// Returns an owned handle, or null on error. Free with `wispar_bridge_free`.
    #[no_mangle]
    pub extern "C" fn wispar_bridge_new(config_json: *const c_char) -> *mut EmbeddedBridge {
        let Some(json) = read_str(config_json) else {
            return ptr::null_mut();
        };
        match EmbeddedBridge::from_json(json) {
            Ok(bridge) => Box::into_raw(Box::new(bridge)),
            Err(e) => {
                error!("Failed to create bridge: {:#}", e);
                ptr::null_mut()
            }
        }
    }

    /// Start a call, e.g. {"method": "resolveCustomPath", "argument": "..."}.
    /// `callback` fires exactly once on a bridge thread.
    /// Returns the request id, or 0 on error (callback will not fire).
    #[no_mangle]
    pub extern "C" fn wispar_bridge_call(
        bridge: *const EmbeddedBridge,
        call_json: *const c_char,
        callback: Option<CompletionCallback>,
        user_data: *mut c_void,
    ) -> u64 {
        if bridge.is_null() {
            return 0;
        }
        let bridge = unsafe { &*bridge };
        let Some(callback) = callback else {
            return 0;
        };
        let Some(call) = parse_call(call_json) else {
            return 0;
        };

        let user_data = UserData(user_data);
        let id = bridge.call(call, move |id, reply| {
            let json = encode_reply(&reply);
            let reply_ptr = json.as_ref().map_or(ptr::null(), |s| s.as_ptr());
            callback(user_data.get(), id.get(), reply_ptr);
        });
        id.get()
    }

    /// Run a call and wait for it. Must not be called from a bridge callback.
    /// Returns the reply JSON (free with `wispar_string_free`), or null on error.
    #[no_mangle]
    pub extern "C" fn wispar_bridge_call_blocking(
        bridge: *const EmbeddedBridge,
        call_json: *const c_char,
    ) -> *mut c_char {
        if bridge.is_null() {
            return ptr::null_mut();
        }
        let bridge = unsafe { &*bridge };
        let Some(call) = parse_call(call_json) else {
            return ptr::null_mut();
        };
        let reply = bridge.call_blocking(&call);
        encode_reply(&reply).map_or(ptr::null_mut(), CString::into_raw)
    }

    /// Cancel a pending pick; its callback still fires with a null result.
    /// Returns 1 if cancelled, 0 if unknown or not cancellable.
    #[no_mangle]
    pub extern "C" fn wispar_bridge_cancel(bridge: *const EmbeddedBridge, request_id: u64) -> i32 {
        if bridge.is_null() {
            return 0;
        }
        let bridge = unsafe { &*bridge };
        i32::from(bridge.cancel(RequestId::from(request_id)))
    }

    /// Free the bridge. Pending picks are cancelled and every outstanding
    /// callback fires (null for the cancelled ones) before this returns; open
    /// sessions are released. Must not be called from a bridge callback.
    #[no_mangle]
    pub extern "C" fn wispar_bridge_free(bridge: *mut EmbeddedBridge) {
        if !bridge.is_null() {
            drop(unsafe { Box::from_raw(bridge) });
        }
    }

    /// Free a string returned by `wispar_bridge_call_blocking`.
    #[no_mangle]
    pub extern "C" fn wispar_string_free(s: *mut c_char) {
        if !s.is_null() {
            drop(unsafe { CString::from_raw(s) });
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::mpsc::{self, Sender};
        use std::time::Duration;
        use tempfile::TempDir;

        extern "C" fn record(user_data: *mut c_void, request_id: u64, reply_json: *const c_char) {
            let tx = unsafe { &*(user_data as *const Sender<(u64, String)>) };
            let json = read_str(reply_json).unwrap_or_default().to_string();
            let _ = tx.send((request_id, json));
        }

        fn new_bridge(data_dir: &TempDir, folder: Option<&TempDir>) -> *mut EmbeddedBridge {
            let json = serde_json::json!({
                "data_dir": data_dir.path(),
                "folder": folder.map(|f| f.path()),
                "picker": "none",
            });
            let config = CString::new(json.to_string()).unwrap();
            wispar_bridge_new(config.as_ptr())
        }

        #[test]
        fn test_null_and_invalid_input() {
            assert!(wispar_bridge_new(ptr::null()).is_null());
            let bad = CString::new("{").unwrap();
            assert!(wispar_bridge_new(bad.as_ptr()).is_null());
            assert_eq!(wispar_bridge_cancel(ptr::null(), 1), 0);
            assert!(wispar_bridge_call_blocking(ptr::null(), ptr::null()).is_null());
            wispar_bridge_free(ptr::null_mut());
            wispar_string_free(ptr::null_mut());
        }

        #[test]
        fn test_blocking_call_returns_owned_json() {
            let data_dir = TempDir::new().unwrap();
            let bridge = new_bridge(&data_dir, None);
            assert!(!bridge.is_null());

            let call =
                CString::new(r#"{"method":"stopSecurityScopedAccess","argument":"/nowhere"}"#)
                    .unwrap();
            let reply = wispar_bridge_call_blocking(bridge, call.as_ptr());
            assert!(!reply.is_null());
            let json = unsafe { CStr::from_ptr(reply) }.to_str().unwrap().to_string();
            assert_eq!(json, r#"{"result":true}"#);

            wispar_string_free(reply);
            wispar_bridge_free(bridge);
        }

        #[test]
        fn test_async_call_invokes_callback() {
            let data_dir = TempDir::new().unwrap();
            let folder = TempDir::new().unwrap();
            let bridge = new_bridge(&data_dir, Some(&folder));

            let (tx, rx) = mpsc::channel::<(u64, String)>();
            let call = CString::new(r#"{"method":"pickFile"}"#).unwrap();
            let id = wispar_bridge_call(
                bridge,
                call.as_ptr(),
                Some(record),
                &tx as *const Sender<(u64, String)> as *mut c_void,
            );
            assert_ne!(id, 0);

            let (done, json) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            assert_eq!(done, id);
            assert!(json.contains("not_implemented"));

            assert_eq!(wispar_bridge_cancel(bridge, id), 0);
            wispar_bridge_free(bridge);
        }
    }
}
