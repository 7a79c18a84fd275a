//! In-process plugins loaded from shared libraries.
//!
//! A native plugin exports two C functions:
//!
//! ```c
//! char *hotplug_plugin_call(const char *request_json);
//! void hotplug_plugin_free(char *response_json);
//! ```
//!
//! Requests and responses are the same JSON documents worker plugins
//! exchange over stdio.

use async_trait::async_trait;
use libloading::{Library, Symbol};
use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::loader::PluginHost;
use super::protocol::{self, HostRequest, PluginResponse};
use crate::application::errors::PluginError;

pub const CALL_SYMBOL: &[u8] = b"hotplug_plugin_call";
pub const FREE_SYMBOL: &[u8] = b"hotplug_plugin_free";

type CallFn = unsafe extern "C" fn(*const c_char) -> *mut c_char;
type FreeFn = unsafe extern "C" fn(*mut c_char);

pub struct NativeHost {
    name: String,
    path: PathBuf,
    library: Mutex<Option<Arc<Library>>>,
}

impl NativeHost {
    /// Open the library at `path`, which should be a private shadow copy
    pub fn open(name: &str, path: &Path) -> Result<Self, PluginError> {
        // SAFETY: loading a library runs its initializers; plugins are trusted code.
        let library = unsafe { Library::new(path) }
            .map_err(|e| PluginError::Library(format!("{}: {}", path.display(), e)))?;

        // SAFETY: only checks the symbols exist, nothing is called.
        unsafe {
            library
                .get::<CallFn>(CALL_SYMBOL)
                .map_err(|e| PluginError::Library(e.to_string()))?;
            library
                .get::<FreeFn>(FREE_SYMBOL)
                .map_err(|e| PluginError::Library(e.to_string()))?;
        }

        tracing::debug!("Opened native plugin {} from {}", name, path.display());

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            library: Mutex::new(Some(Arc::new(library))),
        })
    }
}

fn call_library(library: &Library, request: &str) -> Result<String, PluginError> {
    let input = CString::new(request).map_err(|e| PluginError::Protocol(e.to_string()))?;

    // SAFETY: both symbols were checked in `open` and follow the documented
    // signatures; the returned pointer is owned by the plugin until freed.
    unsafe {
        let call: Symbol<CallFn> = library
            .get(CALL_SYMBOL)
            .map_err(|e| PluginError::Library(e.to_string()))?;
        let free: Symbol<FreeFn> = library
            .get(FREE_SYMBOL)
            .map_err(|e| PluginError::Library(e.to_string()))?;

        let output = call(input.as_ptr());
        if output.is_null() {
            return Err(PluginError::Protocol("plugin returned a null response".to_string()));
        }
        let response = CStr::from_ptr(output).to_string_lossy().into_owned();
        free(output);
        Ok(response)
    }
}

#[async_trait]
impl PluginHost for NativeHost {
    async fn call(&self, request: &HostRequest) -> Result<PluginResponse, PluginError> {
        let line = protocol::encode(request)?;
        let library = self.library.lock().await.clone().ok_or(PluginError::Closed)?;

        let response = tokio::task::spawn_blocking(move || call_library(&library, &line))
            .await
            .map_err(|e| PluginError::Protocol(format!("plugin call panicked: {}", e)))??;

        protocol::decode(&response)
    }

    async fn shutdown(&self) {
        // In-flight calls hold their own handle; the library unloads after the last one
        if self.library.lock().await.take().is_none() {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::debug!("Could not remove shadow copy {}: {}", self.path.display(), e);
        }
        tracing::debug!("Closed native plugin {}", self.name);
    }

    fn kind(&self) -> &'static str {
        "native"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_non_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.so");
        std::fs::write(&path, "not a library").unwrap();

        assert!(matches!(
            NativeHost::open("fake", &path),
            Err(PluginError::Library(_))
        ));
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            NativeHost::open("nope", Path::new("/nonexistent/nope.so")),
            Err(PluginError::Library(_))
        ));
    }
}
