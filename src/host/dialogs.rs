//! File dialogs and notifications
//!
//! The windowing layer is an external collaborator behind `DesktopShell`.
//! The host only validates what the user picked.

use log::{info, warn};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{HostError, CODE_PATH_TYPE, CODE_UNKNOWN};

/// Native dialog and notification surface. Calls may block.
pub trait DesktopShell: Send + Sync + 'static {
    /// Pick one or more existing files. `None` when dismissed.
    fn open_files(&self) -> Option<Vec<PathBuf>>;
    /// Pick a path to save a single file to.
    fn save_file(&self) -> Option<PathBuf>;
    /// Pick a directory to save several files into.
    fn save_directory(&self) -> Option<PathBuf>;
    fn notify(&self, title: &str, message: &str);
}

/// Shell without a display: dialogs are always dismissed and notifications
/// go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessShell;

impl DesktopShell for HeadlessShell {
    fn open_files(&self) -> Option<Vec<PathBuf>> {
        None
    }

    fn save_file(&self) -> Option<PathBuf> {
        None
    }

    fn save_directory(&self) -> Option<PathBuf> {
        None
    }

    fn notify(&self, title: &str, message: &str) {
        info!("notify: {} -> {}", title, message);
    }
}

async fn blocking<T, F>(shell: &Arc<dyn DesktopShell>, f: F) -> Result<T, HostError>
where
    T: Send + 'static,
    F: FnOnce(&dyn DesktopShell) -> T + Send + 'static,
{
    let shell = Arc::clone(shell);
    tokio::task::spawn_blocking(move || f(shell.as_ref()))
        .await
        .map_err(|e| HostError::new(format!("Dialog task failed: {}", e), CODE_UNKNOWN))
}

fn path_value(path: &std::path::Path) -> Value {
    Value::from(path.to_string_lossy().to_string())
}

pub(crate) async fn open_files(shell: &Arc<dyn DesktopShell>) -> Result<Value, HostError> {
    let Some(paths) = blocking(shell, |s| s.open_files()).await? else {
        return Ok(Value::Null);
    };
    for path in &paths {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(HostError::new(
                "At least one of the selected paths is not a valid file!",
                CODE_PATH_TYPE,
            ));
        }
    }
    Ok(Value::Array(paths.iter().map(|p| path_value(p)).collect()))
}

pub(crate) async fn save_file(shell: &Arc<dyn DesktopShell>) -> Result<Value, HostError> {
    let path = blocking(shell, |s| s.save_file()).await?;
    Ok(path.as_deref().map(path_value).unwrap_or(Value::Null))
}

pub(crate) async fn save_files(shell: &Arc<dyn DesktopShell>) -> Result<Value, HostError> {
    let Some(dir) = blocking(shell, |s| s.save_directory()).await? else {
        return Ok(Value::Null);
    };
    let meta = tokio::fs::metadata(&dir).await?;
    if !meta.is_dir() {
        return Err(HostError::new("Path must be a valid directory!", CODE_PATH_TYPE));
    }
    Ok(json!(dir.to_string_lossy()))
}

pub(crate) async fn notify(shell: &Arc<dyn DesktopShell>, title: String, message: String) {
    if let Err(e) = blocking(shell, move |s| s.notify(&title, &message)).await {
        warn!("notify: {}", e);
    }
}
