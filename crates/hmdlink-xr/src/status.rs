use std::sync::{Mutex, OnceLock};

fn default_status() -> String {
    #[cfg(any(target_os = "linux", target_os = "windows"))]
    {
        "VR: idle (runtime not started)".to_string()
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        "VR: not available on this platform".to_string()
    }
}

static VR_STATUS: OnceLock<Mutex<String>> = OnceLock::new();

fn status_cell() -> &'static Mutex<String> {
    VR_STATUS.get_or_init(|| Mutex::new(default_status()))
}

/// One-line session status for hosts that show it in their UI.
pub fn vr_status() -> String {
    match status_cell().lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn set_vr_status(status: impl Into<String>) {
    let mut guard = match status_cell().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = status.into();
}
