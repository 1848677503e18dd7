use std::fs;
use std::path::PathBuf;
use std::process::Command;

use log::debug;

use crate::connectivity::NetworkLink;
use crate::error::NetworkError;

const SYSFS_NET: &str = "/sys/class/net";

/// Network interface state as reported by the kernel.
pub struct SysfsLink {
    root: PathBuf,
    iface: String,
}

impl SysfsLink {
    pub fn new(iface: &str) -> Self {
        Self::with_root(SYSFS_NET, iface)
    }

    pub fn with_root(root: impl Into<PathBuf>, iface: &str) -> Self {
        SysfsLink {
            root: root.into(),
            iface: iface.to_string(),
        }
    }

    fn operstate(&self) -> Option<String> {
        let path = self.root.join(&self.iface).join("operstate");
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }
}

impl NetworkLink for SysfsLink {
    fn is_up(&mut self) -> bool {
        let state = self.operstate();
        debug!("{} operstate: {:?}", self.iface, state);
        state.as_deref() == Some("up")
    }

    fn associate(&mut self) -> Result<(), NetworkError> {
        let status = Command::new("ip")
            .args(["link", "set", "dev", &self.iface, "up"])
            .status()
            .map_err(|e| NetworkError::LinkDown(format!("{}: {}", self.iface, e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(NetworkError::LinkDown(format!("{}: ip exited with {}", self.iface, status)))
        }
    }
}
