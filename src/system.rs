use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use log::info;
use rustix::fs::stat;
use rustix::process::geteuid;
use rustix::system::uname;
use serde::{Deserialize, Serialize};

use crate::constants;

/// Host metadata recorded with each backup. Informational only.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SystemInfo {
    pub hostname: String,
    pub system: String,
    pub release: String,
    pub machine: String,
}

impl SystemInfo {
    pub fn current() -> Self {
        let uts = uname();
        Self {
            hostname: uts.nodename().to_string_lossy().into_owned(),
            system: uts.sysname().to_string_lossy().into_owned(),
            release: uts.release().to_string_lossy().into_owned(),
            machine: uts.machine().to_string_lossy().into_owned(),
        }
    }
}

pub fn find_executable_in_path(executable: &str, path_var: &str) -> Option<PathBuf> {
    for dir in path_var.split(':').filter(|d| !d.is_empty()) {
        let try_path = Path::new(dir).join(executable);
        if let Ok(st) = stat(&try_path)
            && st.st_mode & 0o111 != 0
        {
            return Some(try_path);
        }
    }
    None
}

/// Locate `ifconfig` in `PATH`, falling back to the usual sbin directories
/// which are often missing from an unprivileged user's `PATH`.
pub fn find_ifconfig(path_var: Option<&str>) -> Result<PathBuf> {
    path_var
        .and_then(|p| find_executable_in_path(constants::TOOL_IFCONFIG, p))
        .or_else(|| find_executable_in_path(constants::TOOL_IFCONFIG, constants::ENV_PATH_DEFAULT))
        .ok_or_else(|| {
            anyhow!(
                "{} command not found, please install the net-tools package",
                constants::TOOL_IFCONFIG
            )
        })
}

pub fn check_compatibility(info: &SystemInfo) -> Result<()> {
    if !constants::SUPPORTED_SYSTEMS.contains(&info.system.as_str()) {
        return Err(anyhow!(
            "unsupported platform {}, supported platforms: {}",
            info.system,
            constants::SUPPORTED_SYSTEMS.join(", ")
        ));
    }
    info!("System compatibility check passed: {}", info.system);
    Ok(())
}

pub fn require_root() -> Result<()> {
    if !geteuid().is_root() {
        return Err(anyhow!(
            "root privileges required to change MAC addresses, please run with sudo"
        ));
    }
    Ok(())
}
