use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{SecondsFormat, Utc};
use log::{debug, info, warn};
use rustix::fs::Mode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::command::CommandRunner;
use crate::constants;
use crate::error::StoreError;
use crate::fs::{atomic_write, mkdir_p};
use crate::interface::{Inspector, Interfaces};
use crate::system::SystemInfo;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct BackupStoreConfig {
    /// Backups whose files are older than this are removed. Zero or less
    /// disables age based cleanup.
    #[serde(rename = "backup_retention_days")]
    pub retention_days: i64,
    /// Zero disables the limit.
    pub max_backups: usize,
    pub backup_format: String,
    pub verify_checksums: bool,
    #[serde(rename = "auto_backup")]
    pub auto_backup_before_restore: bool,
}

impl Default for BackupStoreConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_backups: 100,
            backup_format: constants::BACKUP_FORMAT.into(),
            verify_checksums: true,
            auto_backup_before_restore: true,
        }
    }
}

impl BackupStoreConfig {
    /// Read the configuration stored in `dir`, writing the defaults there if
    /// there is none yet. An unreadable file falls back to the defaults.
    pub fn load_or_init<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let path = dir.as_ref().join(constants::FILE_CONFIG);
        match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Self>(&data) {
                Ok(config) => Ok(config),
                Err(e) => {
                    warn!("Could not load config {}: {}", path.display(), e);
                    Ok(Self::default())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                config.save(dir)?;
                Ok(config)
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<(), StoreError> {
        let path = dir.as_ref().join(constants::FILE_CONFIG);
        let data = serde_json::to_vec_pretty(self).map_err(|source| StoreError::Serialize {
            what: "store configuration".into(),
            source,
        })?;
        atomic_write(path, &data)
    }
}

/// SHA-256 of `"{name}:{mac}"`, hex encoded.
pub fn checksum(name: &str, mac: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", name, mac).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Backup {
    #[serde(rename = "backup_name")]
    pub name: String,
    pub timestamp: String,
    #[serde(default)]
    pub system_info: SystemInfo,
    #[serde(default)]
    pub interfaces: Interfaces,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    #[serde(rename = "backup_version")]
    pub format_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
}

impl Backup {
    pub fn capture(
        name: &str,
        timestamp: String,
        system_info: SystemInfo,
        interfaces: Interfaces,
    ) -> Self {
        let checksums = interfaces
            .iter()
            .filter_map(|(iface, record)| {
                record
                    .mac_address
                    .as_ref()
                    .map(|mac| (iface.clone(), checksum(iface, mac)))
            })
            .collect();
        Self {
            name: name.into(),
            timestamp,
            system_info,
            interfaces,
            checksums,
            format_version: constants::BACKUP_VERSION.into(),
            tool_version: Some(constants::TOOL_VERSION.into()),
        }
    }

    /// Interfaces that have an address, with that address.
    pub fn addresses(&self) -> impl Iterator<Item = (&str, &str)> {
        self.interfaces.iter().filter_map(|(name, record)| {
            record
                .mac_address
                .as_deref()
                .map(|mac| (name.as_str(), mac))
        })
    }

    /// Check every checksum against the address it covers. Returns the
    /// reason for the first problem found.
    pub fn verify_integrity(&self) -> Result<(), String> {
        for (name, mac) in self.addresses() {
            match self.checksums.get(name) {
                Some(sum) if *sum == checksum(name, mac) => (),
                Some(_) => return Err(format!("checksum mismatch for {}", name)),
                None => return Err(format!("missing checksum for {}", name)),
            }
        }
        for name in self.checksums.keys() {
            let covered = self
                .interfaces
                .get(name)
                .is_some_and(|record| record.mac_address.is_some());
            if !covered {
                return Err(format!("checksum for {} has no matching address", name));
            }
        }
        Ok(())
    }
}

/// One entry of `BackupStore::list`. Files that cannot be read or parsed are
/// listed with `valid` set to false and the reason in `error`.
#[derive(Clone, Debug, PartialEq)]
pub struct BackupSummary {
    pub name: String,
    pub path: PathBuf,
    pub timestamp: Option<String>,
    pub system_info: SystemInfo,
    pub interface_count: usize,
    pub file_size: u64,
    pub valid: bool,
    pub error: Option<String>,
}

/// Directory of backup files, one JSON file per backup.
pub struct BackupStore<R: CommandRunner> {
    dir: PathBuf,
    config: BackupStoreConfig,
    inspector: Inspector<R>,
    remove_file: fn(&Path) -> io::Result<()>,
}

impl<R: CommandRunner> BackupStore<R> {
    /// Open the store in `dir`, creating it and its configuration if needed.
    pub fn open<P: AsRef<Path>>(dir: P, runner: R) -> Result<Self, StoreError> {
        mkdir_p(&dir, Mode::from(0o700))?;
        let config = BackupStoreConfig::load_or_init(&dir)?;
        Self::with_config(dir, config, runner)
    }

    pub fn with_config<P: AsRef<Path>>(
        dir: P,
        config: BackupStoreConfig,
        runner: R,
    ) -> Result<Self, StoreError> {
        if config.backup_format != constants::BACKUP_FORMAT {
            return Err(StoreError::UnsupportedFormat(config.backup_format));
        }
        mkdir_p(&dir, Mode::from(0o700))?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            config,
            inspector: Inspector::new(runner),
            remove_file: |path: &Path| fs::remove_file(path),
        })
    }

    pub fn config(&self) -> &BackupStoreConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn create(&self, name: Option<&str>) -> Result<Backup, StoreError> {
        let now = Utc::now();
        let name = match name {
            Some(n) => validate_backup_name(n)?.to_string(),
            None => format!(
                "{}{}",
                constants::BACKUP_NAME_PREFIX,
                now.format("%Y%m%d_%H%M%S")
            ),
        };
        info!("Creating MAC address backup {}", &name);

        let interfaces = self
            .inspector
            .list_interfaces()
            .map_err(StoreError::InspectionFailed)?;
        let backup = Backup::capture(
            &name,
            now.to_rfc3339_opts(SecondsFormat::Micros, false),
            SystemInfo::current(),
            interfaces,
        );

        let path = self.backup_path(&name);
        let data = serde_json::to_vec_pretty(&backup).map_err(|source| StoreError::Serialize {
            what: format!("backup {}", &name),
            source,
        })?;
        atomic_write(&path, &data)?;
        info!(
            "Backup {} created at {}, {} interfaces with addresses",
            &name,
            path.display(),
            backup.checksums.len()
        );

        if let Err(e) = self.cleanup() {
            warn!("Unable to clean up old backups: {}", e);
        }
        Ok(backup)
    }

    /// All backups, newest first. Entries without a readable timestamp sort last.
    pub fn list(&self) -> Result<Vec<BackupSummary>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut backups = Vec::new();
        for entry_res in entries {
            let entry = entry_res.map_err(|e| StoreError::io(&self.dir, e))?;
            let path = entry.path();
            if !is_backup_file(&path) {
                continue;
            }
            backups.push(summarize(path));
        }
        backups.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(backups)
    }

    /// Load a backup by exact name, or else the newest one whose name contains
    /// `name`. Checksums are verified unless disabled in the configuration.
    pub fn load(&self, name: &str) -> Result<Backup, StoreError> {
        let path = self.resolve(name)?;
        let backup = read_backup(&path)?;
        if self.config.verify_checksums {
            check_integrity(&backup)?;
        }
        debug!("Loaded backup {} from {}", &backup.name, path.display());
        Ok(backup)
    }

    /// Load a backup and check its checksums regardless of configuration.
    pub fn verify(&self, name: &str) -> Result<Backup, StoreError> {
        let path = self.resolve(name)?;
        let backup = read_backup(&path)?;
        check_integrity(&backup)?;
        info!("Backup {} integrity verified", &backup.name);
        Ok(backup)
    }

    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.backup_path(validate_backup_name(name)?);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted backup {}", name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(name.into())),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Apply the retention policy and return the number of backups removed.
    pub fn cleanup(&self) -> Result<usize, StoreError> {
        let mut removed = 0;

        if self.config.retention_days > 0 {
            let max_age = Duration::from_secs((self.config.retention_days as u64).saturating_mul(SECONDS_PER_DAY));
            let cutoff = SystemTime::now()
                .checked_sub(max_age)
                .unwrap_or(SystemTime::UNIX_EPOCH);
            for backup in self.list()? {
                let modified = fs::metadata(&backup.path).and_then(|m| m.modified());
                match modified {
                    Ok(mtime) if mtime < cutoff => {
                        if self.remove_backup_file(&backup) {
                            removed += 1;
                        }
                    }
                    Ok(_) => (),
                    Err(e) => warn!(
                        "Could not check age of backup {}: {}",
                        backup.path.display(),
                        e
                    ),
                }
            }
        }

        let max = self.config.max_backups;
        let mut backups = self.list()?;
        if max > 0 && backups.len() > max {
            for backup in backups.drain(max..) {
                if self.remove_backup_file(&backup) {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!("Cleaned up {} old backups", removed);
        }
        Ok(removed)
    }

    /// Copy a backup out of the store. Returns the destination path.
    pub fn export<P: AsRef<Path>>(&self, name: &str, destination: P) -> Result<PathBuf, StoreError> {
        let source = self.resolve(name)?;
        let data = fs::read(&source).map_err(|e| StoreError::io(&source, e))?;
        let backup = parse_backup(&source, &data)?;
        if self.config.verify_checksums {
            check_integrity(&backup)?;
        }
        let destination = destination.as_ref();
        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            mkdir_p(parent, Mode::from(0o755))?;
        }
        // The destination may be the source file itself.
        atomic_write(destination, &data)?;
        info!("Backup {} exported to {}", &backup.name, destination.display());
        Ok(destination.to_path_buf())
    }

    /// Copy a backup file into the store under the name recorded inside it.
    pub fn import<P: AsRef<Path>>(&self, source: P) -> Result<Backup, StoreError> {
        let source = source.as_ref();
        let data = fs::read(source).map_err(|e| StoreError::io(source, e))?;
        let backup: Backup = serde_json::from_slice(&data).map_err(|e| StoreError::Corrupt {
            path: source.to_path_buf(),
            source: e,
        })?;
        if self.config.verify_checksums {
            check_integrity(&backup)?;
        }
        let path = self.backup_path(validate_backup_name(&backup.name)?);
        atomic_write(&path, &data)?;
        info!("Backup {} imported from {}", &backup.name, source.display());
        Ok(backup)
    }

    fn remove_backup_file(&self, backup: &BackupSummary) -> bool {
        match (self.remove_file)(&backup.path) {
            Ok(()) => {
                debug!("Removed backup {}", backup.path.display());
                true
            }
            Err(e) => {
                warn!("Could not remove backup {}: {}", backup.path.display(), e);
                false
            }
        }
    }

    fn backup_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", name, constants::FILE_EXTENSION_BACKUP))
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidName(name.into()));
        }
        if validate_backup_name(name).is_ok() {
            let path = self.backup_path(name);
            if path.is_file() {
                return Ok(path);
            }
        }
        self.list()?
            .into_iter()
            .find(|b| b.name.contains(name))
            .map(|b| {
                debug!("Backup {} matched by partial name {}", &b.name, name);
                b.path
            })
            .ok_or_else(|| StoreError::NotFound(name.into()))
    }
}

/// Backup names become file names, so they are restricted to a safe set.
pub fn validate_backup_name(name: &str) -> Result<&str, StoreError> {
    let config_stem = constants::FILE_CONFIG.trim_end_matches(".json");
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name != config_stem
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidName(name.into()))
    }
}

fn check_integrity(backup: &Backup) -> Result<(), StoreError> {
    backup
        .verify_integrity()
        .map_err(|reason| StoreError::IntegrityFailed {
            backup: backup.name.clone(),
            reason,
        })
}

fn is_backup_file(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    path.is_file()
        && !file_name.starts_with('.')
        && file_name != constants::FILE_CONFIG
        && path.extension().and_then(|e| e.to_str()) == Some(constants::FILE_EXTENSION_BACKUP)
}

fn read_backup(path: &Path) -> Result<Backup, StoreError> {
    let data = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    parse_backup(path, &data)
}

fn parse_backup(path: &Path, data: &[u8]) -> Result<Backup, StoreError> {
    serde_json::from_slice(data).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn summarize(path: PathBuf) -> BackupSummary {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_size = fs::metadata(&path).map(|m| m.len()).unwrap_or_default();
    match read_backup(&path) {
        Ok(backup) => BackupSummary {
            name: backup.name,
            timestamp: Some(backup.timestamp),
            system_info: backup.system_info,
            interface_count: backup.interfaces.len(),
            file_size,
            valid: true,
            error: None,
            path,
        },
        Err(e) => BackupSummary {
            name: stem,
            timestamp: None,
            system_info: SystemInfo::default(),
            interface_count: 0,
            file_size,
            valid: false,
            error: Some(e.to_string()),
            path,
        },
    }
}
