use std::time::Duration;

pub const DIR_BACKUPS_DEFAULT: &str = "/var/lib/macsnap/backups";

pub const ENV_BACKUP_DIR: &str = "MACSNAP_BACKUP_DIR";
pub const ENV_PATH_DEFAULT: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

pub const FILE_CONFIG: &str = "config.json";
pub const FILE_EXTENSION_BACKUP: &str = "json";

pub const BACKUP_FORMAT: &str = "json";
pub const BACKUP_VERSION: &str = "1.0";
pub const BACKUP_NAME_PREFIX: &str = "mac_backup_";
pub const BACKUP_NAME_PRE_RESTORE_PREFIX: &str = "pre_restore_";

pub const TOOL_IFCONFIG: &str = "ifconfig";
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const TIMEOUT_STATUS: Duration = Duration::from_secs(5);
pub const TIMEOUT_LIST: Duration = Duration::from_secs(10);
pub const TIMEOUT_MUTATION: Duration = Duration::from_secs(10);

pub const SUPPORTED_SYSTEMS: [&str; 2] = ["Linux", "Darwin"];
