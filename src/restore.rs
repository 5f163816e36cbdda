use std::io::{self, BufRead, Write};

use chrono::Utc;
use log::{info, warn};

use crate::backup::{Backup, BackupStore};
use crate::command::CommandRunner;
use crate::constants;
use crate::error::{MutationError, StoreError};
use crate::mutation::MacChanger;

/// Asks the operator to approve a restore before anything is changed.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Prompts on stdout and reads the answer from stdin. Anything other than
/// `y` or `yes` declines.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "{} [y/N]: ", prompt);
        let _ = stdout.flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    DryRun,
    Cancelled,
    Completed,
}

#[derive(Debug)]
pub struct RestoreFailure {
    pub interface: String,
    pub error: MutationError,
}

#[derive(Debug)]
pub struct RestoreReport {
    pub backup_name: String,
    /// Interface and the address it is restored to, in the order attempted.
    pub selection: Vec<(String, String)>,
    pub outcome: RestoreOutcome,
    pub pre_restore_backup: Option<String>,
    pub succeeded: Vec<String>,
    pub failed: Vec<RestoreFailure>,
}

impl RestoreReport {
    fn new(backup_name: &str, selection: Vec<(String, String)>) -> Self {
        Self {
            backup_name: backup_name.into(),
            selection,
            outcome: RestoreOutcome::Completed,
            pre_restore_backup: None,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_interfaces(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.interface.as_str()).collect()
    }
}

/// Restores the addresses recorded in a backup, one interface at a time.
/// A failed interface does not stop the rest.
pub struct RestoreEngine<'a, R: CommandRunner, C: Confirm> {
    store: &'a BackupStore<R>,
    changer: &'a MacChanger<R>,
    confirm: C,
}

impl<'a, R: CommandRunner, C: Confirm> RestoreEngine<'a, R, C> {
    pub fn new(store: &'a BackupStore<R>, changer: &'a MacChanger<R>, confirm: C) -> Self {
        Self {
            store,
            changer,
            confirm,
        }
    }

    pub fn restore(
        &self,
        backup_name: &str,
        filter: Option<&[String]>,
        dry_run: bool,
    ) -> Result<RestoreReport, StoreError> {
        let backup = self.store.load(backup_name)?;
        let selection = select(&backup, filter);
        if selection.is_empty() {
            return Err(StoreError::NothingToRestore(backup.name));
        }
        let mut report = RestoreReport::new(&backup.name, selection);

        if dry_run {
            info!(
                "Dry run, would restore {} interfaces from backup {}",
                report.selection.len(),
                &backup.name
            );
            report.outcome = RestoreOutcome::DryRun;
            return Ok(report);
        }

        let prompt = format!(
            "Restore MAC addresses of {} interfaces from backup {}?",
            report.selection.len(),
            &backup.name
        );
        if !self.confirm.confirm(&prompt) {
            info!("Restore of backup {} cancelled", &backup.name);
            report.outcome = RestoreOutcome::Cancelled;
            return Ok(report);
        }

        if self.store.config().auto_backup_before_restore {
            let snapshot = format!(
                "{}{}",
                constants::BACKUP_NAME_PRE_RESTORE_PREFIX,
                Utc::now().timestamp()
            );
            match self.store.create(Some(&snapshot)) {
                Ok(b) => report.pre_restore_backup = Some(b.name),
                Err(e) => warn!("Unable to create pre-restore backup: {}", e),
            }
        }

        for (interface, mac) in &report.selection {
            match self.changer.change(interface, mac) {
                Ok(_) => report.succeeded.push(interface.clone()),
                Err(error) => {
                    if error.left_down() {
                        warn!("Interface {} may have been left down", interface);
                    }
                    report.failed.push(RestoreFailure {
                        interface: interface.clone(),
                        error,
                    });
                }
            }
        }

        if report.is_success() {
            info!(
                "Restored {} interfaces from backup {}",
                report.succeeded.len(),
                &backup.name
            );
        } else {
            warn!(
                "Restore from backup {} failed for {}",
                &backup.name,
                report.failed_interfaces().join(", ")
            );
        }
        Ok(report)
    }
}

fn select(backup: &Backup, filter: Option<&[String]>) -> Vec<(String, String)> {
    if let Some(names) = filter {
        for name in names {
            match backup.interfaces.get(name) {
                None => warn!("Interface {} not found in backup {}", name, &backup.name),
                Some(record) if record.mac_address.is_none() => {
                    warn!("Interface {} has no MAC address in backup {}", name, &backup.name)
                }
                Some(_) => (),
            }
        }
    }
    backup
        .addresses()
        .filter(|(name, _)| filter.is_none_or(|names| names.iter().any(|n| n.as_str() == *name)))
        .map(|(name, mac)| (name.to_string(), mac.to_string()))
        .collect()
}
