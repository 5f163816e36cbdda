use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use log::{Level, error, warn};

use macsnap::backup::BackupStore;
use macsnap::command::{CommandRunner, Ifconfig};
use macsnap::constants;
use macsnap::error::{InterfaceError, MutationError};
use macsnap::interface::Inspector;
use macsnap::logger::init_logger;
use macsnap::mutation::MacChanger;
use macsnap::restore::{AssumeYes, Confirm, RestoreEngine, RestoreOutcome, TerminalConfirm};
use macsnap::system::{SystemInfo, check_compatibility, find_ifconfig, require_root};
use macsnap::validate::{normalize_mac, validate_interface_name};

#[derive(Parser, Debug)]
#[command(version, about = "Back up and restore network interface MAC addresses")]
#[command(propagate_version = true)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Directory holding backups and config.json
    #[arg(long, global = true, env = constants::ENV_BACKUP_DIR, default_value = constants::DIR_BACKUPS_DEFAULT)]
    backup_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List network interfaces and their MAC addresses
    Interfaces,
    /// Show the current MAC address of an interface
    Current {
        #[arg(short, long)]
        interface: String,
    },
    /// Change the MAC address of an interface
    Change {
        #[arg(short, long)]
        interface: String,
        #[arg(short, long)]
        mac: String,
        /// Show what would change without changing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Back up the MAC addresses of all interfaces
    Backup {
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Restore MAC addresses from a backup
    Restore {
        /// Backup name, or part of one
        #[arg(short, long)]
        name: String,
        /// Restore only these interfaces
        #[arg(short, long = "interface")]
        interfaces: Vec<String>,
        #[arg(long)]
        dry_run: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// List backups
    List,
    /// Check the checksums of a backup
    Verify {
        #[arg(short, long)]
        name: String,
    },
    /// Remove backups according to the retention policy
    Cleanup,
    /// Copy a backup out of the backup directory
    Export {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Copy a backup file into the backup directory
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::Debug } else { Level::Info };
    if let Err(e) = init_logger(level) {
        // Use eprintln! here since there is no logger.
        eprintln!("Failed to initialize logger: {}", e);
    }
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Interfaces => list_interfaces(&find_tool()?),
        Command::Current { interface } => current(&find_tool()?, &interface),
        Command::Change {
            interface,
            mac,
            dry_run,
        } => change(&find_tool()?, &interface, &mac, dry_run),
        Command::Backup { name } => {
            let ifconfig = find_tool()?;
            let store = open_store(&cli.backup_dir, &ifconfig)?;
            let backup = store.create(name.as_deref())?;
            println!(
                "Backup {} created with {} interfaces",
                backup.name,
                backup.interfaces.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Restore {
            name,
            interfaces,
            dry_run,
            yes,
        } => {
            let ifconfig = find_tool()?;
            if !dry_run {
                require_root()?;
            }
            let store = open_store(&cli.backup_dir, &ifconfig)?;
            let changer = MacChanger::new(&ifconfig);
            let filter = (!interfaces.is_empty()).then_some(interfaces.as_slice());
            if yes {
                restore(&store, &changer, AssumeYes, &name, filter, dry_run)
            } else {
                restore(&store, &changer, TerminalConfirm, &name, filter, dry_run)
            }
        }
        Command::List => {
            let ifconfig = unresolved_tool();
            let store = open_store(&cli.backup_dir, &ifconfig)?;
            list_backups(&store)
        }
        Command::Verify { name } => {
            let ifconfig = unresolved_tool();
            let store = open_store(&cli.backup_dir, &ifconfig)?;
            let backup = store.verify(&name)?;
            println!(
                "Backup {} is intact, {} checksums verified",
                backup.name,
                backup.checksums.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Cleanup => {
            let ifconfig = unresolved_tool();
            let store = open_store(&cli.backup_dir, &ifconfig)?;
            let removed = store.cleanup()?;
            println!("Removed {} backups", removed);
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { name, output } => {
            let ifconfig = unresolved_tool();
            let store = open_store(&cli.backup_dir, &ifconfig)?;
            let path = store.export(&name, &output)?;
            println!("Backup exported to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Import { file } => {
            let ifconfig = unresolved_tool();
            let store = open_store(&cli.backup_dir, &ifconfig)?;
            let backup = store.import(&file)?;
            println!("Backup {} imported", backup.name);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Check the platform and locate `ifconfig`, for commands that run it.
fn find_tool() -> Result<Ifconfig> {
    check_compatibility(&SystemInfo::current())?;
    let path_var = env::var("PATH").ok();
    Ok(Ifconfig::new(find_ifconfig(path_var.as_deref())?))
}

// Store commands that only read or copy files never run the tool.
fn unresolved_tool() -> Ifconfig {
    Ifconfig::new(constants::TOOL_IFCONFIG)
}

fn open_store<'a>(dir: &Path, ifconfig: &'a Ifconfig) -> Result<BackupStore<&'a Ifconfig>> {
    BackupStore::open(dir, ifconfig)
        .with_context(|| format!("unable to open backup directory {}", dir.display()))
}

fn list_interfaces(ifconfig: &Ifconfig) -> Result<ExitCode> {
    let interfaces = Inspector::new(ifconfig).list_interfaces()?;
    if interfaces.is_empty() {
        println!("No interfaces found");
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "{:<16} {:<18} {:<8} {:<10} {}",
        "INTERFACE", "MAC", "STATUS", "TYPE", "IP"
    );
    for (name, record) in &interfaces {
        println!(
            "{:<16} {:<18} {:<8} {:<10} {}",
            name,
            record.mac_address.as_deref().unwrap_or("-"),
            record.status,
            record.kind,
            record.ip_address.as_deref().unwrap_or("-"),
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn current(ifconfig: &Ifconfig, interface: &str) -> Result<ExitCode> {
    let interface = validate_interface_name(interface)?;
    let inspector = Inspector::new(ifconfig);
    match inspector.get_mac(&interface) {
        Some(mac) => {
            println!("{}", mac);
            Ok(ExitCode::SUCCESS)
        }
        None => Err(not_found(&inspector, &interface)),
    }
}

fn change<R: CommandRunner>(
    runner: R,
    interface: &str,
    mac: &str,
    dry_run: bool,
) -> Result<ExitCode> {
    let interface = validate_interface_name(interface)?;
    let changer = MacChanger::new(runner);
    if dry_run {
        let mac = normalize_mac(mac)?;
        let Some(previous) = changer.inspector().get_mac(&interface) else {
            return Err(not_found(changer.inspector(), &interface));
        };
        println!("Would change {} from {} to {}", interface, previous, mac);
        return Ok(ExitCode::SUCCESS);
    }

    require_root()?;
    let previous = changer.inspector().get_mac(&interface);
    match changer.change(&interface, mac) {
        Ok(mac) => {
            println!(
                "Changed {} from {} to {}",
                interface,
                previous.as_deref().unwrap_or("unknown"),
                mac
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(MutationError::Interface(InterfaceError::NotFound(name))) => {
            Err(not_found(changer.inspector(), &name))
        }
        Err(e) => {
            if e.left_down() {
                warn!(
                    "{} may be down, run `{} {} up` to reactivate it",
                    interface,
                    changer.inspector().runner().program(),
                    interface
                );
            }
            Err(e.into())
        }
    }
}

fn restore<C: Confirm>(
    store: &BackupStore<&Ifconfig>,
    changer: &MacChanger<&Ifconfig>,
    confirm: C,
    name: &str,
    filter: Option<&[String]>,
    dry_run: bool,
) -> Result<ExitCode> {
    let engine = RestoreEngine::new(store, changer, confirm);
    let report = engine.restore(name, filter, dry_run)?;
    match report.outcome {
        RestoreOutcome::DryRun => {
            println!("Backup {} would restore:", report.backup_name);
            for (interface, mac) in &report.selection {
                println!("  {} -> {}", interface, mac);
            }
            Ok(ExitCode::SUCCESS)
        }
        RestoreOutcome::Cancelled => {
            println!("Restore cancelled");
            Ok(ExitCode::SUCCESS)
        }
        RestoreOutcome::Completed => {
            if let Some(pre) = &report.pre_restore_backup {
                println!("Current addresses saved as backup {}", pre);
            }
            for interface in &report.succeeded {
                println!("Restored {}", interface);
            }
            for failure in &report.failed {
                println!("Failed {}: {}", failure.interface, failure.error);
            }
            if report.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Err(anyhow!(
                    "restore incomplete, failed interfaces: {}",
                    report.failed_interfaces().join(", ")
                ))
            }
        }
    }
}

fn list_backups(store: &BackupStore<&Ifconfig>) -> Result<ExitCode> {
    let backups = store.list()?;
    if backups.is_empty() {
        println!("No backups in {}", store.dir().display());
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "{:<32} {:<28} {:>10} {:>10}",
        "NAME", "TIMESTAMP", "INTERFACES", "SIZE"
    );
    for backup in &backups {
        if backup.valid {
            println!(
                "{:<32} {:<28} {:>10} {:>10}",
                backup.name,
                backup.timestamp.as_deref().unwrap_or("-"),
                backup.interface_count,
                backup.file_size,
            );
        } else {
            println!(
                "{:<32} invalid: {}",
                backup.name,
                backup.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn not_found<R: CommandRunner>(inspector: &Inspector<R>, interface: &str) -> anyhow::Error {
    let err = InterfaceError::NotFound(interface.into());
    let available = inspector.available_interfaces();
    if available.is_empty() {
        anyhow!(err)
    } else {
        anyhow!("{}, available interfaces: {}", err, available.join(", "))
    }
}
