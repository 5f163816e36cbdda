//! In-memory stand-in for `ifconfig` used by the unit tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

use crate::command::{CommandOutput, CommandRunner};
use crate::error::{CommandError, Stage};

#[derive(Debug, Clone)]
struct FakeInterface {
    mac: String,
    up: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FaultKind {
    Timeout,
    Exit,
    IgnoreMac,
}

#[derive(Debug, Clone)]
struct Fault {
    interface: String,
    // None matches every invocation for the interface, queries included.
    stage: Option<Stage>,
    kind: FaultKind,
}

/// Simulates net-tools `ifconfig`, rendering output from its own state and
/// applying `down`, `up` and `hw ether`. Like the real tool on Linux, it
/// refuses to change the address of an interface that is up.
#[derive(Debug, Default)]
pub(crate) struct FakeIfconfig {
    interfaces: RefCell<BTreeMap<String, FakeInterface>>,
    calls: RefCell<Vec<String>>,
    faults: Vec<Fault>,
    listing: Option<String>,
    listing_fails: bool,
}

impl FakeIfconfig {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_interface(self, name: &str, mac: &str) -> Self {
        self.interfaces.borrow_mut().insert(
            name.into(),
            FakeInterface {
                mac: mac.into(),
                up: true,
            },
        );
        self
    }

    pub(crate) fn timing_out_on(self, interface: &str) -> Self {
        self.with_fault(interface, None, FaultKind::Timeout)
    }

    pub(crate) fn timing_out_at(self, interface: &str, stage: Stage) -> Self {
        self.with_fault(interface, Some(stage), FaultKind::Timeout)
    }

    pub(crate) fn failing_at(self, interface: &str, stage: Stage) -> Self {
        self.with_fault(interface, Some(stage), FaultKind::Exit)
    }

    /// Accept `hw ether` for the interface but keep the old address.
    pub(crate) fn ignoring_mac_change(self, interface: &str) -> Self {
        self.with_fault(interface, Some(Stage::Setting), FaultKind::IgnoreMac)
    }

    pub(crate) fn failing_listing(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    pub(crate) fn with_listing(mut self, listing: &str) -> Self {
        self.listing = Some(listing.into());
        self
    }

    fn with_fault(mut self, interface: &str, stage: Option<Stage>, kind: FaultKind) -> Self {
        self.faults.push(Fault {
            interface: interface.into(),
            stage,
            kind,
        });
        self
    }

    pub(crate) fn set_mac(&self, name: &str, mac: &str) {
        if let Some(iface) = self.interfaces.borrow_mut().get_mut(name) {
            iface.mac = mac.into();
        }
    }

    pub(crate) fn mac_of(&self, name: &str) -> Option<String> {
        self.interfaces.borrow().get(name).map(|i| i.mac.clone())
    }

    pub(crate) fn is_up(&self, name: &str) -> bool {
        self.interfaces.borrow().get(name).is_some_and(|i| i.up)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Invocations that change interface state.
    pub(crate) fn mutations(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.ends_with(" down") || c.ends_with(" up") || c.contains(" hw ether "))
            .cloned()
            .collect()
    }

    fn fault(&self, interface: &str, stage: Option<Stage>) -> Option<FaultKind> {
        self.faults
            .iter()
            .find(|f| f.interface == interface && (f.stage.is_none() || f.stage == stage))
            .map(|f| f.kind)
    }

    fn render(name: &str, iface: &FakeInterface) -> String {
        let mut s = String::new();
        let flags = if iface.up {
            "4163<UP,BROADCAST,RUNNING,MULTICAST>"
        } else {
            "4098<BROADCAST,MULTICAST>"
        };
        let _ = writeln!(s, "{}: flags={}  mtu 1500", name, flags);
        let _ = writeln!(s, "        ether {}  txqueuelen 1000  (Ethernet)", iface.mac);
        let _ = writeln!(s, "        RX packets 0  bytes 0 (0.0 B)");
        s
    }

    fn listing(&self) -> String {
        if let Some(listing) = &self.listing {
            return listing.clone();
        }
        let mut s = String::new();
        for (name, iface) in self.interfaces.borrow().iter() {
            s.push_str(&Self::render(name, iface));
            s.push('\n');
        }
        s.push_str("lo: flags=73<UP,LOOPBACK,RUNNING>  mtu 65536\n");
        s.push_str("        inet 127.0.0.1  netmask 255.0.0.0\n");
        s.push_str("        loop  txqueuelen 1000  (Local Loopback)\n");
        s
    }

    fn exit(code: i32, stdout: String, stderr: &str) -> CommandOutput {
        CommandOutput {
            code,
            stdout,
            stderr: stderr.into(),
        }
    }
}

impl CommandRunner for FakeIfconfig {
    fn program(&self) -> &str {
        "ifconfig"
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
        self.calls.borrow_mut().push(args.join(" "));

        if args == ["-a"] {
            if self.listing_fails {
                return Ok(Self::exit(1, String::new(), "ifconfig: socket: Permission denied"));
            }
            return Ok(Self::exit(0, self.listing(), ""));
        }

        let Some(name) = args.first() else {
            return Ok(Self::exit(0, self.listing(), ""));
        };
        let stage = match &args[1..] {
            ["down"] => Some(Stage::Down),
            ["up"] => Some(Stage::Up),
            ["hw", "ether", _] => Some(Stage::Setting),
            _ => None,
        };
        let fault = self.fault(name, stage);
        match fault {
            Some(FaultKind::Timeout) => {
                return Err(CommandError::Timeout {
                    command: self.describe(args),
                    timeout,
                });
            }
            Some(FaultKind::Exit) => {
                return Ok(Self::exit(1, String::new(), "SIOCSIFFLAGS: Operation not permitted"));
            }
            _ => {}
        }

        let mut interfaces = self.interfaces.borrow_mut();
        let Some(iface) = interfaces.get_mut(*name) else {
            return Ok(Self::exit(
                1,
                String::new(),
                &format!("{}: error fetching interface information: Device not found", name),
            ));
        };
        match stage {
            None => Ok(Self::exit(0, Self::render(name, iface), "")),
            Some(Stage::Down) => {
                iface.up = false;
                Ok(Self::exit(0, String::new(), ""))
            }
            Some(Stage::Up) => {
                iface.up = true;
                Ok(Self::exit(0, String::new(), ""))
            }
            Some(Stage::Setting) => {
                if iface.up {
                    return Ok(Self::exit(
                        1,
                        String::new(),
                        "SIOCSIFHWADDR: Device or resource busy",
                    ));
                }
                if fault != Some(FaultKind::IgnoreMac) {
                    iface.mac = args[3].to_ascii_lowercase();
                }
                Ok(Self::exit(0, String::new(), ""))
            }
        }
    }
}
