use log::{debug, error, info};

use crate::command::CommandRunner;
use crate::constants::TIMEOUT_MUTATION;
use crate::error::{InterfaceError, MutationError, Stage};
use crate::interface::Inspector;
use crate::validate::{normalize_mac, same_mac, validate_interface_name};

/// States of a single address change. `Succeeded` and `Failed` are terminal.
#[derive(Debug)]
pub enum State {
    Idle,
    Validating,
    Down,
    Setting,
    Up,
    Verifying,
    Succeeded,
    Failed(MutationError),
}

impl State {
    fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Down => "down",
            Self::Setting => "setting",
            Self::Up => "up",
            Self::Verifying => "verifying",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// Changes the hardware address of one interface:
/// validate, bring down, set address, bring up, verify.
///
/// There is no retry and no rollback. A caller that wants to undo a change
/// should read the current address first and run `change` again with it.
pub struct MacChanger<R: CommandRunner> {
    inspector: Inspector<R>,
}

impl<R: CommandRunner> MacChanger<R> {
    pub fn new(runner: R) -> Self {
        Self {
            inspector: Inspector::new(runner),
        }
    }

    pub fn inspector(&self) -> &Inspector<R> {
        &self.inspector
    }

    /// Returns the normalized address now set on the interface.
    pub fn change(&self, interface: &str, requested_mac: &str) -> Result<String, MutationError> {
        let mut mutation = Mutation {
            interface,
            requested: requested_mac,
            mac: String::new(),
            state: State::Idle,
        };
        while !mutation.state.is_terminal() {
            let next = self.step(&mut mutation);
            debug!(
                "{}: {} -> {}",
                interface,
                mutation.state.label(),
                next.label()
            );
            mutation.state = next;
        }
        match mutation.state {
            State::Succeeded => {
                info!("MAC address of {} changed to {}", interface, &mutation.mac);
                Ok(mutation.mac)
            }
            State::Failed(e) => {
                error!("Failed to change MAC address of {}: {}", interface, e);
                Err(e)
            }
            _ => unreachable!(),
        }
    }

    /// Reactivate an interface, e.g. after a change failed at the set-address stage.
    pub fn bring_up(&self, interface: &str) -> Result<(), MutationError> {
        let interface = validate_interface_name(interface)?;
        self.command(&interface, Stage::Up, &[interface.as_str(), "up"])
    }

    fn step(&self, m: &mut Mutation) -> State {
        match m.state {
            State::Idle => State::Validating,
            State::Validating => match self.validate(m) {
                Ok(()) => State::Down,
                Err(e) => State::Failed(e),
            },
            State::Down => self.advance(
                m.interface,
                Stage::Down,
                &[m.interface, "down"],
                State::Setting,
            ),
            State::Setting => self.advance(
                m.interface,
                Stage::Setting,
                &[m.interface, "hw", "ether", m.mac.as_str()],
                State::Up,
            ),
            State::Up => self.advance(m.interface, Stage::Up, &[m.interface, "up"], State::Verifying),
            State::Verifying => {
                let actual = self.inspector.get_mac(m.interface);
                if actual.as_deref().is_some_and(|mac| same_mac(mac, &m.mac)) {
                    State::Succeeded
                } else {
                    State::Failed(MutationError::VerificationMismatch {
                        interface: m.interface.into(),
                        expected: m.mac.clone(),
                        actual,
                    })
                }
            }
            State::Succeeded | State::Failed(_) => unreachable!(),
        }
    }

    fn validate(&self, m: &mut Mutation) -> Result<(), MutationError> {
        validate_interface_name(m.interface)?;
        m.mac = normalize_mac(m.requested)?;
        if !self.inspector.interface_exists(m.interface) {
            return Err(InterfaceError::NotFound(m.interface.into()).into());
        }
        Ok(())
    }

    fn advance(&self, interface: &str, stage: Stage, args: &[&str], next: State) -> State {
        match self.command(interface, stage, args) {
            Ok(()) => next,
            Err(e) => State::Failed(e),
        }
    }

    fn command(&self, interface: &str, stage: Stage, args: &[&str]) -> Result<(), MutationError> {
        self.inspector
            .runner()
            .run_checked(args, TIMEOUT_MUTATION)
            .map(|_| ())
            .map_err(|source| MutationError::Command {
                interface: interface.into(),
                stage,
                source,
            })
    }
}

struct Mutation<'a> {
    interface: &'a str,
    requested: &'a str,
    mac: String,
    state: State,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::{CommandError, ValidationError};
    use crate::testing::FakeIfconfig;

    fn fake() -> FakeIfconfig {
        FakeIfconfig::new().with_interface("eth0", "aa:bb:cc:dd:ee:ff")
    }

    #[test]
    fn test_change_happy_path() {
        let fake = fake();
        let changer = MacChanger::new(&fake);
        let result = changer.change("eth0", "00-11-22-33-44-5A");
        assert_eq!(result.unwrap(), "00:11:22:33:44:5a");
        assert_eq!(fake.mac_of("eth0").as_deref(), Some("00:11:22:33:44:5a"));
        assert!(fake.is_up("eth0"));
        assert_eq!(
            fake.mutations(),
            vec![
                "eth0 down".to_string(),
                "eth0 hw ether 00:11:22:33:44:5a".to_string(),
                "eth0 up".to_string(),
            ]
        );
    }

    #[test]
    fn test_change_validation_failures_touch_nothing() {
        let fake = fake();
        let changer = MacChanger::new(&fake);

        let result = changer.change("eth0; rm -rf /", "00:11:22:33:44:55");
        assert!(matches!(
            result,
            Err(MutationError::Validation(ValidationError::InvalidInterfaceName(_)))
        ));

        let result = changer.change("eth0", "00:11:22:33:44");
        assert!(matches!(
            result,
            Err(MutationError::Validation(ValidationError::InvalidMac(_)))
        ));

        let result = changer.change("eth7", "00:11:22:33:44:55");
        match result {
            Err(MutationError::Interface(InterfaceError::NotFound(name))) => {
                assert_eq!(name, "eth7")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(fake.mutations().is_empty());
        assert_eq!(fake.mac_of("eth0").as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_change_stage_failures() {
        struct Case {
            fake: FakeIfconfig,
            stage: Stage,
            mutations: usize,
            left_down: bool,
        }
        let cases = [
            Case {
                fake: fake().failing_at("eth0", Stage::Down),
                stage: Stage::Down,
                mutations: 1,
                left_down: false,
            },
            Case {
                fake: fake().timing_out_at("eth0", Stage::Setting),
                stage: Stage::Setting,
                mutations: 2,
                left_down: true,
            },
            Case {
                fake: fake().failing_at("eth0", Stage::Up),
                stage: Stage::Up,
                mutations: 3,
                left_down: true,
            },
        ];
        for case in cases {
            let changer = MacChanger::new(&case.fake);
            let err = changer.change("eth0", "00:11:22:33:44:55").unwrap_err();
            assert_eq!(err.stage(), Some(case.stage));
            assert_eq!(err.left_down(), case.left_down);
            assert_eq!(case.fake.mutations().len(), case.mutations);
        }
    }

    #[test]
    fn test_change_timeout_is_a_command_failure() {
        let fake = fake().timing_out_at("eth0", Stage::Down);
        let changer = MacChanger::new(&fake);
        match changer.change("eth0", "00:11:22:33:44:55") {
            Err(MutationError::Command {
                stage: Stage::Down,
                source: CommandError::Timeout { .. },
                ..
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_setting_failure_leaves_interface_down_until_brought_up() {
        let fake = fake().failing_at("eth0", Stage::Setting);
        let changer = MacChanger::new(&fake);
        let err = changer.change("eth0", "00:11:22:33:44:55").unwrap_err();
        assert!(err.left_down());
        assert!(!fake.is_up("eth0"));

        changer.bring_up("eth0").unwrap();
        assert!(fake.is_up("eth0"));
        assert_eq!(fake.mac_of("eth0").as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_change_verification_mismatch() {
        let fake = fake().ignoring_mac_change("eth0");
        let changer = MacChanger::new(&fake);
        match changer.change("eth0", "00:11:22:33:44:55") {
            Err(MutationError::VerificationMismatch {
                interface,
                expected,
                actual,
            }) => {
                assert_eq!(interface, "eth0");
                assert_eq!(expected, "00:11:22:33:44:55");
                assert_eq!(actual.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fake.mutations().len(), 3);
    }

    #[test]
    fn test_rollback_by_rerunning_with_old_address() {
        let fake = fake();
        let changer = MacChanger::new(&fake);
        let previous = changer.inspector().get_mac("eth0").unwrap();
        changer.change("eth0", "02:00:00:00:00:01").unwrap();
        changer.change("eth0", &previous).unwrap();
        assert_eq!(fake.mac_of("eth0"), Some(previous));
        assert_eq!(fake.mutations().len(), 6);
    }
}
