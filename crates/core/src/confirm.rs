use crate::Result;

pub trait Confirm {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str, _default: bool) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeNo;

impl Confirm for AssumeNo {
    fn confirm(&self, _prompt: &str, _default: bool) -> Result<bool> {
        Ok(false)
    }
}

pub fn confirm_unless_forced<C: Confirm + ?Sized>(
    gate: &C,
    force: bool,
    prompt: &str,
    default: bool,
) -> Result<bool> {
    if force {
        return Ok(true);
    }
    gate.confirm(prompt, default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::cell::Cell;

    struct Broken {
        asked: Cell<usize>,
    }

    impl Confirm for Broken {
        fn confirm(&self, _prompt: &str, _default: bool) -> Result<bool> {
            self.asked.set(self.asked.get() + 1);
            Err(Error::Confirmation {
                message: "not a terminal".to_string(),
            })
        }
    }

    #[test]
    fn force_bypasses_the_gate() {
        let gate = Broken {
            asked: Cell::new(0),
        };
        assert!(confirm_unless_forced(&gate, true, "Perform backup", false).unwrap());
        assert_eq!(gate.asked.get(), 0);
    }

    #[test]
    fn gate_errors_propagate() {
        let gate = Broken {
            asked: Cell::new(0),
        };
        let err = confirm_unless_forced(&gate, false, "Perform backup", false).unwrap_err();
        assert!(matches!(err, Error::Confirmation { .. }));
        assert_eq!(gate.asked.get(), 1);
    }

    #[test]
    fn answers_pass_through() {
        assert!(confirm_unless_forced(&AssumeYes, false, "x", false).unwrap());
        assert!(!confirm_unless_forced(&AssumeNo, false, "x", true).unwrap());
    }
}
