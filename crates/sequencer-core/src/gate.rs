use crate::condition::Condition;

// ---------------------------------------------------------------------------
// GateProtocol
// ---------------------------------------------------------------------------

/// The entry and exit conditions wrapped around one unit of work.
///
/// An Action owns exactly one gate for its whole life; the two conditions
/// are re-armed and reset on every pass through it.
#[derive(Debug, Clone, Default)]
pub struct GateProtocol {
    entry: Condition,
    exit: Condition,
}

impl GateProtocol {
    /// Missing conditions default to [`Condition::Immediate`].
    pub fn new(entry: Option<Condition>, exit: Option<Condition>) -> Self {
        Self {
            entry: entry.unwrap_or_default(),
            exit: exit.unwrap_or_default(),
        }
    }

    pub fn entry(&self) -> &Condition {
        &self.entry
    }

    pub fn exit(&self) -> &Condition {
        &self.exit
    }

    pub fn entry_mut(&mut self) -> &mut Condition {
        &mut self.entry
    }

    pub fn exit_mut(&mut self) -> &mut Condition {
        &mut self.exit
    }

    pub fn reset(&mut self) {
        self.entry.reset();
        self.exit.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_conditions_default_to_immediate() {
        let gate = GateProtocol::new(None, None);
        assert_eq!(gate.entry().kind(), "immediate");
        assert_eq!(gate.exit().kind(), "immediate");
    }

    #[test]
    fn reset_clears_both_sides() {
        let mut gate = GateProtocol::new(
            Some(Condition::timed_wait(Duration::ZERO)),
            Some(Condition::timed_wait(Duration::ZERO)),
        );
        gate.entry_mut().arm();
        gate.exit_mut().arm();
        assert!(gate.entry().statement().unwrap());
        assert!(gate.exit().statement().unwrap());

        gate.reset();
        assert!(!gate.entry().statement().unwrap());
        assert!(!gate.exit().statement().unwrap());
    }
}
