use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum GasError {
    #[error("out of gas (used={used}, limit={limit})")]
    OutOfGas { used: u64, limit: u64 },
}

/// Per-phase gas budget.
///
/// An unmetered meter (used by system phases) counts consumption but never runs out. A limited
/// meter keeps counting past its limit so that an overrun is still visible after a handler has
/// swallowed the error returned by [GasMeter::consume].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasMeter {
    limit: Option<u64>,
    used: u64,
}

impl GasMeter {
    pub fn limited(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            used: 0,
        }
    }

    pub fn unmetered() -> Self {
        Self {
            limit: None,
            used: 0,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Gas left before the limit is reached (`None` when unmetered).
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }

    pub fn consume(&mut self, amount: u64) -> Result<(), GasError> {
        self.used = self.used.saturating_add(amount);
        self.check()
    }

    /// Fails if more gas has been consumed than the limit allows.
    pub fn check(&self) -> Result<(), GasError> {
        match self.limit {
            Some(limit) if self.used > limit => Err(GasError::OutOfGas {
                used: self.used,
                limit,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_meter_records_overrun() {
        let mut meter = GasMeter::limited(10);
        meter.consume(4).unwrap();
        meter.consume(6).unwrap();
        assert_eq!(meter.remaining(), Some(0));

        assert_eq!(
            meter.consume(1),
            Err(GasError::OutOfGas { used: 11, limit: 10 })
        );
        assert_eq!(meter.used(), 11);
        assert!(meter.check().is_err());
    }

    #[test]
    fn unmetered_meter_never_fails() {
        let mut meter = GasMeter::unmetered();
        meter.consume(u64::MAX).unwrap();
        meter.consume(u64::MAX).unwrap();
        assert_eq!(meter.used(), u64::MAX);
        assert_eq!(meter.limit(), None);
        assert_eq!(meter.remaining(), None);
    }

    #[test]
    fn zero_limit_allows_free_work() {
        let mut meter = GasMeter::limited(0);
        meter.consume(0).unwrap();
        assert!(meter.consume(1).is_err());
    }
}
