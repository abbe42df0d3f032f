use thiserror::Error;

/// Engine parameters are not compliant to [rfc-6238](https://tools.ietf.org/html/rfc6238)
#[derive(Debug, Clone, Copy, Error, Eq, PartialEq)]
pub enum Rfc6238Error {
    /// Implementations MUST extract a 6-digit code at a minimum and possibly 7 and 8-digit code
    #[error("Implementations MUST extract a 6-digit code at a minimum and possibly 7 and 8-digit code. {0} digits is not allowed")]
    InvalidDigits(usize),
    /// A time step of zero seconds has no counter
    #[error("The time step must be at least one second")]
    InvalidStep,
    /// The step does not fit in a signed millisecond period
    #[error("A time step of {0} seconds is too long, at most {max} is allowed", max = MAX_STEP)]
    StepTooLong(u64),
}

/// Longest step, in seconds, whose length in milliseconds fits an `i64`.
pub const MAX_STEP: u64 = i64::MAX as u64 / 1000;

pub(crate) fn assert_digits(digits: usize) -> Result<(), Rfc6238Error> {
    if !(6..=8).contains(&digits) {
        Err(Rfc6238Error::InvalidDigits(digits))
    } else {
        Ok(())
    }
}

pub(crate) fn assert_step(step: u64) -> Result<(), Rfc6238Error> {
    if step == 0 {
        Err(Rfc6238Error::InvalidStep)
    } else if step > MAX_STEP {
        Err(Rfc6238Error::StepTooLong(step))
    } else {
        Ok(())
    }
}
