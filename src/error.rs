use thiserror::Error;

/// Failure taxonomy for the interception core.
///
/// Anything not covered here is either recovered locally (missing config
/// falls back to the baseline identity) or propagated verbatim from the
/// real subsystem so the host process cannot tell we were in the path.
#[derive(Debug, Error)]
pub enum MirageError {
    /// A real entry point could not be located in its owning module.
    /// The affected interposition is skipped; install continues.
    #[error("could not resolve {symbol} in {module}")]
    Resolution { module: String, symbol: String },

    /// The forwarded call failed inside the real subsystem. The code is
    /// whatever the real implementation returned, untouched.
    #[error("real subsystem returned {0:#010x}")]
    Forward(u32),

    /// Building a synthetic result set failed.
    #[error("synthetic object construction failed")]
    Synthesis,

    /// Caller buffer too small for the synthetic payload. Carries the
    /// required byte count so the two-phase protocol can be honored.
    #[error("buffer too small, {required} bytes required")]
    BufferTooSmall { required: u32 },

    /// Configuration file missing or unparseable. Recovered internally,
    /// surfaced only in logs.
    #[error("configuration file absent or malformed")]
    ConfigurationAbsent,

    /// Install/remove called while another transition is in flight, or
    /// in a state that does not allow it.
    #[error("hook lifecycle violation: {0}")]
    Lifecycle(&'static str),
}

pub type Result<T> = std::result::Result<T, MirageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_messages_name_the_failure() {
        let resolution = MirageError::Resolution {
            module: "advapi32.dll".into(),
            symbol: "RegQueryValueExW".into(),
        };
        assert_eq!(
            resolution.to_string(),
            "could not resolve RegQueryValueExW in advapi32.dll"
        );
        assert_eq!(
            MirageError::Forward(0x8004_1003).to_string(),
            "real subsystem returned 0x80041003"
        );
        assert!(MirageError::Synthesis.to_string().contains("synthetic"));
        assert_eq!(
            MirageError::BufferTooSmall { required: 52 }.to_string(),
            "buffer too small, 52 bytes required"
        );
        assert!(MirageError::ConfigurationAbsent
            .to_string()
            .contains("configuration"));
        assert!(MirageError::Lifecycle("install while not uninstalled")
            .to_string()
            .contains("install while not uninstalled"));
    }
}
