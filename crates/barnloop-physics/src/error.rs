//! Error types for the `barnloop-physics` crate.

/// Errors raised at the physics boundary.
///
/// Configuration errors are raised once at load time; integration errors
/// are raised per call and leave the caller's last valid state untouched.
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    /// A configured constant is outside its physically meaningful range.
    #[error("invalid constant {name} = {value}: {reason}")]
    InvalidConstant {
        /// Dotted path of the constant.
        name: &'static str,
        /// The rejected value.
        value: f64,
        /// What the value must satisfy.
        reason: &'static str,
    },

    /// The requested integration interval is negative, non-finite, or too
    /// long for a single call.
    #[error("invalid time step: {dt_s}s")]
    InvalidTimeStep {
        /// The rejected interval in seconds.
        dt_s: f64,
    },

    /// The input state holds a non-finite value.
    #[error("non-finite environment state")]
    NonFiniteState,

    /// Advancing the simulated timestamp overflowed.
    #[error("simulated timestamp overflow")]
    TimestampOverflow,
}
