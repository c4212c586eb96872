// Risk management module
pub mod admission;
pub mod circuit_breakers;

pub use admission::{
    AdmissionState, PositionSnapshot, RiskAdmission, RiskDecision, RiskLimits, RiskReason,
};
pub use circuit_breakers::{CircuitBreakerTrip, CircuitBreakers, PnlSnapshot};
