//! Measurement Layer
//!
//! Network speed tests behind the [`SpeedTester`] contract.
//!
//! - [`SpeedTester`]: session, server listing, best-server selection, transfers
//! - [`ProviderError`] / [`Disposition`]: classified failures
//! - [`SpeedtestNet`]: speedtest.net implementation over HTTP

pub mod speedtest;
mod traits;

pub use speedtest::{ClientInfo, SpeedtestNet, SpeedtestSettings};
pub use traits::{Disposition, MeasurementResult, Phase, ProviderError, Server, SpeedTester};
