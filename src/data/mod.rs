mod config;
pub use config::FitConfig;

mod correlation;
pub use correlation::Correlation;

mod interval;
pub use interval::FitInterval;

mod trace;
pub use trace::Trace;
