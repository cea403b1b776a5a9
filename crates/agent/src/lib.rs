pub mod classifier;
pub mod context;
pub mod keeper;
pub mod machine;
pub mod report;
pub mod runner;

#[cfg(test)]
mod testing;

pub use classifier::{is_device_verification_location, is_two_factor_location, PageClassifier};
pub use context::RunContext;
pub use keeper::{CredentialUpdate, SessionKeeper};
pub use machine::{AuthOutcome, AuthStateMachine, FailureReason};
pub use report::{LogLevel, LogLine, RunReport};
pub use runner::{LoginRun, RunOutcome};
