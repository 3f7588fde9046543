pub mod comparison;
pub mod engine;
pub mod harness;
pub mod invoke;
pub mod query;
pub mod session;
pub mod summarizer;

#[cfg(test)]
pub(crate) mod testing;

pub use comparison::{ComparisonResult, Savings};
pub use engine::{Engine, SendOutcome, StatsReport};
pub use harness::TestReport;
pub use invoke::{Completion, InvokeParams, LlmClient, YandexGptClient};
pub use session::{SessionHandle, SessionRegistry};
