pub mod dispatcher;
pub mod governor;
pub mod handoff;
pub mod notifier;
pub mod output;
pub mod pipeline;
pub mod prompts;

pub use dispatcher::Dispatcher;
pub use governor::BudgetGovernor;
pub use notifier::{Notifier, NotifierConfig};
pub use pipeline::{FeaturePipeline, PipelineConfig, PipelineError};
