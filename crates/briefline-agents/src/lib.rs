//! Briefline agents: the three LLM-backed stages and the graph that runs them.

mod agent;
pub mod analyst;
pub mod researcher;
mod stage;
pub mod summarizer;
pub mod tasks;
#[cfg(test)]
mod testing;
mod workflow;

pub use agent::AssistantAgent;
pub use analyst::{build_analysis_agent, run_analysis};
pub use researcher::{build_research_agent, run_research};
pub use stage::{StageOutput, StageReport};
pub use summarizer::{build_summary_agent, run_summary};
pub use workflow::{Pipeline, PipelineReport};
