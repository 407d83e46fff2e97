use serde::{Deserialize, Serialize};

/// The three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Collects raw findings with the search tools
    Research,
    /// Extracts key points and themes from the findings
    Analysis,
    /// Writes the final report
    Summary,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Research, StageKind::Analysis, StageKind::Summary];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Research => "research",
            StageKind::Analysis => "analysis",
            StageKind::Summary => "summary",
        }
    }

    /// Name of the agent that backs this stage.
    pub fn agent_name(&self) -> &'static str {
        match self {
            StageKind::Research => "research_agent",
            StageKind::Analysis => "analysis_agent",
            StageKind::Summary => "summary_agent",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
