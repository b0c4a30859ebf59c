use serde::{Deserialize, Serialize};

/// Whether a run builds a project from scratch or edits its latest version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Create,
    Edit,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Create => "create",
            RunMode::Edit => "edit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "create" | "new" => Some(RunMode::Create),
            "edit" | "update" => Some(RunMode::Edit),
            _ => None,
        }
    }

    /// The working steps of this mode, in order. `Complete` follows the last.
    pub fn steps(self) -> &'static [Step] {
        match self {
            RunMode::Create => &[
                Step::AnalyzeIntent,
                Step::GenerateUseCases,
                Step::GeneratePageConfig,
                Step::GenerateMockData,
                Step::WriteOutput,
            ],
            RunMode::Edit => &[
                Step::DetectEditIntent,
                Step::LoadCurrentState,
                Step::ApplyPatch,
                Step::RegenerateDataIfNeeded,
                Step::SaveOutput,
            ],
        }
    }

    pub fn first_step(self) -> Step {
        self.steps()[0]
    }

    /// The fixed successor of `step` in this mode. Terminal steps and steps
    /// of the other mode have none.
    pub fn successor(self, step: Step) -> Option<Step> {
        let steps = self.steps();
        let position = steps.iter().position(|s| *s == step)?;
        Some(steps.get(position + 1).copied().unwrap_or(Step::Complete))
    }

    /// The transition table: a step may move to its successor or to `Error`.
    pub fn can_transition(self, from: Step, to: Step) -> bool {
        if from.is_terminal() {
            return false;
        }
        if !self.steps().contains(&from) {
            return false;
        }
        to == Step::Error || self.successor(from) == Some(to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    AnalyzeIntent,
    GenerateUseCases,
    GeneratePageConfig,
    GenerateMockData,
    WriteOutput,
    DetectEditIntent,
    LoadCurrentState,
    ApplyPatch,
    RegenerateDataIfNeeded,
    SaveOutput,
    Complete,
    Error,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::AnalyzeIntent => "analyze_intent",
            Step::GenerateUseCases => "generate_use_cases",
            Step::GeneratePageConfig => "generate_page_config",
            Step::GenerateMockData => "generate_mock_data",
            Step::WriteOutput => "write_output",
            Step::DetectEditIntent => "detect_edit_intent",
            Step::LoadCurrentState => "load_current_state",
            Step::ApplyPatch => "apply_patch",
            Step::RegenerateDataIfNeeded => "regenerate_data_if_needed",
            Step::SaveOutput => "save_output",
            Step::Complete => "complete",
            Step::Error => "error",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "analyze_intent" => Some(Step::AnalyzeIntent),
            "generate_use_cases" => Some(Step::GenerateUseCases),
            "generate_page_config" => Some(Step::GeneratePageConfig),
            "generate_mock_data" => Some(Step::GenerateMockData),
            "write_output" => Some(Step::WriteOutput),
            "detect_edit_intent" => Some(Step::DetectEditIntent),
            "load_current_state" => Some(Step::LoadCurrentState),
            "apply_patch" => Some(Step::ApplyPatch),
            "regenerate_data_if_needed" => Some(Step::RegenerateDataIfNeeded),
            "save_output" => Some(Step::SaveOutput),
            "complete" => Some(Step::Complete),
            "error" => Some(Step::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Step::Complete | Step::Error)
    }

    /// Human-readable text for the `status` event sent on entry.
    pub fn status_message(self) -> &'static str {
        match self {
            Step::AnalyzeIntent => "Analyzing your request...",
            Step::GenerateUseCases => "Working out entities and pages...",
            Step::GeneratePageConfig => "Designing the page layout...",
            Step::GenerateMockData => "Generating sample data...",
            Step::WriteOutput => "Saving the application...",
            Step::DetectEditIntent => "Understanding the requested change...",
            Step::LoadCurrentState => "Loading the current configuration...",
            Step::ApplyPatch => "Applying the change...",
            Step::RegenerateDataIfNeeded => "Updating sample data...",
            Step::SaveOutput => "Saving the updated application...",
            Step::Complete => "Done",
            Step::Error => "Failed",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
