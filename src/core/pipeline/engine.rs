use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::{RunMode, RunState, Step};
use crate::config::AppConfig;
use crate::core::coordinator::Coordinator;
use crate::core::error::RunError;
use crate::core::generator::{
    GenerationContext, GenerationError, GenerationTask, Generator, StructuredResult, layout,
};
use crate::core::mock_data::{MockDataSet, SynthOptions, Synthesizer, check_integrity};
use crate::core::patch;
use crate::core::progress::RunEvent;
use crate::core::runs::RunLease;
use crate::core::store::CommitBatch;
use crate::core::tree::{ConfigTree, validate_entities, validate_tree};

/// Knobs for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    pub synth: SynthOptions,
    pub seed: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 2,
            backoff: Duration::from_millis(500),
            synth: SynthOptions::default(),
            seed: None,
        }
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.generator.timeout_secs),
            max_retries: config.generator.max_retries,
            backoff: Duration::from_millis(config.generator.backoff_ms),
            synth: SynthOptions {
                min_records: config.mock_data.min_records,
                max_records: config.mock_data.max_records,
            },
            seed: config.mock_data.seed,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub project_id: String,
    /// `Complete`, or the step that failed.
    pub step: Step,
    pub version: Option<u64>,
    pub error: Option<RunError>,
    pub config: Option<ConfigTree>,
    pub mock_data: Option<MockDataSet>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A step's `state` payload and the writes that commit with it.
struct StepOutput {
    data: Value,
    writes: CommitBatch,
}

impl StepOutput {
    fn state(data: Value) -> Self {
        Self::with(data, CommitBatch::default())
    }

    fn with(data: Value, writes: CommitBatch) -> Self {
        Self { data, writes }
    }
}

/// The step graph. Runs one state at a time: status event, step body, then
/// one commit of the step's writes together with its checkpoint and state
/// event, then the successor.
pub struct Pipeline {
    generator: Arc<dyn Generator>,
    coordinator: Coordinator,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(generator: Arc<dyn Generator>, coordinator: Coordinator, settings: PipelineSettings) -> Self {
        Self {
            generator,
            coordinator,
            settings,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Drive one run to its end. The lease is held until the terminal event
    /// is logged and released before it is delivered, so a client reacting
    /// to it can start the next run at once.
    pub async fn run(&self, mut state: RunState, lease: RunLease) -> RunOutcome {
        let cancel = lease.token();
        let mode = state.mode;
        let project_id = state.project_id.clone();
        info!(
            "Run {} started: {} project {} via {}",
            state.run_id,
            mode.as_str(),
            project_id,
            self.generator.name()
        );

        let mut step = mode.first_step();
        loop {
            if cancel.is_cancelled() {
                return self.fail(state, lease, step, RunError::Cancelled).await;
            }
            state.step = step;

            if let Err(e) = self.coordinator.publish(&project_id, RunEvent::status(step)).await {
                return self.fail(state, lease, step, e).await;
            }
            debug!("Run {} entering {}", state.run_id, step);

            // The step works on a copy; a failed step's partial state is dropped
            // and none of its writes reach the store.
            let mut candidate = state.clone();
            let output = match self.execute(step, &mut candidate).await {
                Ok(output) => output,
                Err(e) => return self.fail(state, lease, step, e).await,
            };
            if let Err(e) = self
                .coordinator
                .commit_step(
                    &project_id,
                    &candidate.run_id,
                    step,
                    candidate.snapshot(),
                    output.writes,
                    output.data,
                )
                .await
            {
                return self.fail(state, lease, step, e).await;
            }
            state = candidate;

            let Some(next) = mode.successor(step) else {
                let e = RunError::Validation(format!("step {} has no successor", step));
                return self.fail(state, lease, step, e).await;
            };
            debug_assert!(mode.can_transition(step, next));
            if next == Step::Complete {
                return self.complete(state, lease).await;
            }
            step = next;
        }
    }

    async fn complete(&self, mut state: RunState, lease: RunLease) -> RunOutcome {
        state.step = Step::Complete;
        let config = state.config.clone().unwrap_or_default();
        let mock_data = state.mock_data.clone().unwrap_or_default();
        let message = match state.mode {
            RunMode::Create => "Application generated successfully".to_string(),
            RunMode::Edit => "Application updated successfully".to_string(),
        };
        let event = RunEvent::Complete {
            message,
            config: config.clone(),
            mock_data: mock_data.clone(),
        };
        if let Err(e) = self.coordinator.finish(&state.project_id, event, lease).await {
            error!("Run {} could not publish completion: {}", state.run_id, e);
            return RunOutcome {
                run_id: state.run_id,
                project_id: state.project_id,
                step: Step::Complete,
                version: state.version,
                error: Some(e),
                config: None,
                mock_data: None,
            };
        }
        info!(
            "Run {} complete: project {} at v{}",
            state.run_id,
            state.project_id,
            state.version.unwrap_or_default()
        );
        RunOutcome {
            run_id: state.run_id,
            project_id: state.project_id,
            step: Step::Complete,
            version: state.version,
            error: None,
            config: Some(config),
            mock_data: Some(mock_data),
        }
    }

    async fn fail(&self, state: RunState, lease: RunLease, step: Step, err: RunError) -> RunOutcome {
        match &err {
            RunError::Cancelled => warn!("Run {} cancelled before {}", state.run_id, step),
            _ => error!("Run {} failed at {}: {}", state.run_id, step, err),
        }
        let event = RunEvent::Error {
            step,
            error: err.to_string(),
        };
        if let Err(e) = self.coordinator.finish(&state.project_id, event, lease).await {
            warn!("Run {} error event was not logged: {}", state.run_id, e);
        }
        RunOutcome {
            run_id: state.run_id,
            project_id: state.project_id,
            step,
            version: state.version,
            error: Some(err),
            config: None,
            mock_data: None,
        }
    }

    async fn execute(&self, step: Step, state: &mut RunState) -> Result<StepOutput, RunError> {
        match step {
            Step::AnalyzeIntent => self.analyze_intent(state).await,
            Step::GenerateUseCases => self.generate_use_cases(state).await,
            Step::GeneratePageConfig => self.generate_page_config(state).await,
            Step::GenerateMockData => self.generate_mock_data(state).await,
            Step::WriteOutput | Step::SaveOutput => self.save_output(state).await,
            Step::DetectEditIntent => self.detect_edit_intent(state).await,
            Step::LoadCurrentState => self.load_current_state(state).await,
            Step::ApplyPatch => self.apply_patch(state).await,
            Step::RegenerateDataIfNeeded => self.regenerate_data(state).await,
            Step::Complete | Step::Error => Err(RunError::Validation(format!(
                "{} is terminal and cannot be executed",
                step
            ))),
        }
    }

    fn context<'a>(&self, task: GenerationTask, state: &'a RunState) -> GenerationContext<'a> {
        GenerationContext {
            task,
            instruction: &state.instruction,
            prior_messages: &state.prior_messages,
            app_name: state.app_name.as_deref(),
            use_case_summary: state.use_case_summary.as_deref(),
            entities: &state.entities,
            pages: &state.pages,
            current: state.source.as_ref(),
        }
    }

    /// One generator call under the deadline, retried with exponential
    /// backoff while the error is retryable.
    async fn generate(&self, ctx: &GenerationContext<'_>) -> Result<StructuredResult, RunError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(self.settings.timeout, self.generator.generate(ctx)).await
            {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(self.settings.timeout.as_secs())),
            };
            match result {
                Ok(structured) => return Ok(structured),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = self.settings.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Generator {} failed ({}), retry {}/{} in {:?}",
                        ctx.task.as_str(),
                        e,
                        attempt,
                        self.settings.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn analyze_intent(&self, state: &mut RunState) -> Result<StepOutput, RunError> {
        let intent = self
            .generate(&self.context(GenerationTask::AnalyzeIntent, state))
            .await?
            .into_intent()?;
        let app_name = if intent.app_name.trim().is_empty() {
            "My App".to_string()
        } else {
            intent.app_name.trim().to_string()
        };
        state.app_name = Some(app_name.clone());
        state.use_case_summary = Some(intent.use_case_summary.clone());
        Ok(StepOutput::state(json!({
            "appName": app_name,
            "useCaseSummary": intent.use_case_summary
        })))
    }

    async fn generate_use_cases(&self, state: &mut RunState) -> Result<StepOutput, RunError> {
        let plan = self
            .generate(&self.context(GenerationTask::UseCases, state))
            .await?
            .into_use_cases()?;
        validate_entities(&plan.entities)?;
        state.pages = if plan.pages.is_empty() {
            layout::default_page_specs(&plan.entities)
        } else {
            plan.pages
        };
        state.entities = plan.entities;
        Ok(StepOutput::state(json!({"entities": state.entities, "pages": state.pages})))
    }

    async fn generate_page_config(&self, state: &mut RunState) -> Result<StepOutput, RunError> {
        let mut tree = self
            .generate(&self.context(GenerationTask::PageConfig, state))
            .await?
            .into_page_config()?;
        tree.entities = state.entities.clone();
        if tree.navigation.title.trim().is_empty() {
            tree.navigation.title = state.app_name.clone().unwrap_or_default();
        }
        validate_tree(&tree)?;

        let next = self
            .coordinator
            .store()
            .latest_version(&state.project_id)
            .await
            .map_err(RunError::persistence)?
            .map(|v| v.version + 1)
            .unwrap_or(1);
        info!("Project {} v{} ready to commit", state.project_id, next);
        let data = json!({"version": next, "config": tree});
        state.version = Some(next);
        state.config = Some(tree.clone());
        Ok(StepOutput::with(
            data,
            CommitBatch {
                version: Some((next, tree)),
                ..CommitBatch::default()
            },
        ))
    }

    async fn generate_mock_data(&self, state: &mut RunState) -> Result<StepOutput, RunError> {
        let version = state
            .version
            .ok_or_else(|| RunError::Validation("no committed config to attach data to".into()))?;
        let mut synth = Synthesizer::new(self.settings.synth, self.settings.seed);
        let data = synth.generate(&state.entities);
        check_integrity(&state.entities, &data)?;

        let counts: serde_json::Map<String, Value> = data
            .0
            .iter()
            .map(|(resource, records)| (resource.clone(), json!(records.len())))
            .collect();
        state.mock_data = Some(data.clone());
        Ok(StepOutput::with(
            json!({"version": version, "records": counts}),
            CommitBatch {
                mock_data: Some((version, data)),
                ..CommitBatch::default()
            },
        ))
    }

    async fn save_output(&self, state: &mut RunState) -> Result<StepOutput, RunError> {
        let name = state
            .config
            .as_ref()
            .map(|c| c.navigation.title.clone())
            .filter(|t| !t.trim().is_empty())
            .or_else(|| state.app_name.clone())
            .unwrap_or_else(|| "My App".to_string());
        Ok(StepOutput::with(
            json!({"projectId": state.project_id, "version": state.version, "name": name}),
            CommitBatch {
                project_name: Some(name),
                ..CommitBatch::default()
            },
        ))
    }

    async fn detect_edit_intent(&self, state: &mut RunState) -> Result<StepOutput, RunError> {
        // The model needs the current tree to address paths; the basis for
        // the patch is loaded again in the next step.
        let current = self
            .coordinator
            .store()
            .latest_version(&state.project_id)
            .await
            .map_err(RunError::persistence)?;
        let mut view = state.clone();
        view.source = current.map(|v| v.tree);
        let op = self
            .generate(&self.context(GenerationTask::EditIntent, &view))
            .await?
            .into_edit()?;
        info!(
            "Run {} edit: {} {} at '{}'",
            state.run_id,
            op.operation.as_str(),
            op.target_type.as_str(),
            op.target_path
        );
        let data = json!({"edit": op});
        state.edit = Some(op);
        Ok(StepOutput::state(data))
    }

    async fn load_current_state(&self, state: &mut RunState) -> Result<StepOutput, RunError> {
        let store = self.coordinator.store();
        let latest = store
            .latest_version(&state.project_id)
            .await
            .map_err(RunError::persistence)?
            .ok_or_else(|| {
                RunError::Validation(format!("project '{}' has no committed version", state.project_id))
            })?;
        if let Some(base) = state.base_version
            && base != latest.version
        {
            return Err(RunError::Validation(format!(
                "edit was based on v{} but the latest version is v{}",
                base, latest.version
            )));
        }
        let data = store
            .mock_data(&state.project_id)
            .await
            .map_err(RunError::persistence)?
            .unwrap_or_default();

        state.source_version = Some(latest.version);
        state.entities = latest.tree.entities.clone();
        state.app_name = Some(latest.tree.navigation.title.clone());
        let summary = json!({
            "version": latest.version,
            "pages": latest.tree.pages.keys().collect::<Vec<_>>(),
            "entities": latest.tree.entities.iter().map(|e| &e.name).collect::<Vec<_>>(),
            "records": data.record_count(),
        });
        state.source = Some(latest.tree);
        state.source_data = Some(data);
        Ok(StepOutput::state(summary))
    }

    async fn apply_patch(&self, state: &mut RunState) -> Result<StepOutput, RunError> {
        let op = state
            .edit
            .as_ref()
            .ok_or_else(|| RunError::Validation("no edit operation to apply".into()))?;
        let source = state
            .source
            .as_ref()
            .ok_or_else(|| RunError::Validation("no current configuration loaded".into()))?;
        let base = state
            .source_version
            .ok_or_else(|| RunError::Validation("no base version to patch".into()))?;
        let outcome = patch::apply(source, op)?;

        let next = base + 1;
        info!(
            "Project {} v{} -> v{}: {}",
            state.project_id, base, next, outcome.summary.description
        );
        let data = json!({
            "version": next,
            "patch": outcome.summary,
            "dataImpact": outcome.data_impact,
        });
        state.version = Some(next);
        state.entities = outcome.tree.entities.clone();
        state.patch = Some(outcome.summary);
        state.data_impact = Some(outcome.data_impact);
        state.config = Some(outcome.tree.clone());
        Ok(StepOutput::with(
            data,
            CommitBatch {
                version: Some((next, outcome.tree)),
                ..CommitBatch::default()
            },
        ))
    }

    async fn regenerate_data(&self, state: &mut RunState) -> Result<StepOutput, RunError> {
        let version = state
            .version
            .ok_or_else(|| RunError::Validation("no committed config to attach data to".into()))?;
        let existing = state.source_data.clone().unwrap_or_default();
        let impact = state.data_impact.clone().unwrap_or_default();
        if impact.is_none() {
            state.mock_data = Some(existing);
            return Ok(StepOutput::state(json!({"changed": false})));
        }

        let before = state
            .source
            .as_ref()
            .map(|t| t.entities.clone())
            .unwrap_or_default();
        let after = state.entities.clone();
        let mut synth = Synthesizer::new(self.settings.synth, self.settings.seed);
        let (data, report) = synth.reconcile(&before, &after, &existing, &impact.regenerate);
        check_integrity(&after, &data)?;

        if !report.changed() && data == existing {
            state.mock_data = Some(existing);
            return Ok(StepOutput::state(json!({"changed": false})));
        }
        state.mock_data = Some(data.clone());
        Ok(StepOutput::with(
            json!({"changed": true, "version": version, "report": report}),
            CommitBatch {
                mock_data: Some((version, data)),
                ..CommitBatch::default()
            },
        ))
    }
}
