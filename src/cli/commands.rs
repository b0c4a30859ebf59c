use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use console::style;

use super::{RunCommandArgs, ServeArgs};
use crate::config::AppConfig;
use crate::core::generator::build_generator;
use crate::core::pipeline::PipelineSettings;
use crate::core::progress::{ProgressHub, RunEvent};
use crate::core::service::{ForgeService, RunRequest};
use crate::core::store::SqliteStore;
use crate::core::terminal::{
    self, print_error, print_info, print_link, print_status, print_step, print_success, print_warn,
};
use crate::interfaces::web::{self, AppState};
use crate::logging;

async fn build_service(config: &AppConfig) -> Result<Arc<ForgeService>> {
    let db_path = config.database_path()?;
    let store = SqliteStore::open(&db_path).await?;
    let generator = build_generator(&config.generator)?;
    Ok(Arc::new(ForgeService::new(
        generator,
        Arc::new(store),
        Arc::new(ProgressHub::new()),
        PipelineSettings::from(config),
    )))
}

pub(super) async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref()).await?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let log_tx = logging::init(&config.logging.level, false);
    let service = build_service(&config).await?;

    terminal::print_banner();
    print_link(
        "API",
        &format!("http://{}:{}", config.server.host, config.server.port),
    );
    print_status("Database", &config.database_path()?.display().to_string());
    print_status("Generator", &config.generator.provider);
    println!();

    let state = AppState {
        service,
        log_tx,
        port: config.server.port,
    };
    tokio::select! {
        result = web::serve(state, &config.server.host) => result,
        _ = tokio::signal::ctrl_c() => {
            terminal::print_goodbye();
            Ok(())
        }
    }
}

pub(super) async fn run(args: RunCommandArgs) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref()).await?;
    logging::init(&config.logging.level, true);
    let service = build_service(&config).await?;

    // Create runs get their id here so the channel can be followed from the
    // first event.
    let project_id = match args.project {
        Some(id) => id,
        None => uuid::Uuid::new_v4().to_string(),
    };
    // Only this run's events: everything logged so far belongs to earlier runs.
    let after = service.store().last_message_seq(&project_id).await?;
    let request = RunRequest::new(args.mode, &args.prompt).for_project(&project_id);

    print_step(&format!("{} run for project {}", args.mode.as_str(), project_id));
    service.start_run(request).map_err(|e| anyhow!("{}", e))?;
    let Some(mut subscription) = service.subscribe(&project_id, after).await? else {
        bail!("Progress for project {} is unavailable", project_id);
    };

    let mut end = None;
    while let Some(event) = subscription.next().await {
        terminal::print_event(&event);
        if event.event.is_terminal() {
            end = Some(event.event);
            break;
        }
    }

    match end {
        Some(RunEvent::Complete { .. }) => match service.store().latest_version(&project_id).await? {
            Some(latest) => print_success(&format!(
                "Project {} is at version {}",
                project_id, latest.version
            )),
            None => print_success(&format!("Project {} is unchanged", project_id)),
        },
        Some(RunEvent::Error { step, error }) => {
            print_error(&format!("Run failed at {}: {}", step, error))
        }
        _ => print_warn("Progress stream closed before the run finished."),
    }
    Ok(())
}

pub(super) async fn versions(project_id: &str, config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config_path).await?;
    logging::init(&config.logging.level, true);
    let service = build_service(&config).await?;

    let versions = service.store().list_versions(project_id).await?;
    if versions.is_empty() {
        print_warn(&format!("Project {} has no versions.", project_id));
        return Ok(());
    }
    for info in versions {
        println!(
            "  {} {}  {} pages, {} entities",
            style(format!("v{:<4}", info.version)).bold().cyan(),
            style(&info.created_at).dim(),
            info.page_count,
            info.entity_count
        );
    }
    Ok(())
}

pub(super) async fn show(project_id: &str, version: Option<u64>, config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config_path).await?;
    logging::init(&config.logging.level, true);
    let service = build_service(&config).await?;

    match service.snapshot(project_id, version).await? {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        None => match version {
            Some(v) => print_warn(&format!("Project {} has no version {}.", project_id, v)),
            None => print_warn(&format!("Project {} has no versions.", project_id)),
        },
    }
    Ok(())
}

pub(super) async fn rollback(project_id: &str, version: u64, config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config_path).await?;
    logging::init(&config.logging.level, true);
    let service = build_service(&config).await?;

    print_info(&format!("Rolling {} back to v{}", project_id, version));
    let committed = service
        .rollback(project_id, version)
        .await
        .map_err(|e| anyhow!("{}", e))?;
    print_success(&format!(
        "Project {} is now at v{} (copy of v{})",
        project_id, committed.version, version
    ));
    Ok(())
}
