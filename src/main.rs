use std::path::PathBuf;
use std::sync::Arc;

use bulk_issuance_lib::commands::{
    cancel_bulk_issuance, run_bulk_issuance, BulkIssuanceRequest, CsvSource,
};
use bulk_issuance_lib::config::ServiceConfig;
use bulk_issuance_lib::model::{CredentialTemplate, IssuerIdentity};
use bulk_issuance_lib::pipeline::{ProgressEmitter, ProgressEvent};
use bulk_issuance_lib::services::{BackendClient, HttpIssuanceService, HttpRecipientDirectory};
use bulk_issuance_lib::state::AppState;
use bulk_issuance_lib::storage::Database;
use bulk_issuance_lib::telemetry::init_tracing;
use bulk_issuance_lib::AppError;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

const USAGE: &str =
    "usage: bulk-issuance <csv-path> <issuer-id> <issuer-name> <credential-title> [credential-type]";

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 4 {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }

    if let Err(e) = run(config, args).await {
        let presentation = e.to_presentation();
        error!("{}: {}", presentation.title, presentation.message);
        std::process::exit(1);
    }
}

async fn run(config: ServiceConfig, args: Vec<String>) -> Result<(), AppError> {
    let pipeline = config.pipeline_config()?;
    let client = BackendClient::new(
        &config.backend_url,
        config.backend_token(),
        config.request_timeout(),
    )?
    .with_logging_mode(config.logging_mode());
    let db = Database::init(config.database_path()).await?;

    let state = Arc::new(AppState::new(
        db,
        Arc::new(HttpRecipientDirectory::new(client.clone())),
        Arc::new(HttpIssuanceService::new(client)),
        pipeline,
        config.report_dir(),
    ));

    let template = CredentialTemplate::new(
        args[3].clone(),
        args.get(4).cloned().unwrap_or_else(|| "certificate".to_string()),
    );
    let run_id = Uuid::new_v4().to_string();
    let request = BulkIssuanceRequest {
        source: CsvSource::Path(PathBuf::from(&args[0])),
        template,
        issuer: IssuerIdentity {
            id: args[1].clone(),
            name: args[2].clone(),
        },
        run_id: Some(run_id.clone()),
        report_dir: None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress_logger = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Resolution { processed, total } => {
                    info!("Resolving recipients: {}/{}", processed, total)
                }
                ProgressEvent::Issuance {
                    processed,
                    total,
                    success_count,
                    failure_count,
                    estimated_remaining_seconds,
                } => info!(
                    "Issuing: {}/{} ({} ok, {} failed, ~{}s left)",
                    processed, total, success_count, failure_count, estimated_remaining_seconds
                ),
            }
        }
    });

    // Ctrl-C stops dispatching new chunks; in-flight calls still settle.
    let interrupt = {
        let state = Arc::clone(&state);
        let run_id = run_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling run {}", run_id);
                let _ = cancel_bulk_issuance(&state, &run_id).await;
            }
        })
    };

    let result = run_bulk_issuance(&state, request, ProgressEmitter::new(tx)).await;
    interrupt.abort();
    let _ = progress_logger.await;
    let result = result?;

    let output = serde_json::json!({
        "run_id": result.run_id,
        "ingest": result.ingest,
        "resolved": result.resolved,
        "unresolved": result.unresolved,
        "summary": result.summary,
        "artifacts": result.artifact_paths,
        "storage_error": result.storage_error,
        "export_error": result.export_error,
    });
    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|e| AppError::Internal(format!("Failed to render summary: {}", e)))?;
    println!("{}", rendered);

    if !result.is_complete() {
        return Err(AppError::Storage(format!(
            "Batch {} was issued but its report was not fully saved",
            result.summary.batch_id
        )));
    }
    Ok(())
}
