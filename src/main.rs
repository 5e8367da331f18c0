use std::sync::Arc;

use anyhow::{Context, anyhow};
use persona_budget::{
    cli::config_path_from_args,
    config::Config,
    cycle::{CycleRequest, CycleStores, run_allocation_cycle},
    engine::AllocationEngine,
    logging::init_tracing,
    store::JsonFileStore,
};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path_from_args()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let logging_guard = init_tracing(&config.logging)?;

    let engine = Arc::new(
        AllocationEngine::new(&config.engine).context("failed to build allocation engine")?,
    );
    let stores = CycleStores::shared(Arc::new(JsonFileStore::new(
        config.store.state_dir.clone(),
    )));

    tracing::info!(
        target: "cycle",
        run_id = %logging_guard.run_id(),
        campaigns = config.cycle.campaign_ids.len(),
        worker_threads = engine.worker_threads(),
        state_dir = %config.store.state_dir.display(),
        "allocation_run_started"
    );

    let as_of = OffsetDateTime::now_utc();
    let mut failed = 0usize;
    for campaign_id in &config.cycle.campaign_ids {
        let parameters = config.allocation.parameters_for(campaign_id)?;
        let request = CycleRequest::new(campaign_id.clone(), as_of)
            .force_initial(config.cycle.force_initial)
            .with_parameters(parameters);
        if let Err(err) = run_allocation_cycle(engine.clone(), &stores, request).await {
            failed += 1;
            tracing::error!(
                target: "cycle",
                campaign_id = %campaign_id,
                error = %format!("{err:#}"),
                "allocation_cycle_failed"
            );
        }
    }

    if failed > 0 {
        return Err(anyhow!(
            "{failed} of {} allocation cycles failed",
            config.cycle.campaign_ids.len()
        ));
    }
    Ok(())
}
