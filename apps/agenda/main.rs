use anyhow::{Context, Result};
use dao_agenda::{
    events::{GovernanceEvents, committee_filter},
    metadata::MetadataClient,
    service::AgendaService,
    settings::AgendaSettings,
    source::AgendaSource,
};
use dao_rpc::{
    ChainClient, ClientFactory, EndpointRegistry, PaginationController, RpcConfig, RpcStack,
    SharedChainClient, watch_contract_event_from,
};
use dotenv::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utils::tracing::run_with_tracing;

const EVENT_BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    run_with_tracing(run).await
}

async fn run() -> Result<()> {
    let settings = AgendaSettings::from_env()?;
    let config = RpcConfig::from_env().context("Invalid RPC configuration")?;
    let registry = EndpointRegistry::from_env(settings.chain_id);
    info!(
        network = %settings.network,
        chain_id = settings.chain_id,
        "Starting agenda service"
    );

    let factory = ClientFactory::alloy(registry, &config);
    let client = SharedChainClient::new(factory, Some(settings.chain_id))
        .get()
        .await
        .context("No usable RPC endpoint")?;
    let stack = RpcStack::new(client.clone(), &config)?;

    let _progress = stack.pool.subscribe_progress(|progress| {
        debug!(
            completed = progress.completed,
            failed = progress.failed,
            percentage = progress.percentage,
            "RPC progress"
        )
    });

    let metadata = if settings.metadata_enabled {
        Some(MetadataClient::new(&settings.metadata_base_url, settings.network.clone())?)
    } else {
        None
    };
    let source = Arc::new(AgendaSource::new(
        stack.batcher.clone(),
        settings.agenda_manager,
        metadata,
    ));
    let controller = PaginationController::from_config(source, &config).on_batch_loaded(|batch| {
        info!(
            page = batch.page,
            target_page = batch.target_page,
            loaded = batch.items.len(),
            total_loaded = batch.total_loaded,
            "Agendas loaded"
        )
    });

    // Logs from this block on are replayed, so nothing emitted during the
    // initial load is missed.
    let head = client
        .block_number()
        .await
        .context("Failed to read the current block")?;
    let service = Arc::new(AgendaService::new(
        Arc::new(controller),
        stack.batcher.clone(),
        settings.committee,
    ));
    service.start(settings.initial_pages).await?;
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    for agenda in service.agendas() {
        info!(
            id = agenda.id,
            title = %agenda.title(),
            phase = %agenda.phase(now),
            "Agenda"
        );
    }

    let events = GovernanceEvents::new(EVENT_BUS_CAPACITY);
    let cancel = CancellationToken::new();
    let service_handle = tokio::spawn(service.clone().run(events.subscribe(), cancel.clone()));

    let bus = events.clone();
    let watcher = watch_contract_event_from(
        client,
        committee_filter(settings.committee),
        Some(head + 1),
        settings.poll_interval,
        move |logs| {
            let recognised = bus.publish_logs(&logs);
            debug!(logs = logs.len(), recognised, "Committee logs received");
        },
        |e| warn!(error = %e, "Committee log poll failed"),
    );

    info!("Agenda service running");
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully");

    watcher.unsubscribe();
    cancel.cancel();
    if let Err(e) = service_handle.await {
        error!(error = %e, "Agenda service task failed");
    }
    Ok(())
}
