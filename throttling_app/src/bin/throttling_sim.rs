use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use throttling::ThrottlingProvider;
use throttling_app::config_loader;
use throttling_app::shutdown_handler;
use throttling_app::simulation;
use throttling_app::simulation::StatusHistogram;
use throttling_app::tracing_setup;
use tracing::info;

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config/simulation.toml".to_string());
    let config = config_loader::load_simulation_config_or_default(&config_path);

    let _guard = if config.simulation.log_to_stdout {
        tracing_setup::init_with_stdout("throttling_sim", "./logs", tracing::Level::INFO)
    } else {
        tracing_setup::init("throttling_sim", "./logs", tracing::Level::INFO)
    };

    info!(
        "Simulation config: clients={}, consumers={:?}, duration={}s, work={}..{}ms, deadline={:?}",
        config.simulation.concurrency,
        config.simulation.consumers,
        config.simulation.duration_secs,
        config.simulation.work_ms_min,
        config.simulation.work_ms_max,
        config.simulation.deadline()
    );
    info!(
        "Throttling essentials: enabled={}, capacity_limit={:?}, per_core={:?}, queue_limit={}, refresh={:?}",
        config.essentials.enabled,
        config.essentials.capacity_limit,
        config.essentials.capacity_limit_per_core,
        config.essentials.queue_limit,
        config.essentials.refresh_period
    );

    let running = Arc::new(AtomicBool::new(true));
    shutdown_handler::setup(Arc::clone(&running)).context("failed to install Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("failed to build tokio runtime")?;

    let histogram = Arc::new(StatusHistogram::new());
    let started = Instant::now();

    runtime.block_on(async {
        let provider = Arc::new(ThrottlingProvider::new(simulation::build_configuration(&config)));
        let settings = Arc::new(config.simulation.clone());

        let reporter = tokio::spawn(simulation::report_metrics(Arc::clone(&provider), settings.metrics_interval(), Arc::clone(&running)));

        let clients: Vec<_> = (0..settings.concurrency)
            .map(|client| {
                tokio::spawn(simulation::run_client(client, Arc::clone(&provider), Arc::clone(&settings), Arc::clone(&histogram), Arc::clone(&running)))
            })
            .collect();
        info!("Started {} simulated clients", clients.len());

        while running.load(Ordering::Relaxed) && started.elapsed() < settings.duration() {
            tokio::time::sleep(STOP_CHECK_INTERVAL).await;
        }
        running.store(false, Ordering::Relaxed);
        info!("Stopping simulated clients");

        for client in clients {
            client.await.context("simulated client panicked")?;
        }
        reporter.await.context("metrics reporter panicked")?;

        let info = provider.info()?;
        info!("Final state: {}", serde_json::to_string(&info)?);

        anyhow::Ok(())
    })?;

    let elapsed = started.elapsed();
    let total = histogram.total();
    info!("Simulation finished after {:.1}s, {} requests ({:.0} req/s)", elapsed.as_secs_f64(), total, total as f64 / elapsed.as_secs_f64().max(f64::EPSILON));
    info!("Status histogram: {}", serde_json::to_string(&histogram.snapshot())?);

    Ok(())
}
