use light_measure::{
    create_light_controller, create_power_meter, resolve_answers, MeasureConfig, Measurer,
    TerminalPrompter,
};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, env_file) = MeasureConfig::from_env()?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level.as_tracing_level())
        .init();
    match env_file {
        Some(path) => info!("Loaded environment file {}", path.display()),
        None => debug!("No .env file found, using process environment"),
    }

    info!(
        "Starting light measure (power meter: {}, light controller: {:?})",
        config.power_meter, config.light_controller
    );

    let answers = resolve_answers(&config, &mut TerminalPrompter)?;
    let meter = create_power_meter(&config, &answers)?;
    let controller = create_light_controller(&config, &answers)?;

    let mut measurer = Measurer::new(
        config,
        answers,
        meter,
        controller,
        Box::new(TerminalPrompter),
    );
    let summary = measurer.run().await?;

    info!(
        "Done. Standby power {}W, {} rows written ({} resumed) to {}",
        summary.standby_power,
        summary.rows_written,
        summary.rows_skipped,
        summary.output_path.display()
    );
    if let Some(model_json) = summary.model_json {
        info!("Model description written to {}", model_json.display());
    }
    Ok(())
}
