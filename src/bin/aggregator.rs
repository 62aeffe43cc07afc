use thermofleet::actuator::{Actuator, LogActuator, SysfsGpioActuator};
use thermofleet::clock::MonotonicClock;
use thermofleet::config::{AggregatorConfig, IndicatorConfig};
use thermofleet::transport::{connect_with_retry, Transport};
use thermofleet::Aggregator;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match AggregatorConfig::load_or_default() {
        Ok(config) => config,
        Err(e) => {
            // No subscriber yet, so report on stderr directly
            eprintln!("❌ Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(config.logging.max_level()?)
        .init();

    println!("🌡️  Fleet Temperature Aggregator");
    println!("================================");
    config.log_summary();

    let actuator: Box<dyn Actuator> = match &config.indicator {
        IndicatorConfig::Log => Box::new(LogActuator::new()),
        IndicatorConfig::Gpio { pin, sysfs_root } => {
            match SysfsGpioActuator::with_root(sysfs_root, *pin) {
                Ok(gpio) => Box::new(gpio),
                Err(e) => {
                    error!("❌ Failed to configure GPIO {}: {}", pin, e);
                    return Err(e.into());
                }
            }
        }
    };

    let mut transport = match connect_with_retry(&config.transport).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("❌ Could not reach broker {}: {}", config.transport.broker, e);
            return Err(e.into());
        }
    };
    if let Err(e) = transport.subscribe(&config.transport.topic) {
        error!("❌ Subscription to {} failed: {}", config.transport.topic, e);
        return Err(e.into());
    }
    info!("Listening for messages on: {}", config.transport.topic);

    let mut aggregator = Aggregator::new(
        transport,
        actuator,
        MonotonicClock::new(),
        config.aggregation.clone(),
    );
    aggregator.run().await;

    Ok(())
}
