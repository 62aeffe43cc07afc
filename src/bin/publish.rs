use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::Duration;
use thermofleet::codec::{self, PublisherId, TemperatureMessage};
use thermofleet::config::{TransportConfig, DEFAULT_BROKER, DEFAULT_TOPIC};
use thermofleet::transport::connect_with_retry;

fn reading_args<'a, 'b>(command: App<'a, 'b>) -> App<'a, 'b> {
    command
        .arg(
            Arg::with_name("id")
                .long("id")
                .value_name("ID")
                .help("Publisher identifier (1-32 bytes)")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("temp")
                .long("temp")
                .value_name("CELSIUS")
                .help("Temperature reading in °C")
                .takes_value(true)
                .required(true)
                .allow_hyphen_values(true)
                .validator(|v| match v.parse::<f32>() {
                    Ok(t) if t.is_finite() => Ok(()),
                    _ => Err("Temperature must be a finite number".into()),
                }),
        )
        .arg(
            Arg::with_name("time")
                .long("time")
                .value_name("SECONDS")
                .help("Optional sender timestamp in seconds")
                .takes_value(true)
                .validator(|v| match v.parse::<u32>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Timestamp must fit in 32 bits".into()),
                }),
        )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("thermofleet-publish")
        .version("0.1.0")
        .author("thermofleet contributors")
        .about("🌡️  Publish and inspect fleet temperature messages")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            reading_args(
                SubCommand::with_name("send")
                    .about("📡 Encode a reading and publish it to the broker")
                    .arg(
                        Arg::with_name("broker")
                            .short("b")
                            .long("broker")
                            .value_name("HOST:PORT")
                            .help("MQTT broker address")
                            .takes_value(true)
                            .default_value(DEFAULT_BROKER),
                    )
                    .arg(
                        Arg::with_name("topic")
                            .short("t")
                            .long("topic")
                            .value_name("TOPIC")
                            .help("Topic to publish on")
                            .takes_value(true)
                            .default_value(DEFAULT_TOPIC),
                    )
                    .arg(
                        Arg::with_name("count")
                            .short("n")
                            .long("count")
                            .value_name("N")
                            .help("Number of messages to publish")
                            .takes_value(true)
                            .default_value("1")
                            .validator(|v| match v.parse::<u32>() {
                                Ok(n) if n > 0 => Ok(()),
                                _ => Err("Count must be a positive integer".into()),
                            }),
                    )
                    .arg(
                        Arg::with_name("interval")
                            .long("interval-ms")
                            .value_name("MS")
                            .help("Delay between messages")
                            .takes_value(true)
                            .default_value("1000")
                            .validator(|v| match v.parse::<u64>() {
                                Ok(_) => Ok(()),
                                Err(_) => Err("Interval must be a number of milliseconds".into()),
                            }),
                    ),
            ),
        )
        .subcommand(reading_args(
            SubCommand::with_name("encode").about("🔢 Print the wire encoding of a reading as hex"),
        ))
        .subcommand(
            SubCommand::with_name("decode")
                .about("🔍 Decode a hex-encoded message")
                .arg(
                    Arg::with_name("hex")
                        .help("Message bytes as hex")
                        .required(true),
                ),
        )
        .get_matches();

    let verbose = matches.is_present("verbose");

    match matches.subcommand() {
        ("send", Some(sub_matches)) => handle_send(sub_matches, verbose).await?,
        ("encode", Some(sub_matches)) => handle_encode(sub_matches)?,
        ("decode", Some(sub_matches)) => handle_decode(sub_matches),
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
        }
    }

    Ok(())
}

fn message_from_args(matches: &ArgMatches<'_>) -> Result<TemperatureMessage, Box<dyn std::error::Error>> {
    let id = PublisherId::new(matches.value_of("id").unwrap_or_default())?;
    let temperature = matches.value_of("temp").unwrap_or_default().parse::<f32>()?;
    let mut message = TemperatureMessage::new(id, temperature);
    if let Some(time) = matches.value_of("time") {
        message = message.with_sender_time(time.parse::<u32>()?);
    }
    Ok(message)
}

async fn handle_send(matches: &ArgMatches<'_>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let message = message_from_args(matches)?;
    let payload = codec::encode(&message)?;
    let count = matches.value_of("count").unwrap_or("1").parse::<u32>()?;
    let interval = Duration::from_millis(matches.value_of("interval").unwrap_or("1000").parse::<u64>()?);
    let topic = matches.value_of("topic").unwrap_or(DEFAULT_TOPIC);

    let config = TransportConfig {
        broker: matches.value_of("broker").unwrap_or(DEFAULT_BROKER).to_string(),
        client_id: format!("publisher-{}", message.id),
        topic: topic.to_string(),
        ..TransportConfig::default()
    };

    if verbose {
        println!("{} {}", "Connecting to".dimmed(), config.broker.bright_white());
    }
    let transport = match connect_with_retry(&config).await {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("{} Failed to connect to broker at {}: {}", "❌".red(), config.broker.bright_white(), e);
            return Err(e.into());
        }
    };

    for sent in 1..=count {
        transport.publish(topic, &payload).await?;
        println!(
            "{} {} {:.2}°C {} {} ({}/{})",
            "📡".bright_blue(),
            message.id.to_string().bright_white(),
            message.temperature,
            "->".dimmed(),
            topic.bright_cyan(),
            sent,
            count
        );
        if sent < count {
            tokio::time::sleep(interval).await;
        }
    }

    transport.disconnect().await?;
    Ok(())
}

fn handle_encode(matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let message = message_from_args(matches)?;
    let payload = codec::encode(&message)?;
    println!("{}", hex::encode(&payload).bright_green());
    Ok(())
}

fn handle_decode(matches: &ArgMatches<'_>) {
    let input = matches.value_of("hex").unwrap_or_default();
    let bytes = match hex::decode(input.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("{} Not valid hex: {}", "❌".red(), e.to_string().bright_red());
            return;
        }
    };

    match codec::decode(&bytes) {
        Ok(message) => {
            println!("{} {}", "✅".green(), "Valid message".bright_green());
            println!("{} {}", "Publisher:".bright_white(), message.id.to_string().bright_cyan());
            println!("{} {:.2}°C", "Temperature:".bright_white(), message.temperature);
            match message.sender_time {
                Some(time) => println!("{} {}s", "Sender time:".bright_white(), time),
                None => println!("{} {}", "Sender time:".bright_white(), "absent".dimmed()),
            }
        }
        Err(e) => println!("{} {} {}", "❌".red(), "Malformed message:".bright_red(), e),
    }
}
