use clap::Parser;
use order_relay::config::cli::{Cli, Command};
use order_relay::core::parser::{parse_line, parse_raw_orders};
use order_relay::domain::ports::OrderStore;
use order_relay::providers::{build_http_client, build_notifier, PanelClient};
use order_relay::utils::error::{ErrorSeverity, RelayError, Result};
use order_relay::utils::{logger, validation::Validate};
use order_relay::{
    AppConfig, LocalStorage, OrderProcessor, PaymentAssessment, ProviderRegistry,
    SharedServiceIndex, WebhookPayload,
};
use serde::Serialize;
use tokio::io::AsyncReadExt;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ParsedView<'a> {
    line: &'a order_relay::ParsedLine,
    assessment: PaymentAssessment,
}

fn build_processor(config: &AppConfig) -> Result<OrderProcessor> {
    let http = build_http_client(config.http.timeout())?;
    let providers = ProviderRegistry::from_config(config, &http);
    let notifier = build_notifier(config, &http);
    Ok(OrderProcessor::new(
        SharedServiceIndex::default(),
        providers,
        notifier,
    ))
}

async fn read_payload(source: &str) -> Result<WebhookPayload> {
    let content = if source == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(source).await?
    };
    Ok(serde_json::from_str(&content)?)
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    config.validate()?;
    let storage = LocalStorage::new(cli.data_dir.clone());

    match cli.command {
        Command::Parse {
            text,
            quantity,
            paid,
            raw,
        } => {
            let lines = if raw {
                parse_raw_orders(&text)
            } else {
                vec![parse_line(&text, quantity, paid).map_err(|e| RelayError::PayloadError {
                    message: e.to_string(),
                })?]
            };
            let views = lines
                .iter()
                .map(|line| {
                    Ok(ParsedView {
                        line,
                        assessment: PaymentAssessment::evaluate(line).map_err(|e| {
                            RelayError::PayloadError {
                                message: e.to_string(),
                            }
                        })?,
                    })
                })
                .collect::<Result<Vec<ParsedView>>>()?;
            print_json(&views)?;
        }
        Command::ImportIndex { csv } => {
            let processor = build_processor(&config)?;
            let report = processor.import_index(&storage, &csv).await?;
            println!(
                "✅ {} services imported ({} duplicates, {} invalid rows skipped)",
                report.accepted,
                report.duplicates(),
                report.invalid()
            );
        }
        Command::Resolve { service_name } => {
            let processor = build_processor(&config)?;
            processor.load_index(&storage).await?;
            print_json(&processor.index().resolve(&service_name))?;
        }
        Command::Process { payload } => {
            let payload = read_payload(&payload).await?;
            let processor = build_processor(&config)?;
            processor.load_index(&storage).await?;
            match processor.process_webhook(&storage, &payload).await? {
                Some(report) => print_json(&report)?,
                None => println!("Test webhook acknowledged"),
            }
        }
        Command::Report { order_id } => match storage.load_report(&order_id).await? {
            Some(report) => print_json(&report)?,
            None => {
                return Err(RelayError::PayloadError {
                    message: format!("no report stored for order {}", order_id),
                })
            }
        },
        Command::Balance { provider } => {
            let http = build_http_client(config.http.timeout())?;
            let client = PanelClient::from_config(&config, provider, http)?;
            print_json(&client.balance().await?)?;
        }
        Command::Status {
            provider,
            order_ids,
        } => {
            let http = build_http_client(config.http.timeout())?;
            let client = PanelClient::from_config(&config, provider, http)?;
            if let [order_id] = order_ids.as_slice() {
                print_json(&client.status(order_id).await?)?;
            } else {
                print_json(&client.multi_status(&order_ids).await?)?;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    if cli.verbose {
        tracing::debug!("CLI args: {:?}", cli);
    }

    if let Err(e) = run(cli).await {
        tracing::error!(
            "❌ order-relay failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}
