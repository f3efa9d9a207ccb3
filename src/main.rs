use anyhow::{anyhow, Context};
use eel::app::{AppOptions, EelApp};
use eel::config::EelConfig;
use eel::context::EventContext;
use eel::engine::Engine;
use eel::handler::HandlerRegistry;
use eel::ingress::{self, ProcessMode};
use eel::jdoc::JDoc;
use eel::telemetry;
use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

enum CliCommand {
    Run {
        config_path: Option<String>,
        options: AppOptions,
    },
    Transform {
        config_path: Option<String>,
        handlers: Vec<String>,
        event: String,
        tenant: String,
    },
    Validate {
        dirs: Vec<String>,
    },
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    match parse_cli_args(std::env::args().skip(1))? {
        CliCommand::Run {
            config_path,
            options,
        } => {
            let config =
                EelConfig::load(config_path.as_deref()).context("failed to load configuration")?;
            let app = EelApp::initialise(config, options).context("failed to construct application")?;
            app.run().await.context("application runtime error")?;
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Transform {
            config_path,
            handlers,
            event,
            tenant,
        } => run_transform_command(config_path, handlers, &event, tenant).await,
        CliCommand::Validate { dirs } => run_validate_command(&dirs),
        CliCommand::Help => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut config_path = None;
    let mut options = AppOptions::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "transform" => return parse_transform_args(args, config_path),
            "validate" => return parse_validate_args(args),
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("expected path after {arg}"))?;
                config_path = Some(value);
            }
            "--stdin" => options.stdin = true,
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run {
        config_path,
        options,
    })
}

fn parse_transform_args<I>(args: I, config_path: Option<String>) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut handlers = Vec::new();
    let mut event = None;
    let mut tenant = String::new();

    while let Some(arg) = args.next() {
        let mut value = || {
            args.next()
                .ok_or_else(|| anyhow!("expected value after {arg}"))
        };
        match arg.as_str() {
            "--handlers" => handlers.push(value()?),
            "--event" => event = Some(value()?),
            "--tenant" => tenant = value()?,
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised transform argument `{other}`"),
        }
    }

    if handlers.is_empty() {
        anyhow::bail!("eel transform requires --handlers <DIR>");
    }
    let event = event.ok_or_else(|| anyhow!("eel transform requires --event <FILE|->"))?;
    Ok(CliCommand::Transform {
        config_path,
        handlers,
        event,
        tenant,
    })
}

fn parse_validate_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut dirs = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::Help),
            _ => dirs.push(arg),
        }
    }
    if dirs.is_empty() {
        anyhow::bail!("eel validate requires at least one handler directory");
    }
    Ok(CliCommand::Validate { dirs })
}

fn print_help() {
    println!(
        "\
Usage: eel [OPTIONS]
       eel transform --handlers <DIR> --event <FILE|-> [--tenant <ID>]
       eel validate <DIR>...

Options:
  -c, --config <PATH>    Path to the eel configuration file
      --stdin            Read one event per line from standard input
  -h, --help             Print this help message

Transform:
      --handlers <DIR>   Handler directory (repeatable)
      --event <FILE|->   Event JSON file, or - for standard input
      --tenant <ID>      Tenant whose handlers apply (default: all)
"
    );
}

fn read_event(source: &str) -> anyhow::Result<Vec<u8>> {
    if source == "-" {
        let mut raw = Vec::new();
        std::io::stdin()
            .read_to_end(&mut raw)
            .context("failed to read event from stdin")?;
        return Ok(raw);
    }
    std::fs::read(source).with_context(|| format!("failed to read event file {source}"))
}

async fn run_transform_command(
    config_path: Option<String>,
    handlers: Vec<String>,
    event: &str,
    tenant: String,
) -> anyhow::Result<ExitCode> {
    let mut config =
        EelConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    config.handler_dirs = handlers;
    let registry = HandlerRegistry::load(&config.handler_dirs)
        .context("failed to load handler configurations")?;
    let engine = Arc::new(Engine::new(config, registry).context("failed to construct engine")?);

    let raw = read_event(event)?;
    let event = JDoc::from_bytes(&raw).context("event is not valid JSON")?;
    let ctx = EventContext::new(engine, tenant).with_debug(true);
    let report = ingress::process_event(ctx, event, ProcessMode::Preview)
        .await
        .context("transformation failed")?;

    for payload in report.payloads() {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }
    for error in &report.errors {
        eprintln!("{error}");
    }
    Ok(if report.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_validate_command(dirs: &[String]) -> anyhow::Result<ExitCode> {
    let registry = HandlerRegistry::load(dirs).context("failed to load handler configurations")?;
    for warning in registry.warnings() {
        eprintln!("{warning}");
    }
    println!(
        "validated {} handler(s) across {} tenant(s)",
        registry.len(),
        registry.tenants().count()
    );
    Ok(if registry.warnings().is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
