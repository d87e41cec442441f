use anyhow::Context;
use herald::app::HeraldApp;
use herald::app_state::ServiceRole;
use herald::config::HeraldConfig;
use herald::telemetry;

enum CliCommand {
    Run {
        role: ServiceRole,
        config_path: Option<String>,
    },
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    match parse_cli_args()? {
        CliCommand::Run { role, config_path } => {
            let config = HeraldConfig::load(config_path.as_deref())
                .context("failed to load configuration")?;

            let app = HeraldApp::initialise(config, role)
                .await
                .context("failed to construct application")?;

            app.run().await.context("application runtime error")
        }
        CliCommand::Help => {
            print_help();
            Ok(())
        }
    }
}

fn parse_cli_args() -> anyhow::Result<CliCommand> {
    let mut args = std::env::args().skip(1);
    let Some(first) = args.next() else {
        return Ok(CliCommand::Help);
    };

    let role = match first.as_str() {
        "producer" => ServiceRole::Producer,
        "consumer" => ServiceRole::Consumer,
        "-h" | "--help" => return Ok(CliCommand::Help),
        other => anyhow::bail!("unrecognised role `{other}` (expected `producer` or `consumer`)"),
    };

    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                config_path = Some(value);
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run { role, config_path })
}

fn print_help() {
    println!(
        "\
Usage: herald <ROLE> [OPTIONS]

Roles:
  producer               Serve health probes and publish events posted to /events
  consumer               Serve health probes and dispatch events from the queue

Options:
  -c, --config <PATH>    Path to a configuration file (default: config/local.*)
  -h, --help             Print this help message
"
    );
}
