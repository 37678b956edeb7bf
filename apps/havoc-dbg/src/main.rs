mod cli;
mod repl;
mod telemetry;

use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::Parser;
use havoc_debug_sdk::{ClientConfig, DebugClient};
use havoc_replay_sim::{http, Fixture, ReplayServer};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use cli::{AttachArgs, Cli, Command, ServeArgs};
use repl::Flow;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    telemetry::logging::init(&log_config).context("failed to initialise logging")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Attach(args) => attach(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let server = ReplayServer::new();
    if args.fixtures.is_empty() {
        server.add_fixture(&Fixture::demo().context("built-in demo fixture is invalid")?);
    }
    for path in &args.fixtures {
        let fixture =
            Fixture::load(path).with_context(|| format!("failed to load {}", path.display()))?;
        server.add_fixture(&fixture);
    }
    for key in server.testcases() {
        info!(testcase = %key, "serving testcase");
    }

    let listener = http::bind(&args.listen).await?;
    http::serve(listener, server, shutdown_signal())
        .await
        .context("replay server shut down with error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn attach(args: AttachArgs) -> Result<()> {
    let config = ClientConfig::new(&args.server)?.with_bearer_token(args.token.clone());
    let client = DebugClient::new(config)?;
    let mut session = client
        .open_session(&args.project, args.run_id, &args.testcase)
        .await
        .with_context(|| format!("failed to open {}/{}/{}", args.project, args.run_id, args.testcase))?;

    let interactive = args.script.is_none() && std::io::stdin().is_terminal();
    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &args.script {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open script {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = input.lines();
    let mut stdout = tokio::io::stdout();

    stdout
        .write_all(format!("attached to {} at {}\n", session.key(), session.cursor()).as_bytes())
        .await?;
    loop {
        if interactive {
            stdout.write_all(b"(havoc) ").await?;
            stdout.flush().await?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = match repl::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                stdout.write_all(format!("{err}\n").as_bytes()).await?;
                continue;
            }
        };

        let mut out = String::new();
        let result = repl::execute(&mut session, command, &mut out).await;
        stdout.write_all(out.as_bytes()).await?;
        match result {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) if err.is_transport() => {
                stdout.flush().await?;
                return Err(err).context("lost connection to the replay server");
            }
            Err(err) => stdout.write_all(format!("error: {err}\n").as_bytes()).await?,
        }
    }
    stdout.flush().await?;

    session.close().await.context("failed to stop the debug session")
}
