use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wispar_access_core::{BridgeMethod, MethodCall};

use wispar_access_local::backends;
use wispar_access_local::config::Config;

/// Command-line host for the Wispar scoped file-access broker.
#[derive(Parser, Debug)]
#[command(name = "wispar-access")]
#[command(about = "Pick folders, mint bookmarks and manage scoped access for Wispar")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick a folder for export and print its path
    ExportDir,
    /// Pick the database folder and print its persistent token
    Select,
    /// Exchange a persistent token for a path
    Resolve { token: String },
    /// Begin scoped access on a path
    Start { path: String },
    /// End scoped access on a path
    Stop { path: String },
    /// Send a raw bridge call
    Call {
        method: String,
        argument: Option<String>,
    },
}

impl Command {
    fn into_call(self) -> MethodCall {
        match self {
            Command::ExportDir => MethodCall::new(BridgeMethod::GetExportDirectory.as_str()),
            Command::Select => MethodCall::new(BridgeMethod::SelectCustomDatabasePath.as_str()),
            Command::Resolve { token } => {
                MethodCall::with_argument(BridgeMethod::ResolveCustomPath.as_str(), token)
            }
            Command::Start { path } => {
                MethodCall::with_argument(BridgeMethod::StartSecurityScopedAccess.as_str(), path)
            }
            Command::Stop { path } => {
                MethodCall::with_argument(BridgeMethod::StopSecurityScopedAccess.as_str(), path)
            }
            Command::Call { method, argument } => MethodCall { method, argument },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries only the reply.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("Starting wispar-access");
    let dispatcher = backends::create_dispatcher(&cli.config)?;

    let reply = dispatcher.call(&cli.command.into_call()).await;
    println!("{}", serde_json::to_string(&reply)?);

    // Sessions do not outlive the process.
    dispatcher.shutdown();
    Ok(())
}
