use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.vigil.Daemon1",
    default_service = "org.vigil.Daemon1",
    default_path = "/org/vigil/Daemon1"
)]
trait Daemon {
    async fn status(&self) -> zbus::Result<String>;
    async fn enroll(&self, name: &str, role: &str) -> zbus::Result<String>;
    async fn capture(&self) -> zbus::Result<String>;
    async fn record_clip(&self) -> zbus::Result<String>;
    async fn retrain(&self) -> zbus::Result<bool>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn remove_identity(&self, label: i64) -> zbus::Result<String>;
    async fn history(&self, limit: u32) -> zbus::Result<String>;

    #[zbus(signal)]
    fn event(&self, kind: &str, payload: &str) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil recognition daemon CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Enroll the unknown face currently held steady in view
    Enroll {
        name: String,
        /// Role recorded with the identity (e.g., "Owner", "Guest")
        #[arg(short, long, default_value = "Guest")]
        role: String,
    },
    /// Save a training photo of the largest recognized face
    Capture,
    /// Export the buffered frames as a clip
    Record,
    /// Retrain the face model in the background
    Retrain,
    /// List enrolled identities
    Identities,
    /// Remove an identity with its photos and log
    Remove {
        /// Identity label
        label: i64,
    },
    /// Show recent recognitions, newest first
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },
    /// Print engine events as they happen
    Watch,
}

/// Re-indent a JSON reply; anything unparseable is printed as-is.
fn pretty(reply: &str) -> String {
    serde_json::from_str::<serde_json::Value>(reply)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| reply.to_string())
}

fn watch() -> Result<()> {
    let conn = zbus::blocking::Connection::session()?;
    let proxy = DaemonProxyBlocking::new(&conn)?;
    for signal in proxy.receive_event()? {
        let args = signal.args()?;
        println!("{:<16} {}", args.kind(), args.payload());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Watch = cli.command {
        return tokio::task::spawn_blocking(watch).await?;
    }

    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = DaemonProxy::new(&conn)
        .await
        .context("vigild is not reachable")?;

    match cli.command {
        Commands::Status => println!("{}", pretty(&proxy.status().await?)),
        Commands::Enroll { name, role } => {
            let identity = proxy.enroll(&name, &role).await?;
            println!("Enrolled:\n{}", pretty(&identity));
        }
        Commands::Capture => {
            let identity = proxy.capture().await?;
            println!("Captured a photo of:\n{}", pretty(&identity));
        }
        Commands::Record => {
            let dir = proxy.record_clip().await?;
            println!("Writing clip to {dir}");
        }
        Commands::Retrain => {
            if proxy.retrain().await? {
                println!("Retrain started");
            } else {
                println!("A retrain is already running");
            }
        }
        Commands::Identities => println!("{}", pretty(&proxy.list_identities().await?)),
        Commands::Remove { label } => {
            let identity = proxy.remove_identity(label).await?;
            println!("Removed:\n{}", pretty(&identity));
        }
        Commands::History { limit } => println!("{}", pretty(&proxy.history(limit).await?)),
        Commands::Watch => {}
    }

    Ok(())
}
