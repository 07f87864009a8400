//! dnsaas binary entry point.

use clap::{Parser, Subcommand};
use dnsaas_core::{telemetry, Actor, Config, RequestId, RequestState, Store, Workflow};
use std::path::PathBuf;
use tracing::{error, info};

/// Review and maintain the DNSaaS zone database.
#[derive(Parser, Debug)]
#[command(name = "dnsaas")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "dnsaas.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema, optionally with a first superuser.
    Init {
        #[arg(long, requires = "email")]
        admin: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// List OPEN requests.
    Requests {
        /// Include accepted and rejected requests.
        #[arg(long)]
        all: bool,
    },
    /// Print a request and its field diff as JSON.
    Show { id: i64 },
    /// Apply an OPEN request.
    Accept {
        id: i64,
        #[arg(short, long)]
        user: String,
    },
    /// Discard an OPEN request.
    Reject {
        id: i64,
        #[arg(short, long)]
        user: String,
    },
    /// Re-evaluate the PTR records of a domain.
    SyncPtr {
        domain: String,
        #[arg(short, long)]
        user: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()).required(false))
        .add_source(
            config::Environment::with_prefix("DNSAAS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        database = %config.database.path.display(),
        "Opening zone database"
    );

    let store = Store::open(&config.database, config.workflow.clone())?;
    let workflow = Workflow::new(store);

    if let Err(e) = run(&workflow, args.command) {
        error!("dnsaas error: {}", e);
        return Err(e);
    }
    Ok(())
}

fn run(workflow: &Workflow, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Init { admin, email } => {
            if let (Some(admin), Some(email)) = (admin, email) {
                let user = workflow
                    .store()
                    .transaction(|tx| tx.insert_user(&admin, &email, true))?;
                info!(id = %user.id, username = %user.username, "superuser created");
            }
            info!("schema ready");
        }
        Command::Requests { all } => {
            let state = if all { None } else { Some(RequestState::Open) };
            for request in workflow.requests(state)? {
                let target = request
                    .kind
                    .target()
                    .map(|target| target.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\t{}",
                    request.id,
                    request.state,
                    request.kind.label(),
                    target
                );
            }
        }
        Command::Show { id } => {
            let request = workflow.request(RequestId(id))?;
            let history = workflow.request_history(request.id)?;
            let view = serde_json::json!({
                "id": request.id.0,
                "state": request.state,
                "kind": request.kind.label(),
                "target": request.kind.target().map(|target| target.to_string()),
                "owner": request.owner.0,
                "key": request.key,
                "created_at": request.created_at,
                "history": history,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Accept { id, user } => {
            let reviewer = actor(workflow, &user)?;
            let accepted = workflow.accept_request(&reviewer, RequestId(id))?;
            info!(%id, ?accepted, "request accepted");
        }
        Command::Reject { id, user } => {
            let reviewer = actor(workflow, &user)?;
            workflow.reject_request(&reviewer, RequestId(id))?;
            info!(%id, "request rejected");
        }
        Command::SyncPtr { domain, user } => {
            let actor = actor(workflow, &user)?;
            let found = workflow
                .store()
                .transaction(|tx| tx.find_domain_by_name(&domain))?
                .ok_or_else(|| format!("unknown domain {domain}"))?;
            workflow.resync_ptr(&actor, found.id)?;
            info!(%domain, "PTR records synchronized");
        }
    }
    Ok(())
}

fn actor(workflow: &Workflow, username: &str) -> Result<Actor, Box<dyn std::error::Error>> {
    let user = workflow
        .store()
        .transaction(|tx| tx.find_user(username))?
        .ok_or_else(|| format!("unknown user {username}"))?;
    Ok(user.actor())
}
