use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hostplane::server::auth::token::TokenVerifier;
use hostplane::server::auth::PrincipalRole;
use hostplane::server::settings::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server
    Server,
    /// Check configuration for errors and unused options
    CheckConfig,
    /// Sign an access token with the configured secret
    IssueToken {
        /// Subject written to the `sub` claim and used as audit actor
        #[arg(long)]
        subject: String,
        /// platform_admin, tenant_admin, user or pending_user
        #[arg(long, default_value = "tenant_admin")]
        role: PrincipalRole,
        #[arg(long)]
        tenant_id: Option<Uuid>,
        /// Namespace the token is bound to
        #[arg(long)]
        namespace: Option<String>,
        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        ttl: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server => {
            let settings = Settings::new()?;
            hostplane::server::run_server(settings).await
        }
        Commands::CheckConfig => {
            println!("Checking configuration...");
            match Settings::new() {
                Ok(_) => {
                    println!("✓ Configuration is valid");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("✗ Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::IssueToken {
            subject,
            role,
            tenant_id,
            namespace,
            ttl,
        } => {
            let settings = Settings::new()?;
            let verifier = TokenVerifier::new(
                &settings.server.jwt_secret,
                settings.server.jwt_issuer.clone(),
            )
            .context("Failed to initialize token signer")?;
            let token = verifier
                .issue(&subject, role, tenant_id, namespace.as_deref(), ttl)
                .context("Failed to sign token")?;
            println!("{}", token);
            Ok(())
        }
    }
}
