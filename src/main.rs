use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use handl::config::{Config, StoreBackend};
use handl::counter::{current_interest, CounterOptions, InterestCounter};
use handl::geo::{IpLookup, LocationResolver, PublicIpClient};
use handl::output::terminal;
use handl::recorder::ClickRecorder;
use handl::signup::{FormCapture, SignupForm, RETRY_MESSAGE};

/// Handl: landing-site backend for the Handl beta.
///
/// Tracks how many people have tapped "Join the beta", keeps a live counter
/// in sync with the hosted event log, and relays beta signups.
#[derive(Parser)]
#[command(name = "handl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the local SQLite event log
    Init,

    /// Show store configuration and the current interest count
    Status,

    /// Print the interest count visitors would see
    Count,

    /// Follow the live interest counter until Ctrl-C
    Watch,

    /// Resolve this machine's approximate location and public IP
    Locate,

    /// Record one join click, as the site does on a qualifying device
    Record,

    /// Submit the beta-signup form
    Signup {
        /// Name to sign up with
        #[arg(long)]
        name: String,

        /// Email address to sign up with
        #[arg(long)]
        email: String,
    },

    /// Start the web server
    #[cfg(feature = "web")]
    Serve {
        /// Port to listen on (default: 8080)
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("handl=info")),
        )
        .init();

    let cli = Cli::parse();

    // Store credentials are required for every command.
    let config = Config::load()?;

    match cli.command {
        Commands::Init => match config.store_backend() {
            StoreBackend::Sqlite(path) => init_sqlite(&path)?,
            StoreBackend::Supabase => {
                let log = handl::store::open_event_log(&config)?;
                let rows = log.count_rows().await?;
                println!(
                    "Hosted table '{}' is reachable ({rows} rows).",
                    config.event_table
                );
                println!("Nothing to initialize locally.");
            }
        },

        Commands::Status => {
            let log = handl::store::open_event_log(&config)?;
            handl::status::show(&config, &log).await?;
        }

        Commands::Count => {
            let log = handl::store::open_event_log(&config)?;
            let value = current_interest(log.as_ref(), config.interest_offset).await;
            terminal::display_count(value, config.interest_offset);
        }

        Commands::Watch => {
            let log = handl::store::open_event_log(&config)?;
            let counter = InterestCounter::mount(log, CounterOptions::from_config(&config));
            counter.ready().await;
            terminal::display_counter_state(counter.state());
            println!("{}", "Watching for new clicks. Press Ctrl-C to stop.".dimmed());

            let mut rx = counter.watch();
            let mut previous = None;
            loop {
                let value = *rx.borrow_and_update();
                terminal::display_watch_tick(value, previous);
                previous = Some(value);

                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            counter.unmount();
            println!("\nFinal count: {}", counter.interested_count().to_string().bold());
        }

        Commands::Locate => {
            let resolver = LocationResolver::from_config(&config)?;
            let ip_client = PublicIpClient::new(&config.ip_lookup_url)?;
            let (location, ip) = tokio::join!(resolver.resolve_location(None), ip_client.public_ip());
            let ip = match ip {
                Ok(ip) => Some(ip),
                Err(e) => {
                    warn!(error = %e, "Public IP lookup failed");
                    None
                }
            };
            terminal::display_location(&location, ip.as_deref());
        }

        Commands::Record => {
            let log = handl::store::open_event_log(&config)?;
            let recorder = ClickRecorder::from_config(&config, Arc::clone(&log))?;
            info!(backend = log.name(), "Recording one join click...");
            let event = recorder.record_local_event().await?;
            terminal::display_recorded(&event);
        }

        Commands::Signup { name, email } => {
            let form = SignupForm::new(name, email);
            form.validate()?;
            let capture = FormCapture::new(config.require_form_endpoint()?)?;
            match capture.submit(&form).await {
                Ok(()) => println!("{} Signed up {}", "✓".green().bold(), form.email.trim()),
                Err(e) => {
                    warn!("Signup failed: {e:#}");
                    anyhow::bail!(RETRY_MESSAGE);
                }
            }
        }

        #[cfg(feature = "web")]
        Commands::Serve { port, bind } => {
            let log = handl::store::open_event_log(&config)?;
            handl::web::run_server(config, log, port, &bind).await?;
        }
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
fn init_sqlite(path: &str) -> Result<()> {
    info!("Initializing Handl event log...");
    let _log = handl::store::initialize_sqlite(path)?;
    println!("Event log initialized at: {path}");
    println!("\nHandl is ready. Try: cargo run -- record && cargo run -- count");
    Ok(())
}

#[cfg(not(feature = "sqlite"))]
fn init_sqlite(_path: &str) -> Result<()> {
    anyhow::bail!(
        "SUPABASE_URL points to SQLite but the 'sqlite' feature is not compiled in.\n\
         Rebuild with: cargo build --features sqlite"
    )
}
