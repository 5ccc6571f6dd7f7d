// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use catalock::api::ApiClient;
use catalock::cache::QueryCache;
use catalock::catalog::CatalogService;
use catalock::config::{self, AppConfig};
use catalock::error::{IntoAlert, RestoreError};
use catalock::navigation::{Navigator, StackNavigator};
use catalock::security::{
    AllowListPolicy, AutoLockController, BiometricGate, BiometricSensor, SessionStore,
};
use catalock::signals::{ActivitySignal, EventBus, SignalSource};
use catalock::storage::{keys, FileStore, KeyValueStore};
use catalock::types::{AppLifecycleState, Product, Route};
use catalock::utils::{mask_sensitive, truncate};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error
    pub const ERROR: i32 = 1;
    /// Service unavailable - catalog API unreachable
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// Temporary failure - try again later
    pub const TEMP_FAIL: i32 = 75;
    /// Permission denied - not logged in or not privileged
    pub const NO_PERM: i32 = 77;
}

#[derive(Parser)]
#[command(name = "catalock")]
#[command(version = VERSION)]
#[command(about = "Catalog client with inactivity auto-lock.")]
#[command(long_about = "catalock - Catalog client with inactivity auto-lock\n\n\
    Log in:              catalock login -u emilys\n\
    Browse:              catalock products --category laptops\n\
    Watch auto-lock:     catalock watch\n\
    Check status:        catalock status\n\n\
    The session locks after inactivity on the product list, or when the app goes to the background.")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode: errors only
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: debug logging, including session audit lines
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Store file (default: ~/.catalock/store.json)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with username and password
    ///
    /// Examples:
    ///   catalock login -u emilys
    ///   catalock login -u michaelw -p michaelwpass
    Login {
        #[arg(short, long)]
        username: String,
        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Validate the stored session against the server
    Restore,

    /// Log out (biometric enrollment is kept)
    Logout,

    /// Show session, store and cache status
    #[command(alias = "s")]
    Status,

    /// List products
    ///
    /// Examples:
    ///   catalock products
    ///   catalock products --category smartphones
    Products {
        /// Only products of this category slug
        #[arg(short, long)]
        category: Option<String>,
    },

    /// List categories
    Categories,

    /// Delete a product (privileged users only)
    Delete {
        id: u64,
    },

    /// Resume the stored session with a confirmation challenge
    Biometric {
        /// Enable quick login instead of unlocking
        #[arg(long)]
        enroll: bool,
    },

    /// Open the product list with auto-lock armed
    ///
    /// Any line that is not a command counts as a key press. Commands:
    ///   away | inactive | fg    app lifecycle changes
    ///   nav <Route> | cat <slug> | pop    navigation (counts as activity)
    ///   where | quit
    Watch,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
}

/// Everything a command needs, wired once.
struct App {
    config: AppConfig,
    store: Arc<FileStore>,
    session: Arc<SessionStore>,
    catalog: CatalogService,
}

impl App {
    fn build(cli: &Cli) -> Result<Self> {
        let config = config::load_config()?;

        let store_path = match &cli.store {
            Some(path) => path.clone(),
            None => config.store_path()?,
        };
        let store = Arc::new(FileStore::open(&store_path)?);

        // Login and validation carry their own token, so the auth client
        // has no token source.
        let auth = Arc::new(
            ApiClient::new(config.api_base_url.clone())?.with_timeout(config.request_timeout()),
        );
        let policy = Arc::new(AllowListPolicy::new(config.privileged_users.clone()));
        let session = Arc::new(SessionStore::with_policy(store.clone(), auth, policy));

        let api = Arc::new(
            ApiClient::new(config.api_base_url.clone())?
                .with_timeout(config.request_timeout())
                .with_token_source(session.clone()),
        );
        let cache = Arc::new(QueryCache::load_with(
            store.clone(),
            config.cache_stale_time(),
            config.cache_max_age(),
        ));
        let catalog = CatalogService::new(api, cache, session.clone());

        Ok(Self {
            config,
            store,
            session,
            catalog,
        })
    }

    /// Restore the stored session or exit with a login hint.
    async fn require_session(&self) {
        if let Err(e) = self.session.restore().await {
            let hint = match e {
                RestoreError::InvalidToken => "Your session expired. Run: catalock login -u <username>",
                _ => "Run: catalock login -u <username>",
            };
            fail(&e, hint, exit_codes::NO_PERM);
        }
    }
}

/// Print an alert and exit.
fn fail(error: &dyn IntoAlert, hint: &str, code: i32) -> ! {
    let alert = error.to_alert();
    eprintln!("{}", catalock::error::format_error(&alert.title, &[alert.message.as_str()], &[hint]));
    std::process::exit(code);
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::ERROR
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(cli.verbose)
        .with_writer(io::stderr)
        .init();
}

fn read_password() -> Result<String> {
    print!("Password: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Stand-in for a device sensor: asks for confirmation on the terminal.
struct TerminalConfirmSensor;

#[async_trait]
impl BiometricSensor for TerminalConfirmSensor {
    async fn is_sensor_available(&self) -> bool {
        io::stdin().is_terminal()
    }

    async fn prompt(&self, message: &str) -> bool {
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            print!("{} [y/N] ", message);
            if io::stdout().flush().is_err() {
                return false;
            }
            let mut answer = String::new();
            match io::stdin().lock().read_line(&mut answer) {
                Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
                Err(_) => false,
            }
        })
        .await
        .unwrap_or(false)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.as_ref().unwrap_or(&ConfigCommands::Show));
    }

    let app = App::build(&cli)?;

    match &cli.command {
        Commands::Login { username, password } => {
            let password = match password {
                Some(p) => p.clone(),
                None => read_password()?,
            };
            match app.session.login(username, &password).await {
                Ok(record) => {
                    println!("{} Logged in as {}", "[✓]".green(), username.bold());
                    if record.is_privileged {
                        println!("    {}", "Privileged: product deletion enabled".yellow());
                    }
                }
                Err(e) => fail(&e, "Check your username and password and try again", exit_codes::ERROR),
            }
        }
        Commands::Restore => match app.session.restore().await {
            Ok(record) => println!(
                "{} Session restored for {}",
                "[✓]".green(),
                record.username.as_deref().unwrap_or("unknown user").bold()
            ),
            Err(e) => fail(&e, "Run: catalock login -u <username>", exit_codes::NO_PERM),
        },
        Commands::Logout => {
            app.session.logout();
            println!("{} Logged out", "[✓]".green());
        }
        Commands::Status => show_status(&app),
        Commands::Products { category } => {
            app.require_session().await;
            match app.catalog.products_filtered(category.as_deref()).await {
                Ok(products) => print_products(&products, category.as_deref()),
                Err(e) => fail(&e, "Check your connection and try again", exit_codes::SERVICE_UNAVAILABLE),
            }
        }
        Commands::Categories => {
            app.require_session().await;
            match app.catalog.categories().await {
                Ok(categories) => {
                    println!("{} ({})", "Categories".bold(), categories.len());
                    for category in categories {
                        println!("  {:<24} {}", category.slug.cyan(), category.name);
                    }
                }
                Err(e) => fail(&e, "Check your connection and try again", exit_codes::SERVICE_UNAVAILABLE),
            }
        }
        Commands::Delete { id } => {
            app.require_session().await;
            match app.catalog.delete_product(*id).await {
                Ok(deleted) => println!("{} Deleted #{} {}", "[✓]".green(), deleted.id, deleted.title),
                Err(catalock::CatalogError::NotPermitted) => fail(
                    &catalock::CatalogError::NotPermitted,
                    "Log in with a privileged account",
                    exit_codes::NO_PERM,
                ),
                Err(e) => fail(&e, "Try again later", exit_codes::TEMP_FAIL),
            }
        }
        Commands::Biometric { enroll } => {
            let navigator = Arc::new(StackNavigator::new(Route::Login));
            let gate = BiometricGate::new(Arc::new(TerminalConfirmSensor), app.session.clone(), navigator.clone())
                .with_main_route(app.config.main_route());
            if *enroll {
                match gate.enroll().await {
                    Ok(()) => println!("{} Quick login enabled", "[✓]".green()),
                    Err(e) => fail(&e, "Run from an interactive terminal", exit_codes::ERROR),
                }
            } else {
                match gate.attempt().await {
                    Ok(record) => println!(
                        "{} Welcome back {} ({})",
                        "[✓]".green(),
                        record.username.as_deref().unwrap_or("").bold(),
                        navigator.current_route().map(|r| r.title()).unwrap_or_default()
                    ),
                    Err(e) => fail(&e, "Run: catalock login -u <username>", exit_codes::NO_PERM),
                }
            }
        }
        Commands::Watch => {
            app.require_session().await;
            watch(&app).await?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn handle_config_command(command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = config::load_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Path => {
            println!("{}", config::config_path()?.display());
        }
    }
    Ok(())
}

fn show_status(app: &App) {
    let store = app.store.as_ref();
    let token = store.get(keys::TOKEN);

    println!("{}", "catalock status".bold());
    println!("  Store:       {}", app.store.path().display());
    println!("  API:         {}", app.config.api_base_url);
    match &token {
        Some(token) => println!(
            "  Session:     {} ({}, token {})",
            "stored".green(),
            store.get(keys::USERNAME).as_deref().unwrap_or("unknown user"),
            mask_sensitive(token, 8)
        ),
        None => println!("  Session:     {}", "none".red()),
    }
    let privileged = token.is_some() && store.get(keys::PRIVILEGED).as_deref() == Some("1");
    println!("  Privileged:  {}", if privileged { "yes".yellow() } else { "no".normal() });
    let enrolled = store.get(keys::BIOMETRIC_ENROLLED).as_deref() == Some("1");
    println!("  Quick login: {}", if enrolled { "enabled" } else { "disabled" });
    println!(
        "  Auto-lock:   {}s on {}",
        app.config.inactivity_timeout().as_secs_f32(),
        app.config.sensitive_route
    );
    let stats = app.catalog.cache().stats();
    println!("  Cache:       {} entries", stats.entries);
}

fn print_products(products: &[Product], category: Option<&str>) {
    let heading = match category {
        Some(c) => format!("Products in {}", c),
        None => "All products".to_string(),
    };
    println!("{} ({})", heading.bold(), products.len());
    for product in products {
        println!(
            "  {:>4}  {:<40} {:<18} {:>9}",
            product.id.to_string().dimmed(),
            truncate(&product.title, 40),
            product.category.cyan(),
            format!("${:.2}", product.price)
        );
    }
}

/// Interactive session on the sensitive screen with auto-lock armed.
async fn watch(app: &App) -> Result<()> {
    let navigator = Arc::new(StackNavigator::new(Route::MainTabs));
    let key_events = Arc::new(EventBus::<ActivitySignal>::new());
    let lifecycle = Arc::new(EventBus::<AppLifecycleState>::new());

    let sources: Vec<Arc<dyn SignalSource<ActivitySignal>>> = vec![key_events.clone()];
    let autolock = AutoLockController::attach(
        app.config.autolock(),
        app.session.clone(),
        navigator.clone(),
        sources,
        Some(lifecycle.clone()),
    )?;
    navigator.navigate(autolock.config().sensitive_route.clone());

    println!(
        "{} Watching {} (locks after {}s idle). Type 'quit' to leave.",
        "[i]".cyan(),
        autolock.config().sensitive_route.title().bold(),
        autolock.config().timeout.as_secs_f32()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else { break };
                let line = line.trim();
                let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
                match command {
                    "quit" | "exit" => break,
                    "away" | "background" => lifecycle.emit(AppLifecycleState::Background),
                    "inactive" => lifecycle.emit(AppLifecycleState::Inactive),
                    "fg" | "active" => lifecycle.emit(AppLifecycleState::Active),
                    "nav" => match Route::from_name(arg.trim()) {
                        Some(route) => navigator.navigate(route),
                        None => println!("{} Unknown route '{}'", "[!]".yellow(), arg.trim()),
                    },
                    "cat" => navigator.navigate(Route::SpecificCategory { category: arg.trim().to_string() }),
                    "pop" => {
                        navigator.back();
                    }
                    "where" => {
                        let window = autolock.window();
                        println!(
                            "  {} | armed={} remaining={}",
                            navigator.breadcrumb().join(" > "),
                            window.armed,
                            window.remaining().map(|d| format!("{:.1}s", d.as_secs_f32())).unwrap_or_else(|| "-".into())
                        );
                    }
                    _ => key_events.emit(ActivitySignal::KeyPress),
                }
            }
            _ = tick.tick() => {
                if autolock.lock_count() > 0 {
                    println!("{} Session locked. Log in again to continue.", "[✗]".red());
                    break;
                }
            }
        }
    }

    autolock.detach();
    Ok(())
}
