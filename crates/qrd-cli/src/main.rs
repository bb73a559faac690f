use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "qrd")]
#[command(about = "QR table ordering operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env overlays...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Upsert accounts, tables and products from a menu fixture YAML.
    Seed {
        #[arg(long)]
        fixture: String,
    },

    /// Order inspection and operator status changes
    Order {
        #[command(subcommand)]
        cmd: OrderCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply embedded SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum OrderCmd {
    /// Print an order row
    Show {
        #[arg(long)]
        order_id: String,
    },

    /// Move an order to a new status as a staff member.
    ///
    /// Same role rules as the daemon. Pushes for the new status go out from
    /// here; a daemon on the same database republishes the change to its
    /// live streams.
    SetStatus {
        #[arg(long)]
        order_id: String,

        /// Target status (pending | approved | ready | served | cancelled)
        #[arg(long)]
        status: String,

        /// Staff role performing the change (admin | kitchen | waiter)
        #[arg(long)]
        role: String,

        /// Layered config paths (cart limits, push relay)
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = qrd_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = qrd_db::status(&pool).await?;
                    println!("db_ok={} has_orders_table={}", s.ok, s.has_orders_table);
                }
                DbCmd::Migrate => {
                    qrd_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = qrd_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Seed { fixture } => commands::seed::seed(&fixture).await?,

        Commands::Order { cmd } => match cmd {
            OrderCmd::Show { order_id } => commands::order::show(&order_id).await?,
            OrderCmd::SetStatus {
                order_id,
                status,
                role,
                config_paths,
            } => commands::order::set_status(&order_id, &status, &role, &config_paths).await?,
        },
    }

    Ok(())
}
