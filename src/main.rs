//! reading-rs server entry point.

use clap::Parser;
use reading_rs::{
    config::{BookCommand, Cli, Command, Config, PageCommand},
    db::{BookDraft, Database},
    library::{Catalog, PageNumber},
    server,
    storage::ArtifactStore,
};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::Book { action }) => cmd_book(action, &config).await,
        Some(Command::Page { action }) => cmd_page(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
}

/// Initialize config, database and media directory.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    // Write default config
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    std::fs::create_dir_all(&config.storage.media_dir)?;
    println!("Created media directory: {}", config.storage.media_dir.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: reading-rs book add <name> --author <author>");

    Ok(())
}

fn open_catalog(config: &Config) -> anyhow::Result<Catalog> {
    let db = Database::open(&config.database.path)?;
    Ok(Catalog::new(db, ArtifactStore::new(&config.storage.media_dir)))
}

/// Book management commands.
async fn cmd_book(action: BookCommand, config: &Config) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;

    match action {
        BookCommand::Add {
            name,
            author,
            image,
        } => {
            let image = image
                .map(|path| catalog.store().import_image(Path::new(&path)))
                .transpose()?;

            let draft = BookDraft {
                name,
                author,
                image,
                ..Default::default()
            };
            let book = catalog.create_book(&draft, &[])?;
            println!(
                "Created book: {} (id: {}, pdf: {})",
                book.name,
                book.id,
                book.pdf.unwrap_or_default()
            );
        }

        BookCommand::List => {
            let books = catalog.books(None)?;
            if books.is_empty() {
                println!("No books found.");
            } else {
                println!("{:<6} {:<36} {:<30} PAGES", "ID", "NAME", "AUTHOR");
                println!("{}", "-".repeat(80));
                for book in books {
                    println!(
                        "{:<6} {:<36} {:<30} {}",
                        book.id, book.name, book.author, book.total_pages
                    );
                }
            }
        }

        BookCommand::Del { id } => {
            catalog.delete_book(id)?;
            println!("Deleted book: {}", id);
        }

        BookCommand::Render { id } => {
            let book = catalog.reconcile(id)?;
            println!(
                "Rendered book {} ({} pages): {}",
                book.id,
                book.total_pages,
                book.pdf.unwrap_or_default()
            );
        }
    }

    Ok(())
}

/// Page management commands.
async fn cmd_page(action: PageCommand, config: &Config) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;

    match action {
        PageCommand::Add {
            book_id,
            text,
            number,
        } => {
            let number = number.map(|n| n.parse::<PageNumber>()).transpose()?;
            let page = catalog.add_page(book_id, number, &text)?;
            println!(
                "Added page {} to book {} (id: {})",
                page.page_number, page.book_id, page.id
            );
        }

        PageCommand::Del { id } => {
            let book_id = catalog.delete_page(id)?;
            println!("Deleted page {} from book {}", id, book_id);
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reading_rs=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Database::open(&config.database.path)?;
    std::fs::create_dir_all(&config.storage.media_dir)?;

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        media = %config.storage.media_dir.display(),
        "Starting reading-rs server"
    );

    let state = server::AppState::new_with_db(config.clone(), db);
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
