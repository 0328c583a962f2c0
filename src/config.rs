use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Reading platform backend with PDF rendition of books.
#[derive(Parser, Debug, Clone)]
#[command(name = "reading-rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "READING_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Book management commands.
    Book {
        /// Book subcommand action.
        #[command(subcommand)]
        action: BookCommand,
    },

    /// Page management commands.
    Page {
        /// Page subcommand action.
        #[command(subcommand)]
        action: PageCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Book management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum BookCommand {
    /// Add a new book.
    Add {
        /// Book name (unique).
        name: String,
        /// Author name.
        #[arg(short, long)]
        author: String,
        /// Cover image file, copied into the media directory.
        #[arg(short, long)]
        image: Option<String>,
    },

    /// List all books.
    List,

    /// Delete a book with its pages and PDF.
    Del {
        /// Book ID.
        id: i64,
    },

    /// Re-render the PDF of a book.
    Render {
        /// Book ID.
        id: i64,
    },
}

/// Page management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum PageCommand {
    /// Append a page to a book.
    Add {
        /// Book ID.
        book_id: i64,
        /// Page text.
        text: String,
        /// Explicit page number (next free number if omitted).
        #[arg(short, long)]
        number: Option<String>,
    },

    /// Delete a page.
    Del {
        /// Page ID.
        id: i64,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Media storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upstream identity configuration.
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/reading.db")
}

/// Media storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for cover images and rendered PDFs.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
        }
    }
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("data/media")
}

/// Identity forwarded by the authenticating proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Request header carrying the user ID.
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
        }
    }
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("reading-rs.toml"),
            dirs::config_dir()
                .map(|p| p.join("reading-rs").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/reading-rs/config.toml"),
        ];

        candidates
            .into_iter()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# reading-rs configuration

[server]
bind = "0.0.0.0:8080"

[database]
# path = "/var/lib/reading-rs/reading.db"

[storage]
# Cover images live under <media_dir>/book_images,
# rendered PDFs under <media_dir>/book_pdfs.
# media_dir = "/var/lib/reading-rs/media"

[identity]
# Header set by the authenticating reverse proxy
user_header = "x-user-id"
"#
        .to_string()
    }
}
