use anyhow::{Context, Result, ensure};
use clap::Parser;
use serde::Deserialize;
use std::{collections::BTreeMap, env, fmt, fs, path::Path, path::PathBuf};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STORAGE_DIR: &str = "./data";

/// Centralized application configuration.
/// Combines an optional TOML file, environment variables and CLI arguments.
///
/// Built once at start-up and never mutated; each component receives the
/// parts it needs when it is constructed.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    /// Externally reachable base URL used when handing out object links.
    pub public_url: String,
    pub jwt_secret: String,
    /// Registered users and their passwords.
    pub users: BTreeMap<String, String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Filesystem-backed S3-like object store")]
pub struct Args {
    /// TOML config file (overrides PUNY_OSS_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (overrides PUNY_OSS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PUNY_OSS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where buckets are stored (overrides PUNY_OSS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Base URL for public object links (overrides PUNY_OSS_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Token signing secret (overrides PUNY_OSS_JWT_SECRET)
    #[arg(long)]
    pub jwt_secret: Option<String>,
}

/// On-disk shape of the config file. Every field is optional.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    storage_dir: Option<PathBuf>,
    public_url: Option<String>,
    jwt_secret: Option<String>,
    #[serde(default)]
    users: BTreeMap<String, String>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file `{}`", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config file `{}`", path.display()))
    }
}

impl AppConfig {
    /// Parse the process arguments and environment into an AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge sources, highest precedence first: CLI, environment, file, defaults.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config_path = args
            .config
            .or_else(|| env("PUNY_OSS_CONFIG").map(PathBuf::from));
        let file = match config_path {
            Some(path) => FileConfig::load(&path)?,
            None => FileConfig::default(),
        };

        let env_port = match env("PUNY_OSS_PORT") {
            Some(value) => Some(
                value
                    .parse::<u16>()
                    .with_context(|| format!("parsing PUNY_OSS_PORT value `{}`", value))?,
            ),
            None => None,
        };

        let port = args.port.or(env_port).or(file.port).unwrap_or(DEFAULT_PORT);
        let cfg = Self {
            host: args
                .host
                .or_else(|| env("PUNY_OSS_HOST"))
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.into()),
            port,
            storage_dir: args
                .storage_dir
                .or_else(|| env("PUNY_OSS_STORAGE_DIR").map(PathBuf::from))
                .or(file.storage_dir)
                .unwrap_or_else(|| DEFAULT_STORAGE_DIR.into()),
            public_url: args
                .public_url
                .or_else(|| env("PUNY_OSS_PUBLIC_URL"))
                .or(file.public_url)
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            jwt_secret: args
                .jwt_secret
                .or_else(|| env("PUNY_OSS_JWT_SECRET"))
                .or(file.jwt_secret)
                .unwrap_or_default(),
            users: file.users,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.port != 0, "port must be non-zero");
        ensure!(
            !self.storage_dir.as_os_str().is_empty(),
            "storage dir is required"
        );
        ensure!(!self.jwt_secret.is_empty(), "jwt secret is required");
        ensure!(!self.users.is_empty(), "at least one user is required");
        ensure!(
            !self.users.contains_key(""),
            "user names must not be empty"
        );
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("public_url", &self.public_url)
            .field("jwt_secret", &"<redacted>")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}
