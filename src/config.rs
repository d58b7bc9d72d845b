use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, num::NonZeroUsize, path::PathBuf, str::FromStr};
use url::Url;

const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "https://yourdomain.com",
    "https://www.yourdomain.com",
    "http://localhost:3000",
    "http://localhost:5173",
];

const DEFAULT_CACHE_MAX_OBJECT_BYTES: u64 = 600 * 1024 * 1024;
const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const DEFAULT_CACHE_MAX_ENTRIES: &str = "10000";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Bucket every object key is resolved in.
    pub bucket: String,
    /// Shared HS256 secret; environment only.
    pub jwt_secret: String,
    /// Origins echoed back in `Access-Control-Allow-Origin`.
    pub allowed_origins: Vec<String>,
    /// Origin cache keys are built on; request `Host` headers are ignored.
    pub public_origin: Url,
    /// Largest object copied into the edge cache.
    pub cache_max_object_bytes: u64,
    /// Total body bytes the edge cache may hold.
    pub cache_capacity_bytes: u64,
    pub cache_max_entries: NonZeroUsize,
}

/// What the process should do after configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Import(PathBuf),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Edge media delivery for course content")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_EDGE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_EDGE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides MEDIA_EDGE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides MEDIA_EDGE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket name (overrides MEDIA_EDGE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Import a directory tree into the bucket and exit
    #[arg(long, value_name = "DIR", conflicts_with = "migrate")]
    pub import: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();
        let mode = match (&args.import, args.migrate) {
            (Some(dir), _) => RunMode::Import(dir.clone()),
            (None, true) => RunMode::Migrate,
            (None, false) => RunMode::Serve,
        };
        let cfg = Self::from_lookup(args, |name| env::var(name))?;
        Ok((cfg, mode))
    }

    /// Merge `args` over values read through `lookup`.
    fn from_lookup<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |name: &str, default: &str| -> Result<String> {
            match lookup(name) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };

        let env_port = parse_var::<u16>("MEDIA_EDGE_PORT", &var("MEDIA_EDGE_PORT", "8787")?)?;
        let cache_max_object_bytes = parse_var::<u64>(
            "MEDIA_EDGE_CACHE_MAX_OBJECT_BYTES",
            &var(
                "MEDIA_EDGE_CACHE_MAX_OBJECT_BYTES",
                &DEFAULT_CACHE_MAX_OBJECT_BYTES.to_string(),
            )?,
        )?;

        let cache_capacity_bytes = parse_var::<u64>(
            "MEDIA_EDGE_CACHE_CAPACITY_BYTES",
            &var(
                "MEDIA_EDGE_CACHE_CAPACITY_BYTES",
                &DEFAULT_CACHE_CAPACITY_BYTES.to_string(),
            )?,
        )?;
        let cache_max_entries = parse_var::<NonZeroUsize>(
            "MEDIA_EDGE_CACHE_MAX_ENTRIES",
            &var("MEDIA_EDGE_CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES)?,
        )?;

        let allowed_origins = match lookup("MEDIA_EDGE_ALLOWED_ORIGINS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
            Err(env::VarError::NotPresent) => {
                DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()
            }
            Err(err) => return Err(err).context("reading MEDIA_EDGE_ALLOWED_ORIGINS"),
        };

        let jwt_secret = var("JWT_SECRET", "")?;
        if jwt_secret.is_empty() {
            bail!("JWT_SECRET must be set to the secret shared with the token issuer");
        }

        let port = args.port.unwrap_or(env_port);
        let public_origin = parse_var::<Url>(
            "MEDIA_EDGE_PUBLIC_ORIGIN",
            &var("MEDIA_EDGE_PUBLIC_ORIGIN", &format!("http://localhost:{}", port))?,
        )?;
        if !matches!(public_origin.scheme(), "http" | "https") || public_origin.host_str().is_none() {
            bail!("MEDIA_EDGE_PUBLIC_ORIGIN must be an absolute http(s) origin");
        }

        Ok(Self {
            host: args.host.unwrap_or(var("MEDIA_EDGE_HOST", "0.0.0.0")?),
            port,
            storage_dir: args
                .storage_dir
                .unwrap_or(var("MEDIA_EDGE_STORAGE_DIR", "./data/objects")?),
            database_url: args.database_url.unwrap_or(var(
                "MEDIA_EDGE_DATABASE_URL",
                "sqlite://./data/meta/media.db",
            )?),
            bucket: args.bucket.unwrap_or(var("MEDIA_EDGE_BUCKET", "course-content")?),
            jwt_secret,
            allowed_origins,
            public_origin,
            cache_max_object_bytes,
            cache_capacity_bytes,
            cache_max_entries,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("parsing {} value `{}`", name, value))
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("bucket", &self.bucket)
            .field("jwt_secret", &"<redacted>")
            .field("allowed_origins", &self.allowed_origins)
            .field("public_origin", &self.public_origin.as_str())
            .field("cache_max_object_bytes", &self.cache_max_object_bytes)
            .field("cache_capacity_bytes", &self.cache_capacity_bytes)
            .field("cache_max_entries", &self.cache_max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)], argv: &[&str]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args = Args::try_parse_from(std::iter::once("media-edge").chain(argv.iter().copied()))?;
        AppConfig::from_lookup(args, |name| vars.get(name).cloned().ok_or(env::VarError::NotPresent))
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = load(&[("JWT_SECRET", "s3cret")], &[]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8787");
        assert_eq!(cfg.bucket, "course-content");
        assert_eq!(cfg.allowed_origins.len(), 4);
        assert_eq!(cfg.cache_max_object_bytes, 600 * 1024 * 1024);
        assert_eq!(cfg.cache_capacity_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(cfg.cache_max_entries.get(), 10_000);
        assert_eq!(cfg.public_origin.as_str(), "http://localhost:8787/");
    }

    #[test]
    fn public_origin_is_configurable_and_validated() {
        let cfg = load(
            &[
                ("JWT_SECRET", "s3cret"),
                ("MEDIA_EDGE_PUBLIC_ORIGIN", "https://media.example.com"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(cfg.public_origin.host_str(), Some("media.example.com"));

        for bad in ["not a url", "mailto:ops@example.com", "ftp://media.example.com"] {
            let err = load(&[("JWT_SECRET", "s3cret"), ("MEDIA_EDGE_PUBLIC_ORIGIN", bad)], &[]);
            assert!(err.is_err(), "{bad}");
        }
    }

    #[test]
    fn zero_cache_entries_is_rejected() {
        let err = load(&[("JWT_SECRET", "s3cret"), ("MEDIA_EDGE_CACHE_MAX_ENTRIES", "0")], &[])
            .unwrap_err();
        assert!(err.to_string().contains("MEDIA_EDGE_CACHE_MAX_ENTRIES"));
    }

    #[test]
    fn cli_overrides_environment() {
        let cfg = load(
            &[
                ("JWT_SECRET", "s3cret"),
                ("MEDIA_EDGE_PORT", "9000"),
                ("MEDIA_EDGE_BUCKET", "from-env"),
            ],
            &["--port", "9100"],
        )
        .unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.bucket, "from-env");
    }

    #[test]
    fn origins_are_comma_separated() {
        let cfg = load(
            &[
                ("JWT_SECRET", "s3cret"),
                ("MEDIA_EDGE_ALLOWED_ORIGINS", "https://a.test, https://b.test,"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(cfg.allowed_origins, vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn secret_is_required_and_redacted() {
        assert!(load(&[], &[]).is_err());
        let cfg = load(&[("JWT_SECRET", "s3cret")], &[]).unwrap();
        assert!(!format!("{:?}", cfg).contains("s3cret"));
    }

    #[test]
    fn bad_port_is_reported() {
        let err = load(&[("JWT_SECRET", "x"), ("MEDIA_EDGE_PORT", "http")], &[]).unwrap_err();
        assert!(err.to_string().contains("MEDIA_EDGE_PORT"));
    }
}
