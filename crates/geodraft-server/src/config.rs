//! Server configuration from the environment.

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

/// Listen address used when `GEODRAFT_ADDR` is unset.
pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "geodraft_server=info,geodraft_core=info,tower_http=info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Directory whose `.geojson`, `.json` and `.kml` files are served as files.
    pub seed_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Read `GEODRAFT_ADDR` and `GEODRAFT_SEED_DIR`.
    pub fn from_env() -> Result<Self, AddrParseError> {
        Self::from_vars(
            std::env::var("GEODRAFT_ADDR").ok(),
            std::env::var("GEODRAFT_SEED_DIR").ok(),
        )
    }

    fn from_vars(addr: Option<String>, seed_dir: Option<String>) -> Result<Self, AddrParseError> {
        let addr = addr.as_deref().unwrap_or(DEFAULT_ADDR).parse()?;
        let seed_dir = seed_dir.filter(|d| !d.is_empty()).map(PathBuf::from);
        Ok(Self { addr, seed_dir })
    }
}
