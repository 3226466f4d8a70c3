//! Dev server settings derived from the loaded configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::path::PathBuf;

use crate::config::ThemesyncConfig;
use crate::error::{ConfigError, Result};

/// How long the watcher waits for a burst of writes to settle.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

const PORT_SEARCH_SPAN: u16 = 10;

/// Resolved settings for one preview session.
#[derive(Debug, Clone)]
pub struct DevConfig {
    pub addr: SocketAddr,
    /// Theme root.
    pub root: PathBuf,
    pub extension_root: Option<PathBuf>,
    pub debounce_ms: u64,
    pub live_sync: bool,
    pub no_delete: bool,
    pub concurrency: usize,
    pub open: bool,
}

impl DevConfig {
    /// Settings for `root` listening on `addr`, everything else default.
    pub fn new(root: impl Into<PathBuf>, addr: SocketAddr) -> Self {
        Self {
            addr,
            root: root.into(),
            extension_root: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            live_sync: true,
            no_delete: false,
            concurrency: crate::config::default_concurrency(),
            open: false,
        }
    }

    /// Resolve the listen address and copy the preview settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unparseable host or when no port
    /// in the search range is free.
    pub fn from_config(config: &ThemesyncConfig, open: bool) -> Result<Self> {
        let ip = resolve_host(&config.host)?;
        let addr = Self::find_available_port(ip, config.port)?;

        Ok(Self {
            extension_root: config.extension_path.clone(),
            live_sync: config.live_sync,
            no_delete: config.nodelete,
            concurrency: config.concurrency,
            open,
            ..Self::new(config.path.clone(), addr)
        })
    }

    /// First bindable port in `requested..=requested+PORT_SEARCH_SPAN`.
    fn find_available_port(ip: IpAddr, requested: u16) -> Result<SocketAddr> {
        if requested != 0 && requested < 1024 {
            crate::ui::warning(&format!(
                "Preview port {requested} is privileged; binding may need elevated rights"
            ));
        }

        let last = requested.saturating_add(PORT_SEARCH_SPAN);
        let found = (requested..=last)
            .map(|port| SocketAddr::new(ip, port))
            .find(|addr| TcpListener::bind(addr).is_ok());

        match found {
            Some(addr) if addr.port() == requested => Ok(addr),
            Some(addr) => {
                crate::ui::warning(&format!(
                    "Preview port {requested} taken, falling back to {}",
                    addr.port()
                ));
                Ok(addr)
            }
            None => Err(ConfigError::InvalidValue {
                field: "port".into(),
                value: requested.to_string(),
                hint: format!("Nothing free between {requested} and {last}; pass --port"),
            }
            .into()),
        }
    }

    pub fn server_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

fn resolve_host(host: &str) -> Result<IpAddr> {
    if host.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    host.parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: "host".to_string(),
            value: host.to_string(),
            hint: "Use an IP address such as 127.0.0.1 or 0.0.0.0".to_string(),
        }
        .into()
    })
}
