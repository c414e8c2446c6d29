use std::net::SocketAddr;

use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Impostor Server - room coordination for the impostor party game
#[derive(Parser, Debug, Clone)]
#[command(name = "impostor-server", version, about)]
pub struct ServerConfig {
    /// Interface to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the HTTP/WebSocket listener
    #[arg(short, long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Comma-separated origins allowed to connect. Empty or `*` allows any.
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Send each player only their own role instead of the full deal
    #[arg(long, env = "IMPOSTOR_PRIVATE_ROLES")]
    pub private_roles: bool,

    /// Maximum simultaneous connections allowed
    #[arg(short, long, env = "MAX_CONNECTIONS", default_value_t = 1000)]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            allowed_origins: Vec::new(),
            private_roles: false,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn origin_policy(&self) -> anyhow::Result<OriginPolicy> {
        OriginPolicy::parse(&self.allowed_origins)
    }
}

/// Which browser origins may open a room connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OriginPolicy {
    Any,
    List(Vec<HeaderValue>),
}

impl OriginPolicy {
    pub fn parse(origins: &[String]) -> anyhow::Result<Self> {
        let origins: Vec<&str> = origins
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .collect();
        if origins.is_empty() || origins.contains(&"*") {
            return Ok(OriginPolicy::Any);
        }
        let values = origins
            .into_iter()
            .map(HeaderValue::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OriginPolicy::List(values))
    }

    /// Requests without an `Origin` header come from non-browser clients and
    /// are always let through.
    pub fn allows(&self, origin: Option<&HeaderValue>) -> bool {
        match (self, origin) {
            (OriginPolicy::Any, _) | (_, None) => true,
            (OriginPolicy::List(list), Some(origin)) => list.contains(origin),
        }
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
        match self {
            OriginPolicy::Any => cors.allow_origin(Any),
            OriginPolicy::List(list) => cors.allow_origin(AllowOrigin::list(list.clone())),
        }
    }
}
