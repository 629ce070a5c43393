use anyhow::{Context as AnyhowContext, Result};
use std::net::SocketAddr;

pub const AUTH_TOKEN_ENV: &str = "APIVIEW_AUTH_TOKEN";

/// Shared secret the review API expects as `Authorization: Bearer <secret>`.
#[derive(Clone, Debug)]
pub struct AuthToken {
    secret: String,
}

impl AuthToken {
    /// `None` means the API runs unauthenticated; a blank secret is an error.
    pub fn parse(raw: Option<&str>) -> Result<Option<Self>> {
        raw.map(|raw| match raw.trim() {
            "" => anyhow::bail!("auth token must be non-empty"),
            secret => Ok(Self {
                secret: secret.to_string(),
            }),
        })
        .transpose()
    }

    /// The `--auth-token` flag, else a non-blank `APIVIEW_AUTH_TOKEN`.
    pub fn resolve(flag: Option<&str>) -> Result<Option<Self>> {
        if flag.is_some() {
            return Self::parse(flag);
        }
        let env = std::env::var(AUTH_TOKEN_ENV).ok();
        Self::parse(env.as_deref().filter(|v| !v.trim().is_empty()))
    }

    pub fn accepts_bearer(&self, authorization: &str) -> bool {
        authorization
            .trim()
            .strip_prefix("Bearer ")
            .is_some_and(|presented| same_secret(presented.trim(), &self.secret))
    }
}

/// Resolve `bind` and pick the address to listen on, IPv4 first.
///
/// Anything other than loopback needs `public`.
pub async fn listen_addr(bind: &str, public: bool) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(bind)
        .await
        .with_context(|| format!("Failed to resolve bind address: {bind}"))?
        .collect();

    if !public && addrs.iter().any(|addr| !addr.ip().is_loopback()) {
        anyhow::bail!(
            "Refusing to bind the review API to {bind} without --public; a public server also needs {AUTH_TOKEN_ENV} or --auth-token."
        )
    }
    prefer_ipv4(&addrs).with_context(|| format!("Bind address resolved to nothing: {bind}"))
}

fn prefer_ipv4(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

// Length leaks; contents do not.
fn same_secret(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}
