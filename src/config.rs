// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the process environment once at startup.
//! The binary seeds the environment from a `.env` file before that. A missing required value aborts startup
//! before any component is constructed.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the pending authorization database | `./data` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | Serve HTTPS with this pair | Optional |
//! | `JWT_SECRET` | HS256 secret of the session tokens | Required |
//! | `OP_MTLS_BASE` | AIS provider mTLS API base URL | Required |
//! | `OP_AUTH_BASE` | AIS provider authorization server base URL | Required |
//! | `OP_CLIENT_ID` | Registered TPP client id | Required |
//! | `OP_CLIENT_SECRET` | Registered TPP client secret | Required |
//! | `OP_API_KEY` | Provider API key (`x-api-key`) | Required |
//! | `OP_FAPI_FINANCIAL_ID` | `x-fapi-financial-id` header value | Required |
//! | `OP_REDIRECT_URI` | Registered redirect URI | Required |
//! | `OP_QWAC_CERT_PATH` / `OP_QWAC_KEY_PATH` | mTLS client certificate and key | Required |
//! | `OP_QSEAL_KEY_PATH` | RSA key signing the request object | Required |
//! | `OP_QSEAL_KID` | `kid` header of the request object | Required |
//! | `OP_REQUEST_AUD` | Request object audience | `OP_MTLS_BASE` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;

use url::Url;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "./data";

/// File name of the pending authorization database under `DATA_DIR`.
pub const PENDING_DB_FILE: &str = "op_authorizations.redb";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is missing")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Credential bundle for the AIS provider.
#[derive(Clone)]
pub struct OpConfig {
    pub mtls_base: String,
    pub auth_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_key: String,
    pub fapi_financial_id: String,
    pub redirect_uri: String,
    pub qwac_cert_path: PathBuf,
    pub qwac_key_path: PathBuf,
    pub qseal_key_path: PathBuf,
    pub qseal_kid: String,
    pub request_audience: String,
}

impl std::fmt::Debug for OpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpConfig")
            .field("mtls_base", &self.mtls_base)
            .field("auth_base", &self.auth_base)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("fapi_financial_id", &self.fapi_financial_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("qwac_cert_path", &self.qwac_cert_path)
            .field("qwac_key_path", &self.qwac_key_path)
            .field("qseal_key_path", &self.qseal_key_path)
            .field("qseal_kid", &self.qseal_kid)
            .field("request_audience", &self.request_audience)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn pending_db_path(&self) -> PathBuf {
        self.data_dir.join(PENDING_DB_FILE)
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub jwt_secret: String,
    pub op: OpConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("server", &self.server)
            .field("jwt_secret", &"<redacted>")
            .field("op", &self.op)
            .finish()
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let port = match env.optional(PORT_ENV) {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: PORT_ENV,
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let tls_cert_path = env.optional(TLS_CERT_PATH_ENV).map(PathBuf::from);
        let tls_key_path = env.optional(TLS_KEY_PATH_ENV).map(PathBuf::from);
        if tls_cert_path.is_some() != tls_key_path.is_some() {
            return Err(ConfigError::Invalid {
                name: TLS_CERT_PATH_ENV,
                reason: format!("{TLS_CERT_PATH_ENV} and {TLS_KEY_PATH_ENV} must be set together"),
            });
        }

        let server = ServerConfig {
            host: env.or_default(HOST_ENV, DEFAULT_HOST),
            port,
            data_dir: PathBuf::from(env.or_default(DATA_DIR_ENV, DEFAULT_DATA_DIR)),
            tls_cert_path,
            tls_key_path,
        };

        let jwt_secret = env.required(JWT_SECRET_ENV)?;

        let mtls_base = env.required_base_url("OP_MTLS_BASE")?;
        let auth_base = env.required_base_url("OP_AUTH_BASE")?;
        let request_audience = env
            .optional("OP_REQUEST_AUD")
            .unwrap_or_else(|| mtls_base.clone());

        let op = OpConfig {
            mtls_base,
            auth_base,
            client_id: env.required("OP_CLIENT_ID")?,
            client_secret: env.required("OP_CLIENT_SECRET")?,
            api_key: env.required("OP_API_KEY")?,
            fapi_financial_id: env.required("OP_FAPI_FINANCIAL_ID")?,
            redirect_uri: env.required("OP_REDIRECT_URI")?,
            qwac_cert_path: PathBuf::from(env.required("OP_QWAC_CERT_PATH")?),
            qwac_key_path: PathBuf::from(env.required("OP_QWAC_KEY_PATH")?),
            qseal_key_path: PathBuf::from(env.required("OP_QSEAL_KEY_PATH")?),
            qseal_kid: env.required("OP_QSEAL_KID")?,
            request_audience,
        };

        Ok(Self {
            server,
            jwt_secret,
            op,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    /// Required absolute http(s) URL, returned without a trailing slash.
    fn required_base_url(&self, name: &'static str) -> Result<String, ConfigError> {
        let raw = self.required(name)?;
        let parsed = Url::parse(&raw).map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "https" | "http") {
            return Err(ConfigError::Invalid {
                name,
                reason: format!("unsupported scheme `{}`", parsed.scheme()),
            });
        }
        Ok(raw.trim_end_matches('/').to_string())
    }
}
