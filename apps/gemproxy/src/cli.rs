use clap::Parser;
use gemproxy_common::GlobalConfigPatch;

/// CLI surface; every flag has a matching `GPROXY_*` environment variable via
/// clap's `env` feature. Precedence is CLI > ENV > DB default, applied by
/// layering `GlobalConfigPatch`s in `bootstrap`.
#[derive(Parser, Debug)]
#[command(name = "gemproxy")]
pub(crate) struct Cli {
    #[arg(long, env = "GPROXY_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "GPROXY_PORT")]
    pub(crate) port: Option<u16>,
    #[arg(long, env = "GPROXY_CREDS_ROOT")]
    pub(crate) creds_root: Option<String>,
    #[arg(long, env = "GPROXY_GEMINI_BASE_URL")]
    pub(crate) gemini_base_url: Option<String>,
    #[arg(long, env = "GPROXY_VERTEX_BASE_URL")]
    pub(crate) vertex_base_url: Option<String>,
    #[arg(long, env = "GPROXY_MAX_RETRIES")]
    pub(crate) max_retries: Option<u32>,
    #[arg(long, env = "GPROXY_STORE_REQUEST_BODIES")]
    pub(crate) store_request_bodies: Option<bool>,
    /// Comma-separated; `*` disables the check.
    #[arg(long, env = "GPROXY_ALLOWED_CLIENT_IPS", value_delimiter = ',')]
    pub(crate) allowed_client_ips: Option<Vec<String>>,
    #[arg(long, env = "GPROXY_TRUST_PROXY_HEADERS")]
    pub(crate) trust_proxy_headers: Option<bool>,
    #[arg(long, env = "GPROXY_DSN")]
    pub(crate) dsn: Option<String>,
    #[arg(long, env = "GPROXY_PROXY")]
    pub(crate) proxy: Option<String>,
    #[arg(long, env = "GPROXY_MASTER_KEY_FILE")]
    pub(crate) master_key_file: Option<String>,
}

impl From<Cli> for GlobalConfigPatch {
    fn from(cli: Cli) -> Self {
        GlobalConfigPatch {
            host: cli.host,
            port: cli.port,
            creds_root: cli.creds_root,
            gemini_base_url: cli.gemini_base_url,
            vertex_base_url: cli.vertex_base_url,
            max_retries: cli.max_retries,
            store_request_bodies: cli.store_request_bodies,
            allowed_client_ips: cli.allowed_client_ips,
            trust_proxy_headers: cli.trust_proxy_headers,
            dsn: cli.dsn,
            proxy: cli.proxy,
            master_key_file: cli.master_key_file,
        }
    }
}
