mod server_mysql;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use opensrv_mysql::AsyncMysqlIntermediary;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use tealdb_core::{
    Catalog, ConnectionPool, DataDir, EngineDsn, HandlerShim, SessionContext, SystemVariables,
};

use server_mysql::{DuckHandler, MysqlSession, PathLocalInfile};

pub type SharedVars = Arc<SystemVariables>;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3306";

struct ServerConfig {
    dsn: EngineDsn,
    bind_addr: String,
    data_dir: PathBuf,
    local_infile: i8,
    secure_file_priv: Option<PathBuf>,
}

fn parse_config(args: Vec<String>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut positional: Vec<String> = Vec::new();
    let mut local_infile: i8 = 0;
    let mut secure_file_priv: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--local-infile" => {
                let value = iter.next().ok_or("--local-infile requires a value")?;
                local_infile = value.parse()?;
            }
            "--secure-file-priv" => {
                let value = iter.next().ok_or("--secure-file-priv requires a value")?;
                secure_file_priv = Some(PathBuf::from(value));
            }
            "--data-dir" => {
                let value = iter.next().ok_or("--data-dir requires a value")?;
                data_dir = Some(PathBuf::from(value));
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown flag: {other}").into());
            }
            _ => positional.push(arg),
        }
    }

    let name = positional.first().cloned().unwrap_or_default();
    let bind_addr = positional
        .get(1)
        .cloned()
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

    Ok(ServerConfig {
        dsn: EngineDsn::resolve(&name)?,
        bind_addr,
        data_dir: data_dir.unwrap_or_else(|| PathBuf::from(".")),
        local_infile,
        secure_file_priv,
    })
}

async fn run(cfg: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(ConnectionPool::open(&cfg.dsn)?);
    let vars: SharedVars = Arc::new(SystemVariables::new());
    vars.set_local_infile(cfg.local_infile);
    vars.set_secure_file_priv(cfg.secure_file_priv.as_deref());
    let dirs = DataDir::new(&cfg.data_dir);

    let listener = TcpListener::bind(&cfg.bind_addr).await?;
    info!(addr = %cfg.bind_addr, catalog = pool.catalog(), "mysql endpoint listening");

    let next_connection_id = Arc::new(AtomicU32::new(1));
    loop {
        let (stream, peer) = listener.accept().await?;
        let id = next_connection_id.fetch_add(1, Ordering::Relaxed);
        info!(connection_id = id, peer = %peer, "client connected");

        let pool = pool.clone();
        let vars = vars.clone();
        let dirs = dirs.clone();
        tokio::spawn(async move {
            let (r, w) = stream.into_split();
            let session = SessionContext::new(pool.clone(), id);
            let handler = DuckHandler::new(
                Catalog::new(pool.catalog()),
                vars,
                dirs,
                Box::new(PathLocalInfile),
            );
            let shim = HandlerShim::new(handler, pool);
            let mysql = MysqlSession::new(shim, session);
            if let Err(e) = AsyncMysqlIntermediary::run_on(mysql, r, w).await {
                warn!(connection_id = id, error = %e, "wire session ended with error");
            }
        });
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_format = std::env::var("TEALDB_LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into()),
            )
            .init();
    }

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!(
            "Usage: tealdb-server [db_name] [bind_addr] [--data-dir <path>] \
             [--local-infile <0|1>] [--secure-file-priv <path>]"
        );
        std::process::exit(1);
    }

    let cfg = match parse_config(args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cfg))
}
