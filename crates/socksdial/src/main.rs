//! A netcat-style client that reaches its target through SOCKS proxies.
//!
//! `socksdial` loads its configuration, connects to the target endpoint
//! (through whichever proxies are configured, in order), and then copies
//! standard input to the connection and the connection to standard
//! output until the peer closes it.
//!
//! With `--listen`, it instead asks the proxy to BIND, prints the address
//! the peer should connect to, and relays over the first connection that
//! arrives.

#![warn(missing_docs)]

mod overrides;

use socksdial_conn::{ConnectConfig, ConnectionCoordinator, Endpoint, Socket};
use socksdial_rtcompat::SocketHandle;

use anyhow::{Context, Result};
use argh::FromArgs;
use futures::future::{self, Either};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio_crate::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(FromArgs, Debug, Clone)]
/// Connect to a TCP endpoint, directly or through SOCKS proxies, and
/// relay standard input and output over the connection.
struct Args {
    /// override the default location(s) for the configuration file
    #[argh(option, short = 'f')]
    rc: Vec<String>,
    /// override a configuration option (uses toml syntax)
    #[argh(option, short = 'c')]
    cfg: Vec<String>,
    /// wait for the target to connect to us, instead of connecting to it
    #[argh(switch, short = 'l')]
    listen: bool,
    /// local address to listen on with --listen when no proxy is used
    #[argh(option, default = "String::from(\"0.0.0.0:0\")")]
    local: String,
    /// the endpoint to reach, as host:port
    #[argh(positional)]
    target: String,
}

/// Default options to use for our configuration.
const SOCKSDIAL_DEFAULTS: &str = include_str!("./socksdial_defaults.toml");

/// Structure to hold our configuration options, whether from a
/// configuration file or the command line.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SocksdialConfig {
    /// Whether to log at trace level.
    trace: bool,

    /// How to make connections.
    connect: ConnectConfig,
}

/// Build our configuration from the defaults, then every file in `files`,
/// then every toml line in `opts`.
fn load_config<P, S>(files: &[P], opts: &[S]) -> Result<SocksdialConfig>
where
    P: AsRef<Path>,
    S: AsRef<str>,
{
    let mut cfg = config::Config::new();
    cfg.merge(config::File::from_str(
        SOCKSDIAL_DEFAULTS,
        config::FileFormat::Toml,
    ))?;
    for f in files {
        let f: config::File<_> = f.as_ref().into();
        cfg.merge(f.format(config::FileFormat::Toml).required(true))?;
    }
    let mut overrides = overrides::Overrides::new();
    for opt in opts {
        overrides.push(opt.as_ref());
    }
    cfg.merge(overrides)?;

    Ok(cfg.try_into()?)
}

/// Copy stdin to `sock` and `sock` to stdout, until `sock` has nothing
/// more to say.
async fn relay<H: SocketHandle>(sock: &Socket<H>) -> Result<()> {
    let upstream = async {
        let mut stdin = tokio_crate::io::stdin();
        let mut buf = vec![0_u8; 4096];
        loop {
            let n = stdin.read(&mut buf[..]).await?;
            if n == 0 {
                break;
            }
            sock.write_all(&buf[..n]).await?;
        }
        sock.shutdown_output()?;
        Ok::<_, anyhow::Error>(())
    };
    let downstream = async {
        let mut stdout = tokio_crate::io::stdout();
        let mut buf = vec![0_u8; 4096];
        loop {
            let n = sock.read(&mut buf[..]).await?;
            if n == 0 {
                break;
            }
            stdout.write_all(&buf[..n]).await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    };
    futures::pin_mut!(upstream, downstream);

    match future::select(upstream, downstream).await {
        Either::Left((up, downstream)) => {
            up?;
            downstream.await
        }
        Either::Right((down, _)) => down,
    }
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let config = load_config(&args.rc, &args.cfg)?;

    let level = if config.trace {
        Level::TRACE
    } else {
        Level::DEBUG
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Unable to install log subscriber")?;

    let target: Endpoint = args
        .target
        .parse()
        .with_context(|| format!("Invalid target {:?}", args.target))?;

    let runtime = socksdial_rtcompat::create_runtime()?;
    let coord = ConnectionCoordinator::from_config(runtime.handle(), &config.connect)
        .context("Invalid connect configuration")?;
    let timeout = coord.connect_timeout();

    runtime.block_on(async {
        let sock = if args.listen {
            let local: SocketAddr = args
                .local
                .parse()
                .with_context(|| format!("Invalid local address {:?}", args.local))?;
            let listener = coord
                .bind(&target, local, timeout)
                .await
                .with_context(|| format!("Unable to listen for {}", target))?;
            info!("Waiting for {} at {}", target, listener.local_endpoint()?);
            listener.accept(Duration::from_secs(0)).await?
        } else {
            coord
                .connect(&target, timeout)
                .await
                .with_context(|| format!("Unable to connect to {}", target))?
        };
        info!("Connected to {}", sock.remote_endpoint()?);

        let r = relay(&sock).await;
        sock.close();
        r
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn load_default_config() -> Result<()> {
        let none: &[&str] = &[];
        let cfg = load_config(none, none)?;
        assert!(!cfg.trace);
        assert_eq!(cfg.connect.connect_timeout(), Duration::from_secs(30));
        assert!(cfg.connect.proxies().is_empty());
        Ok(())
    }

    #[test]
    fn command_line_overrides() -> Result<()> {
        let none: &[&str] = &[];
        let cfg = load_config(
            none,
            &[
                "trace=true",
                "connect.connect_timeout = \"5s\"",
                "connect.socks4_user_id = nobody",
                "connect.proxies = [{ address = \"192.0.2.1:1080\", version = 4 }]",
            ],
        )?;
        assert!(cfg.trace);
        assert_eq!(cfg.connect.connect_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.connect.socks4_user_id(), Some("nobody"));
        let c = cfg.connect.candidates()?;
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].to_string(), "socks4 proxy 192.0.2.1:1080");
        Ok(())
    }

    #[test]
    fn unknown_option_rejected() {
        let none: &[&str] = &[];
        assert!(load_config(none, &["no_such_option = 3"]).is_err());
        assert!(load_config(&["/nonexistent/socksdial.toml"], none).is_err());
    }
}
