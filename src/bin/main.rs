use clap::Parser;
use std::time::Duration;
use wireperf::{Client, Config, Protocol, Server};

/// Network throughput measurement tool speaking the iperf3-style control
/// protocol.
#[derive(Parser)]
#[command(name = "wireperf")]
#[command(version)]
#[command(about = "Measure network throughput between a client and a server", long_about = None)]
struct Cli {
    /// Run in client mode, connecting to <HOST>; server mode when absent
    #[arg(short = 'c', long = "client", value_name = "HOST")]
    client: Option<String>,

    /// Server port to listen on / connect to
    #[arg(short = 'p', long = "port", default_value_t = 5201)]
    port: u16,

    /// Time in seconds to transmit for
    #[arg(short = 't', long = "time", value_name = "SEC", default_value_t = 10)]
    time: u64,

    /// Length of buffer to read or write (default 128 KiB for streams,
    /// 1470 bytes for UDP)
    #[arg(short = 'l', long = "length", value_name = "BYTES")]
    length: Option<usize>,

    /// Target bitrate in bits/sec (0 for unlimited; UDP defaults to 1 Mbps)
    #[arg(short = 'b', long = "bitrate", value_name = "BITS", default_value_t = 0)]
    bandwidth: u64,

    /// Number of parallel client streams (accepted, only 1 is run)
    #[arg(short = 'P', long = "parallel", value_name = "N", default_value_t = 1)]
    parallel: usize,

    /// Use UDP rather than TCP
    #[arg(short = 'u', long = "udp", conflicts_with = "sctp")]
    udp: bool,

    /// Use SCTP rather than TCP
    #[arg(long = "sctp")]
    sctp: bool,

    /// Run in reverse mode (accepted, announced as a no-op)
    #[arg(short = 'R', long = "reverse")]
    reverse: bool,

    /// Output the final report in JSON format
    #[arg(short = 'J', long = "json")]
    json: bool,

    /// Socket buffer / window size in bytes
    #[arg(short = 'w', long = "window", value_name = "BYTES")]
    window: Option<usize>,

    /// Bind the server to a specific address
    #[arg(short = 'B', long = "bind", value_name = "ADDR")]
    bind: Option<String>,

    /// Handle one client session then exit
    #[arg(short = '1', long = "one-off")]
    one_off: bool,

    /// Verbose per-event diagnostics
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let protocol = if cli.udp {
        Protocol::Udp
    } else if cli.sctp {
        Protocol::Sctp
    } else {
        Protocol::Tcp
    };

    match cli.client {
        Some(host) => {
            let mut config = Config::client(host, cli.port)
                .with_protocol(protocol)
                .with_duration(Duration::from_secs(cli.time))
                .with_bandwidth(cli.bandwidth)
                .with_parallel(cli.parallel)
                .with_reverse(cli.reverse)
                .with_json(cli.json)
                .with_verbose(cli.verbose);
            config.length = cli.length;
            config.window = cli.window;

            let client = Client::new(config)?;
            client.run().await?;
        }
        None => {
            let mut config = Config::server(cli.port)
                .with_protocol(protocol)
                .with_one_off(cli.one_off)
                .with_verbose(cli.verbose);
            config.window = cli.window;
            if let Some(bind) = cli.bind {
                config.bind_addr = Some(bind.parse()?);
            }

            let server = Server::new(config);
            server.run().await?;
        }
    }

    Ok(())
}
