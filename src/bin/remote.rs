//! The responding side of the tunnel: reads framed traffic from stdin and
//! demultiplexes it into outbound TCP connections to a configured target.

use clap::Parser;
use tokio::net::lookup_host;

#[derive(Parser, Debug)]
#[clap(name = "remote", version, author, about = "TCP stream multiplexer remote endpoint")]
struct Cli {
    /// Destination `host:port` to dial for each new channel.
    #[clap(long)]
    to: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> stream_mux::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let cli = Cli::parse();
    let target = lookup_host(cli.to.as_str())
        .await?
        .next()
        .ok_or_else(|| format!("could not resolve --to target {:?}", cli.to))?;

    let local = tokio::task::LocalSet::new();
    local.run_until(stream_mux::remote::run(target)).await
}
