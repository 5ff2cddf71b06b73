//! The originating side of the tunnel: listens for TCP connections and
//! multiplexes them over a spawned child process's stdio.

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "multiplex", version, author, about = "TCP stream multiplexer")]
struct Cli {
    /// TCP port to accept connections on.
    #[clap(long)]
    listen: u16,

    /// Command to spawn; its stdout is read as the framed pipe and its
    /// stdin is written to as the framed pipe.
    #[clap(long)]
    run: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> stream_mux::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let cli = Cli::parse();

    let local = tokio::task::LocalSet::new();
    local.run_until(stream_mux::multiplexer::run(cli.listen, &cli.run)).await
}
