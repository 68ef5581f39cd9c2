//! The relay server executable.

use clap::Parser;

use tandem_collab::server::{RelayServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "tandem-server", version, about = "Relay server for tandem sessions")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = ":8080")]
    addr: String,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let server = RelayServer::new(ServerConfig {
        bind_addr: args.addr,
    });

    if let Err(err) = server.run().await {
        log::error!("server exited: {err}");
        std::process::exit(1);
    }
}
