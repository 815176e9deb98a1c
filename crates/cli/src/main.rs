use std::io;

use clap::Parser;
use rtsp_relay::{Config, Server};

#[derive(Parser)]
#[command(name = "rtsp-server", about = "Standalone RTSP relay server")]
struct Args {
    /// Bind address (host:port), overrides the config file's listen_address/listen_port
    #[arg(long, short)]
    bind: Option<String>,

    /// Path to a JSON configuration file (see Config for recognized keys)
    #[arg(long)]
    config: Option<String>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(bind) = &args.bind {
        match bind.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => {
                    config.listen_address = host.to_string();
                    config.listen_port = port;
                }
                Err(_) => {
                    eprintln!("Invalid --bind port: {}", bind);
                    std::process::exit(1);
                }
            },
            None => {
                eprintln!("Invalid --bind value, expected host:port: {}", bind);
                std::process::exit(1);
            }
        }
    }

    let mut server = Server::new(config);

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        std::process::exit(2);
    }

    println!(
        "RTSP server on {} — press Enter to stop",
        server.config().bind_addr()
    );
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    server.stop();
}
