use clap::{Args, Parser, Subcommand};

use crate::protocol::{Role, Topic};

/// Ports below this are reserved and refused on both sides.
pub const MIN_PORT: u16 = 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the topic server on all interfaces.
    Server(ServerArgs),
    /// Connect to a server as a publisher or subscriber.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on (1024-65535).
    #[arg(value_parser = parse_port)]
    pub port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address or host name of the server.
    pub server_ip: String,

    /// Port the server listens on (1024-65535).
    #[arg(value_parser = parse_port)]
    pub server_port: u16,

    /// PUBLISHER or SUBSCRIBER, case-insensitive.
    #[arg(value_parser = parse_role)]
    pub role: Role,

    /// Topic to publish on or subscribe to, e.g. NEWS.
    #[arg(value_parser = parse_topic)]
    pub topic: Topic,
}

fn parse_port(raw: &str) -> Result<u16, String> {
    let port: u16 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a valid port number"))?;
    if port < MIN_PORT {
        return Err(format!("port must be between {MIN_PORT} and 65535"));
    }
    Ok(port)
}

fn parse_role(raw: &str) -> Result<Role, String> {
    raw.parse::<Role>().map_err(|err| err.to_string())
}

fn parse_topic(raw: &str) -> Result<Topic, String> {
    Topic::new(raw).ok_or_else(|| "topic cannot be empty".to_string())
}
