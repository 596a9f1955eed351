use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_QUEUE_CAPACITY;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat hub, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a hub and participate in the chat.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Messages buffered per session before new ones are dropped for it.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Nickname shown as the sender of your messages.
    #[arg(long)]
    pub nickname: String,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let cli = Cli::try_parse_from(["chat_hub", "server"]).expect("parse");
        match cli.command {
            Command::Server(args) => {
                assert_eq!(args.listen, "127.0.0.1:5000".parse().expect("addr"));
                assert_eq!(args.queue_capacity, DEFAULT_QUEUE_CAPACITY);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn client_requires_nickname() {
        assert!(Cli::try_parse_from(["chat_hub", "client"]).is_err());
        let cli = Cli::try_parse_from(["chat_hub", "client", "--nickname", "alice"]).expect("parse");
        assert!(matches!(cli.command, Command::Client(ClientArgs { ref nickname, .. }) if nickname == "alice"));
    }
}
