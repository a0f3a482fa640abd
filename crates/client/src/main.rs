// Headless scrawl client: join a document and edit it from stdin.
//
// Commands:
//   i <pos> <text...>   insert text at pos
//   d <pos> <len>       delete len characters at pos
//   q                   quit

use anyhow::Result;
use clap::Parser;
use scrawl_client::connection::{self, ConnectOptions, DocEvent, EditCommand};
use scrawl_core::types::{ClientId, DocId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scrawl-client", about = "Headless collaborative text client")]
struct Args {
    /// WebSocket endpoint of the scrawl server.
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Document to join.
    #[arg(long, default_value = "default")]
    doc: String,

    /// Display name shown to other clients.
    #[arg(long, default_value = "anonymous")]
    name: String,

    /// Stable client id, kept across reconnects.
    #[arg(long)]
    client_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = ConnectOptions {
        url: args.url,
        doc_id: DocId::new(args.doc),
        client_name: args.name,
        client_id: args.client_id.map(ClientId::new),
    };

    let (commands, mut events) = connection::spawn(options);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                DocEvent::Joined { client_id, seq, text } => {
                    println!("joined as {client_id} at seq {seq}: {text:?}");
                }
                DocEvent::Changed { text } => println!("doc: {text:?}"),
                DocEvent::PeerJoined { name, color, .. } => {
                    println!("* {name} joined ({color})");
                }
                DocEvent::PeerLeft { client_id } => println!("* {client_id} left"),
                DocEvent::PeerCursor { .. } => {}
                DocEvent::ConnectionLost => println!("* connection lost, retrying"),
                DocEvent::ServerError { message } => println!("! {message}"),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Some(Input::Edit(command)) => {
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            Some(Input::Quit) => break,
            None => println!("usage: i <pos> <text> | d <pos> <len> | q"),
        }
    }

    Ok(())
}

enum Input {
    Edit(EditCommand),
    Quit,
}

fn parse_command(line: &str) -> Option<Input> {
    let line = line.trim();
    if line == "q" {
        return Some(Input::Quit);
    }

    let (verb, rest) = line.split_once(' ')?;
    match verb {
        "i" => {
            let (pos, text) = rest.split_once(' ')?;
            let pos = pos.parse().ok()?;
            Some(Input::Edit(EditCommand::Insert { pos, text: text.to_owned() }))
        }
        "d" => {
            let (pos, len) = rest.split_once(' ')?;
            Some(Input::Edit(EditCommand::Delete {
                pos: pos.parse().ok()?,
                len: len.parse().ok()?,
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insert_and_delete() {
        assert!(matches!(
            parse_command("i 5 hello world"),
            Some(Input::Edit(EditCommand::Insert { pos: 5, ref text })) if text == "hello world"
        ));
        assert!(matches!(
            parse_command("d 2 3"),
            Some(Input::Edit(EditCommand::Delete { pos: 2, len: 3 }))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_command("").is_none());
        assert!(parse_command("x 1 2").is_none());
        assert!(parse_command("i notanumber x").is_none());
        assert!(parse_command("d 1").is_none());
    }

    #[test]
    fn quit_is_recognized() {
        assert!(matches!(parse_command("q"), Some(Input::Quit)));
    }
}
