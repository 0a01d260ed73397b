use clap::Parser;
use shared::{decode, Message, MessageType};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::sleep;

/// Scripted client that registers, enters a game and moves its paddle
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:4000")]
    server: String,
    /// Display name to register
    #[arg(short, long, default_value = "tester")]
    name: String,
    /// Join this game instead of creating one
    #[arg(short, long)]
    join: Option<u32>,
    /// Number of position updates to send
    #[arg(short, long, default_value_t = 10)]
    updates: u32,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: i64,
}

impl Connection {
    async fn send(&mut self, message: Message) -> Result<i64, Box<dyn std::error::Error>> {
        let id = self.next_id;
        self.next_id += 1;
        let message = message.with_id(id);
        println!("-> {}", message.encode());
        self.writer.write_all(&message.to_bytes()).await?;
        Ok(id)
    }

    /// Reads frames until the reply to request `id` arrives, printing
    /// snapshots on the way.
    async fn reply(&mut self, id: i64) -> Result<Message, Box<dyn std::error::Error>> {
        loop {
            let message = decode(&mut self.reader).await?;
            if message.rid == id {
                println!("<- {}", message.encode());
                return Ok(message);
            }
            print_snapshot(&message);
        }
    }

    async fn request(&mut self, message: Message) -> Result<Message, Box<dyn std::error::Error>> {
        let id = self.send(message).await?;
        let reply = self.reply(id).await?;
        if reply.get("status") != Some("ok") {
            return Err(format!(
                "request {} failed: {}",
                id,
                reply.get("msg").unwrap_or("no message")
            )
            .into());
        }
        Ok(reply)
    }
}

fn print_snapshot(message: &Message) {
    if message.message_type() != Some(MessageType::GameState) {
        println!("<- unexpected {}", message.encode());
        return;
    }

    println!(
        "state #{}: ball=({}, {}) speed={} score={}:{} paused={}",
        message.id,
        message.get("ballX").unwrap_or("?"),
        message.get("ballY").unwrap_or("?"),
        message.get("ballSpeed").unwrap_or("?"),
        message.get("score1").unwrap_or("?"),
        message.get("score2").unwrap_or("?"),
        message.get("paused").unwrap_or("?"),
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = TcpStream::connect(&args.server).await?;
    println!("Connected to {} from {}", args.server, socket.local_addr()?);
    let (read_half, writer) = socket.into_split();
    let mut connection = Connection {
        reader: BufReader::new(read_half),
        writer,
        next_id: 1,
    };

    let mut banner = String::new();
    connection.reader.read_line(&mut banner).await?;
    println!("Banner: {}", banner.trim_end());

    let registered = connection
        .request(Message::new(MessageType::Register).with("name", &args.name))
        .await?;
    let player_id = registered.get("playerID").unwrap_or("0").to_string();
    println!("Registered as player {}", player_id);

    match args.join {
        Some(game_id) => {
            let joined = connection
                .request(Message::new(MessageType::JoinGame).with("gameID", game_id))
                .await?;
            println!(
                "Joined game {} as player {}",
                game_id,
                joined.get("player").unwrap_or("?")
            );
        }
        None => {
            let created = connection
                .request(Message::new(MessageType::CreateGame))
                .await?;
            println!("Created game {}", created.get("gameID").unwrap_or("?"));
        }
    }

    // Sweep the paddle back and forth
    for i in 0..args.updates {
        let x = 400.0 + 300.0 * (i as f64 / 5.0).sin();
        connection
            .send(
                Message::new(MessageType::PlayerPositionUpdate)
                    .with("playerID", &player_id)
                    .with("x", format!("{:.1}", x))
                    .with("y", 0),
            )
            .await?;

        let snapshot = decode(&mut connection.reader).await?;
        print_snapshot(&snapshot);
        sleep(Duration::from_millis(250)).await;
    }

    connection
        .request(Message::new(MessageType::Disconnect).with("playerID", &player_id))
        .await?;
    println!("Test client finished");

    Ok(())
}
