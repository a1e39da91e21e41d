// Idea board CLI validation tool
// Checks a running server through its health endpoint and scripted WebSocket sessions

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser)]
#[command(name = "ideaboard-cli")]
#[command(about = "Idea board server CLI validation tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:3001)
    #[arg(short, long, default_value = "127.0.0.1:3001")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Create a room and print everything the server sends
    CreateRoom {
        /// Client identity
        #[arg(short, long, default_value = "cli-owner")]
        client_id: String,

        /// Display name (optional)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Join a room and print everything the server sends
    JoinRoom {
        /// Room code to join
        #[arg(short, long)]
        room_id: String,

        /// Client identity
        #[arg(short, long, default_value = "cli-guest")]
        client_id: String,

        /// Display name (optional)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation scenarios
        #[arg(short, long)]
        all: bool,

        /// Run one scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },
}

const SCENARIOS: &[(&str, &str)] = &[
    ("create-room", "Create a room and receive joined"),
    ("join-room", "Second client joins, owner sees user_joined"),
    ("invalid-room", "Joining an unknown room yields an error"),
    ("board-flow", "Opinion, duplicate vote, delete permissions"),
    ("move", "Move is broadcast to everyone but the mover"),
];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::CreateRoom { client_id, name } => {
            let msg = json!({"type": "create", "clientId": client_id, "name": name});
            watch_room(&cli.server, msg).await;
        }
        Commands::JoinRoom {
            room_id,
            client_id,
            name,
        } => {
            let msg = json!({
                "type": "join",
                "roomId": room_id,
                "clientId": client_id,
                "name": name
            });
            watch_room(&cli.server, msg).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    match reqwest::get(&url).await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Live rooms: {}", body["rooms"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

/// Send `first` and print every server message until the connection ends.
async fn watch_room(server: &str, first: Value) {
    let Some(mut client) = Client::connect(server).await else {
        return;
    };
    if !client.send(&first).await {
        println!("{} Failed to send {}", "✗".red(), first["type"]);
        return;
    }

    println!("Press {} to disconnect.", "Ctrl+C".bold());
    while let Some(msg) = client.read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(value) = serde_json::from_str::<Value>(&text) {
                    if value["type"] == "joined" {
                        println!("\n{}", "═".repeat(50).green());
                        let code = value["roomId"].as_str().unwrap_or("?");
                        println!("{} {}", "Room code:".bold(), code.green().bold());
                        println!("{}", "═".repeat(50).green());
                    }
                }
                println!("{} {}", "◀".green(), text.bright_white());
            }
            Ok(Message::Close(_)) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
        }
    }
}

fn list_scenarios() {
    println!("\n{}", "Available scenarios:".bold());
    for (name, description) in SCENARIOS {
        println!("  {:<14} {}", name.cyan(), description);
    }
}

async fn run_scenario(server: &str, scenario: &str) {
    let passed = match scenario {
        "create-room" => validate_create_room(server).await,
        "join-room" => validate_join_room(server).await,
        "invalid-room" => validate_invalid_room(server).await,
        "board-flow" => validate_board_flow(server).await,
        "move" => validate_move(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return;
        }
    };
    report(scenario, passed);
}

async fn run_all_validations(server: &str) {
    println!("{}", "Running all validation scenarios...".cyan().bold());

    let mut failed = 0;
    for (name, _) in SCENARIOS {
        let passed = match *name {
            "create-room" => validate_create_room(server).await,
            "join-room" => validate_join_room(server).await,
            "invalid-room" => validate_invalid_room(server).await,
            "board-flow" => validate_board_flow(server).await,
            _ => validate_move(server).await,
        };
        report(name, passed);
        if !passed {
            failed += 1;
        }
    }

    println!("\n{}", "═".repeat(50));
    if failed == 0 {
        println!("{} All {} scenarios passed", "✓".green(), SCENARIOS.len());
    } else {
        println!("{} {} of {} scenarios failed", "✗".red(), failed, SCENARIOS.len());
        std::process::exit(1);
    }
}

fn report(name: &str, passed: bool) {
    if passed {
        println!("{} {}", "✓".green(), name);
    } else {
        println!("{} {}", "✗".red(), name);
    }
}

struct Client {
    write: SplitSink<Ws, Message>,
    read: SplitStream<Ws>,
}

impl Client {
    async fn connect(server: &str) -> Option<Self> {
        let url = format!("ws://{}/ws", server);
        match connect_async(&url).await {
            Ok((stream, _)) => {
                let (write, read) = stream.split();
                Some(Self { write, read })
            }
            Err(e) => {
                println!("{} Cannot connect to {}: {}", "✗".red(), url, e);
                None
            }
        }
    }

    async fn send(&mut self, value: &Value) -> bool {
        self.write.send(Message::Text(value.to_string())).await.is_ok()
    }

    /// Next JSON message within `wait`.
    async fn recv_within(&mut self, wait: Duration) -> Option<Value> {
        loop {
            match timeout(wait, self.read.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
                Ok(Some(Ok(_))) => continue,
                _ => return None,
            }
        }
    }

    async fn recv(&mut self) -> Option<Value> {
        self.recv_within(Duration::from_secs(3)).await
    }

    async fn is_silent(&mut self) -> bool {
        self.recv_within(Duration::from_millis(500)).await.is_none()
    }

    async fn create(server: &str, client_id: &str) -> Option<(Self, String)> {
        let mut client = Self::connect(server).await?;
        client.send(&json!({"type": "create", "clientId": client_id})).await;
        let joined = client.recv().await?;
        if joined["type"] != "joined" {
            println!("  expected joined, got {}", joined);
            return None;
        }
        let room_id = joined["roomId"].as_str()?.to_string();
        Some((client, room_id))
    }

    async fn join(server: &str, room_id: &str, client_id: &str) -> Option<(Self, Value)> {
        let mut client = Self::connect(server).await?;
        client
            .send(&json!({"type": "join", "roomId": room_id, "clientId": client_id}))
            .await;
        let joined = client.recv().await?;
        Some((client, joined))
    }
}

async fn validate_create_room(server: &str) -> bool {
    let Some((_client, room_id)) = Client::create(server, "cli-validate-owner").await else {
        return false;
    };
    println!("  room code: {}", room_id);
    room_id.len() == 6
}

async fn validate_join_room(server: &str) -> bool {
    let Some((mut owner, room_id)) = Client::create(server, "cli-owner").await else {
        return false;
    };
    let lower = room_id.to_lowercase();
    let Some((_guest, joined)) = Client::join(server, &lower, "cli-guest").await else {
        return false;
    };
    let notice = owner.recv().await;

    joined["type"] == "joined"
        && joined["users"].as_array().map(Vec::len) == Some(2)
        && notice.is_some_and(|n| n["type"] == "user_joined" && n["user"]["id"] == "cli-guest")
}

async fn validate_invalid_room(server: &str) -> bool {
    let Some((_client, reply)) = Client::join(server, "ZZZZZZ", "cli-lost").await else {
        return false;
    };
    reply["type"] == "error"
}

async fn validate_board_flow(server: &str) -> bool {
    let Some((mut owner, room_id)) = Client::create(server, "cli-owner").await else {
        return false;
    };
    let Some((mut guest, _)) = Client::join(server, &room_id, "cli-guest").await else {
        return false;
    };
    let _ = owner.recv().await;

    owner
        .send(&json!({"type": "opinion", "opinion": {"text": "hello", "x": 10, "y": 20}}))
        .await;
    let (Some(posted), Some(_)) = (owner.recv().await, guest.recv().await) else {
        return false;
    };
    let Some(opinion_id) = posted["opinion"]["id"].as_str().map(str::to_string) else {
        return false;
    };

    let vote = json!({"type": "vote", "opinionId": opinion_id});
    guest.send(&vote).await;
    let first_vote = owner.recv().await;
    let _ = guest.recv().await;
    guest.send(&vote).await;
    let duplicate_ignored = owner.is_silent().await;

    guest.send(&json!({"type": "delete", "opinionId": opinion_id})).await;
    let refused = guest.recv().await;

    owner.send(&json!({"type": "delete", "opinionId": opinion_id})).await;
    let deleted = guest.recv().await;

    first_vote.is_some_and(|v| v["votes"] == 1)
        && duplicate_ignored
        && refused.is_some_and(|r| r["type"] == "error")
        && deleted.is_some_and(|d| d["type"] == "deleted")
}

async fn validate_move(server: &str) -> bool {
    let Some((mut owner, room_id)) = Client::create(server, "cli-owner").await else {
        return false;
    };
    let Some((mut guest, _)) = Client::join(server, &room_id, "cli-guest").await else {
        return false;
    };
    let _ = owner.recv().await;

    owner
        .send(&json!({"type": "opinion", "opinion": {"text": "drag", "x": 0, "y": 0}}))
        .await;
    let Some(posted) = owner.recv().await else {
        return false;
    };
    let _ = guest.recv().await;

    owner
        .send(&json!({"type": "move", "opinionId": posted["opinion"]["id"], "x": 5, "y": 6}))
        .await;
    let moved = guest.recv().await;

    moved.is_some_and(|m| m["type"] == "move") && owner.is_silent().await
}
