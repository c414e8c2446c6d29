use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use impostor_client::{RoomEvent, RoomProxy};
use impostor_common::protocol::{GameConfig, RoomSnapshot};

/// Impostor Client - join a room from the terminal and see your card
#[derive(Parser, Debug)]
#[command(name = "impostor-client", version, about)]
struct Args {
    /// Server WebSocket URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3001/ws")]
    server: String,

    /// Player name
    #[arg(short, long)]
    name: String,

    /// Room code to join (or to create with --create; blank lets the server pick)
    #[arg(short, long, default_value = "")]
    room: String,

    /// Create the room and act as host
    #[arg(long)]
    create: bool,

    /// Number of impostors to deal when starting as host
    #[arg(long, default_value_t = 1)]
    impostors: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "impostor_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let proxy = RoomProxy::connect(&args.server).await?;
    let mut events = proxy.subscribe().await;

    let room = if args.create {
        proxy.create_room(&args.room, &args.name).await?
    } else {
        proxy.join_room(&args.room, &args.name).await?
    };
    println!("In room {} (host: {})", room.code, room.host);
    print_players(&room);
    if args.create {
        println!("Press Enter to deal once everyone has joined.");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                RoomEvent::RoomUpdated(room) => {
                    println!("Room {} updated (host: {})", room.code, room.host);
                    print_players(&room);
                }
                RoomEvent::GameStarted(data) => {
                    match proxy.my_role().await {
                        Some(role) => println!("Your card: {:?}", role),
                        None => println!("The game started but no card was dealt to you"),
                    }
                    println!(
                        "{} innocents, {} impostors",
                        data.innocent_count, data.impostor_count
                    );
                    break;
                }
                RoomEvent::Error { message, .. } => {
                    println!("Error: {}", message);
                }
                RoomEvent::Disconnected => {
                    println!("Disconnected from server");
                    break;
                }
            },
            Ok(Some(_)) = stdin.next_line() => {
                let Some(room) = proxy.current_room().await else {
                    continue;
                };
                if room.host_player().map(|p| p.id) != proxy.player_id().await {
                    println!("Only the host can deal");
                    continue;
                }
                let seats = room.players.len();
                let impostors = args.impostors.min(seats);
                proxy
                    .start_game(GameConfig::new(seats - impostors, impostors))
                    .await?;
            }
        }
    }

    proxy.disconnect();
    Ok(())
}

fn print_players(room: &RoomSnapshot) {
    for (seat, player) in room.players.iter().enumerate() {
        let marker = if player.is_host { " (host)" } else { "" };
        println!("  {}. {}{}", seat + 1, player.name, marker);
    }
}
