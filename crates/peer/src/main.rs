mod car;
mod config;
mod node;
mod tui;

use std::io;
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use kartlink::{
    FixedPlayerId, MacAddressId, PacketLossSimulation, PlayerId, PlayerIdProvider, Session,
    SessionConfig, UdpBroadcastSocket,
};

use config::{Identity, PeerConfig};
use node::PeerNode;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "kartlink-peer")]
#[command(about = "Local network racing peer")]
struct Args {
    #[arg(short, long, default_value_t = kartlink::DEFAULT_PORT)]
    port: u16,

    #[arg(long, help = "Hardware address the player id is derived from")]
    mac: Option<String>,

    #[arg(long, help = "Use this player id (0-7) instead of deriving one")]
    player_id: Option<u8>,

    #[arg(long, help = "Address peers see as our source (detected if omitted)")]
    local_ip: Option<IpAddr>,

    #[arg(long, default_value = "255.255.255.255", help = "Broadcast address; a directed one such as 192.168.1.255 also locates the LAN")]
    broadcast: IpAddr,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Ready up as soon as the lobby is joined")]
    auto_ready: bool,

    #[arg(long, default_value_t = 0.0, help = "Outbound packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, help = "Leave the race after this many ticks")]
    race_ticks: Option<u32>,
}

fn identity(args: &Args) -> Result<Identity> {
    if let Some(raw) = args.player_id {
        let id = PlayerId::new(raw).with_context(|| format!("player id {} out of range", raw))?;
        return Ok(Identity::Fixed(FixedPlayerId(id)));
    }

    match &args.mac {
        Some(text) => match MacAddressId::parse(text) {
            Some(mac) => Ok(Identity::Mac(mac)),
            None => bail!("invalid hardware address '{}'", text),
        },
        None => bail!("either --mac or --player-id is required"),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = PeerConfig {
        session: SessionConfig {
            port: args.port,
            packet_loss: PacketLossSimulation::with_loss(args.loss_percent),
            ..Default::default()
        },
        identity: identity(&args)?,
        auto_ready: args.auto_ready,
        race_ticks: args.race_ticks,
    };

    let local_ip = match args.local_ip {
        Some(ip) => ip,
        None => UdpBroadcastSocket::detect_local_ip(args.broadcast).context(
            "could not detect local address; pass --local-ip or a directed --broadcast address",
        )?,
    };
    let socket = UdpBroadcastSocket::with_broadcast(local_ip, args.broadcast);

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let session = Session::start(config.session.clone(), socket, &config.identity, 0)
        .context("could not start multiplayer")?;
    log::info!(
        "Joined as {} via {}",
        config.identity.player_id(),
        args.broadcast
    );

    let mut node = PeerNode::new(session, config);

    if args.headless {
        node.run();
        log::info!("Peer shutting down");
    } else {
        run_with_tui(&mut node)?;
    }

    Ok(())
}

fn run_with_tui(node: &mut PeerNode<UdpBroadcastSocket>) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = node.running();
    let mut tui_state = TuiState::new();

    if let Some(addr) = node.session().local_addr() {
        tui_state.log_info(format!("Listening on {}", addr));
    }

    while running.load(Ordering::SeqCst) {
        node.tick_once();

        for event in node.drain_events() {
            tui_state.log_event(&event);
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => node.shutdown(),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            if let Err(e) = node.toggle_ready() {
                                tui_state.log_error(e.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let view = node.view();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &view);
        })?;
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
