use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use tether::{
    Channel, Client, ClientConfig, ClientEvent, ConnectOptions, UdpDatagramSocket,
};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Reliable UDP client: sends stdin lines, prints what comes back")]
struct Args {
    host: String,

    #[arg(default_value_t = 7777)]
    port: u16,

    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: String,

    #[arg(short, long, help = "JSON file with connect options")]
    options: Option<PathBuf>,

    #[arg(long, help = "Send stdin lines on the unreliable channel")]
    unreliable: bool,

    #[arg(long, help = "Fast resend threshold, overrides the options file")]
    fast_resend: Option<u32>,

    #[arg(long, default_value_t = 10, help = "Idle timeout in seconds")]
    idle_timeout: u64,

    #[arg(long, default_value_t = 2.0, help = "Seconds between clock sync pings")]
    ping_frequency: f64,
}

const MIN_PING_FREQUENCY: Duration = Duration::from_millis(100);

enum Input {
    Line(String),
    Closed,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut options = match &args.options {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<ConnectOptions>(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => ConnectOptions::default(),
    };
    if let Some(fast_resend) = args.fast_resend {
        options.fast_resend = fast_resend;
    }

    let config = client_config(&args)?;

    let socket = UdpDatagramSocket::bind(&args.bind)
        .with_context(|| format!("binding {}", args.bind))?;
    log::info!("Bound to {}", socket.local_addr());

    let interval = options.interval();
    let channel = if args.unreliable {
        Channel::Unreliable
    } else {
        Channel::Reliable
    };

    let mut client = Client::new(socket, config);
    client.connect(&args.host, args.port, options);

    let input = spawn_stdin_reader();
    run(&mut client, &input, channel, interval);

    Ok(())
}

fn client_config(args: &Args) -> Result<ClientConfig> {
    let ping_frequency = Duration::try_from_secs_f64(args.ping_frequency)
        .with_context(|| format!("invalid --ping-frequency {}", args.ping_frequency))?
        .max(MIN_PING_FREQUENCY);

    Ok(ClientConfig {
        idle_timeout: Duration::from_secs(args.idle_timeout),
        ping_frequency,
        ..Default::default()
    })
}

fn spawn_stdin_reader() -> Receiver<Input> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(Input::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(Input::Closed);
    });
    rx
}

fn run(
    client: &mut Client<UdpDatagramSocket>,
    input: &Receiver<Input>,
    channel: Channel,
    interval: Duration,
) {
    let mut input_open = true;

    loop {
        client.tick();

        for event in client.drain_events() {
            match event {
                ClientEvent::Connected => log::info!("Connected, type to send"),
                ClientEvent::Data {
                    channel: from,
                    payload,
                } => {
                    println!("[{:?}] {}", from, String::from_utf8_lossy(&payload));
                }
                ClientEvent::Disconnected { reason } => {
                    log::info!("Disconnected: {}", reason.as_str());
                    return;
                }
            }
        }

        while input_open {
            match input.try_recv() {
                Ok(Input::Line(line)) => handle_line(client, &line, channel),
                Ok(Input::Closed) | Err(TryRecvError::Disconnected) => {
                    input_open = false;
                    client.disconnect();
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        thread::sleep(interval);
    }
}

fn handle_line(client: &mut Client<UdpDatagramSocket>, line: &str, channel: Channel) {
    match line.trim() {
        "" => {}
        "/quit" => client.disconnect(),
        "/pause" => client.pause(),
        "/resume" => client.unpause(),
        "/stats" => match client.stats() {
            Some(stats) => println!(
                "sent {} ({} bytes), received {} ({} bytes), rtt {:.1}ms, retransmits {}, cwnd {}",
                stats.packets_sent,
                stats.bytes_sent,
                stats.packets_received,
                stats.bytes_received,
                stats.rtt_ms,
                stats.retransmits,
                stats.congestion_window
            ),
            None => println!("no connection"),
        },
        "/time" => {
            let time = client.network_time();
            println!(
                "time {:.3}s, offset {:.3}s (sd {:.4}), rtt {:.1}ms",
                client.time(),
                time.offset(),
                time.time_sd(),
                time.rtt() * 1000.0
            );
        }
        _ => {
            // rejected sends are already logged by the client
            let _ = client.send(line.as_bytes(), channel);
        }
    }
}
