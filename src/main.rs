use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ydt_serial_link::stdio_helper::{ConsoleInput, InputEvent, print_input_bar};
use ydt_serial_link::transport::wait_for_port;
use ydt_serial_link::{
    CommandRegistry, LinkConfig, ProtocolEngine, ProtocolError, Record, ReturnCode, SendOutcome,
    SerialTransport, Session, TransportError, terminal_end, terminal_start,
};

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                             Globals
// —————————————————————————————————————————————————————————————————————————————————————————————————

const PORT_SEARCH_ATTEMPTS: u32 = 10;
const PORT_SEARCH_INTERVAL: Duration = Duration::from_secs(1);
const CONSOLE_TICK: Duration = Duration::from_millis(10);

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                               CLI
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Parser)]
#[command(name = "ydt-serial-link", version, about = "YD/T 1363 serial link")]
struct Cli {
    /// Link config: serial settings, device address, command schema
    #[arg(short, long)]
    config: PathBuf,

    /// Serial port, overrides the config. Empty picks the highest numbered port
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    baud: Option<u32>,

    /// Device address, overrides the config
    #[arg(short, long)]
    address: Option<u8>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// List configured commands
    List,
    /// Send one command and print the reply as JSON
    Send {
        key: String,
        /// Params as a JSON object
        #[arg(default_value = "{}")]
        data: String,
    },
    /// Interactive console, one `key {json}` per line
    Console,
    /// Read every attributes and timeseries command each interval, print the merged replies
    Poll {
        /// Overrides `pollIntervalMs` from the config
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },
    /// Act as the device: answer requests with canned values
    Respond {
        /// JSON object: command key -> value fields
        #[arg(short, long)]
        values: Option<PathBuf>,
    },
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Main
// —————————————————————————————————————————————————————————————————————————————————————————————————

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with_target(false)
        .init();

    let mut config = LinkConfig::load(&cli.config).context("Failed to load config")?;
    let registry = Arc::new(CommandRegistry::from_schema(config.commands.clone()).context("Invalid command schema")?);

    if let Mode::List = cli.mode {
        list_commands(&registry);
        return Ok(());
    }

    // ---- Overrides
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    let address = cli.address.unwrap_or(config.address);

    if config.serial.port.is_empty() {
        info!("Port not provided. Connecting to largest port number.");
    }
    config.serial.port = wait_for_port(&config.serial.port, PORT_SEARCH_ATTEMPTS, PORT_SEARCH_INTERVAL)
        .context("Failed to find port")?;

    let transport = SerialTransport::new(config.serial.clone());
    let mut engine = ProtocolEngine::new(Arc::clone(&registry), transport, address);
    let mut session = engine
        .connect()
        .with_context(|| format!("Failed to open {}", config.serial.port))?;

    match cli.mode {
        Mode::List => Ok(()),
        Mode::Send { key, data } => send_once(&mut session, &key, &data),
        Mode::Console => run_console(&mut session, &config.serial.port, address),
        Mode::Poll { interval_ms } => {
            let interval = interval_ms.map_or(config.poll_interval(), Duration::from_millis);
            run_poller(&mut session, interval)
        }
        Mode::Respond { values } => run_responder(&mut session, values),
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                            Functions
// —————————————————————————————————————————————————————————————————————————————————————————————————

fn list_commands(registry: &CommandRegistry) {
    for command in registry.iter() {
        println!(
            "{:<14} {:<24} cid1={:#04X} cid2={:#04X} params={} values={}",
            command.group.to_string(),
            command.key,
            command.id1,
            command.id2,
            command.params.len(),
            command.values.len(),
        );
    }
}

/// `key` and JSON params -> record, using the command's param fields
fn parse_request(registry: &CommandRegistry, key: &str, data: &str) -> Result<Record> {
    let json: serde_json::Value = serde_json::from_str(data).context("Params are not valid JSON")?;

    match registry.get_by_key(key) {
        Some(command) => Ok(command.params_from_json(&json)?),
        // Let the engine report it
        None => Ok(Record::new()),
    }
}

/// Cleared by Ctrl+C
fn run_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst)).context("Error setting Ctrl-C handler")?;
    Ok(running)
}

fn print_outcome(key: &str, outcome: SendOutcome) -> Result<()> {
    match outcome {
        SendOutcome::CommandNotFound => bail!("Command '{key}' not found"),
        SendOutcome::FrameNotBuilt => bail!("Could not build a frame for '{key}', check its params"),
        SendOutcome::Sent => println!("{key}: sent"),
        SendOutcome::Reply(values) => println!("{key}: {}", serde_json::to_string(&values)?),
    }
    Ok(())
}

// ———————————————————————————————————————————— Send ———————————————————————————————————————————————

fn send_once(session: &mut Session<'_, SerialTransport>, key: &str, data: &str) -> Result<()> {
    let request = parse_request(session.registry(), key, data)?;
    let outcome = session.send_command(key, &request)?;
    print_outcome(key, outcome)
}

// ——————————————————————————————————————————— Console —————————————————————————————————————————————

fn run_console(session: &mut Session<'_, SerialTransport>, port: &str, address: u8) -> Result<()> {
    terminal_start!().context("Failed to init terminal")?;

    println!("\n=== Serial Link Started ===");
    println!("     YD/T 1363 on {port}, address {address:#04X}\n");
    println!("Enter `key {{json}}`. Ctrl+C to exit\n");

    let result = console_loop(session, &format!("{port}@{address:#04X}"));

    // Terminal first, the session closes the port when it drops in `main`
    terminal_end!();
    result
}

fn console_loop(session: &mut Session<'_, SerialTransport>, status: &str) -> Result<()> {
    let mut input = ConsoleInput::default();

    loop {
        match input.poll()? {
            InputEvent::Quit => return Ok(()),
            InputEvent::Line(line) => {
                let line = line.trim();
                let (key, data) = line.split_once(char::is_whitespace).unwrap_or((line, "{}"));

                println!("\n>>: {line}");
                let result = parse_request(session.registry(), key, data)
                    .and_then(|request| Ok(session.send_command(key, &request)?))
                    .and_then(|outcome| print_outcome(key, outcome));
                if let Err(e) = result {
                    eprintln!("Error: {e:#}");
                }
            }
            InputEvent::Pending => {}
        }

        print_input_bar(status, input.current())?;
        sleep(CONSOLE_TICK);
    }
}

// ———————————————————————————————————————————— Poll ———————————————————————————————————————————————

fn run_poller(session: &mut Session<'_, SerialTransport>, interval: Duration) -> Result<()> {
    let running = run_flag()?;
    info!("Polling every {} ms. Ctrl+C to exit", interval.as_millis());

    while running.load(Ordering::SeqCst) {
        let report = session.poll_cycle()?;
        println!("{}", serde_json::to_string(&report)?);
        sleep(interval);
    }

    info!("Poller stopped");
    Ok(())
}

// —————————————————————————————————————————— Responder ————————————————————————————————————————————

fn run_responder(session: &mut Session<'_, SerialTransport>, values: Option<PathBuf>) -> Result<()> {
    let canned: HashMap<String, serde_json::Value> = match values {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text).context("Values file must be a JSON object")?
        }
        None => HashMap::new(),
    };

    let running = run_flag()?;
    info!("Responding as the device. Ctrl+C to exit");

    while running.load(Ordering::SeqCst) {
        match session.try_receive_command() {
            // Timeout > Idle
            Ok(None) => continue,

            Ok(Some((command, request))) => {
                let reply = match canned.get(&command.key).map(|json| command.values_from_json(json)) {
                    Some(Ok(reply)) => reply,
                    Some(Err(e)) => {
                        warn!("Canned values for '{}' do not fit: {e}", command.key);
                        session.send_response(&command, ReturnCode::InvalidData, &Record::new())?;
                        continue;
                    }
                    None => Record::new(),
                };
                info!("'{}' {request:?} -> {reply:?}", command.key);
                session.send_response(&command, ReturnCode::Ok, &reply)?;
            }

            // Started, then stalled
            Err(ProtocolError::Transport(e @ TransportError::ShortRead { .. })) => {
                warn!("Partial frame dropped: {e}");
            }
            Err(e @ ProtocolError::Transport(_)) => {
                error!("{e}");
                return Err(e.into());
            }
            Err(e) => {
                let Some(code) = e.return_code()
                else {
                    warn!("Dropped request: {e}");
                    continue;
                };
                // CID1 is only known once the frame resolved
                let id1 = e.request_id1().unwrap_or(0x00);
                warn!("Rejected request: {e}");
                session.send_return_code(id1, code)?;
            }
        }
    }

    info!("Responder stopped");
    Ok(())
}
