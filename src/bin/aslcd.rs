//! aslcd - ASL letter capture daemon
//!
//! This daemon:
//! 1. Loads the capture configuration (ASL_CONFIG + ASL_* overrides)
//! 2. Opens the frame source and the classifier backend
//! 3. Runs the capture service (source pump + pipeline worker)
//! 4. Reads start/stop/shot/grant/status/quit from stdin
//! 5. Renders predictions and notices on the main thread

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use asl_capture::ingest::open_source;
use asl_capture::sink::{ChannelDisplay, ResultBoard, StorageCapabilities, UiEvent};
use asl_capture::{CaptureConfig, CaptureService, Permissions, Pipeline, RateGate};

const UI_TICK: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "aslcd", about = "Capture camera frames and classify ASL letters")]
struct Args {
    /// JSON config file read instead of ASL_CONFIG; ASL_* config overrides are
    /// skipped, ASL_SCOPED_STORAGE still applies
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Start capturing immediately
    #[arg(long)]
    autostart: bool,

    /// Platform offers a managed media collection
    #[arg(long, env = "ASL_SCOPED_STORAGE")]
    scoped_storage: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Shot,
    Grant(Permissions),
    Status,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let all = Permissions::default();
        let none = Permissions {
            camera: false,
            storage: false,
        };
        match line.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Command::Start),
            "grant" => Some(Command::Grant(all)),
            "grant camera" => Some(Command::Grant(Permissions {
                camera: true,
                ..none
            })),
            "grant storage" => Some(Command::Grant(Permissions {
                storage: true,
                ..none
            })),
            "stop" => Some(Command::Stop),
            "shot" | "capture" => Some(Command::Shot),
            "status" => Some(Command::Status),
            "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => CaptureConfig::from_path(path)?,
        None => CaptureConfig::load()?,
    };
    cfg.storage.scoped_storage |= args.scoped_storage;
    let caps = StorageCapabilities {
        scoped_storage: cfg.storage.scoped_storage,
    };

    let (ui_tx, ui_rx) = mpsc::channel::<UiEvent>();
    let pipeline = Pipeline::from_config(&cfg, Box::new(ChannelDisplay::new(ui_tx.clone())), &caps)?;
    let source = open_source(&cfg.source)?;
    let mut service = CaptureService::spawn(
        source,
        pipeline,
        RateGate::new(cfg.trigger),
        cfg.permissions,
        Box::new(ChannelDisplay::new(ui_tx)),
    )?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    let ctrlc_tx = cmd_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Quit);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    std::thread::Builder::new()
        .name("aslcd-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(cmd) => {
                        if cmd_tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => eprintln!("unknown action '{}' (start|stop|shot|grant [camera|storage]|status|quit)", line.trim()),
                }
            }
            log::debug!("stdin closed; waiting for Ctrl-C");
        })?;

    log::info!(
        "aslcd ready: source={} trigger={} (actions: start, stop, shot, grant, status, quit)",
        cfg.source.url,
        cfg.trigger.label()
    );

    let mut board = ResultBoard::new();
    println!("{}", board.text());
    if args.autostart {
        if let Err(e) = service.start() {
            log::warn!("autostart failed: {:#}", e);
        }
    }

    loop {
        render(&mut board, &ui_rx);
        match cmd_rx.recv_timeout(UI_TICK) {
            Ok(Command::Start) => {
                if let Err(e) = service.start() {
                    log::warn!("{:#}", e);
                }
            }
            Ok(Command::Stop) => {
                service.stop();
            }
            Ok(Command::Shot) => {
                if !service.request_shot() {
                    eprintln!("shot ignored (capturing must be on in manual mode)");
                }
            }
            Ok(Command::Grant(granted)) => {
                if let Err(e) = service.grant(granted) {
                    log::warn!("grant failed: {:#}", e);
                }
            }
            Ok(Command::Status) => {
                println!("state={:?} {}", service.state(), service.stats());
            }
            Ok(Command::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    log::info!("shutdown requested, stopping capture service...");
    service.shutdown();
    render(&mut board, &ui_rx);
    Ok(())
}

fn render(board: &mut ResultBoard, events: &mpsc::Receiver<UiEvent>) {
    while let Ok(event) = events.try_recv() {
        match board.apply(&event) {
            Some(toast) => println!("[notice] {}", toast),
            None => println!("{}", board.text()),
        }
    }
}
