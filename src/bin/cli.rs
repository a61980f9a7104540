use anyhow::{anyhow, bail, Context};
use crabsignal::bus::stomp::StompSettings;
use crabsignal::commands::{format_notice, format_snapshot, parse_line, ConsoleCommand, HELP};
use crabsignal::{
    HarnessConfig, HttpCallApi, LocalAction, LocalCallApi, LocalHub, Notice, OrchestratorSettings,
    RtcSettings, SignalingOrchestrator, StompBus, WebRtcPeerFactory,
};
use std::env;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type ActionSlot = Arc<Mutex<Option<mpsc::UnboundedSender<LocalAction>>>>;

fn main() -> anyhow::Result<()> {
    crabsignal::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabsignal-cli <connect [--config <path>] | loopback | init-config [path]>");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "connect" => cmd_connect(&args),
        "loopback" => cmd_loopback(),
        "init-config" => cmd_init_config(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn cmd_init_config(args: &[String]) -> anyhow::Result<()> {
    let path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(HarnessConfig::default_path);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    HarnessConfig::default().save_to_file(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn cmd_connect(args: &[String]) -> anyhow::Result<()> {
    let mut config_path = HarnessConfig::default_path();
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = args
                    .get(i)
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow!("--config needs a path"))?;
            }
            other => bail!("unexpected argument {}", other),
        }
        i += 1;
    }

    let config = HarnessConfig::load(&config_path)?;
    runtime()?.block_on(connect(config))
}

async fn connect(config: HarnessConfig) -> anyhow::Result<()> {
    let (bus, bus_events) =
        StompBus::connect(StompSettings::from_config(&config.bus, &config.identity.token)).await?;
    let calls = Arc::new(HttpCallApi::new(
        config.api.base_url.clone(),
        config.identity.token.clone(),
    ));
    let peers = Arc::new(WebRtcPeerFactory::new(RtcSettings::from(&config.rtc)));

    let (mut orchestrator, notices) = SignalingOrchestrator::new(
        OrchestratorSettings::from_config(&config),
        bus,
        calls,
        peers,
    );
    orchestrator.start().await?;
    println!("Connected as {}. Type 'help' for commands.", config.identity.user_id);

    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let slot: ActionSlot = Arc::new(Mutex::new(Some(actions_tx)));

    let ctrlc_slot = Arc::clone(&slot);
    ctrlc::set_handler(move || {
        // Dropping the sender stops the orchestrator, which ends any live call.
        if let Some(tx) = ctrlc_slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(LocalAction::End);
        }
    })
    .context("failed to install Ctrl-C handler")?;

    let snapshots = orchestrator.snapshots();
    let console_slot = Arc::clone(&slot);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_line(&line) {
                Ok(Some(ConsoleCommand::Action(action))) => {
                    let guard = console_slot.lock().unwrap_or_else(|e| e.into_inner());
                    match guard.as_ref() {
                        Some(tx) => {
                            let _ = tx.send(action);
                        }
                        None => break,
                    }
                }
                Ok(Some(ConsoleCommand::Status)) => println!("{}", format_snapshot(&snapshots.borrow())),
                Ok(Some(ConsoleCommand::Help)) => println!("{}", HELP),
                Ok(Some(ConsoleCommand::Quit)) => break,
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
        }
        console_slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    });

    let printer = tokio::spawn(print_notices(notices));
    orchestrator.run(bus_events, actions_rx).await;
    printer.abort();
    Ok(())
}

async fn print_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        println!("{}", format_notice(&notice));
    }
}

struct Party {
    name: &'static str,
    actions: mpsc::UnboundedSender<LocalAction>,
    notices: mpsc::UnboundedReceiver<Notice>,
}

impl Party {
    fn perform(&self, action: LocalAction) -> anyhow::Result<()> {
        println!("{} > {:?}", self.name, action);
        self.actions
            .send(action)
            .map_err(|_| anyhow!("{} stopped", self.name))
    }

    async fn wait_for(&mut self, what: &str, pred: impl Fn(&Notice) -> bool) -> anyhow::Result<Notice> {
        let deadline = Duration::from_secs(20);
        tokio::time::timeout(deadline, async {
            while let Some(notice) = self.notices.recv().await {
                println!("{} {}", self.name, format_notice(&notice));
                if pred(&notice) {
                    return Ok(notice);
                }
                if let Notice::Error { message, .. } = &notice {
                    bail!("{} failed while waiting for {}: {}", self.name, what, message);
                }
            }
            bail!("{} stopped before {}", self.name, what)
        })
        .await
        .map_err(|_| anyhow!("timed out waiting for {} on {}", what, self.name))?
    }
}

fn spawn_party(hub: &Arc<LocalHub>, config: &HarnessConfig, name: &'static str) -> Party {
    let (bus, bus_events) = hub.connect(name);
    let calls = Arc::new(LocalCallApi::new(Arc::clone(hub), name));
    let peers = Arc::new(WebRtcPeerFactory::new(RtcSettings::from(&config.rtc)));
    let settings = OrchestratorSettings::from_config(config).with_local_id(name);
    let (mut orchestrator, notices) = SignalingOrchestrator::new(settings, bus, calls, peers);
    let (actions, actions_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(e) = orchestrator.start().await {
            log::error!("{} could not subscribe: {}", name, e);
            return;
        }
        orchestrator.run(bus_events, actions_rx).await;
    });

    Party {
        name,
        actions,
        notices,
    }
}

fn cmd_loopback() -> anyhow::Result<()> {
    runtime()?.block_on(loopback())
}

async fn loopback() -> anyhow::Result<()> {
    let mut config = HarnessConfig::default();
    // Host candidates are enough on one machine.
    config.rtc.ice_servers.clear();
    let hub = LocalHub::new(&config.bus);

    let mut alice = spawn_party(&hub, &config, "alice");
    let mut bob = spawn_party(&hub, &config, "bob");
    // Let both sides subscribe before the first call is placed.
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice.perform(LocalAction::CreateCall {
        target: "bob".to_string(),
        category: None,
    })?;
    bob.wait_for("incoming call", |n| {
        matches!(n, Notice::CallStatus { status, .. } if *status == crabsignal::CallStatus::Created)
    })
    .await?;

    bob.perform(LocalAction::Accept)?;
    alice
        .wait_for("acceptance", |n| {
            matches!(n, Notice::CallStatus { status, .. } if *status == crabsignal::CallStatus::Accepted)
        })
        .await?;

    alice.perform(LocalAction::StartOffer)?;
    alice
        .wait_for("data channel", |n| matches!(n, Notice::DataChannelOpen { .. }))
        .await?;
    bob.wait_for("data channel", |n| matches!(n, Notice::DataChannelOpen { .. }))
        .await?;

    alice.perform(LocalAction::SendText("hello from alice".to_string()))?;
    bob.wait_for("message", |n| matches!(n, Notice::DataMessage { .. }))
        .await?;

    alice.perform(LocalAction::End)?;
    bob.wait_for("hang-up", |n| {
        matches!(n, Notice::CallStatus { status, .. } if *status == crabsignal::CallStatus::Ended)
    })
    .await?;

    println!("loopback call completed");
    Ok(())
}
