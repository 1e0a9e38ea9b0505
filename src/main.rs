use anyhow::Context;
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};

use bandcue::cue::{CueTimer, DEFAULT_CUE_MS};
use bandcue::local::LocalStore;
use bandcue::model::CueDraft;
use bandcue::relay;
use bandcue::session::SessionManager;
use bandcue::store::{MemoryStore, RestStore, Store};

// the shared static secret; override with STORE_SECRET
const DEFAULT_SECRET: &str = "albini12345!";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("serve") => serve().await,
        Some("lead") => console(None).await,
        Some("band") => {
            let code = args.next().context("usage: bandcue band <CODE>")?;
            console(Some(code.to_uppercase())).await
        }
        _ => {
            eprintln!("usage: bandcue <serve | lead | band CODE>");
            Ok(())
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let addr = env::var("RELAY_ADDR").unwrap_or_else(|_| "0.0.0.0:4000".into());
    let secret = env::var("STORE_SECRET").unwrap_or_else(|_| DEFAULT_SECRET.into());
    relay::serve(&addr, MemoryStore::default(), secret).await?;
    Ok(())
}

async fn console(join: Option<String>) -> anyhow::Result<()> {
    let db = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://bandcue.db?mode=rwc".into());
    let local = LocalStore::open(&db).await?;

    let secret = env::var("STORE_SECRET").unwrap_or_else(|_| DEFAULT_SECRET.into());
    let store = match env::var("STORE_URL") {
        Ok(url) => Store::Rest(RestStore::new(url, secret)),
        // without a relay every device sees its own private tree; good
        // enough for trying the lead screen, useless for a real band
        Err(_) => Store::Memory(MemoryStore::default()),
    };
    let default_ms = env::var("CUE_DEFAULT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CUE_MS);

    let mgr = SessionManager::new(store, local, CueTimer::new(default_ms));
    let resumed = mgr.resume().await?;
    if resumed {
        if let Some(id) = mgr.session_id().await {
            println!("resumed session {id}");
        }
    }

    match join {
        Some(code) => {
            if !resumed && !mgr.join_session(&code).await {
                anyhow::bail!("could not join session {code}");
            }
            println!("following session {code}; /leave to quit");
            watch_cues(&mgr);
        }
        None => {
            let id = match mgr.session_id().await {
                Some(id) if resumed => id,
                _ => mgr.create_session().await?,
            };
            println!("session code: {id}");
            println!("type a cue and press enter; /tiles, /t N, /clear, /end, /leave");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/leave" => {
                mgr.leave_session().await?;
                break;
            }
            "/end" => {
                mgr.end_session().await?;
                mgr.leave_session().await?;
                break;
            }
            "/clear" => mgr.send_cue(CueDraft::text("")).await?,
            "/tiles" => {
                for (i, tile) in mgr.session_active_tiles().iter().enumerate() {
                    println!("{:>2}: {} ({}ms)", i + 1, tile.text, tile.duration);
                }
            }
            cmd if cmd.starts_with("/t ") => {
                let tiles = mgr.session_active_tiles();
                let picked = cmd[3..]
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| tiles.get(i));
                match picked {
                    Some(tile) => mgr.send_cue(tile.into()).await?,
                    None => println!("no such tile"),
                }
            }
            text => mgr.send_cue(CueDraft::text(text)).await?,
        }
    }
    Ok(())
}

/// Prints incoming cues and the end-of-session notice for a follower.
fn watch_cues(mgr: &SessionManager<Store>) {
    let mut cue_rx = mgr.cue_timer().watch();
    let mut session_rx = mgr.watch_session();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = cue_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    match &*cue_rx.borrow_and_update() {
                        Some(cue) => println!(">> {}", cue.text),
                        None => println!(">> (clear)"),
                    }
                }
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let ended = session_rx
                        .borrow_and_update()
                        .as_ref()
                        .is_some_and(|s| !s.active);
                    if ended {
                        println!("session ended by the lead");
                        break;
                    }
                }
            }
        }
    });
}
