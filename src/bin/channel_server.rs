use std::sync::Arc;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use mezeporta::config::ChannelConfig;
use mezeporta::servers::channel::lang::{lang_strings, parse_lang_file};
use mezeporta::servers::channel::relay::{ChatRelay, QueueRelay};
use mezeporta::servers::channel::{ChannelServer, ChannelSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/channel.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: channel_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    return Err(anyhow::anyhow!("--conf requires a FILE argument"));
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = ChannelConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;

    let mut dict = lang_strings(&config.language);
    if let Some(path) = &config.lang_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read lang file: {}", path))?;
        dict.extend(parse_lang_file(&content)?);
    }

    let pool = match &config.database {
        Some(db) => Some(
            PgPoolOptions::new()
                .max_connections(5)
                .connect(&db.url())
                .await
                .with_context(|| format!(
                    "Cannot connect to PostgreSQL (host={}:{} db={} user={})",
                    db.sql_ip, db.sql_port, db.sql_db, db.sql_id
                ))?,
        ),
        None => None,
    };

    // The Discord client itself lives elsewhere; it drains this queue.
    let relay: Option<Arc<dyn ChatRelay>> = if config.discord.enabled {
        let (relay, mut rx) = QueueRelay::new();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                tracing::info!("[channel] [relay] {}", msg);
            }
        });
        Some(Arc::new(relay))
    } else {
        None
    };

    let mut channels = Vec::new();
    for (idx, entry) in config.channels.iter().enumerate() {
        if !entry.enabled {
            continue;
        }
        channels.push(ChannelServer::new(ChannelSettings {
            id: config.channel_id(idx),
            global_id: config.global_id(idx),
            name: entry.name.clone(),
            ip: config.host_ip.clone(),
            port: entry.port,
            send_queue_capacity: config.send_queue_capacity,
            dict: dict.clone(),
            chat_relay: relay.clone(),
            relay_enabled: config.discord.enabled,
            db: pool.clone(),
        }));
    }
    anyhow::ensure!(!channels.is_empty(), "no enabled channels in {}", conf_file);

    let mut running = Vec::new();
    for channel in &channels {
        channel.set_channels(&channels);
        running.push(channel.start().await?);
    }

    tracing::info!("[channel] [started] channels={}", channels.len());

    tokio::signal::ctrl_c().await.context("Cannot listen for Ctrl-C")?;
    tracing::info!("[channel] [stopping]");

    for channel in &channels {
        channel.shutdown().await;
    }
    for r in running {
        r.wait().await?;
    }

    tracing::info!("[channel] [stopped]");
    Ok(())
}
