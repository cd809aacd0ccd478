mod config;
mod forwarder;

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::prelude::*;

use config::{parse_id_list, Config};
use forwarder::{
    connect_and_authorize, ChatClient, CsvSink, ForwardRoute, KeywordSet, PollEngine, SheetSink,
    TelegramClient,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let _guard = init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let client = Arc::new(TelegramClient::new(&config.bot_token));

    // Authentication failure at startup is the one fatal error.
    if let Err(e) = connect_and_authorize(client.as_ref()).await {
        eprintln!("Failed to connect to Telegram: {e}");
        std::process::exit(1);
    }
    client.spawn_dispatcher();

    println!("Choose an option:");
    println!("1. List chats");
    println!("2. Forward messages with prompted ids and keywords");
    println!("3. Forward messages with configured defaults");
    println!("4. Forward messages to the sheet webhook");
    println!("5. Forward messages to the CSV log");

    let choice = prompt("Enter your choice: ");
    match choice.as_str() {
        "1" => list_chats(&config, client.as_ref()).await,
        "2" => forward_prompted(&config, client).await,
        "3" => forward_configured(&config, client).await,
        "4" => forward_to_sheet(&config, client).await,
        "5" => forward_to_csv(&config, client).await,
        _ => println!("Invalid choice"),
    }
}

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    std::fs::create_dir_all("logs").ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("logs/tgforward.log")
        .expect("Failed to open log file");
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    guard
}

fn prompt(question: &str) -> String {
    print!("{question}");
    std::io::stdout().flush().ok();
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer).ok();
    answer.trim().to_string()
}

/// Mode 1: resolve and print titles for the configured chats, and write
/// them to chats.txt.
async fn list_chats(config: &Config, client: &TelegramClient) {
    let mut ids = config.source_ids.clone();
    if let Some(dest) = config.destination_id {
        ids.push(dest);
    }
    if ids.is_empty() {
        println!("No chats configured; set SOURCE_IDS (and DESTINATION_ID) first.");
        return;
    }

    let mut listing = String::new();
    for id in ids {
        let title = client.chat_title(id).await;
        println!("Chat ID: {id}, Title: {title}");
        listing.push_str(&format!("Chat ID: {}, Title: {}\n", id, urlencoding::encode(&title)));
    }

    match std::fs::write("chats.txt", listing) {
        Ok(()) => println!("List of chats written to chats.txt"),
        Err(e) => eprintln!("Failed to write chats.txt: {e}"),
    }
}

/// Mode 2: source ids, destination and keywords are asked interactively.
async fn forward_prompted(config: &Config, client: Arc<TelegramClient>) {
    let sources = match parse_id_list("SOURCE_IDS", &prompt("Enter the source chat IDs (comma-separated): ")) {
        Ok(ids) if !ids.is_empty() => ids,
        Ok(_) => {
            println!("No source chats given.");
            return;
        }
        Err(e) => {
            println!("{e}");
            return;
        }
    };
    let destination = match prompt("Enter the destination chat ID: ").parse::<i64>() {
        Ok(id) => id,
        Err(_) => {
            println!("Invalid destination chat ID.");
            return;
        }
    };
    println!("Enter keywords to forward only matching messages, or leave blank to forward everything.");
    let keywords = KeywordSet::parse(&prompt("Keywords (comma-separated): "));

    run_forward(config, client, sources, destination, keywords).await;
}

/// Mode 3: forward SOURCE_IDS to DESTINATION_ID with no keyword filter.
async fn forward_configured(config: &Config, client: Arc<TelegramClient>) {
    let Some(destination) = config.destination_id else {
        eprintln!("Set DESTINATION_ID to use the configured forward mode.");
        std::process::exit(1);
    };
    if config.source_ids.is_empty() {
        eprintln!("Set SOURCE_IDS to use the configured forward mode.");
        std::process::exit(1);
    }
    run_forward(
        config,
        client,
        config.source_ids.clone(),
        destination,
        KeywordSet::default(),
    )
    .await;
}

async fn run_forward(
    config: &Config,
    client: Arc<TelegramClient>,
    source_chat_ids: Vec<i64>,
    destination_chat_id: i64,
    keywords: KeywordSet,
) {
    info!(
        "Forwarding from {:?} to {} ({})",
        source_chat_ids,
        destination_chat_id,
        if keywords.is_empty() { "all messages" } else { "keyword filtered" }
    );
    let route = ForwardRoute {
        source_chat_ids,
        destination_chat_id,
        keywords,
        poll_interval: Duration::from_secs(config.poll_interval_secs),
    };
    let client: Arc<dyn ChatClient> = client;
    PollEngine::new(client, route).run().await;
}

/// Mode 4: push every message from SOURCE_IDS to the sheet webhook.
async fn forward_to_sheet(config: &Config, client: Arc<TelegramClient>) {
    let Some(webhook_url) = config.webhook_url.clone() else {
        eprintln!("Set WEBHOOK_URL to use the sheet mode.");
        std::process::exit(1);
    };
    if config.source_ids.is_empty() {
        eprintln!("Set SOURCE_IDS to use the sheet mode.");
        std::process::exit(1);
    }

    let rx = client.subscribe(&config.source_ids).await;
    let client: Arc<dyn ChatClient> = client;
    SheetSink::new(webhook_url).run(client, rx).await;
}

/// Mode 5: append every message from SOURCE_IDS to the CSV log.
async fn forward_to_csv(config: &Config, client: Arc<TelegramClient>) {
    if config.source_ids.is_empty() {
        eprintln!("Set SOURCE_IDS to use the CSV mode.");
        std::process::exit(1);
    }

    let rx = client.subscribe(&config.source_ids).await;
    let client: Arc<dyn ChatClient> = client;
    CsvSink::new(config.csv_file.clone()).run(client, rx).await;
}
