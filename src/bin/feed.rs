#![cfg(not(tarpaulin_include))]

use log::{error, info};
use smartcart::config::FeedConfig;
use smartcart::feed::{FeedEvent, FeedMode, generate_session_id};
use smartcart::AppContext;
use std::env;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

struct Args {
    config: Option<PathBuf>,
    mode: FeedMode,
    session: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        mode: FeedMode::RemoteFeed,
        session: None,
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--mode" => match iter.next().as_deref() {
                Some("remote") => args.mode = FeedMode::RemoteFeed,
                Some("local") => args.mode = FeedMode::LocalCapture,
                other => return Err(format!("unknown mode {:?}; use remote or local", other)),
            },
            "--session" => {
                args.session = Some(iter.next().ok_or("--session needs an id")?);
            }
            other => return Err(format!("unknown argument {}", other)),
        }
    }

    Ok(args)
}

/// Entry point for the feed runner
///
/// Starts a feed client for one cart session, prints what it sees, and on
/// Ctrl-C prints the cart it filled.
///
/// # Usage
/// * `smartcart-feed [--config <path>] [--mode remote|local] [--session <id>]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Usage: smartcart-feed [--config <path>] [--mode remote|local] [--session <id>]");
            return Ok(());
        }
    };

    let config = FeedConfig::load(args.config.as_deref())?;
    let session_id = args.session.unwrap_or_else(generate_session_id);
    info!("Using {} against {}", session_id, config.api_url);

    let ctx = AppContext::from_config(config)?;
    let mut client = ctx.feed_client(&session_id);
    let mut events = client.subscribe();
    client.start(args.mode);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(FeedEvent::ConnectionChanged(state)) => println!("connection: {:?}", state),
                Ok(FeedEvent::FrameUpdated { bytes }) => println!("frame: {} bytes", bytes),
                Ok(FeedEvent::FrameCleared) => println!("frame cleared"),
                Ok(FeedEvent::Detection(d)) => {
                    println!("prediction: {} ({:.1}%)", d.product_name, d.confidence * 100.0)
                }
                Ok(FeedEvent::ItemAdded(p)) => println!("added to cart: {} at {:.2}", p.name, p.price),
                Ok(FeedEvent::MediaAccessDenied(msg)) => error!("camera access denied: {}", msg),
                Ok(FeedEvent::Error(msg)) => error!("{}", msg),
                Err(RecvError::Lagged(n)) => info!("skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.stop();

    let cart = ctx.cart.snapshot();
    println!("\nCart for {}:", session_id);
    for line in cart.items() {
        println!("  {:<24} x{:<3} {:>10.2}", line.name, line.quantity, line.subtotal());
    }
    println!("  {:<28} {:>10.2}", "Total", cart.get_total());

    Ok(())
}
