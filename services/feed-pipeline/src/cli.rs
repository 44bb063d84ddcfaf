//! Interactive command loop and book renderer
//!
//! Reads single-letter commands from stdin: `t <size>` changes the tick
//! size, `i` toggles imbalance computation, `p` toggles auto-print, `d`
//! forces one display, `s` prints the spread, `m` the full metric summary,
//! `l` the accepted tick sizes, and `q` shuts the pipeline down. Unknown
//! input prints the help list.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;
use types::level::{precision_for_tick, TICK_SIZES};

use crate::book::{interpret_imbalance, BookKeeper};
use crate::metrics::PipelineMetrics;
use crate::volume::VolumeStats;

/// Levels per side shown by the renderer.
const DISPLAY_LEVELS: usize = 30;

/// Refresh period of the auto-print loop.
const DISPLAY_PERIOD: Duration = Duration::from_secs(1);

/// Handles the renderer reads from.
#[derive(Clone)]
pub struct RenderContext {
    pub book: Arc<BookKeeper>,
    pub volume: Arc<Mutex<VolumeStats>>,
    pub metrics: Arc<PipelineMetrics>,
    pub auto_print: Arc<AtomicBool>,
}

/// Shared handles the command loop operates on.
pub struct CliContext {
    pub render: RenderContext,
    pub stop: Arc<AtomicBool>,
    pub shutdown: watch::Sender<bool>,
}

/// Blocking stdin loop. Returns when the user quits or stdin closes.
pub fn run_command_loop(ctx: CliContext) {
    let stdin = std::io::stdin();
    println!("Commands: t <size> | i | p | d | s | m | l | q");

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if !handle_command(&ctx, line.trim()) {
            break;
        }
    }

    info!("Command loop exiting; shutting down");
    ctx.stop.store(true, Ordering::Release);
    let _ = ctx.shutdown.send(true);
}

/// Execute one command. Returns `false` on quit.
pub fn handle_command(ctx: &CliContext, command: &str) -> bool {
    match command {
        "" => {}
        "q" | "quit" => return false,
        "l" | "list" => {
            println!("Available tick sizes: {:?}", TICK_SIZES);
        }
        "i" | "imbalance" => {
            let enabled = !ctx.render.book.imbalance_enabled();
            ctx.render.book.set_imbalance_enabled(enabled);
            println!(
                "Imbalance computation: {}",
                if enabled { "ENABLED" } else { "DISABLED" }
            );
        }
        "p" | "print" => {
            let enabled = !ctx.render.auto_print.load(Ordering::Relaxed);
            ctx.render.auto_print.store(enabled, Ordering::Relaxed);
            println!(
                "Auto-print: {}",
                if enabled {
                    "ENABLED"
                } else {
                    "DISABLED (calculations continue)"
                }
            );
        }
        "d" | "display" => {
            println!("{}", render(&ctx.render));
        }
        "s" | "spread" => {
            let precision = precision_for_tick(ctx.render.book.tick_size());
            let m = ctx.render.book.metrics();
            println!(
                "Best bid: {:.prec$} | Best ask: {:.prec$} | Spread: {:.prec$}",
                m.best_bid,
                m.best_ask,
                m.spread,
                prec = precision
            );
        }
        "m" | "metrics" => {
            println!("{}", render_metrics(&ctx.render));
        }
        _ if command.starts_with("t ") => match command[2..].trim().parse::<f64>() {
            Ok(tick) => match ctx.render.book.set_tick_size(tick) {
                Ok(()) => {
                    let precision = precision_for_tick(tick);
                    println!("Tick size set to {:.prec$}", tick, prec = precision);
                }
                Err(_) => println!("Invalid tick size. Available: {:?}", TICK_SIZES),
            },
            Err(_) => println!("Invalid tick size format. Use: t <number>"),
        },
        _ => {
            println!("Unknown command. Available commands:");
            println!("  t <size> - set tick size (e.g. t 0.1)");
            println!("  i        - toggle imbalance computation");
            println!("  p        - toggle auto-print");
            println!("  d        - force one display");
            println!("  s        - show spread and best bid/ask");
            println!("  m        - show metric summary");
            println!("  l        - list tick sizes");
            println!("  q        - quit");
        }
    }
    true
}

/// Periodic renderer, active while auto-print is enabled.
pub fn run_display_loop(render_ctx: RenderContext, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        if render_ctx.auto_print.load(Ordering::Relaxed) {
            println!("{}", render(&render_ctx));
        }
        std::thread::sleep(DISPLAY_PERIOD);
    }
}

/// Render the full book display.
fn render(ctx: &RenderContext) -> String {
    let tick = ctx.book.tick_size();
    let precision = precision_for_tick(tick);
    let m = ctx.book.metrics();
    let mut out = String::new();

    out.push_str(&format!(
        "=== {} order book (tick {:.prec$}, last update id {}) ===\n",
        ctx.book.symbol(),
        tick,
        m.last_update_id,
        prec = precision
    ));
    out.push_str(&format!(
        "{} UTC\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));

    if m.best_bid > 0.0 && m.best_ask > 0.0 {
        out.push_str(&format!(
            "Best bid {:.prec$} | best ask {:.prec$} | spread {:.prec$}\n",
            m.best_bid,
            m.best_ask,
            m.spread,
            prec = precision
        ));
    } else {
        out.push_str("Spread not available (book side empty)\n");
    }

    let (bids, asks) = ctx.book.top_levels(DISPLAY_LEVELS);

    out.push_str(&format!("\n--- ASKS (lowest {} first) ---\n", DISPLAY_LEVELS));
    out.push_str(&format!(
        "{:>15} | {:>15} | {:>15} | src\n",
        "price", "quantity", "usd value"
    ));
    for (level, source) in &asks {
        out.push_str(&format!(
            "{:>15.prec$} | {:>15.5} | {:>15.2} | {}\n",
            level.price,
            level.quantity,
            level.notional(),
            source.tag(),
            prec = precision
        ));
    }

    out.push_str(&format!("\n--- BIDS (highest {} first) ---\n", DISPLAY_LEVELS));
    out.push_str(&format!(
        "{:>15} | {:>15} | {:>15} | src\n",
        "price", "quantity", "usd value"
    ));
    for (level, source) in &bids {
        out.push_str(&format!(
            "{:>15.prec$} | {:>15.5} | {:>15.2} | {}\n",
            level.price,
            level.quantity,
            level.notional(),
            source.tag(),
            prec = precision
        ));
    }

    if ctx.book.imbalance_enabled() {
        out.push_str("\n--- IMBALANCE ---\n");
        out.push_str(&format!(
            "Top 2:  {:+.4} ({})\n",
            m.imbalance_2,
            interpret_imbalance(m.imbalance_2)
        ));
        out.push_str(&format!(
            "Top 10: {:+.4} ({})\n",
            m.imbalance_10,
            interpret_imbalance(m.imbalance_10)
        ));
        out.push_str(&format!(
            "Top 20: {:+.4} ({})\n",
            m.imbalance_20,
            interpret_imbalance(m.imbalance_20)
        ));
        out.push_str(&format!(
            "All:    {:+.4} ({})\n",
            m.imbalance_all,
            interpret_imbalance(m.imbalance_all)
        ));
        out.push_str(&format!(
            "Total bid liquidity: ${:.2} | total ask liquidity: ${:.2}\n",
            m.total_bid_usd, m.total_ask_usd
        ));
    }

    let volume = ctx.volume.lock();
    out.push_str("\n--- VOLUME ---\n");
    out.push_str(&format!(
        "Buy:  {:.5} base (${:.2})\n",
        volume.cum_buy_base, volume.cum_buy_usd
    ));
    out.push_str(&format!(
        "Sell: {:.5} base (${:.2})\n",
        volume.cum_sell_base, volume.cum_sell_usd
    ));
    out.push_str(&format!(
        "Buy/sell USD ratio: {:.2}\n",
        volume.buy_sell_usd_ratio()
    ));
    if let Some(window) = volume.latest_window() {
        out.push_str(&format!(
            "Current window: buy ${:.2}, sell ${:.2}\n",
            window.buy_usd, window.sell_usd
        ));
    }

    out.push_str("\n--- RECENT TRADES ---\n");
    for trade in volume.recent_trades(10) {
        let time = chrono::DateTime::from_timestamp_millis(trade.timestamp_ns as i64 / 1_000_000)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string());
        out.push_str(&format!(
            "{} | {:>12.prec$} | {:>10.5} | {:>12.2} | {}\n",
            time,
            trade.price,
            trade.quantity,
            trade.notional(),
            if trade.is_buy() { "BUY" } else { "SELL" },
            prec = precision
        ));
    }

    out
}

/// Render the metric summary (`m` command).
fn render_metrics(ctx: &RenderContext) -> String {
    let precision = precision_for_tick(ctx.book.tick_size());
    let m = ctx.book.metrics();
    let mut out = String::new();

    out.push_str("--- CURRENT METRICS ---\n");
    out.push_str(&format!(
        "Best bid: {:.prec$}\nBest ask: {:.prec$}\nSpread: {:.prec$}\n",
        m.best_bid,
        m.best_ask,
        m.spread,
        prec = precision
    ));
    if ctx.book.imbalance_enabled() {
        out.push_str(&format!(
            "Imbalance 2/10/20/all: {:+.4} / {:+.4} / {:+.4} / {:+.4}\n",
            m.imbalance_2, m.imbalance_10, m.imbalance_20, m.imbalance_all
        ));
    }

    out.push_str("--- PIPELINE ---\n");
    for (name, value) in ctx.metrics.export() {
        out.push_str(&format!("{}: {}\n", name, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::symbol::Symbol;

    fn make_ctx() -> CliContext {
        let (shutdown, _rx) = watch::channel(false);
        CliContext {
            render: RenderContext {
                book: Arc::new(BookKeeper::new(Symbol::new("BTCUSDT"), 0.01)),
                volume: Arc::new(Mutex::new(VolumeStats::new())),
                metrics: Arc::new(PipelineMetrics::new()),
                auto_print: Arc::new(AtomicBool::new(true)),
            },
            stop: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    #[test]
    fn test_quit_returns_false() {
        let ctx = make_ctx();
        assert!(!handle_command(&ctx, "q"));
        assert!(!handle_command(&ctx, "quit"));
        assert!(handle_command(&ctx, "s"));
    }

    #[test]
    fn test_tick_size_command() {
        let ctx = make_ctx();
        assert!(handle_command(&ctx, "t 0.1"));
        assert_eq!(ctx.render.book.tick_size(), 0.1);

        // Invalid sizes leave the book untouched.
        assert!(handle_command(&ctx, "t 0.05"));
        assert_eq!(ctx.render.book.tick_size(), 0.1);
        assert!(handle_command(&ctx, "t nonsense"));
        assert_eq!(ctx.render.book.tick_size(), 0.1);
    }

    #[test]
    fn test_toggles() {
        let ctx = make_ctx();

        assert!(ctx.render.book.imbalance_enabled());
        handle_command(&ctx, "i");
        assert!(!ctx.render.book.imbalance_enabled());

        assert!(ctx.render.auto_print.load(Ordering::Relaxed));
        handle_command(&ctx, "p");
        assert!(!ctx.render.auto_print.load(Ordering::Relaxed));
    }

    #[test]
    fn test_render_smoke() {
        let ctx = make_ctx();
        ctx.render.book.apply_snapshot(&types::depth::BookSnapshot {
            last_update_id: 7,
            bids: vec![types::level::PriceLevel::new(10.00, 1.0)],
            asks: vec![types::level::PriceLevel::new(10.01, 2.0)],
        });

        let rendered = render(&ctx.render);
        assert!(rendered.contains("BTCUSDT"));
        assert!(rendered.contains("10.01"));
        assert!(rendered.contains("IMBALANCE"));
    }
}
