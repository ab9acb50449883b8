use clap::Parser;
use dashmap::DashMap;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use server::manager::SidebarManager;
use server::resolver::{PlaceholderResolver, ResolveError};
use server::roster::Roster;
use server::surface::MemoryHost;
use shared::{FilePreferenceStore, JsonConfigFile, SessionUser, UserId, CODE_CHAR};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{interval, sleep, MissedTickBehavior};

const NAMES: [&str; 8] = [
    "Steve", "Alex", "Notch", "Herobrine", "Jeb", "Dinnerbone", "Grumm", "Marc",
];
const WORLDS: [&str; 4] = ["world", "world_nether", "world_the_end", "world_event"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sidebar configuration file (created with defaults if missing)
    #[arg(short, long, default_value = "config/sidebar.json")]
    config: PathBuf,

    /// File holding per-user sidebar preferences
    #[arg(short = 'P', long, default_value = "data/sidebar_preferences.bin")]
    preferences: PathBuf,

    /// Number of simulated players
    #[arg(short, long, default_value = "4")]
    players: usize,

    /// Advertised player capacity
    #[arg(long, default_value = "20")]
    max_players: usize,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short, long)]
    duration_secs: Option<u64>,
}

/// Live numbers behind the ping and balance placeholders
#[derive(Debug, Clone)]
struct PlayerStats {
    ping_ms: u32,
    balance: f64,
}

type StatsTable = Arc<DashMap<UserId, PlayerStats>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let roster = Arc::new(Roster::new());
    let stats: StatsTable = Arc::new(DashMap::new());
    let host = Arc::new(MemoryHost::new());
    let store = Arc::new(FilePreferenceStore::open(&args.preferences)?);
    let resolver = build_resolver(Arc::clone(&roster), Arc::clone(&stats), args.max_players);

    let manager = SidebarManager::builder(
        Arc::new(JsonConfigFile::new(&args.config)),
        store,
        host.clone(),
    )
    .resolver(Arc::new(resolver))
    .roster(roster)
    .build();

    info!("Starting sidebar server...");
    info!("Config: {}", args.config.display());
    info!("Preferences: {}", args.preferences.display());
    manager.initialize()?;

    let mut rng = StdRng::from_entropy();
    for i in 0..args.players {
        let name = format!("{}{}", NAMES[i % NAMES.len()], i / NAMES.len() + 1);
        let user = SessionUser::new(format!("player-{}", i + 1), name, "world");
        stats.insert(
            user.id.clone(),
            PlayerStats {
                ping_ms: rng.gen_range(20..120),
                balance: rng.gen_range(0.0..5000.0),
            },
        );
        manager.on_join(user)?;
    }

    let stop = async {
        match args.duration_secs {
            Some(secs) => sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = run_simulation(Arc::clone(&manager), host, stats, rng) => {}
        _ = stop => {
            info!("Simulation time elapsed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    manager.shutdown();
    Ok(())
}

/// Registers the placeholders the default configuration uses.
fn build_resolver(roster: Arc<Roster>, stats: StatsTable, max_players: usize) -> PlaceholderResolver {
    let mut resolver = PlaceholderResolver::new();

    resolver
        .register("player_name", |user| Ok(user.name.clone()))
        .register("world_name", |user| Ok(user.location.clone()))
        .register("server_online", move |_| Ok(roster.len().to_string()))
        .register("server_max_players", move |_| Ok(max_players.to_string()))
        .register("server_time_hh:mm:ss", |_| Ok(clock_time()));

    let ping_stats = Arc::clone(&stats);
    resolver.register("player_ping", move |user| {
        ping_stats
            .get(&user.id)
            .map(|s| s.ping_ms.to_string())
            .ok_or_else(|| missing_stats("player_ping"))
    });
    resolver.register("vault_eco_balance_formatted", move |user| {
        stats
            .get(&user.id)
            .map(|s| format_balance(s.balance))
            .ok_or_else(|| missing_stats("vault_eco_balance_formatted"))
    });

    resolver
}

fn missing_stats(token: &str) -> ResolveError {
    ResolveError::Provider {
        token: token.to_string(),
        reason: "no stats for player".to_string(),
    }
}

/// Drifts player stats, moves players between worlds and prints changed sidebars.
async fn run_simulation(
    manager: Arc<SidebarManager>,
    host: Arc<MemoryHost>,
    stats: StatsTable,
    mut rng: StdRng,
) {
    let mut timer = interval(Duration::from_secs(1));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut printed: HashMap<UserId, usize> = HashMap::new();

    loop {
        timer.tick().await;

        for user in manager.roster().users() {
            if let Some(mut s) = stats.get_mut(&user.id) {
                let drift: i64 = rng.gen_range(-15..=15);
                s.ping_ms = (s.ping_ms as i64 + drift).clamp(5, 400) as u32;
                s.balance = (s.balance + rng.gen_range(-5.0..25.0)).max(0.0);
            }

            if rng.gen_bool(0.05) {
                if let Some(world) = WORLDS.choose(&mut rng) {
                    info!("{} moves to {}", user.name, world);
                    if let Err(e) = manager.on_location_change(&user.id, world) {
                        warn!("Location change for {} failed: {}", user.id, e);
                    }
                }
            }

            if rng.gen_bool(0.02) {
                match manager.toggle_sidebar(&user) {
                    Ok(enabled) => info!(
                        "{} turned their sidebar {}",
                        user.name,
                        if enabled { "on" } else { "off" }
                    ),
                    Err(e) => warn!("Toggle for {} failed: {}", user.id, e),
                }
            }
        }

        print_changed_sidebars(&manager, &host, &mut printed);
    }
}

fn print_changed_sidebars(
    manager: &SidebarManager,
    host: &MemoryHost,
    printed: &mut HashMap<UserId, usize>,
) {
    for user in manager.roster().users() {
        let Some(board) = host.active_snapshot(&user.id) else {
            printed.remove(&user.id);
            continue;
        };
        if printed.get(&user.id) == Some(&board.mutations) {
            continue;
        }
        printed.insert(user.id.clone(), board.mutations);

        info!("[{}] {}", user.name, strip_codes(&board.title));
        for (entry, rank) in &board.entries {
            info!("  {:>2} | {}", rank, strip_codes(entry));
        }
    }
}

/// Removes formatting codes for plain console output.
fn strip_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == CODE_CHAR {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

/// Wall-clock time of day (UTC) as hh:mm:ss.
fn clock_time() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
        % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Formats a balance with thousands separators and two decimals.
fn format_balance(balance: f64) -> String {
    let fixed = format!("{:.2}", balance.max(0.0));
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{}.{}", grouped, cents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use server::resolver::TemplateResolver;

    #[test]
    fn test_format_balance() {
        assert_eq!(format_balance(0.0), "0.00");
        assert_eq!(format_balance(999.5), "999.50");
        assert_eq!(format_balance(1234.567), "1,234.57");
        assert_eq!(format_balance(1_000_000.0), "1,000,000.00");
    }

    #[test]
    fn test_clock_time_shape() {
        let time = clock_time();
        assert_eq!(time.len(), 8);
        assert_eq!(&time[2..3], ":");
        assert_eq!(&time[5..6], ":");
    }

    #[test]
    fn test_strip_codes() {
        assert_eq!(strip_codes("§6§lMy Server"), "My Server");
        assert_eq!(strip_codes("plain"), "plain");
    }

    #[test]
    fn test_resolver_covers_default_lines() {
        let roster = Arc::new(Roster::new());
        let stats: StatsTable = Arc::new(DashMap::new());
        let user = SessionUser::new("p1", "Steve", "world");
        roster.add_user(user.clone());
        stats.insert(
            user.id.clone(),
            PlayerStats {
                ping_ms: 42,
                balance: 1500.0,
            },
        );

        let resolver = build_resolver(roster, stats, 20);
        let text = resolver
            .resolve(
                &user,
                "%player_name% %server_online%/%server_max_players% %player_ping% %vault_eco_balance_formatted%",
            )
            .unwrap();
        assert_eq!(text, "Steve 1/20 42 1,500.00");

        let unknown = SessionUser::new("p2", "Ghost", "world");
        assert!(resolver.resolve(&unknown, "%player_ping%").is_err());
    }
}
