use matchpool_rs::config::{
    ConfigOverrides, DatabaseOverrides, LoadOverrides, MatchPoolConfig, SessionOverrides,
    CONFIG_PATH_ENV,
};
use matchpool_rs::MatchSession;
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"matchpool_auto - Load a result table, auto-match it and store the decisions

USAGE:
    matchpool_auto [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to config file (TOML)
    -d, --database <FILE>   Override SQLite database path
    -u, --user <NAME>       Override the user recorded on status changes
    -r, --rule <NAME>       Auto-match with this rule (repeatable via commas)
        --reset             Undo all decisions before auto-matching
        --no-prune          Keep reciprocal duplicate rows when loading
        --clusters          Print the resulting clusters as JSON
        --dry-run           Do not write anything back
    -h, --help              Print help

ENVIRONMENT:
    MATCHPOOL_CONFIG                Path to config file
    MATCHPOOL_DATABASE__PATH        SQLite database path
    MATCHPOOL_SESSION__APP_USER     User recorded on status changes
    RUST_LOG                        Log filter [default: info]

CONFIG FILE (matchpool.toml):
    [schema]
    source_table = "customers"
    key_columns = ["customer_id"]

    [[rules]]
    name = "Name_And_Email"
    match_percent = 90
"#
    );
}

fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    if let Some(path) = parse_arg("--database").or_else(|| parse_arg("-d")) {
        overrides.database = Some(DatabaseOverrides {
            path: Some(path.into()),
        });
    }
    if let Some(user) = parse_arg("--user").or_else(|| parse_arg("-u")) {
        overrides.session = Some(SessionOverrides {
            app_user: Some(user),
        });
    }
    if has_flag("--no-prune") {
        overrides.load = Some(LoadOverrides {
            prune_reciprocal_rows: Some(false),
        });
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok());
    let config = MatchPoolConfig::load(config_path.as_deref(), overrides)?;

    let mut session = MatchSession::open(&config)?;
    let pool = session.pool_mut();

    if has_flag("--reset") {
        let changes = pool.reset_pool()?;
        println!("reset {} edges", changes.len());
    }

    let rules: Vec<String> = parse_arg("--rule")
        .or_else(|| parse_arg("-r"))
        .map(|rules| {
            rules
                .split(',')
                .filter(|rule| !rule.is_empty())
                .map(|rule| rule.to_string())
                .collect()
        })
        .unwrap_or_default();
    for rule in &rules {
        let report = pool.do_auto_match(rule)?;
        println!(
            "{}: visited {} records, {} decisions, {} edges changed",
            report.rule,
            report.visited,
            report.decisions,
            report.changes.len()
        );
    }

    if has_flag("--clusters") {
        println!("{}", serde_json::to_string_pretty(&pool.clusters())?);
    }

    if has_flag("--dry-run") {
        println!("dry run: {} writes pending", pool.pending_batch().len());
        return Ok(());
    }

    let summary = session.save()?;
    println!(
        "stored: {} updated, {} inserted, {} deleted",
        summary.updated, summary.inserted, summary.deleted
    );
    Ok(())
}
