use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cartwalk::{StageStatus, WalkConfig, WalkOutcome, Walker};

#[derive(Parser)]
#[command(name = "cartwalk")]
#[command(about = "Best-effort storefront checkout walker")]
#[command(version)]
struct Cli {
    /// Walk config to run
    config: PathBuf,

    /// Run in headless mode (overrides config)
    #[arg(long)]
    headless: bool,

    /// Override the search term from the config
    #[arg(short, long)]
    search: Option<String>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> cartwalk::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let mut config = WalkConfig::load(&cli.config)?;

    // Environment knobs, then CLI flags on top.
    config.browser.overlay_env();
    if cli.headless {
        config.browser.headless = true;
    }
    if let Some(term) = cli.search {
        config.search.term = term;
    }

    if cli.check {
        println!("Config valid: {}", config.name);
        println!("  Search term: {}", config.search.term);
        println!("  Search URL: {}", config.site.search_url(&config.search.term));
        println!("  Quantity: {}", config.quantity);
        println!("  Total tolerance: {}x", config.total_tolerance);
        if !config.search.keywords.is_empty() {
            println!("  Keywords: {}", config.search.keywords.join(", "));
        }
        if let Some(stage) = config.stop_after {
            println!("  Stops after: {}", stage);
        }
        return Ok(());
    }

    println!("Running: {}", config.name);

    let browser = eoka::Browser::launch_with_config(config.browser.stealth()).await?;
    let page = browser.new_page("about:blank").await?;

    let report = Walker::new(&page, &config).run().await;

    // The browser comes down regardless of how the walk went.
    browser.close().await?;

    println!();
    match report.outcome {
        WalkOutcome::Completed => println!("✓ Walk completed"),
        WalkOutcome::Partial(ref stage) => println!("◐ Walk stopped after {}", stage),
        WalkOutcome::Aborted(ref reason) => println!("✗ Walk aborted: {}", reason),
    }
    for stage in &report.stages {
        let mark = match stage.status {
            StageStatus::Completed => "✓",
            StageStatus::Fallback => "→",
            StageStatus::Failed => "✗",
            StageStatus::Skipped => "-",
        };
        match &stage.detail {
            Some(detail) => println!("  {} {}: {}", mark, stage.stage, detail),
            None => println!("  {} {}", mark, stage.stage),
        }
    }
    println!("  Duration: {}ms", report.duration_ms);

    if matches!(report.outcome, WalkOutcome::Aborted(_)) {
        std::process::exit(1);
    }

    Ok(())
}
