//! # cartwalk
//!
//! Best-effort checkout walker for a live storefront. Drives a real browser
//! through search → result selection → cart → checkout, probing the page with
//! ordered selector candidates and falling back to text scans when the markup
//! shifts underneath it.
//!
//! Only one condition fails a walk outright: fewer than two search results
//! after every fallback. Everything else is downgraded to a warning and the
//! pipeline keeps moving.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cartwalk::{WalkConfig, Walker};
//! use eoka::Browser;
//!
//! # #[tokio::main]
//! # async fn main() -> cartwalk::Result<()> {
//! let config = WalkConfig::load("configs/airpods.yaml")?;
//! let browser = Browser::launch_with_config(config.browser.stealth()).await?;
//! let page = browser.new_page("about:blank").await?;
//!
//! let report = Walker::new(&page, &config).run().await;
//! println!("{}", report.outcome);
//!
//! browser.close().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod extract;
pub mod locator;
mod walker;

pub use config::{
    BrowserConfig, PacingConfig, SearchConfig, SiteConfig, Viewport, WalkConfig,
};
pub use extract::{classify_total, extract_amount, TotalVerdict};
pub use locator::StageMatch;
pub use walker::{Stage, StageReport, StageStatus, WalkOutcome, WalkReport, Walker};

/// Result type for cartwalk operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading a walk config or driving the page.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("expected at least 2 search results, found {0}")]
    TooFewResults(usize),
}
