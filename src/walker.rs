//! The checkout walker: a fixed stage pipeline over a live storefront page.
//!
//! Every stage probes an ordered candidate list (most specific first) and
//! falls back to text scans when the markup has shifted. Stage failures are
//! downgraded to warnings and the pipeline keeps going; the only hard failure
//! is finding fewer than two search results after all fallbacks.

use std::fmt;
use std::time::Instant;

use eoka::Page;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::WalkConfig;
use crate::extract::{classify_total, extract_amount, TotalVerdict};
use crate::locator::{
    click_first_visible, click_with_fallback, dismiss_in_frames, element_texts,
    find_clickable_by_text, first_visible_text, first_visible_value, frame_count,
    nth_link_path, probe, probe_with_wait, select_option, StageMatch,
};
use crate::{Error, Result};

// Candidate lists, most specific first: ID-based, then attribute-based.
// Text-based matching is the scan fallback each stage carries separately.

const VERIFICATION_FORM: &str = "form[action*='validateCaptcha']";

const SEARCH_BOX: &str = "#twotabsearchtextbox";

const RESULT_CANDIDATES: &[&str] = &[
    "[data-component-type='s-search-result']",
    "[data-testid='s-search-result']",
    ".s-search-result",
    ".sg-col-inner .s-widget-container",
];

const PRODUCT_TITLE_CANDIDATES: &[&str] = &["#productTitle", "h1"];

const ADD_TO_CART_CANDIDATES: &[&str] = &[
    "#add-to-cart-button",
    "input[name='submit.add-to-cart']",
    "[data-action='add-to-cart']",
    "input[value*='Add to Cart']",
    "[title*='Add to Cart']",
    "[aria-label*='Add to Cart']",
    "#buy-now-button",
    ".a-button-input[aria-labelledby*='cart']",
];

const CART_CONFIRM_CANDIDATES: &[&str] = &[
    "[data-feature-name='addToCart']",
    "#attachDisplayAddBaseAlert",
    "#sw-atc-details-single-container",
    ".a-alert-success",
    "#huc-v2-order-row-confirm-text",
];

const CART_COUNT_CANDIDATES: &[&str] = &["#nav-cart-count", ".nav-cart-count"];

const UPSELL_CANDIDATES: &[&str] = &[
    "input[aria-labelledby*='attach-sidesheet-checkout-button']",
    "input[value='No thanks']",
    "input[value*='No thanks']",
    "input[value*='No Thanks']",
    "input[aria-label*='No thanks']",
    "[data-action='attachDisplayAddBaseAlert-declarative_1'] input",
    "input[name='submit.add-to-cart.top']",
    ".attach-sidesheet-checkout-button input",
    "input[data-action='skip-twister']",
    "input[aria-labelledby*='attach-sidesheet-addon-button']",
];

const UPSELL_KEYWORDS: &[&str] = &[
    "no thanks",
    "no, thanks",
    "skip",
    "continue without",
    "no protection",
];

const MODAL_CLOSE_CANDIDATES: &[&str] = &[
    "button[aria-label*='Close']",
    ".a-button-close",
    "[data-action='a-popover-close']",
];

const CART_NAV_CANDIDATES: &[&str] = &[
    "#nav-cart",
    "#nav-cart-text-container",
    "a[href*='/cart']",
    "#sw-atc-details-single-container a[href*='cart']",
    ".nav-cart-text",
];

const QUANTITY_CANDIDATES: &[&str] = &[
    "select[name*='quantity']",
    "select[data-action='quantity-dropdown']",
    ".a-dropdown-container select",
    "select[aria-label*='quantity']",
    "input[name*='quantity']",
];

const QUANTITY_INCREASE_CANDIDATES: &[&str] = &[
    "button[aria-label*='Increase']",
    "button[data-action='plus']",
    ".a-button-input[value='+']",
    "input[value='+']",
];

const QUANTITY_VERIFY_CANDIDATES: &[&str] = &[
    "select[name*='quantity'] option[selected]",
    "input[name*='quantity']",
    ".a-dropdown-prompt",
];

const PRICE_CANDIDATES: &[&str] = &[
    ".a-price-whole",
    ".a-offscreen[data-automation-id*='price']",
    ".a-price .a-offscreen",
    "[data-automation-id='unit-price'] .a-offscreen",
];

const CHECKOUT_CANDIDATES: &[&str] = &[
    "input[name='proceedToRetailCheckout']",
    "button[name='proceedToRetailCheckout']",
    "input[aria-labelledby*='checkout']",
    "input[value*='Proceed to checkout']",
    ".a-button-input[aria-labelledby*='checkout']",
    "input[data-feature-id='proceed-to-checkout-action']",
];

const SIGNIN_CANDIDATES: &[&str] = &[
    "#ap_email",
    "input[name='email']",
    "#continue-as-guest-button",
    "input[aria-label*='email']",
];

const GUEST_CHECKOUT_CANDIDATES: &[&str] = &[
    "#continue-as-guest-button",
    "input[name='continue-as-guest']",
    "a[href*='guest']",
];

const TOTAL_CANDIDATES: &[&str] = &[
    "#grand-total-price",
    ".grand-total-price .a-offscreen",
    "[data-automation-id='order-total'] .a-offscreen",
    ".a-row.a-spacing-none.checkout-order-total .a-offscreen",
    ".order-total .a-price .a-offscreen",
    "#subtotals-marketplace-table .grand-total-price",
];

/// One discrete step of the walk, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Navigate,
    LocateResults,
    SelectResult,
    AddToCart,
    ConfirmAddition,
    DismissUpsell,
    GoToCart,
    SetQuantity,
    VerifyQuantity,
    Checkout,
    ValidateTotal,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 11] = [
        Stage::Navigate,
        Stage::LocateResults,
        Stage::SelectResult,
        Stage::AddToCart,
        Stage::ConfirmAddition,
        Stage::DismissUpsell,
        Stage::GoToCart,
        Stage::SetQuantity,
        Stage::VerifyQuantity,
        Stage::Checkout,
        Stage::ValidateTotal,
    ];

    /// Short name for logging and configs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::LocateResults => "locate_results",
            Self::SelectResult => "select_result",
            Self::AddToCart => "add_to_cart",
            Self::ConfirmAddition => "confirm_addition",
            Self::DismissUpsell => "dismiss_upsell",
            Self::GoToCart => "go_to_cart",
            Self::SetQuantity => "set_quantity",
            Self::VerifyQuantity => "verify_quantity",
            Self::Checkout => "checkout",
            Self::ValidateTotal => "validate_total",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// The primary path worked.
    Completed,
    /// A secondary heuristic worked (weaker signal, positional pick,
    /// direct-URL navigation).
    Fallback,
    /// Nothing worked; the walk continued anyway.
    Failed,
    /// Not attempted because an earlier stage left nothing to act on.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Fallback => f.write_str("fallback"),
            Self::Failed => f.write_str("failed"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// Per-stage outcome collected into the final report.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    /// Matched selector, chosen index, verdict - whatever the stage has to say.
    pub detail: Option<String>,
}

/// How the walk as a whole ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Every stage was attempted.
    Completed,
    /// The pipeline stopped early; the payload is the last attempted stage.
    Partial(Stage),
    /// The walk could not proceed at all.
    Aborted(String),
}

impl fmt::Display for WalkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Partial(stage) => write!(f, "stopped after {}", stage),
            Self::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Result of a full walk.
#[derive(Debug)]
pub struct WalkReport {
    pub outcome: WalkOutcome,
    pub stages: Vec<StageReport>,
    pub duration_ms: u64,
}

/// The sole hard-failure condition: a search that surfaced fewer than two
/// results after every fallback strategy.
pub fn ensure_min_results(count: usize) -> Result<()> {
    if count >= 2 {
        Ok(())
    } else {
        Err(Error::TooFewResults(count))
    }
}

/// Pick a result index: the first of the leading `scan_limit` texts containing
/// every keyword wins; otherwise fall back to the second result. Returns the
/// index and whether a keyword match decided it.
pub fn pick_result_index(texts: &[String], keywords: &[String], scan_limit: usize) -> (usize, bool) {
    if !keywords.is_empty() {
        let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        for (i, text) in texts.iter().take(scan_limit).enumerate() {
            let hay = text.to_lowercase();
            if lowered.iter().all(|k| hay.contains(k)) {
                return (i, true);
            }
        }
    }
    (1, false)
}

/// Drives one page through the search → cart → checkout pipeline.
pub struct Walker<'a> {
    page: &'a Page,
    config: &'a WalkConfig,
    reports: Vec<StageReport>,
}

impl<'a> Walker<'a> {
    pub fn new(page: &'a Page, config: &'a WalkConfig) -> Self {
        Self {
            page,
            config,
            reports: Vec::new(),
        }
    }

    /// Run the pipeline. Stage failures downgrade to warnings; the only
    /// aborts are a failed initial navigation and the minimum-results check.
    pub async fn run(mut self) -> WalkReport {
        let start = Instant::now();

        if let Err(reason) = self.navigate().await {
            warn!("{}", reason);
            self.record(Stage::Navigate, StageStatus::Failed, Some(reason.clone()));
            return self.finish(WalkOutcome::Aborted(reason), start);
        }
        if self.stop_requested(Stage::Navigate) {
            return self.finish(WalkOutcome::Partial(Stage::Navigate), start);
        }

        let Some(results) = self.locate_results().await else {
            let err = Error::TooFewResults(0);
            warn!("{}", err);
            return self.finish(WalkOutcome::Aborted(err.to_string()), start);
        };
        if let Err(err) = ensure_min_results(results.count) {
            warn!("{}", err);
            return self.finish(WalkOutcome::Aborted(err.to_string()), start);
        }
        info!("found {} search results", results.count);
        if self.stop_requested(Stage::LocateResults) {
            return self.finish(WalkOutcome::Partial(Stage::LocateResults), start);
        }

        let on_product_page = self.select_result(&results).await;
        if self.stop_requested(Stage::SelectResult) {
            return self.finish(WalkOutcome::Partial(Stage::SelectResult), start);
        }
        if !on_product_page {
            info!("not a standard product page, skipping cart stages");
            self.skip_remaining(Stage::SelectResult, "not a standard product page");
            return self.finish(WalkOutcome::Partial(Stage::SelectResult), start);
        }

        let added = self.add_to_cart().await;
        if self.stop_requested(Stage::AddToCart) {
            return self.finish(WalkOutcome::Partial(Stage::AddToCart), start);
        }
        if !added {
            self.skip_remaining(Stage::AddToCart, "item was not added to cart");
            return self.finish(WalkOutcome::Partial(Stage::AddToCart), start);
        }

        let confirmed = self.confirm_addition().await;
        if self.stop_requested(Stage::ConfirmAddition) {
            return self.finish(WalkOutcome::Partial(Stage::ConfirmAddition), start);
        }
        if !confirmed {
            self.skip_remaining(Stage::ConfirmAddition, "cart addition unconfirmed");
            return self.finish(WalkOutcome::Partial(Stage::ConfirmAddition), start);
        }

        self.dismiss_upsell().await;
        if self.stop_requested(Stage::DismissUpsell) {
            return self.finish(WalkOutcome::Partial(Stage::DismissUpsell), start);
        }

        let in_cart = self.go_to_cart().await;
        if self.stop_requested(Stage::GoToCart) {
            return self.finish(WalkOutcome::Partial(Stage::GoToCart), start);
        }
        if !in_cart {
            self.skip_remaining(Stage::GoToCart, "cart page unreachable");
            return self.finish(WalkOutcome::Partial(Stage::GoToCart), start);
        }

        let quantity_set = self.set_quantity().await;
        if self.stop_requested(Stage::SetQuantity) {
            return self.finish(WalkOutcome::Partial(Stage::SetQuantity), start);
        }
        if !quantity_set {
            self.skip_remaining(Stage::SetQuantity, "quantity controls not found");
            return self.finish(WalkOutcome::Partial(Stage::SetQuantity), start);
        }

        self.verify_quantity().await;
        if self.stop_requested(Stage::VerifyQuantity) {
            return self.finish(WalkOutcome::Partial(Stage::VerifyQuantity), start);
        }

        let (unit_price, at_checkout) = self.checkout().await;
        if self.stop_requested(Stage::Checkout) {
            return self.finish(WalkOutcome::Partial(Stage::Checkout), start);
        }
        if !at_checkout {
            self.skip_remaining(Stage::Checkout, "checkout page unreachable");
            return self.finish(WalkOutcome::Partial(Stage::Checkout), start);
        }

        self.validate_total(unit_price).await;
        self.finish(WalkOutcome::Completed, start)
    }

    // --- stages ---

    async fn navigate(&mut self) -> std::result::Result<(), String> {
        let pacing = self.config.pacing.clone();
        let base = self.config.site.base_url.clone();

        info!("navigating to {}", base);
        self.page
            .goto(&base)
            .await
            .map_err(|e| format!("navigation to {} failed: {}", base, e))?;
        self.settle(pacing.load_wait_ms, pacing.settle_ms).await;

        // Bot-verification interstitial: give a human a fixed window to solve it.
        match probe(self.page, &[VERIFICATION_FORM], false).await {
            Ok(Some(_)) => {
                info!(
                    "verification form detected, pausing {}ms for manual resolution",
                    pacing.verification_pause_ms
                );
                self.page.wait(pacing.verification_pause_ms).await;
            }
            Ok(None) => {}
            Err(e) => debug!("verification probe failed: {}", e),
        }

        let search_url = self.config.site.search_url(&self.config.search.term);
        info!("navigating to {}", search_url);
        self.page
            .goto(&search_url)
            .await
            .map_err(|e| format!("navigation to {} failed: {}", search_url, e))?;
        self.settle(pacing.load_wait_ms, pacing.long_settle_ms).await;

        self.record(Stage::Navigate, StageStatus::Completed, None);
        Ok(())
    }

    async fn locate_results(&mut self) -> Option<StageMatch> {
        let pacing = self.config.pacing.clone();
        let term = self.config.search.term.clone();
        let base = self.config.site.base_url.clone();

        if let Some(found) =
            probe_with_wait(self.page, RESULT_CANDIDATES, pacing.candidate_wait_ms).await
        {
            info!("found search results with selector: {}", found.selector);
            self.record(
                Stage::LocateResults,
                StageStatus::Completed,
                Some(found.selector.clone()),
            );
            return Some(found);
        }

        warn!("no search results with standard candidates");
        self.save_failure_screenshot().await;

        // Re-run the search through the on-page search box.
        info!("retrying via the search box");
        if let Err(e) = self.page.goto(&base).await {
            warn!("navigation back to site root failed: {}", e);
            self.record(Stage::LocateResults, StageStatus::Failed, None);
            return None;
        }
        self.settle(pacing.load_wait_ms, pacing.settle_ms).await;

        match probe(self.page, &[SEARCH_BOX], true).await {
            Ok(Some(_)) => {
                if let Err(e) = self.page.fill(SEARCH_BOX, &term).await {
                    warn!("search box fill failed: {}", e);
                    self.record(Stage::LocateResults, StageStatus::Failed, None);
                    return None;
                }
                if let Err(e) = self.page.human().press_key("Enter").await {
                    warn!("search submit failed: {}", e);
                    self.record(Stage::LocateResults, StageStatus::Failed, None);
                    return None;
                }
                self.settle(pacing.load_wait_ms, pacing.long_settle_ms).await;

                match probe(self.page, RESULT_CANDIDATES, true).await {
                    Ok(Some(found)) => {
                        info!(
                            "found search results after search box with selector: {}",
                            found.selector
                        );
                        self.record(
                            Stage::LocateResults,
                            StageStatus::Fallback,
                            Some(found.selector.clone()),
                        );
                        Some(found)
                    }
                    Ok(None) => {
                        self.record(Stage::LocateResults, StageStatus::Failed, None);
                        None
                    }
                    Err(e) => {
                        warn!("result probe failed: {}", e);
                        self.record(Stage::LocateResults, StageStatus::Failed, None);
                        None
                    }
                }
            }
            _ => {
                warn!("search box not available");
                self.record(Stage::LocateResults, StageStatus::Failed, None);
                None
            }
        }
    }

    async fn select_result(&mut self, results: &StageMatch) -> bool {
        let pacing = self.config.pacing.clone();
        let search = self.config.search.clone();

        let scan = results.count.min(search.scan_limit);
        let texts = match element_texts(self.page, &results.selector, scan).await {
            Ok(texts) => texts,
            Err(e) => {
                debug!("result text scan failed: {}", e);
                Vec::new()
            }
        };
        let (index, by_keyword) = pick_result_index(&texts, &search.keywords, search.scan_limit);
        if by_keyword {
            info!("selecting result {} (keyword match)", index);
        } else {
            info!("no keyword match, selecting result {} as fallback", index);
        }

        let link = match nth_link_path(self.page, &results.selector, index).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                warn!("result {} has nothing clickable", index);
                self.record(Stage::SelectResult, StageStatus::Failed, None);
                return false;
            }
            Err(e) => {
                warn!("result link resolution failed: {}", e);
                self.record(Stage::SelectResult, StageStatus::Failed, None);
                return false;
            }
        };

        match click_with_fallback(self.page, &link).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("could not click result {}", index);
                self.record(Stage::SelectResult, StageStatus::Failed, None);
                return false;
            }
            Err(e) => {
                warn!("result click failed: {}", e);
                self.record(Stage::SelectResult, StageStatus::Failed, None);
                return false;
            }
        }
        self.settle(pacing.load_wait_ms, pacing.settle_ms).await;

        let url = self.page.url().await.unwrap_or_default();
        info!("url after click: {}", url);
        let product_page = url.contains("/dp/") || url.contains("/gp/");
        if product_page {
            info!("navigated to a product page");
        }

        match first_visible_text(self.page, PRODUCT_TITLE_CANDIDATES).await {
            Ok(Some(title)) => info!("product title: {}", title),
            _ => debug!("could not extract product title"),
        }

        let status = if by_keyword {
            StageStatus::Completed
        } else {
            StageStatus::Fallback
        };
        self.record(
            Stage::SelectResult,
            status,
            Some(format!("result index {}", index)),
        );

        // Cart controls only exist on the standard product layout.
        url.contains("/dp/")
    }

    async fn add_to_cart(&mut self) -> bool {
        let pacing = &self.config.pacing;
        self.page.wait(pacing.settle_ms).await;

        match click_first_visible(self.page, ADD_TO_CART_CANDIDATES).await {
            Ok(Some(selector)) => {
                info!("clicked add-to-cart control: {}", selector);
                self.record(Stage::AddToCart, StageStatus::Completed, Some(selector));
                return true;
            }
            Ok(None) => {}
            Err(e) => debug!("add-to-cart probe failed: {}", e),
        }

        // Markup moved: scan for the literal control text and climb to
        // whatever is actually clickable.
        info!("searching for cart controls by text");
        match find_clickable_by_text(self.page, "span, button, input, a", &["add to cart"]).await {
            Ok(Some(path)) => match click_with_fallback(self.page, &path).await {
                Ok(true) => {
                    info!("clicked add-to-cart via text scan: {}", path);
                    self.record(Stage::AddToCart, StageStatus::Fallback, Some(path));
                    true
                }
                _ => {
                    warn!("could not click add-to-cart control");
                    self.record(Stage::AddToCart, StageStatus::Failed, None);
                    false
                }
            },
            _ => {
                warn!("no add-to-cart control found");
                self.record(Stage::AddToCart, StageStatus::Failed, None);
                false
            }
        }
    }

    async fn confirm_addition(&mut self) -> bool {
        self.page.wait(self.config.pacing.long_settle_ms).await;

        match probe(self.page, CART_CONFIRM_CANDIDATES, false).await {
            Ok(Some(found)) => {
                info!("cart confirmation found: {}", found.selector);
                self.record(
                    Stage::ConfirmAddition,
                    StageStatus::Completed,
                    Some(found.selector),
                );
                return true;
            }
            Ok(None) => {}
            Err(e) => debug!("confirmation probe failed: {}", e),
        }

        // Weaker signal: the cart badge updated.
        match first_visible_text(self.page, CART_COUNT_CANDIDATES).await {
            Ok(Some(count)) => {
                info!("cart count: {}", count);
                self.record(
                    Stage::ConfirmAddition,
                    StageStatus::Fallback,
                    Some(format!("cart count {}", count)),
                );
                true
            }
            _ => {
                warn!("could not confirm item was added to cart");
                self.record(Stage::ConfirmAddition, StageStatus::Failed, None);
                false
            }
        }
    }

    async fn dismiss_upsell(&mut self) {
        let pacing = self.config.pacing.clone();
        self.page.wait(pacing.long_settle_ms).await;

        match frame_count(self.page).await {
            Ok(n) => debug!("{} frames on page", n),
            Err(e) => debug!("frame count failed: {}", e),
        }

        // Frames first: the offer often renders in an embedded document.
        match dismiss_in_frames(self.page, &["no thanks"]).await {
            Ok(true) => {
                info!("dismissed upsell inside an embedded frame");
                self.page.wait(pacing.settle_ms).await;
                self.record(
                    Stage::DismissUpsell,
                    StageStatus::Completed,
                    Some("frame control".into()),
                );
                return;
            }
            Ok(false) => {}
            Err(e) => debug!("frame scan failed: {}", e),
        }

        match click_first_visible(self.page, UPSELL_CANDIDATES).await {
            Ok(Some(selector)) => {
                info!("dismissed upsell with selector: {}", selector);
                self.page.wait(pacing.settle_ms).await;
                self.record(Stage::DismissUpsell, StageStatus::Completed, Some(selector));
                return;
            }
            Ok(None) => {}
            Err(e) => debug!("upsell probe failed: {}", e),
        }

        // Keyword scan over every visible control.
        match find_clickable_by_text(
            self.page,
            "input[type='submit'], button, input",
            UPSELL_KEYWORDS,
        )
        .await
        {
            Ok(Some(path)) => {
                if matches!(click_with_fallback(self.page, &path).await, Ok(true)) {
                    info!("dismissed upsell via control scan: {}", path);
                    self.page.wait(pacing.settle_ms).await;
                    self.record(Stage::DismissUpsell, StageStatus::Fallback, Some(path));
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => debug!("upsell control scan failed: {}", e),
        }

        // Last resort: any element carrying the text at all.
        match find_clickable_by_text(self.page, "*", &["no thanks"]).await {
            Ok(Some(path)) => {
                if matches!(click_with_fallback(self.page, &path).await, Ok(true)) {
                    info!("dismissed upsell via free-text scan: {}", path);
                    self.page.wait(pacing.settle_ms).await;
                    self.record(Stage::DismissUpsell, StageStatus::Fallback, Some(path));
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => debug!("upsell text scan failed: {}", e),
        }

        match click_first_visible(self.page, MODAL_CLOSE_CANDIDATES).await {
            Ok(Some(selector)) => {
                info!("closed popup using close control: {}", selector);
                self.record(Stage::DismissUpsell, StageStatus::Fallback, Some(selector));
                return;
            }
            Ok(None) => {}
            Err(e) => debug!("modal close probe failed: {}", e),
        }

        // No popup is the common case and counts as success.
        info!("no upsell popup detected");
        self.record(
            Stage::DismissUpsell,
            StageStatus::Completed,
            Some("no popup detected".into()),
        );
    }

    async fn go_to_cart(&mut self) -> bool {
        let pacing = self.config.pacing.clone();

        match click_first_visible(self.page, CART_NAV_CANDIDATES).await {
            Ok(Some(selector)) => {
                info!("clicked cart navigation: {}", selector);
                self.settle(pacing.load_wait_ms, pacing.settle_ms).await;
                self.record(Stage::GoToCart, StageStatus::Completed, Some(selector));
                return true;
            }
            Ok(None) => {}
            Err(e) => debug!("cart nav probe failed: {}", e),
        }

        let cart_url = self.config.site.cart_url();
        info!("navigating directly to {}", cart_url);
        match self.page.goto(&cart_url).await {
            Ok(()) => {
                self.settle(pacing.load_wait_ms, pacing.settle_ms).await;
                self.record(Stage::GoToCart, StageStatus::Fallback, Some(cart_url));
                true
            }
            Err(e) => {
                warn!("could not navigate to cart page: {}", e);
                self.record(Stage::GoToCart, StageStatus::Failed, None);
                false
            }
        }
    }

    async fn set_quantity(&mut self) -> bool {
        let quantity = self.config.quantity;
        let value = quantity.to_string();

        match probe(self.page, QUANTITY_CANDIDATES, true).await {
            Ok(Some(found)) if found.tag == "select" => {
                match select_option(self.page, &found.selector, &value).await {
                    Ok(true) => {
                        info!("set quantity to {} via dropdown", quantity);
                        self.page.wait(self.config.pacing.long_settle_ms).await;
                        self.record(
                            Stage::SetQuantity,
                            StageStatus::Completed,
                            Some(found.selector),
                        );
                        return true;
                    }
                    Ok(false) => debug!("dropdown has no option '{}'", value),
                    Err(e) => debug!("dropdown select failed: {}", e),
                }
            }
            Ok(Some(found)) if found.tag == "input" => {
                let filled = self.page.fill(&found.selector, &value).await;
                let submitted = self.page.human().press_key("Enter").await;
                if filled.is_ok() && submitted.is_ok() {
                    info!("set quantity to {} via input field", quantity);
                    self.page.wait(self.config.pacing.long_settle_ms).await;
                    self.record(
                        Stage::SetQuantity,
                        StageStatus::Completed,
                        Some(found.selector),
                    );
                    return true;
                }
                debug!("quantity input path failed");
            }
            Ok(_) => {}
            Err(e) => debug!("quantity probe failed: {}", e),
        }

        // A single increase click only covers the 1 → 2 case.
        if quantity == 2 {
            info!("looking for a quantity increase control");
            match click_first_visible(self.page, QUANTITY_INCREASE_CANDIDATES).await {
                Ok(Some(selector)) => {
                    info!("set quantity to 2 via increase control");
                    self.page.wait(self.config.pacing.long_settle_ms).await;
                    self.record(Stage::SetQuantity, StageStatus::Fallback, Some(selector));
                    return true;
                }
                Ok(None) => {}
                Err(e) => debug!("increase control probe failed: {}", e),
            }
        }

        warn!("could not find quantity controls");
        self.record(Stage::SetQuantity, StageStatus::Failed, None);
        false
    }

    async fn verify_quantity(&mut self) {
        let quantity = self.config.quantity.to_string();
        let marker = format!("[data-item-count='{}']", quantity);
        let mut candidates: Vec<&str> = QUANTITY_VERIFY_CANDIDATES.to_vec();
        candidates.push(&marker);

        match first_visible_value(self.page, &candidates).await {
            Ok(Some(value)) if value.contains(&quantity) => {
                info!("quantity verified as {}: {}", quantity, value);
                self.record(Stage::VerifyQuantity, StageStatus::Completed, Some(value));
            }
            Ok(Some(value)) => {
                warn!("quantity reads back as '{}', expected {}", value, quantity);
                self.record(Stage::VerifyQuantity, StageStatus::Failed, Some(value));
            }
            Ok(None) => {
                warn!("could not verify quantity update");
                self.record(Stage::VerifyQuantity, StageStatus::Failed, None);
            }
            Err(e) => {
                warn!("quantity verification failed: {}", e);
                self.record(Stage::VerifyQuantity, StageStatus::Failed, None);
            }
        }
    }

    async fn checkout(&mut self) -> (Option<f64>, bool) {
        let pacing = self.config.pacing.clone();

        let unit_price = match first_visible_text(self.page, PRICE_CANDIDATES).await {
            Ok(Some(text)) => {
                let price = extract_amount(&text);
                match price {
                    Some(p) => info!("item price extracted: ${}", p),
                    None => warn!("price text '{}' holds no amount", text),
                }
                price
            }
            _ => {
                warn!("could not extract item price from cart");
                None
            }
        };

        let clicked = match click_first_visible(self.page, CHECKOUT_CANDIDATES).await {
            Ok(Some(selector)) => {
                info!("clicked checkout control: {}", selector);
                true
            }
            Ok(None) => false,
            Err(e) => {
                debug!("checkout probe failed: {}", e);
                false
            }
        };
        if !clicked {
            warn!("could not find a proceed-to-checkout control");
            self.record(Stage::Checkout, StageStatus::Failed, None);
            return (unit_price, false);
        }

        self.settle(pacing.checkout_wait_ms, pacing.long_settle_ms).await;
        let url = self.page.url().await.unwrap_or_default();
        info!("checkout page: {}", url);

        // Sign-in wall: presence alone matters, the form may be hidden
        // behind progressive rendering.
        let signin = matches!(
            probe(self.page, SIGNIN_CANDIDATES, false).await,
            Ok(Some(_))
        );
        if signin {
            info!("sign-in page detected, looking for guest checkout");
            match click_first_visible(self.page, GUEST_CHECKOUT_CANDIDATES).await {
                Ok(Some(selector)) => {
                    info!("continued as guest: {}", selector);
                    self.settle(pacing.load_wait_ms, pacing.settle_ms).await;
                    self.record(Stage::Checkout, StageStatus::Completed, Some(selector));
                }
                _ => {
                    warn!("sign-in required and no guest checkout found");
                    self.record(
                        Stage::Checkout,
                        StageStatus::Fallback,
                        Some("sign-in wall, validation limited".into()),
                    );
                }
            }
        } else {
            info!("proceeding with checkout, no sign-in required");
            self.record(Stage::Checkout, StageStatus::Completed, None);
        }

        (unit_price, true)
    }

    async fn validate_total(&mut self, unit_price: Option<f64>) {
        let total = match first_visible_text(self.page, TOTAL_CANDIDATES).await {
            Ok(Some(text)) => extract_amount(&text),
            _ => None,
        };

        match (total, unit_price) {
            (Some(total), Some(price)) => {
                let quantity = self.config.quantity;
                let subtotal = price * f64::from(quantity);
                let verdict = classify_total(price, quantity, total, self.config.total_tolerance);
                match verdict {
                    TotalVerdict::Valid => info!(
                        "grand total ${} within band of ${} × {} = ${:.2}",
                        total, price, quantity, subtotal
                    ),
                    TotalVerdict::SuspiciouslyHigh => warn!(
                        "grand total ${} is unusually high against subtotal ${:.2}",
                        total, subtotal
                    ),
                    TotalVerdict::Invalid => warn!(
                        "grand total ${} is below expected subtotal ${:.2}",
                        total, subtotal
                    ),
                }
                let status = match verdict {
                    TotalVerdict::Valid => StageStatus::Completed,
                    TotalVerdict::SuspiciouslyHigh => StageStatus::Fallback,
                    TotalVerdict::Invalid => StageStatus::Failed,
                };
                self.record(Stage::ValidateTotal, status, Some(verdict.to_string()));
            }
            (Some(total), None) => {
                info!("grand total located: ${}", total);
                warn!("cannot validate calculation, item price unavailable");
                self.record(
                    Stage::ValidateTotal,
                    StageStatus::Fallback,
                    Some(format!("total ${} unchecked", total)),
                );
            }
            (None, _) => {
                warn!("could not locate grand total on checkout page");
                self.record(Stage::ValidateTotal, StageStatus::Failed, None);
            }
        }
    }

    // --- plumbing ---

    /// Network-idle wait (timeouts downgraded) followed by a fixed settle for
    /// the DOM churn the load event does not cover.
    async fn settle(&self, idle_timeout_ms: u64, settle_ms: u64) {
        if let Err(e) = self.page.wait_for_network_idle(500, idle_timeout_ms).await {
            debug!("network idle wait elapsed: {}", e);
        }
        self.page.wait(settle_ms).await;
    }

    async fn save_failure_screenshot(&self) {
        let Some(ref template) = self.config.failure_screenshot else {
            return;
        };
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let path = template.replace("{timestamp}", &timestamp);
        match self.page.screenshot().await {
            Ok(data) => {
                if let Err(e) = std::fs::write(&path, data) {
                    warn!("failed to save screenshot {}: {}", path, e);
                } else {
                    info!("saved debug screenshot to {}", path);
                }
            }
            Err(e) => warn!("screenshot failed: {}", e),
        }
    }

    fn stop_requested(&self, stage: Stage) -> bool {
        self.config.stop_after == Some(stage)
    }

    fn record(&mut self, stage: Stage, status: StageStatus, detail: Option<String>) {
        self.reports.push(StageReport {
            stage,
            status,
            detail,
        });
    }

    fn skip_remaining(&mut self, after: Stage, reason: &str) {
        for stage in Stage::ALL.into_iter().filter(|s| *s > after) {
            self.record(stage, StageStatus::Skipped, Some(reason.into()));
        }
    }

    fn finish(self, outcome: WalkOutcome, start: Instant) -> WalkReport {
        WalkReport {
            outcome,
            stages: self.reports,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn keywords(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn min_results_rejects_zero_and_one() {
        assert!(ensure_min_results(0).is_err());
        assert!(ensure_min_results(1).is_err());
    }

    #[test]
    fn min_results_accepts_two_or_more() {
        assert!(ensure_min_results(2).is_ok());
        assert!(ensure_min_results(48).is_ok());
    }

    #[test]
    fn keyword_match_beats_positional_fallback() {
        let texts = texts(&[
            "Sony WH-1000XM5 Wireless Headphones",
            "Beats Studio Pro",
            "Apple AirPods Max Wireless Over-Ear Headphones",
        ]);
        let (index, by_keyword) =
            pick_result_index(&texts, &keywords(&["apple", "airpods"]), 5);
        assert_eq!(index, 2);
        assert!(by_keyword);
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let texts = texts(&["APPLE AIRPODS MAX"]);
        let (index, by_keyword) =
            pick_result_index(&texts, &keywords(&["Apple", "AirPods"]), 5);
        assert_eq!(index, 0);
        assert!(by_keyword);
    }

    #[test]
    fn all_keywords_must_match() {
        let texts = texts(&["Apple iPhone case", "AirPods Pro case"]);
        let (index, by_keyword) =
            pick_result_index(&texts, &keywords(&["apple", "airpods"]), 5);
        assert_eq!(index, 1);
        assert!(!by_keyword);
    }

    #[test]
    fn no_keywords_means_positional_fallback() {
        let texts = texts(&["first", "second", "third"]);
        let (index, by_keyword) = pick_result_index(&texts, &[], 5);
        assert_eq!(index, 1);
        assert!(!by_keyword);
    }

    #[test]
    fn scan_limit_caps_keyword_search() {
        let texts = texts(&[
            "one", "two", "three", "four", "five",
            "Apple AirPods Max Wireless Over-Ear Headphones",
        ]);
        let (index, by_keyword) =
            pick_result_index(&texts, &keywords(&["apple", "airpods"]), 5);
        assert_eq!(index, 1);
        assert!(!by_keyword);
    }

    #[test]
    fn stages_are_ordered() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(Stage::ALL.len(), 11);
    }

    #[test]
    fn stage_names_round_trip_from_yaml() {
        let stage: Stage = serde_yaml::from_str("validate_total").unwrap();
        assert_eq!(stage, Stage::ValidateTotal);
        let stage: Stage = serde_yaml::from_str("add_to_cart").unwrap();
        assert_eq!(stage, Stage::AddToCart);
    }
}
