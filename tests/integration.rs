//! Integration tests for cartwalk
//!
//! These tests require Chrome to be installed and available.
//! Run with: cargo test --test integration -- --ignored

use cartwalk::locator::{
    self, click_with_fallback, dismiss_in_frames, element_texts, find_clickable_by_text,
    first_visible_text, first_visible_value, nth_link_path, probe, select_option,
};
use cartwalk::{WalkConfig, Walker};
use eoka::Browser;

/// Check if Chrome is available
fn chrome_available() -> bool {
    eoka::stealth::patcher::find_chrome().is_ok()
}

async fn page_with(html: &str) -> Option<(Browser, eoka::Page)> {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return None;
    }
    let browser = Browser::launch().await.expect("Failed to launch browser");
    let page = browser
        .new_page("about:blank")
        .await
        .expect("Failed to create page");
    page.goto(&format!("data:text/html,{}", html))
        .await
        .expect("Failed to navigate");
    Some((browser, page))
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn probe_skips_matching_but_invisible_candidates() {
    let Some((browser, page)) = page_with(
        r#"
        <button id="primary" style="display:none">Hidden</button>
        <button class="secondary">Visible</button>
    "#,
    )
    .await
    else {
        return;
    };

    // "#primary" matches but is invisible, ".missing" matches nothing,
    // so the third candidate wins.
    let found = probe(&page, &["#primary", ".missing", ".secondary"], true)
        .await
        .expect("probe failed")
        .expect("expected a match");
    assert_eq!(found.selector, ".secondary");
    assert_eq!(found.tag, "button");

    // Without the visibility requirement the first candidate wins.
    let found = probe(&page, &["#primary", ".secondary"], false)
        .await
        .expect("probe failed")
        .expect("expected a match");
    assert_eq!(found.selector, "#primary");

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn probe_swallows_invalid_selectors() {
    let Some((browser, page)) = page_with(r#"<button>Go</button>"#).await else {
        return;
    };

    let found = probe(&page, &["[[broken", "button"], true)
        .await
        .expect("probe failed")
        .expect("expected a match");
    assert_eq!(found.selector, "button");

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn probe_reports_match_and_visible_counts() {
    let Some((browser, page)) = page_with(
        r#"
        <div class="result">one</div>
        <div class="result">two</div>
        <div class="result" style="display:none">three</div>
    "#,
    )
    .await
    else {
        return;
    };

    let found = probe(&page, &[".result"], true)
        .await
        .expect("probe failed")
        .expect("expected a match");
    assert_eq!(found.count, 3);
    assert_eq!(found.visible_count, 2);

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn text_scan_climbs_to_clickable_ancestor() {
    let Some((browser, page)) = page_with(
        r#"
        <div>Add to Cart instructions</div>
        <button onclick="this.id='clicked'"><span>Add to Cart</span></button>
    "#,
    )
    .await
    else {
        return;
    };

    let path = find_clickable_by_text(&page, "span, button, input, a", &["Add to Cart"])
        .await
        .expect("scan failed")
        .expect("expected a clickable element");
    assert!(click_with_fallback(&page, &path).await.expect("click failed"));

    let clicked: bool = page
        .evaluate("!!document.getElementById('clicked')")
        .await
        .expect("Failed to evaluate");
    assert!(clicked, "expected the button, not the span, to be clicked");

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn forced_click_reaches_undisplayed_control() {
    let Some((browser, page)) = page_with(
        r#"
        <button id="decline" style="display:none"
                onclick="document.title='forced'">No thanks</button>
    "#,
    )
    .await
    else {
        return;
    };

    assert!(click_with_fallback(&page, "#decline")
        .await
        .expect("click failed"));
    let title = page.title().await.expect("Failed to read title");
    assert_eq!(title, "forced");

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn select_option_sets_value_and_fires_change() {
    let Some((browser, page)) = page_with(
        r#"
        <select id="qty" onchange="document.title='qty-'+this.value">
            <option value="1">1</option>
            <option value="2">2</option>
            <option value="3">3</option>
        </select>
    "#,
    )
    .await
    else {
        return;
    };

    assert!(select_option(&page, "#qty", "2").await.expect("select failed"));
    let value: String = page
        .evaluate("document.getElementById('qty').value")
        .await
        .expect("Failed to evaluate");
    assert_eq!(value, "2");
    let title = page.title().await.expect("Failed to read title");
    assert_eq!(title, "qty-2");

    // Unknown option is reported, not silently ignored.
    assert!(!select_option(&page, "#qty", "9").await.expect("select failed"));

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn element_texts_respects_limit() {
    let Some((browser, page)) = page_with(
        r#"
        <div class="r">Sony WH-1000XM5</div>
        <div class="r">Beats Studio Pro</div>
        <div class="r">Apple AirPods Max</div>
    "#,
    )
    .await
    else {
        return;
    };

    let texts = element_texts(&page, ".r", 2).await.expect("texts failed");
    assert_eq!(texts, vec!["Sony WH-1000XM5", "Beats Studio Pro"]);

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn nth_link_prefers_anchor_over_container() {
    let Some((browser, page)) = page_with(
        r#"
        <div class="r"><span>no link here</span></div>
        <div class="r"><a href="https://example.com/dp/B08PZHYWJS" id="product-link">Apple AirPods Max</a></div>
    "#,
    )
    .await
    else {
        return;
    };

    let path = nth_link_path(&page, ".r", 1)
        .await
        .expect("resolve failed")
        .expect("expected a path");
    assert_eq!(path, "#product-link");

    // Containers without an anchor resolve to themselves.
    let path = nth_link_path(&page, ".r", 0)
        .await
        .expect("resolve failed")
        .expect("expected a path");
    assert!(path.ends_with("div:nth-of-type(1)"), "path: {}", path);

    // Out of range is a clean miss.
    let missing = nth_link_path(&page, ".r", 9).await.expect("resolve failed");
    assert!(missing.is_none());

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn first_text_and_value_skip_hidden_elements() {
    let Some((browser, page)) = page_with(
        r#"
        <span class="price" style="display:none">$999.00</span>
        <span class="price">$549.00</span>
        <input name="quantity-field" value="2">
    "#,
    )
    .await
    else {
        return;
    };

    let text = first_visible_text(&page, &[".missing", ".price"])
        .await
        .expect("read failed")
        .expect("expected text");
    assert_eq!(text, "$549.00");

    let value = first_visible_value(&page, &["input[name*='quantity']"])
        .await
        .expect("read failed")
        .expect("expected value");
    assert_eq!(value, "2");

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn frame_scan_dismisses_same_origin_popup() {
    let Some((browser, page)) = page_with(
        r#"
        <iframe srcdoc="<button onclick=&quot;this.id='declined'&quot;>No thanks</button>"></iframe>
    "#,
    )
    .await
    else {
        return;
    };
    page.wait(500).await;

    let dismissed = dismiss_in_frames(&page, &["No thanks"])
        .await
        .expect("frame scan failed");
    assert!(dismissed);

    let clicked: bool = page
        .evaluate(
            "!!document.querySelector('iframe').contentDocument.getElementById('declined')",
        )
        .await
        .expect("Failed to evaluate");
    assert!(clicked);

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn frame_scan_reports_absence() {
    let Some((browser, page)) = page_with(r#"<p>no frames, no popup</p>"#).await else {
        return;
    };

    let dismissed = dismiss_in_frames(&page, &["no thanks"])
        .await
        .expect("frame scan failed");
    assert!(!dismissed);

    let frames = locator::frame_count(&page).await.expect("count failed");
    assert_eq!(frames, 0);

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires network and Chrome"]
async fn live_walk_returns_regardless_of_cart_outcome() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let config = WalkConfig::parse(
        r#"
name: "Live AirPods walk"
browser:
  headless: true
search:
  term: "AirPods Max Over-Ear Headphone"
  keywords: ["apple", "airpods"]
"#,
    )
    .unwrap();

    let browser = Browser::launch_with_config(config.browser.stealth())
        .await
        .expect("Failed to launch browser");
    let page = browser
        .new_page("about:blank")
        .await
        .expect("Failed to create page");

    // Cart and checkout stages are allowed to fail; the walk itself must
    // come back with a report either way.
    let report = Walker::new(&page, &config).run().await;
    assert!(!report.stages.is_empty());
    eprintln!("live walk outcome: {}", report.outcome);
    for stage in &report.stages {
        eprintln!("  {}: {}", stage.stage, stage.status);
    }

    browser.close().await.expect("Failed to close browser");
}
