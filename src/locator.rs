//! Element discovery primitives - ordered selector probing, free-text scans,
//! and click fallbacks, all resolved in-page via JS at action time.

use eoka::Page;
use serde::Deserialize;
use tracing::debug;

use crate::Result;

/// Outcome of a successful probe: the candidate that won, and what it found.
/// The element behind it is only known visible at capture time; the live page
/// can mutate underneath before it is acted on.
#[derive(Debug, Clone, Deserialize)]
pub struct StageMatch {
    /// The winning candidate selector.
    pub selector: String,
    /// Tag name of the first visible element it resolved to.
    pub tag: String,
    /// Total elements the selector resolved to.
    pub count: usize,
    /// How many of those report visible.
    pub visible_count: usize,
}

/// Walks an ordered candidate list and reports the first selector with at
/// least one match (and, when required, at least one visible match). Invalid
/// selectors count as non-matching.
const PROBE_JS: &str = r#"
((arg) => {
    const visible = el => {
        const r = el.getBoundingClientRect();
        const s = getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    };
    for (const sel of arg.selectors) {
        let els;
        try { els = Array.from(document.querySelectorAll(sel)); } catch (e) { continue; }
        if (els.length === 0) continue;
        const vis = els.filter(visible);
        if (arg.require_visible && vis.length === 0) continue;
        const first = vis[0] || els[0];
        return {
            selector: sel,
            tag: first.tagName.toLowerCase(),
            count: els.length,
            visible_count: vis.length,
        };
    }
    return null;
})
"#;

/// Finds a visible element whose value/text/aria-label contains any needle,
/// then resolves its nearest clickable ancestor-or-self to a CSS path.
const TEXT_SCAN_JS: &str = r#"
((arg) => {
    const lc = s => (s || '').toLowerCase();
    const visible = el => {
        const r = el.getBoundingClientRect();
        const s = getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    };
    function cssPath(el) {
        if (el.id) return '#' + CSS.escape(el.id);
        const path = [];
        let n = el;
        while (n && n.nodeType === 1) {
            let s = n.tagName.toLowerCase();
            if (n.id) { path.unshift('#' + CSS.escape(n.id)); break; }
            const p = n.parentElement;
            if (p) {
                const sibs = [...p.children].filter(c => c.tagName === n.tagName);
                if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(n) + 1) + ')';
            }
            path.unshift(s);
            n = p;
        }
        return path.join(' > ');
    }
    let nodes;
    try { nodes = Array.from(document.querySelectorAll(arg.scope)); } catch (e) { return null; }
    for (const el of nodes) {
        if (!visible(el)) continue;
        const hay = lc(el.value) + ' ' + lc(el.innerText) + ' ' + lc(el.getAttribute('aria-label'));
        if (!arg.needles.some(n => hay.includes(n))) continue;
        const target = el.closest("a, button, input, [role='button'], [onclick]") || el;
        return cssPath(target);
    }
    return null;
})
"#;

/// Resolves the first `<a>` descendant of the nth element a selector matches
/// (or the element itself) to a CSS path.
const NTH_LINK_JS: &str = r#"
((arg) => {
    function cssPath(el) {
        if (el.id) return '#' + CSS.escape(el.id);
        const path = [];
        let n = el;
        while (n && n.nodeType === 1) {
            let s = n.tagName.toLowerCase();
            if (n.id) { path.unshift('#' + CSS.escape(n.id)); break; }
            const p = n.parentElement;
            if (p) {
                const sibs = [...p.children].filter(c => c.tagName === n.tagName);
                if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(n) + 1) + ')';
            }
            path.unshift(s);
            n = p;
        }
        return path.join(' > ');
    }
    const els = document.querySelectorAll(arg.selector);
    const el = els[arg.index];
    if (!el) return null;
    return cssPath(el.querySelector('a') || el);
})
"#;

const FIRST_TEXT_JS: &str = r#"
((selectors) => {
    const visible = el => {
        const r = el.getBoundingClientRect();
        const s = getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    };
    for (const sel of selectors) {
        let els;
        try { els = Array.from(document.querySelectorAll(sel)); } catch (e) { continue; }
        const el = els.find(visible);
        if (!el) continue;
        const text = (el.innerText || el.textContent || '').trim();
        if (text) return text;
    }
    return null;
})
"#;

const FIRST_VALUE_JS: &str = r#"
((selectors) => {
    const visible = el => {
        const r = el.getBoundingClientRect();
        const s = getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    };
    for (const sel of selectors) {
        let els;
        try { els = Array.from(document.querySelectorAll(sel)); } catch (e) { continue; }
        const el = els.find(visible);
        if (!el) continue;
        const value = (el.value || el.innerText || el.textContent || '').trim();
        if (value) return value;
    }
    return null;
})
"#;

/// Scans same-origin embedded frames for a control matching any needle and
/// clicks it in place. Cross-origin frames are skipped.
const FRAME_DISMISS_JS: &str = r#"
((arg) => {
    const lc = s => (s || '').toLowerCase();
    for (const frame of Array.from(document.querySelectorAll('iframe'))) {
        let doc;
        try { doc = frame.contentDocument; } catch (e) { continue; }
        if (!doc) continue;
        let els;
        try { els = Array.from(doc.querySelectorAll("input[type='submit'], button, input")); } catch (e) { continue; }
        for (const el of els) {
            const hay = lc(el.value) + ' ' + lc(el.innerText) + ' ' + lc(el.getAttribute('aria-label'));
            if (arg.needles.some(n => hay.includes(n))) {
                el.click();
                return true;
            }
        }
    }
    return false;
})
"#;

fn apply(js: &str, arg: &serde_json::Value) -> String {
    format!("{}({})", js, arg)
}

/// Evaluate an ordered candidate list, first match wins. A candidate succeeds
/// iff it resolves to at least one element and (when `require_visible`) one of
/// them reports visible; earlier non-matching or invisible candidates are
/// ignored.
pub async fn probe(
    page: &Page,
    candidates: &[&str],
    require_visible: bool,
) -> Result<Option<StageMatch>> {
    let arg = serde_json::json!({
        "selectors": candidates,
        "require_visible": require_visible,
    });
    Ok(page.evaluate(&apply(PROBE_JS, &arg)).await?)
}

/// Like [`probe`], but grants each candidate a visibility wait before moving
/// on to the next. Used where the page is still streaming results in.
pub async fn probe_with_wait(
    page: &Page,
    candidates: &[&str],
    timeout_ms: u64,
) -> Option<StageMatch> {
    for &sel in candidates {
        if page.wait_for_visible(sel, timeout_ms).await.is_err() {
            continue;
        }
        match probe(page, &[sel], true).await {
            Ok(Some(m)) => return Some(m),
            Ok(None) => continue,
            Err(e) => {
                debug!("probe failed on '{}': {}", sel, e);
                continue;
            }
        }
    }
    None
}

/// Click the first visible candidate. Returns the selector that was clicked.
pub async fn click_first_visible(
    page: &Page,
    candidates: &[&str],
) -> Result<Option<String>> {
    let Some(found) = probe(page, candidates, true).await? else {
        return Ok(None);
    };
    if click_with_fallback(page, &found.selector).await? {
        Ok(Some(found.selector))
    } else {
        Ok(None)
    }
}

/// Click via the input pipeline first; if that fails, fall back to a forced
/// in-page `el.click()`.
pub async fn click_with_fallback(page: &Page, selector: &str) -> Result<bool> {
    match page.try_click(selector).await {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(e) => debug!("click failed on '{}': {}", selector, e),
    }
    let js = format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
        serde_json::to_string(selector).unwrap()
    );
    Ok(page.evaluate::<bool>(&js).await.unwrap_or(false))
}

/// Free-text scan over `scope` elements: first visible element whose
/// value/text/aria-label contains any of `needles` resolves to the CSS path
/// of its nearest clickable ancestor-or-self.
pub async fn find_clickable_by_text(
    page: &Page,
    scope: &str,
    needles: &[&str],
) -> Result<Option<String>> {
    let lowered: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
    let arg = serde_json::json!({ "scope": scope, "needles": lowered });
    Ok(page.evaluate(&apply(TEXT_SCAN_JS, &arg)).await?)
}

/// Visible texts of the first `limit` elements a selector matches.
pub async fn element_texts(page: &Page, selector: &str, limit: usize) -> Result<Vec<String>> {
    let arg = serde_json::json!({ "selector": selector, "limit": limit });
    let js = format!(
        "((arg) => Array.from(document.querySelectorAll(arg.selector)).slice(0, arg.limit).map(el => (el.innerText || '').trim()))({})",
        arg
    );
    Ok(page.evaluate(&js).await?)
}

/// CSS path of the first anchor inside the nth match of `selector`, falling
/// back to the container itself when it holds no anchor.
pub async fn nth_link_path(
    page: &Page,
    selector: &str,
    index: usize,
) -> Result<Option<String>> {
    let arg = serde_json::json!({ "selector": selector, "index": index });
    Ok(page.evaluate(&apply(NTH_LINK_JS, &arg)).await?)
}

/// Inner text of the first visible match across an ordered candidate list.
pub async fn first_visible_text(
    page: &Page,
    candidates: &[&str],
) -> Result<Option<String>> {
    let arg = serde_json::json!(candidates);
    Ok(page.evaluate(&apply(FIRST_TEXT_JS, &arg)).await?)
}

/// Form value (or text) of the first visible match across candidates.
pub async fn first_visible_value(
    page: &Page,
    candidates: &[&str],
) -> Result<Option<String>> {
    let arg = serde_json::json!(candidates);
    Ok(page.evaluate(&apply(FIRST_VALUE_JS, &arg)).await?)
}

/// Select a dropdown option by value or visible text, dispatching `change`.
pub async fn select_option(page: &Page, selector: &str, value: &str) -> Result<bool> {
    let arg = serde_json::json!({ "sel": selector, "val": value });
    let js = format!(
        r#"((arg) => {{
            const sel = document.querySelector(arg.sel);
            if (!sel || !sel.options) return false;
            const opt = Array.from(sel.options).find(o => o.value === arg.val || o.text === arg.val);
            if (!opt) return false;
            sel.value = opt.value;
            sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
        }})({})"#,
        arg
    );
    Ok(page.evaluate(&js).await?)
}

/// Number of frames embedded in the page.
pub async fn frame_count(page: &Page) -> Result<u64> {
    Ok(page.evaluate("window.frames.length").await?)
}

/// Scan same-origin frames for a control matching any needle and click it.
pub async fn dismiss_in_frames(page: &Page, needles: &[&str]) -> Result<bool> {
    let lowered: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
    let arg = serde_json::json!({ "needles": lowered });
    Ok(page.evaluate(&apply(FRAME_DISMISS_JS, &arg)).await?)
}
