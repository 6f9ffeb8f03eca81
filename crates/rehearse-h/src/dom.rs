//! In-page element lookup, visibility and actions.
//!
//! Every call is a single self-contained script evaluated in the top-level
//! page. The script walks `frame_path` (indices into each document's
//! `iframe, frame` list) down to the target document, so a context is just a
//! path. Resolved elements are kept in a per-document registry
//! (`window.__rehearse`) and addressed by numeric id afterwards. Entries for
//! elements that left the document are swept on every lookup, so the
//! registry only holds live nodes.

use chromiumoxide::Page;
use rehearse_engine::backend::BackendError;
use rehearse_engine::protocol::Selector;
use serde_json::{Value, json};
use std::time::Duration;

/// Bound on one script evaluation. Dialogs can block the JS thread.
const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retries for context errors during page navigation.
const MAX_CONTEXT_RETRIES: u32 = 5;

/// Delay between retries when the execution context is being replaced.
const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

const PRELUDE: &str = r#"
  let doc = document;
  for (const i of path) {
    const frames = doc.querySelectorAll('iframe, frame');
    const frame = frames[i];
    if (!frame) throw new Error('context: frame ' + i + ' is detached');
    let inner = null;
    try { inner = frame.contentDocument; } catch (_) { inner = null; }
    if (!inner) throw new Error('context: frame ' + i + ' is not accessible');
    doc = inner;
  }
  const win = doc.defaultView;
  if (!win) throw new Error('context: document has no window');
  const reg = win.__rehearse || (win.__rehearse = { next: 1, els: new Map(), ids: new WeakMap() });
  const lookup = (id) => {
    const el = reg.els.get(id);
    if (!el || !el.isConnected) throw new Error('stale: element ' + id + ' is gone');
    return el;
  };
  const isVisible = (el) => {
    if (!el || !el.isConnected) return false;
    const style = win.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
  };
"#;

const LOCATE_JS: &str = r#"
  const sel = args.selector;
  const textOf = (el) => (el.innerText || el.textContent || '').trim();
  const nameOf = (el) => {
    const label = el.getAttribute('aria-label');
    if (label) return label.trim();
    const by = el.getAttribute('aria-labelledby');
    if (by) {
      const parts = by.split(/\s+/).map((id) => doc.getElementById(id)).filter(Boolean);
      if (parts.length) return parts.map(textOf).join(' ').trim();
    }
    return textOf(el) || el.value || el.getAttribute('title') || el.getAttribute('alt') || '';
  };
  const implicitRoles = {
    button: 'button, input[type=button], input[type=submit], input[type=reset], summary',
    link: 'a[href], area[href]',
    listitem: 'li',
    heading: 'h1, h2, h3, h4, h5, h6',
    textbox: 'input:not([type]), input[type=text], input[type=email], input[type=password], input[type=search], input[type=tel], input[type=url], textarea',
    checkbox: 'input[type=checkbox]',
    radio: 'input[type=radio]',
    img: 'img[alt]',
    dialog: 'dialog',
  };
  const pickFirst = (list) => list.find(isVisible) || list[0] || null;

  let found = null;
  if (sel.css !== undefined) {
    found = doc.querySelector(sel.css);
  } else if (sel.nth_css !== undefined) {
    found = doc.querySelectorAll(sel.nth_css.css)[sel.nth_css.index] || null;
  } else if (sel.text !== undefined) {
    const re = new RegExp(sel.text, 'i');
    const all = Array.from((doc.body || doc.documentElement).querySelectorAll('*'))
      .filter((el) => !['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE'].includes(el.tagName));
    const matching = all.filter((el) => re.test(textOf(el)));
    const innermost = matching.filter((el) => !matching.some((other) => other !== el && el.contains(other)));
    found = pickFirst(innermost);
  } else if (sel.role !== undefined) {
    const role = sel.role.role;
    const query = '[role="' + role + '"]' + (implicitRoles[role] ? ', ' + implicitRoles[role] : '');
    let candidates = Array.from(doc.querySelectorAll(query));
    if (sel.role.name) {
      const re = new RegExp(sel.role.name, 'i');
      candidates = candidates.filter((el) => re.test(nameOf(el)));
    }
    found = pickFirst(candidates);
  }

  for (const [id, el] of reg.els) {
    if (!el.isConnected) reg.els.delete(id);
  }
  if (!found) return null;
  const known = reg.ids.get(found);
  if (known !== undefined && reg.els.get(known) === found) return known;
  const id = reg.next++;
  reg.els.set(id, found);
  reg.ids.set(found, id);
  return id;
"#;

const VISIBLE_JS: &str = r#"
  const el = reg.els.get(args.id);
  return isVisible(el);
"#;

const CLICK_JS: &str = r#"
  const el = lookup(args.id);
  if (el.scrollIntoView) el.scrollIntoView({ block: 'center', inline: 'center' });
  const rect = el.getBoundingClientRect();
  const init = {
    bubbles: true, cancelable: true, view: win, button: 0,
    clientX: rect.left + rect.width / 2, clientY: rect.top + rect.height / 2,
  };
  const PointerCtor = win.PointerEvent || win.MouseEvent;
  el.dispatchEvent(new PointerCtor('pointerdown', init));
  el.dispatchEvent(new win.MouseEvent('mousedown', init));
  el.dispatchEvent(new PointerCtor('pointerup', init));
  el.dispatchEvent(new win.MouseEvent('mouseup', init));
  el.dispatchEvent(new win.MouseEvent('click', init));
  return true;
"#;

const FILL_JS: &str = r#"
  const el = lookup(args.id);
  if (el.focus) el.focus();
  const proto = el instanceof win.HTMLTextAreaElement
    ? win.HTMLTextAreaElement.prototype
    : win.HTMLInputElement.prototype;
  const setter = Object.getOwnPropertyDescriptor(proto, 'value');
  if (setter && setter.set && (el instanceof win.HTMLInputElement || el instanceof win.HTMLTextAreaElement)) {
    setter.set.call(el, args.text);
  } else if (el.isContentEditable) {
    el.textContent = args.text;
  } else {
    throw new Error('element ' + args.id + ' is not editable');
  }
  el.dispatchEvent(new win.Event('input', { bubbles: true }));
  el.dispatchEvent(new win.Event('change', { bubbles: true }));
  return true;
"#;

const FOCUS_JS: &str = r#"
  const el = lookup(args.id);
  if (el.focus) el.focus();
  return true;
"#;

const FRAMES_JS: &str = r#"
  const out = [];
  const walk = (d, prefix) => {
    const frames = d.querySelectorAll('iframe, frame');
    frames.forEach((frame, i) => {
      const here = prefix.concat([i]);
      out.push(here);
      let inner = null;
      try { inner = frame.contentDocument; } catch (_) { inner = null; }
      if (inner) walk(inner, here);
    });
  };
  walk(doc, []);
  return out;
"#;

#[derive(Debug)]
enum EvalError {
    Timeout,
    Context(String),
    Other(String),
}

/// Check if an error indicates the page context is unavailable (e.g., during navigation).
fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

fn script(path: &[usize], body: &str, args: &Value) -> String {
    format!(
        "(() => {{ try {{ const path = {}; const args = {}; {} const value = (() => {{ {} }})(); \
         return {{ ok: true, value: value === undefined ? null : value }}; }} \
         catch (e) {{ return {{ ok: false, error: String((e && e.message) || e) }}; }} }})()",
        json!(path),
        args,
        PRELUDE,
        body
    )
}

async fn evaluate_with_timeout(page: &Page, expression: &str) -> Result<Value, EvalError> {
    let eval_result = tokio::time::timeout(EVAL_TIMEOUT, page.evaluate(expression)).await;

    match eval_result {
        Err(_) => Err(EvalError::Timeout),
        Ok(Err(e)) => {
            let err_str = e.to_string();
            if is_context_error(&err_str) {
                Err(EvalError::Context(err_str))
            } else {
                Err(EvalError::Other(err_str))
            }
        }
        Ok(Ok(remote_object)) => remote_object
            .into_value::<Value>()
            .map_err(|e| EvalError::Other(format!("Failed to get result: {}", e))),
    }
}

/// Run `body` against the document at `path` and unwrap its `{ok, value|error}` envelope.
async fn run(page: &Page, path: &[usize], body: &str, args: Value) -> Result<Value, BackendError> {
    let expression = script(path, body, &args);
    let mut last_error = None;

    for attempt in 0..MAX_CONTEXT_RETRIES {
        match evaluate_with_timeout(page, &expression).await {
            Ok(envelope) => return unwrap_envelope(envelope),
            Err(EvalError::Timeout) => {
                return Err(BackendError::Timeout(
                    "script timed out, possibly blocked by a dialog".into(),
                ));
            }
            Err(EvalError::Context(err_str)) => {
                tracing::debug!(
                    "Context error (attempt {}/{}), retrying...",
                    attempt + 1,
                    MAX_CONTEXT_RETRIES
                );
                last_error = Some(err_str);
                tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
            }
            Err(EvalError::Other(err_str)) => return Err(BackendError::ScriptError(err_str)),
        }
    }

    Err(BackendError::ContextUnavailable(
        last_error.unwrap_or_else(|| "execution context unavailable".to_string()),
    ))
}

fn unwrap_envelope(envelope: Value) -> Result<Value, BackendError> {
    if envelope.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(envelope.get("value").cloned().unwrap_or(Value::Null));
    }

    let error = envelope
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown script error")
        .to_string();
    if let Some(rest) = error.strip_prefix("context: ") {
        Err(BackendError::ContextUnavailable(rest.to_string()))
    } else if let Some(rest) = error.strip_prefix("stale: ") {
        Err(BackendError::StaleElement(rest.to_string()))
    } else {
        Err(BackendError::ScriptError(error))
    }
}

pub async fn locate(page: &Page, path: &[usize], selector: &Selector) -> Result<Option<u64>, BackendError> {
    let value = run(page, path, LOCATE_JS, json!({ "selector": selector })).await?;
    Ok(value.as_u64())
}

pub async fn is_visible(page: &Page, path: &[usize], id: u64) -> Result<bool, BackendError> {
    let value = run(page, path, VISIBLE_JS, json!({ "id": id })).await?;
    Ok(value.as_bool().unwrap_or(false))
}

pub async fn click(page: &Page, path: &[usize], id: u64) -> Result<(), BackendError> {
    run(page, path, CLICK_JS, json!({ "id": id })).await.map(|_| ())
}

pub async fn fill(page: &Page, path: &[usize], id: u64, text: &str) -> Result<(), BackendError> {
    run(page, path, FILL_JS, json!({ "id": id, "text": text }))
        .await
        .map(|_| ())
}

pub async fn focus(page: &Page, path: &[usize], id: u64) -> Result<(), BackendError> {
    run(page, path, FOCUS_JS, json!({ "id": id })).await.map(|_| ())
}

/// Paths of every frame reachable from the top document, depth first.
pub async fn frame_paths(page: &Page) -> Result<Vec<Vec<usize>>, BackendError> {
    let value = run(page, &[], FRAMES_JS, json!({})).await?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_errors_map_to_backend_errors() {
        let ok = unwrap_envelope(json!({ "ok": true, "value": 7 })).unwrap();
        assert_eq!(ok, json!(7));

        let detached = unwrap_envelope(json!({ "ok": false, "error": "context: frame 1 is detached" }));
        assert!(matches!(detached, Err(BackendError::ContextUnavailable(m)) if m == "frame 1 is detached"));

        let stale = unwrap_envelope(json!({ "ok": false, "error": "stale: element 3 is gone" }));
        assert!(matches!(stale, Err(BackendError::StaleElement(_))));

        let other = unwrap_envelope(json!({ "ok": false, "error": "boom" }));
        assert!(matches!(other, Err(BackendError::ScriptError(m)) if m == "boom"));
    }

    #[test]
    fn selectors_serialize_as_the_script_expects() {
        assert_eq!(
            json!(Selector::Css("#a".into())),
            json!({ "css": "#a" })
        );
        assert_eq!(
            json!(Selector::NthCss { css: "rect".into(), index: 1 }),
            json!({ "nth_css": { "css": "rect", "index": 1 } })
        );
        assert_eq!(
            json!(Selector::Role { role: "button".into(), name: None }),
            json!({ "role": { "role": "button" } })
        );
    }

    #[test]
    fn lookups_sweep_detached_entries() {
        assert!(PRELUDE.contains("ids: new WeakMap()"));
        let sweep = LOCATE_JS.find("reg.els.delete(id)").unwrap();
        let early_return = LOCATE_JS.find("if (!found) return null;").unwrap();
        assert!(sweep < early_return);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn registry_stays_bounded_when_nodes_are_replaced() {
        let Ok(client) = crate::cdp::CdpClient::launch(&crate::cdp::LaunchOptions::default()).await
        else {
            eprintln!("Chromium not available, skipping");
            return;
        };
        let page = &client.page;
        page.goto("data:text/html,<div id='host'><button id='play'>Play</button></div>")
            .await
            .unwrap();

        let play = Selector::Css("#play".into());
        let first = locate(page, &[], &play).await.unwrap().unwrap();
        assert_eq!(locate(page, &[], &play).await.unwrap(), Some(first));

        for _ in 0..20 {
            run(
                page,
                &[],
                "doc.getElementById('host').innerHTML = \"<button id='play'>Play</button>\"; return true;",
                json!({}),
            )
            .await
            .unwrap();
            assert!(locate(page, &[], &play).await.unwrap().is_some());
        }

        let size = run(page, &[], "return reg.els.size;", json!({})).await.unwrap();
        assert_eq!(size, json!(1));
        assert!(matches!(
            click(page, &[], first).await,
            Err(BackendError::StaleElement(_))
        ));

        client.close().await.unwrap();
    }

    #[test]
    fn script_embeds_path_and_args() {
        let s = script(&[0, 2], "return 1;", &json!({ "id": 5 }));
        assert!(s.contains("const path = [0,2];"));
        assert!(s.contains("const args = {\"id\":5};"));
    }
}
