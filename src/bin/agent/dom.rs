use anyhow::{Result, anyhow};
use headless_chrome::Tab;
use serde_json::Value;
use std::sync::Arc;

use webpilot::types::{Action, ActionKind, ExecutionResult, PageState};

/// JavaScript injected into the page to build a [`PageState`].
///
/// The script:
///   1. Clears old `data-eid` tags and walks every visible interactive element
///      (links, buttons, inputs, ARIA widgets, contenteditable regions).
///   2. Tags each with a sequential id `e0`, `e1`, ... via `data-eid`.
///   3. Collects headings and paragraph-like text up to `__BUDGET__` chars.
///   4. Returns the whole state as a JSON string.
const CAPTURE_JS: &str = r#"
(() => {
  const BUDGET = __BUDGET__;
  const SELECTORS = [
    'a[href]', 'button', 'input', 'textarea', 'select',
    "[role='button']", "[role='link']", "[role='tab']", "[role='menuitem']",
    "[role='checkbox']", "[role='radio']", "[role='textbox']", "[role='combobox']",
    '[onclick]', "[contenteditable='true']", "[contenteditable='plaintext-only']"
  ];

  function isVisible(el) {
    if (!el.offsetParent && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    if (s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 || r.height > 0;
  }

  function label(el) {
    const aria = el.getAttribute('aria-label');
    if (aria) return aria.trim();
    const text = (el.innerText || el.textContent || '').trim().replace(/\s+/g, ' ');
    if (text) return text.length <= 80 ? text : text.slice(0, 77) + '...';
    for (const attr of ['placeholder', 'title']) {
      const v = el.getAttribute(attr);
      if (v) return v.trim();
    }
    const img = el.querySelector('img');
    if (img && img.alt) return img.alt.trim();
    const name = el.getAttribute('name') || el.getAttribute('id');
    return name ? '[' + name + ']' : '[unlabeled]';
  }

  function kind(el) {
    const tag = el.tagName.toLowerCase();
    const role = el.getAttribute('role');
    if (el.isContentEditable) return role === 'textbox' ? 'rich-textbox' : 'editable';
    if (role === 'textbox') return 'rich-textbox';
    if (tag === 'a') return 'link';
    if (tag === 'button' || role === 'button') return 'button';
    if (tag === 'select') return 'dropdown';
    if (tag === 'textarea') return 'textarea';
    if (tag === 'input') {
      const t = (el.getAttribute('type') || 'text').toLowerCase();
      if (t === 'submit') return 'submit-button';
      if (['checkbox', 'radio'].includes(t)) return t;
      if (['password', 'search', 'email', 'file'].includes(t)) return t + '-input';
      return 'input';
    }
    return role || tag;
  }

  document.querySelectorAll('[data-eid]').forEach(el => el.removeAttribute('data-eid'));
  const elements = [];
  let next = 0;
  for (const el of document.querySelectorAll(SELECTORS.join(', '))) {
    if (!isVisible(el)) continue;
    const id = 'e' + (next++);
    el.setAttribute('data-eid', id);
    elements.push({
      id,
      type: kind(el),
      label: label(el),
      value: typeof el.value === 'string' && el.value !== '' ? el.value : null,
      checked: typeof el.checked === 'boolean' ? el.checked : null,
      disabled: el.disabled ? true : null,
      href: el.tagName === 'A' ? el.href : null,
    });
  }

  const parts = [];
  document.querySelectorAll('h1, h2, h3').forEach(h => {
    const t = h.innerText.trim();
    if (t) parts.push('[' + h.tagName.toLowerCase() + '] ' + t);
  });
  document.querySelectorAll('p, li, td, th, label').forEach(p => {
    const t = p.innerText.trim().replace(/\s+/g, ' ');
    if (t.length > 10) parts.push(t);
  });
  let pageText = parts.join('\n');
  if (pageText.length > BUDGET) pageText = pageText.slice(0, BUDGET) + '\n[...truncated]';

  return JSON.stringify({
    url: location.href,
    title: document.title,
    interactiveElements: elements,
    pageText,
    scrollPosition: {
      x: window.scrollX,
      y: window.scrollY,
      maxY: document.documentElement.scrollHeight - window.innerHeight,
    },
  });
})()
"#;

/// Element actions. `__ACTION__` is replaced with `{kind, params}` JSON.
/// Returns a JSON string shaped like [`ExecutionResult`].
const ACTION_JS: &str = r#"
(async () => {
  const { kind, params } = __ACTION__;
  const sleep = ms => new Promise(r => setTimeout(r, ms));
  const find = id => {
    const el = document.querySelector('[data-eid="' + id + '"]');
    if (!el) throw new Error('Element ' + id + ' not found on page');
    el.scrollIntoView({ block: 'center' });
    return el;
  };
  const editable = el => {
    if (el.isContentEditable) return el;
    return el.querySelector("[contenteditable='true'], textarea, input[type='text'], input:not([type]), [role='textbox']") || el;
  };
  const text = el => (el.innerText || el.textContent || el.value || '').trim();

  try {
    switch (kind) {
      case 'click': {
        const el = find(params.id);
        await sleep(150);
        el.click();
        return { success: true };
      }
      case 'type': {
        const target = editable(find(params.id));
        target.focus();
        if (target.isContentEditable) {
          if (params.clear !== false) {
            document.execCommand('selectAll', false, null);
            document.execCommand('delete', false, null);
            if (text(target)) target.textContent = '';
          }
          if (!document.execCommand('insertText', false, params.text) || !text(target)) {
            target.textContent = params.text;
            target.dispatchEvent(new Event('input', { bubbles: true }));
          }
          const actual = text(target);
          return { success: actual.includes(params.text), actualText: actual };
        }
        const proto = target.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
        const setter = Object.getOwnPropertyDescriptor(proto, 'value');
        const set = v => setter && setter.set ? setter.set.call(target, v) : (target.value = v);
        const base = params.clear === false ? (target.value || '') : '';
        set(base + params.text);
        if (target._valueTracker) target._valueTracker.setValue('');
        target.dispatchEvent(new Event('input', { bubbles: true }));
        target.dispatchEvent(new Event('change', { bubbles: true }));
        return { success: true, actualText: target.value };
      }
      case 'select': {
        const el = find(params.id);
        el.value = params.value;
        el.dispatchEvent(new Event('change', { bubbles: true }));
        el.dispatchEvent(new Event('input', { bubbles: true }));
        return { success: el.value === String(params.value) };
      }
      case 'scroll': {
        const amount = Number(params.amount) || 500;
        const dir = params.direction || 'down';
        if (dir === 'down') window.scrollBy(0, amount);
        else if (dir === 'up') window.scrollBy(0, -amount);
        else if (dir === 'top') window.scrollTo(0, 0);
        else if (dir === 'bottom') window.scrollTo(0, document.documentElement.scrollHeight);
        else return { success: false, error: 'Unknown scroll direction: ' + dir };
        return { success: true };
      }
      case 'hover': {
        const el = find(params.id);
        const r = el.getBoundingClientRect();
        const opts = { bubbles: true, clientX: r.left + r.width / 2, clientY: r.top + r.height / 2 };
        for (const type of ['mouseenter', 'mouseover', 'mousemove']) el.dispatchEvent(new MouseEvent(type, opts));
        await sleep(Number(params.duration) || 500);
        return { success: true };
      }
      case 'copy': {
        const value = params.text || (params.id ? text(find(params.id)) : '');
        await navigator.clipboard.writeText(value);
        return { success: true, data: value };
      }
      case 'extract': {
        if (params.selector) {
          const found = [...document.querySelectorAll(params.selector)].map(text).filter(Boolean);
          return { success: true, data: found.join('\n') };
        }
        return { success: true, data: document.body.innerText.slice(0, 5000) };
      }
      case 'focus': {
        find(params.id).focus();
        return { success: true };
      }
      default:
        return { success: false, error: 'Unknown action: ' + kind };
    }
  } catch (e) {
    return { success: false, error: e.message };
  }
})().then(JSON.stringify)
"#;

/// Capture the current page. Tabs are filled in by the caller.
pub fn capture_page(tab: &Arc<Tab>, text_budget: usize) -> Result<PageState> {
    let script = CAPTURE_JS.replace("__BUDGET__", &text_budget.to_string());
    let raw = eval_string(tab, &script, false)?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("capture returned malformed state: {e}"))
}

/// Run an element-level action inside the page.
pub fn run_action(tab: &Arc<Tab>, action: &Action) -> Result<ExecutionResult> {
    run_script_action(tab, action.kind.as_str(), &Value::Object(action.params.clone()))
}

/// Focus an element so native key events land on it.
pub fn focus(tab: &Arc<Tab>, id: &str) -> Result<ExecutionResult> {
    run_script_action(tab, "focus", &serde_json::json!({ "id": id }))
}

fn run_script_action(tab: &Arc<Tab>, kind: &str, params: &Value) -> Result<ExecutionResult> {
    let payload = serde_json::json!({ "kind": kind, "params": params });
    let script = ACTION_JS.replace("__ACTION__", &payload.to_string());
    let raw = eval_string(tab, &script, true)?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("action returned malformed result: {e}"))
}

/// Get the current page title.
pub fn get_page_title(tab: &Arc<Tab>) -> Result<String> {
    eval_string(tab, "document.title", false)
}

fn eval_string(tab: &Arc<Tab>, script: &str, await_promise: bool) -> Result<String> {
    let result = tab.evaluate(script, await_promise)?;
    result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| anyhow!("script returned no value"))
}

/// Actions the page script handles; the rest are driven through the DevTools protocol.
pub fn is_script_action(kind: ActionKind) -> bool {
    matches!(
        kind,
        ActionKind::Click
            | ActionKind::Type
            | ActionKind::Select
            | ActionKind::Scroll
            | ActionKind::Hover
            | ActionKind::Copy
            | ActionKind::Extract
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_have_their_placeholders() {
        assert!(CAPTURE_JS.contains("__BUDGET__"));
        assert!(ACTION_JS.contains("__ACTION__"));
    }

    #[test]
    fn capture_payload_deserializes_into_page_state() {
        let raw = r#"{
            "url": "https://shop.example/cart",
            "title": "Cart",
            "interactiveElements": [
                {"id": "e0", "type": "submit-button", "label": "Checkout", "value": null,
                 "checked": null, "disabled": null, "href": null}
            ],
            "pageText": "[h1] Your cart",
            "scrollPosition": {"x": 0, "y": 120, "maxY": 900}
        }"#;
        let page: PageState = serde_json::from_str(raw).unwrap();
        assert_eq!(page.interactive_elements[0].kind, "submit-button");
        assert_eq!(page.scroll_position.max_y, 900.0);
        assert!(page.tabs.is_empty());
    }

    #[test]
    fn script_actions_exclude_navigation_and_timing() {
        assert!(is_script_action(ActionKind::Click));
        assert!(!is_script_action(ActionKind::Keypress));
        assert!(!is_script_action(ActionKind::Wait));
        assert!(!is_script_action(ActionKind::Navigate));
    }
}
