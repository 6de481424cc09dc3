//! Selector descriptors and the page scripts that resolve them.
//!
//! Selectors identify elements the way a user perceives them: by ARIA role and
//! accessible name, by label, placeholder or visible text. `Css` and `XPath`
//! exist as structural fallbacks; they break on markup changes, so the harness
//! logs a warning whenever a scenario leans on one.
//!
//! Text-like matching follows the usual locator rules: whitespace is
//! collapsed and comparison is a case-insensitive substring match unless a
//! role selector asks for `exact`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element bounding box in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X position
    pub x: f64,
    /// Y position
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Zero-area boxes cannot be clipped to
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Selector type for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SelectorDef", into = "SelectorDef")]
pub enum Selector {
    /// ARIA role with optional accessible name (`getByRole`)
    Role {
        /// Role name, e.g. `heading`, `button`, `combobox`
        role: String,
        /// Accessible name filter
        name: Option<String>,
        /// Require the whole name to match
        exact: bool,
    },
    /// Form control by its label text
    Label(String),
    /// Input by placeholder text
    Placeholder(String),
    /// Innermost element containing the text
    Text(String),
    /// Test ID selector (data-testid attribute)
    TestId(String),
    /// CSS selector (structural fallback)
    Css(String),
    /// XPath selector (structural fallback)
    XPath(String),
}

impl Selector {
    /// Role selector with an accessible-name filter
    #[must_use]
    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: Some(name.into()),
            exact: false,
        }
    }

    /// Role selector matching any accessible name
    #[must_use]
    pub fn any_role(role: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: None,
            exact: false,
        }
    }

    /// Create a label selector
    #[must_use]
    pub fn label(label: impl Into<String>) -> Self {
        Self::Label(label.into())
    }

    /// Create a placeholder selector
    #[must_use]
    pub fn placeholder(text: impl Into<String>) -> Self {
        Self::Placeholder(text.into())
    }

    /// Create a text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a test ID selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create an XPath selector
    #[must_use]
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// Require an exact accessible-name match (role selectors only)
    #[must_use]
    pub fn exact(self) -> Self {
        match self {
            Self::Role { role, name, .. } => Self::Role {
                role,
                name,
                exact: true,
            },
            other => other,
        }
    }

    /// Structural selectors depend on markup rather than semantics
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Css(_) | Self::XPath(_))
    }

    /// Preference order, lower is better
    #[must_use]
    pub const fn precedence(&self) -> u8 {
        match self {
            Self::Role { .. } => 0,
            Self::Label(_) => 1,
            Self::Placeholder(_) => 2,
            Self::Text(_) => 3,
            Self::TestId(_) => 4,
            Self::Css(_) => 5,
            Self::XPath(_) => 6,
        }
    }

    /// JavaScript expression evaluating to the array of matching elements
    #[must_use]
    pub fn to_query(&self) -> String {
        match self {
            Self::Role { role, name, exact } => {
                let name = name.as_deref().map_or_else(|| "null".to_string(), js_string);
                format!("__verger.byRole({}, {name}, {exact})", js_string(role))
            }
            Self::Label(label) => format!("__verger.byLabel({})", js_string(label)),
            Self::Placeholder(text) => format!("__verger.byPlaceholder({})", js_string(text)),
            Self::Text(text) => format!("__verger.byText({})", js_string(text)),
            Self::TestId(id) => format!(
                "Array.from(document.querySelectorAll({}))",
                js_string(&format!("[data-testid=\"{}\"]", id.replace('"', "\\\"")))
            ),
            Self::Css(css) => format!("Array.from(document.querySelectorAll({}))", js_string(css)),
            Self::XPath(expr) => format!("__verger.byXPath({})", js_string(expr)),
        }
    }

    /// Script returning `{count, visible, text, box}` for this selector
    #[must_use]
    pub fn probe_script(&self) -> String {
        format!(
            "(() => {{ {PRELUDE} const els = {query}; \
             const first = els.find(__verger.isVisible); const target = first || els[0]; \
             let box = null; \
             if (first) {{ const r = first.getBoundingClientRect(); \
               box = {{ x: r.x + window.scrollX, y: r.y + window.scrollY, width: r.width, height: r.height }}; }} \
             return {{ count: els.length, visible: !!first, \
               text: target ? __verger.norm(target.innerText || target.textContent || target.value || '') : null, \
               box }}; }})()",
            query = self.to_query()
        )
    }

    /// Script clicking the first visible match; evaluates to `true` on success
    #[must_use]
    pub fn click_script(&self) -> String {
        format!(
            "(() => {{ {PRELUDE} const el = {query}.find(__verger.isVisible); \
             if (!el) return false; \
             el.scrollIntoView({{ block: 'center', inline: 'center' }}); \
             el.click(); return true; }})()",
            query = self.to_query()
        )
    }

    /// Script filling the first visible match; evaluates to `true` on success
    #[must_use]
    pub fn fill_script(&self, value: &str) -> String {
        format!(
            "(() => {{ {PRELUDE} const el = {query}.find(__verger.isVisible); \
             if (!el) return false; \
             el.focus(); \
             if (el.isContentEditable) {{ el.textContent = {value}; }} else {{ \
               const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype \
                 : el instanceof HTMLSelectElement ? HTMLSelectElement.prototype : HTMLInputElement.prototype; \
               const setter = Object.getOwnPropertyDescriptor(proto, 'value').set; \
               setter.call(el, {value}); }} \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true; }})()",
            query = self.to_query(),
            value = js_string(value)
        )
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role { role, name, exact } => match name {
                Some(name) if *exact => write!(f, "role={role}[name={name:?} exact]"),
                Some(name) => write!(f, "role={role}[name={name:?}]"),
                None => write!(f, "role={role}"),
            },
            Self::Label(label) => write!(f, "label={label:?}"),
            Self::Placeholder(text) => write!(f, "placeholder={text:?}"),
            Self::Text(text) => write!(f, "text={text:?}"),
            Self::TestId(id) => write!(f, "test-id={id:?}"),
            Self::Css(css) => write!(f, "css={css}"),
            Self::XPath(expr) => write!(f, "xpath={expr}"),
        }
    }
}

/// Collapse whitespace the way rendered text does
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Locator text comparison: case-insensitive substring, or full equality when `exact`
#[must_use]
pub fn text_matches(expected: &str, actual: &str, exact: bool) -> bool {
    let expected = normalize_text(expected);
    let actual = normalize_text(actual);
    if exact {
        actual == expected
    } else {
        actual.to_lowercase().contains(&expected.to_lowercase())
    }
}

/// Encode a string as a JavaScript string literal
#[must_use]
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Helpers injected in front of every selector script.
const PRELUDE: &str = r#"const __verger = (() => {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const matches = (expected, actual, exact) => exact
    ? norm(actual) === norm(expected)
    : norm(actual).toLowerCase().includes(norm(expected).toLowerCase());
  const IMPLICIT = {
    heading: 'h1,h2,h3,h4,h5,h6',
    button: 'button,input[type=button],input[type=submit],input[type=reset],summary',
    link: 'a[href],area[href]',
    textbox: 'input:not([type]),input[type=text],input[type=email],input[type=tel],input[type=url],input[type=password],input[type=date],input[type=number],textarea',
    searchbox: 'input[type=search]',
    combobox: 'select:not([multiple]),input[list]',
    listbox: 'select[multiple],datalist',
    option: 'option',
    checkbox: 'input[type=checkbox]',
    radio: 'input[type=radio]',
    dialog: 'dialog',
    img: 'img[alt]:not([alt=""])',
    list: 'ul,ol',
    listitem: 'li',
    navigation: 'nav',
    main: 'main',
    table: 'table',
    row: 'tr',
    cell: 'td',
    form: 'form',
  };
  const labelText = (el) => {
    const parts = [];
    if (el.labels) for (const l of el.labels) parts.push(l.innerText || l.textContent);
    return norm(parts.join(' '));
  };
  const accessibleName = (el) => {
    const aria = el.getAttribute('aria-label');
    if (aria) return norm(aria);
    const by = el.getAttribute('aria-labelledby');
    if (by) {
      const text = by.split(/\s+/).map((id) => document.getElementById(id)).filter(Boolean)
        .map((n) => n.innerText || n.textContent).join(' ');
      if (norm(text)) return norm(text);
    }
    const label = labelText(el);
    if (label) return label;
    if (el.getAttribute('alt')) return norm(el.getAttribute('alt'));
    if (el instanceof HTMLInputElement && ['button', 'submit', 'reset'].includes(el.type)) return norm(el.value);
    const text = norm(el.innerText || el.textContent);
    if (text) return text;
    return norm(el.getAttribute('title') || el.getAttribute('placeholder') || '');
  };
  const byRole = (role, name, exact) => {
    const implicit = IMPLICIT[role];
    const query = `[role="${role}"]` + (implicit ? ',' + implicit : '');
    return Array.from(document.querySelectorAll(query))
      .filter((el) => { const r = el.getAttribute('role'); return !r || r.split(/\s+/).includes(role); })
      .filter((el) => name === null || matches(name, accessibleName(el), exact));
  };
  const byLabel = (text) => {
    const found = new Set();
    for (const label of document.querySelectorAll('label')) {
      if (!matches(text, label.innerText || label.textContent, false)) continue;
      const control = label.control || label.querySelector('input,select,textarea');
      if (control) found.add(control);
    }
    for (const el of document.querySelectorAll('[aria-label]')) {
      if (matches(text, el.getAttribute('aria-label'), false)) found.add(el);
    }
    for (const el of document.querySelectorAll('[aria-labelledby]')) {
      if (matches(text, accessibleName(el), false)) found.add(el);
    }
    return Array.from(found);
  };
  const byPlaceholder = (text) => Array.from(document.querySelectorAll('[placeholder]'))
    .filter((el) => matches(text, el.getAttribute('placeholder'), false));
  const byText = (text) => Array.from(document.body ? document.body.querySelectorAll('*') : [])
    .filter((el) => !['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE'].includes(el.tagName))
    .filter((el) => matches(text, el.textContent, false))
    .filter((el) => !Array.from(el.children).some((c) => matches(text, c.textContent, false)));
  const byXPath = (expr) => {
    const snap = document.evaluate(expr, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    const out = [];
    for (let i = 0; i < snap.snapshotLength; i += 1) out.push(snap.snapshotItem(i));
    return out;
  };
  const isVisible = (el) => {
    if (!el || !el.isConnected) return false;
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none' || parseFloat(style.opacity || '1') === 0) return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  };
  return { norm, byRole, byLabel, byPlaceholder, byText, byXPath, isVisible };
})();"#;

/// Flat serialized form: exactly one locator key, plus `name`/`exact` for roles.
///
/// ```yaml
/// { role: heading, name: "Child Check-In" }
/// { placeholder: "Request type name" }
/// { css: "#theme-switcher-button" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectorDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    exact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xpath: Option<String>,
}

impl TryFrom<SelectorDef> for Selector {
    type Error = String;

    fn try_from(def: SelectorDef) -> Result<Self, Self::Error> {
        let mut found = Vec::new();
        if let Some(role) = def.role {
            found.push(Self::Role {
                role,
                name: def.name.clone(),
                exact: def.exact,
            });
        } else if def.name.is_some() || def.exact {
            return Err("`name` and `exact` only apply to role selectors".to_string());
        }
        found.extend(def.label.map(Self::Label));
        found.extend(def.placeholder.map(Self::Placeholder));
        found.extend(def.text.map(Self::Text));
        found.extend(def.test_id.map(Self::TestId));
        found.extend(def.css.map(Self::Css));
        found.extend(def.xpath.map(Self::XPath));

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err("selector needs one of role, label, placeholder, text, test_id, css, xpath"
                .to_string()),
            _ => Err("selector must use exactly one locator kind".to_string()),
        }
    }
}

impl From<Selector> for SelectorDef {
    fn from(selector: Selector) -> Self {
        let mut def = Self::default();
        match selector {
            Selector::Role { role, name, exact } => {
                def.role = Some(role);
                def.name = name;
                def.exact = exact;
            }
            Selector::Label(v) => def.label = Some(v),
            Selector::Placeholder(v) => def.placeholder = Some(v),
            Selector::Text(v) => def.text = Some(v),
            Selector::TestId(v) => def.test_id = Some(v),
            Selector::Css(v) => def.css = Some(v),
            Selector::XPath(v) => def.xpath = Some(v),
        }
        def
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    mod selector_tests {
        use super::*;

        #[test]
        fn test_structural_flags() {
            assert!(Selector::css("#main-content").is_structural());
            assert!(Selector::xpath("//button").is_structural());
            assert!(!Selector::role("button", "Edit").is_structural());
            assert!(!Selector::label("Full Name").is_structural());
        }

        #[test]
        fn test_semantic_kinds_rank_before_structural() {
            let semantic = [
                Selector::role("heading", "x"),
                Selector::label("x"),
                Selector::placeholder("x"),
                Selector::text("x"),
                Selector::test_id("x"),
            ];
            for s in &semantic {
                assert!(s.precedence() < Selector::css("x").precedence());
            }
        }

        #[test]
        fn test_display() {
            assert_eq!(
                Selector::role("heading", "Child Check-In").to_string(),
                "role=heading[name=\"Child Check-In\"]"
            );
            assert_eq!(Selector::any_role("combobox").to_string(), "role=combobox");
            assert_eq!(
                Selector::role("button", "Edit").exact().to_string(),
                "role=button[name=\"Edit\" exact]"
            );
        }

        #[test]
        fn test_exact_ignored_for_non_role() {
            assert_eq!(Selector::text("a").exact(), Selector::text("a"));
        }

        #[test]
        fn test_role_query_passes_name_and_exactness() {
            let q = Selector::role("button", "Add Child").to_query();
            assert_eq!(q, "__verger.byRole(\"button\", \"Add Child\", false)");
            let q = Selector::any_role("combobox").to_query();
            assert_eq!(q, "__verger.byRole(\"combobox\", null, false)");
        }

        #[test]
        fn test_test_id_query_quotes_attribute() {
            let q = Selector::test_id("member-row").to_query();
            assert!(q.contains("[data-testid=\\\"member-row\\\"]"));
        }

        #[test]
        fn test_scripts_embed_prelude_and_query() {
            let sel = Selector::placeholder("Request type name");
            for script in [
                sel.probe_script(),
                sel.click_script(),
                sel.fill_script("Test Request Type"),
            ] {
                assert!(script.contains("const __verger"));
                assert!(script.contains("__verger.byPlaceholder(\"Request type name\")"));
            }
            assert!(sel.fill_script("Test Request Type").contains("\"Test Request Type\""));
        }
    }

    mod serde_tests {
        use super::*;

        #[test]
        fn test_role_from_yaml() {
            let sel: Selector =
                serde_yaml_ng::from_str("{ role: heading, name: \"Child Check-In\" }").unwrap();
            assert_eq!(sel, Selector::role("heading", "Child Check-In"));
        }

        #[test]
        fn test_plain_kinds_from_yaml() {
            let sel: Selector = serde_yaml_ng::from_str("{ label: Full Name }").unwrap();
            assert_eq!(sel, Selector::label("Full Name"));
            let sel: Selector = serde_yaml_ng::from_str("{ css: \"#theme-switcher-button\" }").unwrap();
            assert_eq!(sel, Selector::css("#theme-switcher-button"));
        }

        #[test]
        fn test_rejects_two_kinds() {
            let err = serde_yaml_ng::from_str::<Selector>("{ label: a, text: b }").unwrap_err();
            assert!(err.to_string().contains("exactly one"));
        }

        #[test]
        fn test_rejects_name_without_role() {
            assert!(serde_yaml_ng::from_str::<Selector>("{ text: a, name: b }").is_err());
        }

        #[test]
        fn test_rejects_empty() {
            assert!(serde_yaml_ng::from_str::<Selector>("{}").is_err());
        }
    }

    mod text_tests {
        use super::*;

        #[test]
        fn test_substring_case_insensitive() {
            assert!(text_matches("check-in", "Child Check-In", false));
            assert!(!text_matches("check-in", "Child Check-In", true));
            assert!(text_matches("Child Check-In", "  Child\n Check-In ", true));
        }

        #[test]
        fn test_normalize() {
            assert_eq!(normalize_text(" a \n\t b  "), "a b");
        }
    }

    proptest! {
        #[test]
        fn prop_js_string_is_a_single_literal(s in ".*") {
            let lit = js_string(&s);
            prop_assert!(lit.starts_with('"') && lit.ends_with('"'));
            let back: String = serde_json::from_str(&lit).unwrap();
            prop_assert_eq!(back, s);
        }

        #[test]
        fn prop_text_matches_itself(s in "[a-zA-Z0-9 ]{1,20}") {
            prop_assume!(!normalize_text(&s).is_empty());
            prop_assert!(text_matches(&s, &s, true));
            prop_assert!(text_matches(&s.to_uppercase(), &s, false));
        }
    }
}
