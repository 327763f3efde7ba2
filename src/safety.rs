use crate::types::{Action, ActionKind, InteractiveElement, PageState, SafetyLevel, SafetyVerdict};

/// Purchase, payment, deletion and fund-transfer vocabulary that forces a confirmation.
pub const DANGEROUS_KEYWORDS: &[&str] = &[
    "buy",
    "purchase",
    "order",
    "checkout",
    "pay",
    "submit payment",
    "delete",
    "remove",
    "cancel subscription",
    "close account",
    "transfer",
    "send money",
    "wire",
    "withdraw",
];

const SUBMIT_MARKER: &str = "submit-button";
const SENSITIVE_FIELD_MARKERS: &[&str] = &["password", "card", "cvv", "expir"];

/// Gates element-targeted actions before they reach the executor.
#[derive(Debug, Clone, Default)]
pub struct SafetyClassifier {
    blocked_keywords: Vec<String>,
}

impl SafetyClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels containing any of these keywords are refused outright for clicks and typing.
    pub fn with_blocked_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocked_keywords: keywords
                .into_iter()
                .map(|kw| kw.as_ref().trim().to_lowercase())
                .filter(|kw| !kw.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, action: &Action, page: &PageState) -> SafetyVerdict {
        let kind = action.kind;
        if kind.is_read_only() {
            return SafetyVerdict::safe();
        }

        match kind {
            ActionKind::Navigate | ActionKind::TabOpen | ActionKind::TabSwitch => {
                SafetyVerdict::safe()
            }
            ActionKind::TabClose => verdict(
                SafetyLevel::Confirm,
                format!("Closing {} needs approval.", describe_tab(action)),
            ),
            ActionKind::Click => self.classify_click(action, page),
            ActionKind::Type => self.classify_type(action, page),
            ActionKind::Select => SafetyVerdict::safe(),
            _ => verdict(
                SafetyLevel::Confirm,
                format!(
                    "{kind} on \"{}\" needs approval.",
                    target_label(action, page)
                ),
            ),
        }
    }

    fn classify_click(&self, action: &Action, page: &PageState) -> SafetyVerdict {
        let Some(el) = target_element(action, page) else {
            return verdict(
                SafetyLevel::Confirm,
                format!(
                    "Click \"{}\": target element could not be resolved.",
                    target_label(action, page)
                ),
            );
        };
        let line = el.render_line();
        let label = el.label.to_lowercase();

        if let Some(kw) = self.blocked_match(&label) {
            return verdict(
                SafetyLevel::Block,
                format!("Click \"{line}\" matches blocked keyword \"{kw}\"."),
            );
        }
        if el.kind == SUBMIT_MARKER || DANGEROUS_KEYWORDS.iter().any(|kw| label.contains(kw)) {
            return verdict(
                SafetyLevel::Confirm,
                format!("Click \"{line}\": this may submit data or make a purchase."),
            );
        }
        SafetyVerdict::safe()
    }

    fn classify_type(&self, action: &Action, page: &PageState) -> SafetyVerdict {
        let Some(el) = target_element(action, page) else {
            return verdict(
                SafetyLevel::Confirm,
                format!(
                    "Type into \"{}\": target element could not be resolved.",
                    target_label(action, page)
                ),
            );
        };
        let line = el.render_line();
        let label = el.label.to_lowercase();
        let kind = el.kind.to_lowercase();

        if let Some(kw) = self.blocked_match(&label) {
            return verdict(
                SafetyLevel::Block,
                format!("Type into \"{line}\" matches blocked keyword \"{kw}\"."),
            );
        }
        if SENSITIVE_FIELD_MARKERS
            .iter()
            .any(|m| kind.contains(m) || label.contains(m))
        {
            return verdict(
                SafetyLevel::Confirm,
                format!("Type into \"{line}\": this may be a sensitive field."),
            );
        }
        SafetyVerdict::safe()
    }

    fn blocked_match(&self, lower: &str) -> Option<&str> {
        self.blocked_keywords
            .iter()
            .find(|kw| lower.contains(kw.as_str()))
            .map(String::as_str)
    }
}

/// The element the action's `id` points at, if it resolves on this page.
fn target_element<'a>(action: &Action, page: &'a PageState) -> Option<&'a InteractiveElement> {
    let id = action.param_text("id").filter(|id| !id.is_empty())?;
    page.find_element(&id)
}

fn target_label(action: &Action, page: &PageState) -> String {
    target_element(action, page)
        .map(InteractiveElement::render_line)
        .or_else(|| action.param_text("id"))
        .unwrap_or_else(|| "unknown element".to_string())
}

fn describe_tab(action: &Action) -> String {
    match action.param_text("tabId") {
        Some(id) => format!("tab {id}"),
        None => "the current tab".to_string(),
    }
}

fn verdict(level: SafetyLevel, reason: String) -> SafetyVerdict {
    SafetyVerdict { level, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> PageState {
        let mut state = PageState::new("https://shop.example", "Shop");
        state.interactive_elements = vec![
            InteractiveElement::new("wb-001", "button", "Submit Order"),
            InteractiveElement::new("wb-002", "link", "Product details"),
            InteractiveElement::new("wb-003", "password-input", "Password"),
            InteractiveElement::new("wb-004", "input", "Search"),
            InteractiveElement::new("wb-005", "submit-button", "Go"),
            InteractiveElement::new("wb-006", "input", "Card number"),
        ];
        state
    }

    fn click(id: &str) -> Action {
        Action::new(ActionKind::Click).with_param("id", id)
    }

    fn type_into(id: &str) -> Action {
        Action::new(ActionKind::Type)
            .with_param("id", id)
            .with_param("text", "hello")
    }

    #[test]
    fn submit_order_click_needs_confirmation() {
        let verdict = SafetyClassifier::new().classify(&click("wb-001"), &page());
        assert_eq!(verdict.level, SafetyLevel::Confirm);
        assert!(verdict.reason.contains("Submit Order"));
    }

    #[test]
    fn read_only_kinds_are_always_safe() {
        let classifier = SafetyClassifier::with_blocked_keywords(["scroll", "wait"]);
        for kind in ActionKind::ALL.into_iter().filter(|k| k.is_read_only()) {
            let verdict = classifier.classify(&Action::new(kind), &page());
            assert_eq!(verdict.level, SafetyLevel::Safe, "{kind}");
            assert!(verdict.reason.is_empty());
        }
    }

    #[test]
    fn navigation_is_safe_but_closing_a_tab_is_not() {
        let classifier = SafetyClassifier::new();
        for kind in [ActionKind::Navigate, ActionKind::TabOpen, ActionKind::TabSwitch] {
            assert_eq!(classifier.classify(&Action::new(kind), &page()).level, SafetyLevel::Safe);
        }
        let close = classifier.classify(&Action::new(ActionKind::TabClose), &page());
        assert_eq!(close.level, SafetyLevel::Confirm);
        assert!(!close.reason.is_empty());
    }

    #[test]
    fn click_rules() {
        let classifier = SafetyClassifier::new();
        assert_eq!(classifier.classify(&click("wb-002"), &page()).level, SafetyLevel::Safe);
        assert_eq!(classifier.classify(&click("wb-005"), &page()).level, SafetyLevel::Confirm);

        let unresolved = classifier.classify(&click("wb-999"), &page());
        assert_eq!(unresolved.level, SafetyLevel::Confirm);
        assert!(unresolved.reason.contains("wb-999"));

        let no_id = classifier.classify(&Action::new(ActionKind::Click), &page());
        assert_eq!(no_id.level, SafetyLevel::Confirm);
        assert!(no_id.reason.contains("unknown element"));
    }

    #[test]
    fn type_rules() {
        let classifier = SafetyClassifier::new();
        assert_eq!(classifier.classify(&type_into("wb-004"), &page()).level, SafetyLevel::Safe);
        assert_eq!(classifier.classify(&type_into("wb-003"), &page()).level, SafetyLevel::Confirm);
        assert_eq!(classifier.classify(&type_into("wb-006"), &page()).level, SafetyLevel::Confirm);
        assert_eq!(classifier.classify(&type_into("nope"), &page()).level, SafetyLevel::Confirm);
    }

    #[test]
    fn select_is_safe() {
        let action = Action::new(ActionKind::Select)
            .with_param("id", "wb-004")
            .with_param("value", "x");
        assert_eq!(SafetyClassifier::new().classify(&action, &page()).level, SafetyLevel::Safe);
    }

    #[test]
    fn keywords_match_the_label_not_value_or_href() {
        let mut state = page();
        let mut home = InteractiveElement::new("wb-010", "link", "Home");
        home.href = Some("https://shop.example/orders".into());
        let mut note = InteractiveElement::new("wb-011", "input", "Note");
        note.value = Some("my card is lost".into());
        state.interactive_elements.extend([home, note]);

        let classifier = SafetyClassifier::with_blocked_keywords(["shop"]);
        assert_eq!(classifier.classify(&click("wb-010"), &state).level, SafetyLevel::Safe);
        assert_eq!(classifier.classify(&type_into("wb-011"), &state).level, SafetyLevel::Safe);
    }

    #[test]
    fn blocked_keywords_refuse_the_action() {
        let classifier = SafetyClassifier::with_blocked_keywords(["Product"]);
        let verdict = classifier.classify(&click("wb-002"), &page());
        assert_eq!(verdict.level, SafetyLevel::Block);
        assert!(verdict.reason.contains("Product details"));
    }
}
