use crate::types::PageState;

pub const DEFAULT_TEXT_BUDGET: usize = 3000;
const TRUNCATION_MARKER: &str = "[...truncated]";

/// Task phrasing that means the model needs to see every tab's URL.
const MULTI_TAB_KEYWORDS: &[&str] = &[
    "tab",
    "tabs",
    "compare",
    "switch",
    "other tab",
    "other page",
    "both pages",
    "side by side",
    "all tabs",
    "multiple tabs",
    "first tab",
    "second tab",
    "go back to",
    "return to",
];

pub fn is_multi_tab_task(task: &str) -> bool {
    let lower = task.to_lowercase();
    MULTI_TAB_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Renders a snapshot into the text the model reads.
pub fn format_page_state(page: &PageState, task: &str, text_budget: usize) -> String {
    let mut out = String::from("## Current Page State\n");
    out.push_str(&format!("URL: {}\nTitle: {}\n\n", page.url, page.title));

    if page.tabs.len() > 1 {
        if is_multi_tab_task(task) {
            out.push_str("## Open Tabs\n");
            for tab in &page.tabs {
                out.push_str(&format!(
                    "{}[{}] {} ({})\n",
                    active_marker(tab.active),
                    tab.index,
                    tab.title,
                    tab.url
                ));
            }
        } else {
            // Titles only: enough to reuse an open tab without inviting detours.
            out.push_str(&format!("## Open Tabs ({})\n", page.tabs.len()));
            for tab in &page.tabs {
                out.push_str(&format!(
                    "{}[{}] {}\n",
                    active_marker(tab.active),
                    tab.index,
                    tab.title
                ));
            }
        }
        out.push('\n');
    }

    out.push_str("## Interactive Elements\n");
    if page.interactive_elements.is_empty() {
        out.push_str("(no interactive elements found)\n");
    } else {
        for element in &page.interactive_elements {
            out.push_str(&element.render_line());
            out.push('\n');
        }
    }

    out.push_str("\n## Page Text\n");
    if page.degraded {
        out.push_str(
            "(Page content unavailable: the page could not be captured. \
             You can still navigate to another URL or switch tabs.)\n",
        );
    } else if page.page_text.trim().is_empty() {
        out.push_str("(empty)\n");
    } else {
        out.push_str(&truncate_text(&page.page_text, text_budget));
        out.push('\n');
    }

    out.push_str(&format!(
        "\nScroll: {}px / {}px | Elements: {}",
        page.scroll_position.y.round(),
        page.scroll_position.max_y.round(),
        page.interactive_elements.len()
    ));
    out
}

fn active_marker(active: bool) -> &'static str {
    if active { "→ " } else { "  " }
}

fn truncate_text(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}\n{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}
