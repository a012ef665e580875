//! Printers: agent results as markdown (termimad) or plain text, errors in
//! color.

use owo_colors::OwoColorize;
use termimad::MadSkin;

use crate::handlers::AgentResponse;

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}

/// Human-readable rendering of an [`AgentResponse`].
pub struct ResponsePrinter {
    pub markdown: bool,
    pub color: bool,
}

impl ResponsePrinter {
    pub fn print(&self, response: &AgentResponse) {
        match response {
            AgentResponse::Success { .. } => {
                let text = render_success(response);
                if self.markdown {
                    MarkdownPrinter::default().print(&text);
                } else {
                    println!("{}", text);
                }
            }
            AgentResponse::Error { .. } => eprintln!("{}", self.render_error(response)),
        }
    }

    fn render_error(&self, response: &AgentResponse) -> String {
        let AgentResponse::Error {
            category,
            message,
            package_hint,
            detail,
        } = response
        else {
            return String::new();
        };
        let tag = serde_json::to_value(category)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "error".into());
        let head = if self.color {
            format!("{} {}", format!("[{tag}]").red(), message)
        } else {
            format!("[{tag}] {message}")
        };
        let mut out = head;
        if let Some(pkg) = package_hint {
            out.push_str(&format!("\n  package: {pkg}"));
        }
        if let Some(detail) = detail {
            let detail = if self.color { format!("{}", detail.dimmed()) } else { detail.clone() };
            out.push_str(&format!("\n{detail}"));
        }
        out
    }
}

/// Markdown document: one heading per section, warnings last.
pub fn render_success(response: &AgentResponse) -> String {
    let AgentResponse::Success { sections, warnings } = response else {
        return String::new();
    };
    let mut out = String::new();
    for (name, text) in sections.iter() {
        if sections.len() > 1 {
            out.push_str(&format!("## {}\n\n", heading(name)));
        }
        out.push_str(text);
        out.push_str("\n\n");
    }
    if !warnings.is_empty() {
        out.push_str("---\n\n");
        for w in warnings {
            out.push_str(&format!("> **Warning:** {w}\n"));
        }
    }
    out.trim_end().to_string()
}

fn heading(name: &str) -> String {
    name.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
