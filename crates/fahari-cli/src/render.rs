use colored::{ColoredString, Colorize};
use fahari_ai::{CivicLensAnalysis, UrgencyLevel};
use std::fmt::Write;

fn urgency_badge(level: UrgencyLevel) -> ColoredString {
    let label = format!(" {} ", level);
    match level {
        UrgencyLevel::Critical => label.red().bold(),
        UrgencyLevel::High => label.truecolor(255, 140, 0).bold(),
        UrgencyLevel::Medium => label.yellow(),
        UrgencyLevel::Low => label.green(),
    }
}

fn heading(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n{}", title.to_uppercase().dimmed().bold());
}

fn bullets(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    heading(out, title);
    for item in items {
        let _ = writeln!(out, "  • {}", item);
    }
}

fn tags(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    heading(out, title);
    let joined = items
        .iter()
        .map(|i| format!("[{}]", i).cyan().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(out, "  {}", joined);
}

/// Render an analysis for the terminal, in the order the results page used.
/// Empty sections are omitted.
pub fn render_analysis(analysis: &CivicLensAnalysis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "Analysis Results".bold().underline());

    heading(&mut out, "Issue Category");
    let categories = analysis
        .issue_category
        .iter()
        .map(|c| format!("[{}]", c).blue().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(out, "  {}", categories);

    heading(&mut out, "Urgency Level");
    let _ = writeln!(out, "  {}", urgency_badge(analysis.urgency_level));

    bullets(&mut out, "Systemic Patterns", &analysis.systemic_patterns);
    tags(&mut out, "Institutions Mentioned", &analysis.institutions_mentioned);
    tags(&mut out, "Geographic References", &analysis.geographic_references);
    bullets(&mut out, "Advocacy Insights", &analysis.advocacy_insights);

    out
}
