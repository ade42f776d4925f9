use super::types::AnalysisResult;

/// Violations listed in full before the rest are summarised as a count.
pub const MAX_LISTED_VIOLATIONS: usize = 10;

pub const DEFAULT_FOOTER: &str = "Reviewed by Architecture Review Assistant";

const BANNER_VIOLATIONS: &str = "❌ **Architecture Violations Found**:";
const BANNER_CLEAN: &str = "✅ **No Architecture Violations Found**.";
const BANNER_INCONCLUSIVE: &str = "⚠️ **Analysis Inconclusive** (Invalid response from AI model).";

/// Render a review verdict as a PR comment.
///
/// Every model-supplied string is escaped with [`escape`] before it is
/// interpolated. The output always ends with a `---` rule and the footer
/// line; a blank `footer` is replaced by [`DEFAULT_FOOTER`].
pub fn render_comment(result: &AnalysisResult, footer: &str) -> String {
    let banner = match result.violation_found {
        Some(true) => BANNER_VIOLATIONS,
        Some(false) => BANNER_CLEAN,
        None => BANNER_INCONCLUSIVE,
    };

    let mut md = String::new();
    md.push_str(banner);
    md.push('\n');

    if !result.explanation.trim().is_empty() {
        md.push_str(&format!("\n_{}_\n", escape(result.explanation.trim())));
    }

    if !result.violations.is_empty() {
        md.push_str("\n**Details:**\n\n");
        for (i, v) in result.violations.iter().take(MAX_LISTED_VIOLATIONS).enumerate() {
            let lines = if v.lines.is_empty() {
                "N/A".to_string()
            } else {
                v.lines
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            md.push_str(&format!(
                "{}. **{}** · _{}_ · **{}** · Lines: {}\n",
                i + 1,
                escape(or_placeholder(&v.rule, "Rule")),
                escape(or_placeholder(&v.principle, "Principle")),
                v.severity,
                lines
            ));
            md.push_str(&format!("   - **Evidence:** {}\n", escape(&v.evidence)));
            md.push_str(&format!("   - **Suggestion:** {}\n", escape(&v.suggestion)));
        }

        let hidden = result.violations.len().saturating_sub(MAX_LISTED_VIOLATIONS);
        if hidden > 0 {
            md.push_str(&format!(
                "\n... _{} more violations were found but are not shown._\n",
                hidden
            ));
        }
    }

    let footer = if footer.trim().is_empty() {
        DEFAULT_FOOTER
    } else {
        footer.trim()
    };
    md.push_str("\n---\n");
    md.push_str(&format!("_{}_\n", footer));
    md
}

/// Neutralise HTML in model output before it reaches the PR thread.
pub fn escape(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() {
        placeholder
    } else {
        value
    }
}
