//! Markdown templates for reports that ask a human to step in.

use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;

use crate::error::Result;

/// Template name for the infinite-loop report.
pub const INFINITE_LOOP: &str = "infinite-loop";

const INFINITE_LOOP_TEMPLATE: &str = r"# 🚨 Infinite Loop Detected - Manual Intervention Required

Generated: {{generated_at}}

The same failure was seen **{{bug.occurrences}} times** (threshold: {{threshold}}).
Automatic healing has been stopped.

## Recurring Bug

- **Bug ID**: `{{bug.id}}`
- **First seen**: {{bug.firstSeen}}
- **Last seen**: {{bug.lastSeen}}
- **Signature**: `{{bug.signature}}`

```
{{bug.sampleMessage}}
```
{{#if bug.metadata}}

### Metadata

{{#each bug.metadata}}
- **{{@key}}**: {{this}}
{{/each}}
{{/if}}

## Recommendation

{{recommendation}}

## All Known Bugs

| Bug | Occurrences | Signature |
|-----|-------------|-----------|
{{#each bugs}}
| `{{id}}` | {{occurrences}} | {{truncate signature 60}} |
{{/each}}

---
*Automatic fixes are not converging. Investigate the root cause by hand before re-running.*
";

handlebars_helper!(truncate: |s: str, max: u64| {
    let max = usize::try_from(max).unwrap_or(usize::MAX);
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    } else {
        s.to_string()
    }
});

/// Renders the harness's Markdown reports.
pub struct ReportRenderer {
    templates: Handlebars<'static>,
}

impl ReportRenderer {
    /// Create a renderer with the built-in templates registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in template fails to parse.
    pub fn new() -> Result<Self> {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(false);
        // Markdown output, not HTML
        templates.register_escape_fn(handlebars::no_escape);
        templates.register_helper("truncate", Box::new(truncate));
        templates.register_template_string(INFINITE_LOOP, INFINITE_LOOP_TEMPLATE)?;
        Ok(Self { templates })
    }

    /// Render a registered template.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String> {
        Ok(self.templates.render(name, data)?)
    }
}
