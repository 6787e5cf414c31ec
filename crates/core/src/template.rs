//! Placeholder substitution for campaign content.
//!
//! Supports `{{ key }}` and `{{key}}` placeholders replaced by the
//! string view of each substitution value. No escaping, no
//! conditionals, no loops — richer templating lives outside this tier.

use crate::model::SubstitutionData;

/// Replace every `{{ key }}` / `{{key}}` occurrence with the rendered
/// value from `data`. Keys absent from `data` keep their placeholder
/// verbatim.
pub fn substitute(template: &str, data: &SubstitutionData) -> String {
    if template.is_empty() || data.is_empty() {
        return template.to_string();
    }

    let mut out = template.to_string();
    for (key, value) in data {
        let rendered = value.render();
        let spaced = format!("{{{{ {} }}}}", key);
        let tight = format!("{{{{{}}}}}", key);
        if out.contains(&spaced) {
            out = out.replace(&spaced, &rendered);
        }
        if out.contains(&tight) {
            out = out.replace(&tight, &rendered);
        }
    }
    out
}
