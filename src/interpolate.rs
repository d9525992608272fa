use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

// $$, $identifier, or ${identifier}; anything else starting with $ is not
// a placeholder and passes through untouched.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:(\$)|([A-Za-z_][A-Za-z0-9_]*)|\{([A-Za-z_][A-Za-z0-9_]*)\})")
        .expect("placeholder pattern is valid")
});

/// Substitute `$name` and `${name}` placeholders in `template` from `args`.
///
/// Substitution is safe: placeholders without a matching argument are left
/// literal, and `$$` renders as a single `$`. A missing argument map returns
/// the template unchanged.
pub fn interpolate(template: &str, args: Option<&BTreeMap<String, String>>) -> String {
    let Some(args) = args else {
        return template.to_string();
    };
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            let name = caps
                .get(2)
                .or_else(|| caps.get(3))
                .expect("placeholder match has an identifier")
                .as_str();
            match args.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
