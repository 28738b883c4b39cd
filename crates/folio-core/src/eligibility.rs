//! Publish-eligibility rules.
//!
//! Every "is this visible to the current viewer" query is the caller's own selector
//! conjoined with the standing conditions built here. Language fallback relies on
//! each content document declaring the languages its parent is available in, so no
//! join against sibling translations is needed.

use folio_api::Timestamp;

use crate::selector::Selector;

const AVAILABLE_TRANSLATIONS: &str = "availableTranslations";

/// The three standing conditions: published by `now`, not expired at `now`, and
/// best available language according to `language_priority` (most preferred first).
pub fn build_eligibility(language_priority: &[String], now: Timestamp) -> Vec<Selector> {
    vec![
        Selector::op("publishDate", "$lte", now),
        Selector::or(vec![
            Selector::op("expiryDate", "$exists", false),
            Selector::op("expiryDate", "$gte", now),
        ]),
        language_selector(language_priority),
    ]
}

fn language_selector(language_priority: &[String]) -> Selector {
    if language_priority.is_empty() {
        return Selector::always();
    }

    let mut clauses = Vec::with_capacity(language_priority.len() + 1);
    for (i, language) in language_priority.iter().enumerate() {
        let in_language = Selector::eq("language", language.as_str());
        let clause = match &language_priority[..i] {
            [] => in_language,
            preferred => Selector::and(vec![
                in_language,
                Selector::none_of(AVAILABLE_TRANSLATIONS, preferred),
            ]),
        };
        clauses.push(clause);
    }
    clauses.push(Selector::none_of(AVAILABLE_TRANSLATIONS, language_priority));

    Selector::or(clauses)
}

/// `memberOf` intersects the viewer's access groups.
pub fn access_selector(groups: &[String]) -> Selector {
    Selector::any_of("memberOf", groups)
}

/// `base` conjoined with the standing eligibility conditions.
pub fn eligibility_selector(base: Selector, language_priority: &[String], now: Timestamp) -> Selector {
    let mut all = vec![base];
    all.extend(build_eligibility(language_priority, now));
    Selector::and(all)
}
