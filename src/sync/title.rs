//! Title-derivation and event-ticker helpers.

use crate::capabilities::Metadata;

/// The longest string that is a prefix of every title in `titles`. Empty for an empty slice.
pub fn find_longest_common_prefix(titles: &[String]) -> String {
    let mut iter = titles.iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let mut prefix_len = first.chars().count();
    let first_chars: Vec<char> = first.chars().collect();

    for title in iter {
        let chars: Vec<char> = title.chars().collect();
        let mut matched = 0;
        while matched < prefix_len && matched < chars.len() && first_chars[matched] == chars[matched] {
            matched += 1;
        }
        prefix_len = matched;
        if prefix_len == 0 {
            break;
        }
    }

    first_chars[..prefix_len].iter().collect()
}

/// One contract's title, as input to title derivation — kept separate from the store's
/// `Contract` row so the helper has no dependency on the store module.
pub struct ContractInput {
    pub title: String,
    pub metadata: Metadata,
}

/// If every contract carries the same non-empty `marketTitle` metadata value, that title wins
/// outright — no point collapsing contract titles to a common prefix when the platform already
/// told us the group's name.
fn shared_market_title(contracts: &[ContractInput]) -> Option<String> {
    let mut titles = contracts
        .iter()
        .map(|c| c.metadata.get("marketTitle").and_then(|v| v.as_str()));

    let first = titles.next()??;
    if first.is_empty() {
        return None;
    }
    if titles.all(|t| t == Some(first)) {
        Some(first.to_string())
    } else {
        None
    }
}

/// Derives a market title from its contracts:
/// - empty group → `"Unknown Market"`.
/// - single contract → its title, used directly.
/// - every contract sharing a non-empty `marketTitle` metadata value → that value.
/// - otherwise the longest common prefix, cleaned up: strip a trailing partial word after the
///   last of `:|-,`, trim trailing `[\s:,-]+`; accepted only if the result is at least 10
///   characters, else fall back to the first contract's title.
pub fn derive_market_title(contracts: &[ContractInput]) -> String {
    match contracts.len() {
        0 => "Unknown Market".to_string(),
        1 => contracts[0].title.clone(),
        _ => {
            if let Some(shared) = shared_market_title(contracts) {
                return shared;
            }
            let titles: Vec<String> = contracts.iter().map(|c| c.title.clone()).collect();
            let prefix = find_longest_common_prefix(&titles);
            let cleaned = clean_prefix(&prefix);
            if cleaned.chars().count() >= 10 {
                cleaned
            } else {
                contracts[0].title.clone()
            }
        }
    }
}

fn clean_prefix(prefix: &str) -> String {
    let last_delim = prefix
        .char_indices()
        .filter(|(_, c)| matches!(c, ':' | '|' | '-' | ','))
        .map(|(i, _)| i)
        .next_back();

    let truncated = match last_delim {
        Some(idx) => &prefix[..idx + 1],
        None => prefix,
    };

    truncated
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ':' | ',' | '-'))
        .to_string()
}

/// Extracts a grouping key for a flat contract: `metadata["eventTicker"]` if present, else
/// `split on '-'; join first two parts` of the contract id; `None` when neither yields anything.
pub fn extract_event_ticker(contract_id: &str, metadata: &Metadata) -> Option<String> {
    if let Some(ticker) = metadata.get("eventTicker").and_then(|v| v.as_str()) {
        if !ticker.is_empty() {
            return Some(ticker.to_string());
        }
    }

    let parts: Vec<&str> = contract_id.split('-').collect();
    if parts.len() >= 2 {
        Some(format!("{}-{}", parts[0], parts[1]))
    } else if parts.len() == 1 && !parts[0].is_empty() {
        None
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(title: &str) -> ContractInput {
        ContractInput {
            title: title.to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn unknown_market_for_empty_group() {
        assert_eq!(derive_market_title(&[]), "Unknown Market");
    }

    #[test]
    fn single_contract_uses_its_title_directly() {
        let contracts = vec![input("Will the Fed cut rates in March?")];
        assert_eq!(
            derive_market_title(&contracts),
            "Will the Fed cut rates in March?"
        );
    }

    #[test]
    fn common_prefix_is_cleaned_of_trailing_partial_word() {
        let contracts = vec![
            input("Fed Rate Decision: 25bps cut"),
            input("Fed Rate Decision: 50bps cut"),
            input("Fed Rate Decision: no change"),
        ];
        assert_eq!(derive_market_title(&contracts), "Fed Rate Decision");
    }

    #[test]
    fn short_cleaned_prefix_falls_back_to_first_title() {
        let contracts = vec![input("A: yes"), input("A: no")];
        assert_eq!(derive_market_title(&contracts), "A: yes");
    }

    #[test]
    fn shared_metadata_market_title_wins_over_prefix_derivation() {
        let mut a = input("Fed cuts rates by 25bps");
        a.metadata.insert(
            "marketTitle".to_string(),
            serde_json::Value::String("Federal Reserve March Decision".to_string()),
        );
        let mut b = input("Fed holds rates steady");
        b.metadata.insert(
            "marketTitle".to_string(),
            serde_json::Value::String("Federal Reserve March Decision".to_string()),
        );
        assert_eq!(
            derive_market_title(&[a, b]),
            "Federal Reserve March Decision"
        );
    }

    #[test]
    fn mismatched_metadata_market_title_falls_back_to_prefix_derivation() {
        let mut a = input("Fed Rate Decision: 25bps cut");
        a.metadata.insert(
            "marketTitle".to_string(),
            serde_json::Value::String("A".to_string()),
        );
        let mut b = input("Fed Rate Decision: 50bps cut");
        b.metadata.insert(
            "marketTitle".to_string(),
            serde_json::Value::String("B".to_string()),
        );
        assert_eq!(derive_market_title(&[a, b]), "Fed Rate Decision");
    }

    #[test]
    fn longest_common_prefix_handles_divergent_titles() {
        let titles = vec!["Hello World".to_string(), "Hello There".to_string()];
        assert_eq!(find_longest_common_prefix(&titles), "Hello ");
    }

    #[test]
    fn event_ticker_prefers_metadata_field() {
        let mut metadata = Metadata::new();
        metadata.insert(
            "eventTicker".to_string(),
            serde_json::Value::String("KXFED-25MAR".to_string()),
        );
        assert_eq!(
            extract_event_ticker("KXFED-25MAR-Y", &metadata),
            Some("KXFED-25MAR".to_string())
        );
    }

    #[test]
    fn event_ticker_falls_back_to_id_split() {
        let metadata = Metadata::new();
        assert_eq!(
            extract_event_ticker("KXFED-25MAR-Y", &metadata),
            Some("KXFED-25MAR".to_string())
        );
    }
}
