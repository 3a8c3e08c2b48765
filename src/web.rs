//! Client-IP gating for web-served sessions. A list containing `"0.0.0.0"`
//! means allow-all, and an empty or malformed list normalises to allow-all.

const ALLOW_ALL: &str = "0.0.0.0";

/// Flattens a configured allow-list into clean entries. Individual items may
/// themselves hold comma- or newline-separated addresses.
pub fn normalize_allowed_ips<I, S>(allowed: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cleaned: Vec<String> = allowed
        .into_iter()
        .flat_map(|entry| {
            entry
                .as_ref()
                .replace('\n', ",")
                .split(',')
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();
    if cleaned.is_empty() {
        vec![ALLOW_ALL.to_string()]
    } else {
        cleaned
    }
}

pub fn is_ip_allowed<S: AsRef<str>>(allowed: &[S], client_ip: Option<&str>) -> bool {
    let allowed = normalize_allowed_ips(allowed.iter().map(AsRef::as_ref));
    if allowed.iter().any(|ip| ip == ALLOW_ALL) {
        return true;
    }
    match client_ip {
        Some(client) => allowed.iter().any(|ip| ip == client),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_allows_any_client() {
        assert!(is_ip_allowed(&["0.0.0.0"], Some("203.0.113.9")));
        assert!(is_ip_allowed(&["0.0.0.0"], None));
    }

    #[test]
    fn unlisted_client_is_rejected() {
        assert!(!is_ip_allowed(&["10.0.0.1"], Some("10.0.0.2")));
        assert!(is_ip_allowed(&["10.0.0.1"], Some("10.0.0.1")));
    }

    #[test]
    fn empty_list_normalises_to_allow_all() {
        let empty: [&str; 0] = [];
        assert!(is_ip_allowed(&empty, Some("192.0.2.1")));
    }

    #[test]
    fn unknown_client_is_rejected_unless_allow_all() {
        assert!(!is_ip_allowed(&["10.0.0.1"], None));
    }

    #[test]
    fn entries_are_split_and_trimmed() {
        let normalized = normalize_allowed_ips(["10.0.0.1, 10.0.0.2\n10.0.0.3", " "]);
        assert_eq!(normalized, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }
}
