//! Customer name canonicalization
//!
//! Free-text customer names ("Infinite electronics inc", " vip ") are mapped
//! to one canonical label so scoping and logo lookup agree no matter how a
//! user typed the name.

/// Recognized tokens and their canonical labels, matched in this order.
/// The first token found anywhere in the lowercased name wins.
pub const CANONICAL_CUSTOMERS: &[(&str, &str)] = &[
    ("infinite", "Infinite"),
    ("vip", "VIP"),
    ("routeware", "Routeware"),
    ("client 4", "Client 4"),
    ("client 5", "Client 5"),
    ("client 6", "Client 6"),
    ("client 7", "Client 7"),
    ("client 8", "Client 8"),
    ("client 9", "Client 9"),
];

const DEFAULT_LOGO_URLS: &[(&str, &str)] = &[
    ("Infinite", "/client-logos/Infinite.png"),
    ("VIP", "/client-logos/VIP.png"),
    ("Routeware", "/client-logos/Routeware.png"),
];

/// Normalize a raw customer name to its canonical label.
///
/// Returns `None` for missing or blank input. Unrecognized names are
/// returned trimmed but otherwise unchanged.
pub fn normalize_customer_name(raw: Option<&str>) -> Option<String> {
    let input = raw?.trim();
    if input.is_empty() {
        return None;
    }

    let lower = input.to_lowercase();
    for (token, canonical) in CANONICAL_CUSTOMERS {
        if lower.contains(token) {
            return Some((*canonical).to_string());
        }
    }

    Some(input.to_string())
}

/// Default logo for a canonical customer label, if one ships with the app.
pub fn default_logo_url(canonical_name: Option<&str>) -> Option<&'static str> {
    let name = canonical_name?;
    DEFAULT_LOGO_URLS
        .iter()
        .find(|(label, _)| *label == name)
        .map(|(_, url)| *url)
}
