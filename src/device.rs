//! User-agent based device detection

/// Tokens that only appear in handheld user agents (lowercase)
const MOBILE_TOKENS: &[&str] = &[
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
    "mobile",
];

/// Whether `user_agent` identifies a phone or tablet
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    MOBILE_TOKENS.iter().any(|token| ua.contains(token))
}
