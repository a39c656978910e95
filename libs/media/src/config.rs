use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

const FALLBACK_STUN: &str = "stun:stun.l.google.com:19302";

/// Resolve ICE servers from the environment: `ICE_SERVERS_JSON` wins,
/// otherwise `STUN_URLS`/`TURN_URLS` CSV vars, otherwise a public STUN
/// fallback.
pub fn ice_servers_from_env() -> Vec<IceServerConfig> {
    if let Ok(raw_json) = std::env::var("ICE_SERVERS_JSON") {
        match parse_ice_json(&raw_json) {
            Some(parsed) => return parsed,
            None => tracing::warn!(
                component = "media.ice",
                "failed to parse ICE_SERVERS_JSON, falling back to STUN/TURN vars"
            ),
        }
    }

    let mut servers = Vec::new();

    let mut stun_urls = csv_list(&std::env::var("STUN_URLS").unwrap_or_default());
    if stun_urls.is_empty() {
        stun_urls.push(FALLBACK_STUN.to_string());
    }
    servers.push(IceServerConfig {
        urls: stun_urls,
        username: None,
        credential: None,
    });

    let turn_urls = csv_list(&std::env::var("TURN_URLS").unwrap_or_default());
    if !turn_urls.is_empty() {
        let username = std::env::var("TURN_USERNAME")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let credential = std::env::var("TURN_PASSWORD")
            .or_else(|_| std::env::var("TURN_CREDENTIAL"))
            .ok()
            .filter(|v| !v.trim().is_empty());

        servers.push(IceServerConfig {
            urls: turn_urls,
            username,
            credential,
        });
    }

    servers
}

fn parse_ice_json(raw: &str) -> Option<Vec<IceServerConfig>> {
    serde_json::from_str::<Vec<IceServerConfig>>(raw)
        .ok()
        .filter(|parsed| !parsed.is_empty())
}

fn csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_server_list() {
        let raw = r#"[{"urls":["turn:turn.example.com:3478"],"username":"u","credential":"c"}]"#;
        let servers = parse_ice_json(raw).expect("parse ice json");
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["turn:turn.example.com:3478"]);
        assert_eq!(servers[0].username.as_deref(), Some("u"));
    }

    #[test]
    fn empty_json_list_is_rejected() {
        assert!(parse_ice_json("[]").is_none());
        assert!(parse_ice_json("not json").is_none());
    }

    #[test]
    fn csv_trims_and_drops_empty_entries() {
        let urls = csv_list(" stun:a.example.com , ,stun:b.example.com,");
        assert_eq!(urls, vec!["stun:a.example.com", "stun:b.example.com"]);
    }
}
