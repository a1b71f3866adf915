//! Peer and route records — the rows of the overlay's two tables.

use serde::{Deserialize, Serialize};

/// A directly known neighbour.
///
/// `url == None` means we cannot originate traffic to this peer; it has
/// to pull its messages with a MESSAGES_REQUEST. A peer with no
/// `destroy_time` is permanent (operator-configured).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub agtuuid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Whether this agent actively polls the peer for queued messages.
    #[serde(default)]
    pub polling: bool,

    /// Epoch seconds after which the peer is pruned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy_time: Option<f64>,

    /// Epoch seconds after which inbound traffic from the peer
    /// re-creates it to extend the TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_time: Option<f64>,
}

impl Peer {
    pub fn new(agtuuid: impl Into<String>) -> Self {
        Peer {
            agtuuid: agtuuid.into(),
            url: None,
            polling: false,
            destroy_time: None,
            refresh_time: None,
        }
    }
}

/// A learned indirect path: traffic for `agtuuid` goes via the direct
/// peer `gtwuuid`. Weight only grows through aging; re-learning clamps
/// it back down to the advertised minimum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination agent.
    pub agtuuid: String,
    /// Next hop; must be a live peer or the route is pruned.
    pub gtwuuid: String,
    pub weight: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_minimal_json_round_trip() {
        let peer: Peer = serde_json::from_str(r#"{"agtuuid":"a1"}"#).unwrap();
        assert_eq!(peer.agtuuid, "a1");
        assert!(peer.url.is_none());
        assert!(!peer.polling);

        let json = serde_json::to_string(&peer).unwrap();
        // Cleared TTL fields stay off the wire
        assert!(!json.contains("destroy_time"));
    }

    #[test]
    fn route_round_trip() {
        let route = Route {
            agtuuid: "dest".into(),
            gtwuuid: "gw".into(),
            weight: 3,
        };
        let back: Route = serde_json::from_str(&serde_json::to_string(&route).unwrap()).unwrap();
        assert_eq!(back, route);
    }
}
