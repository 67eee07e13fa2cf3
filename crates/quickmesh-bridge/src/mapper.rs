//! Broker topic mapping
//!
//! All topics live under one configurable prefix:
//!
//! | Direction   | Topic                          |
//! |-------------|--------------------------------|
//! | mesh → cloud | `{prefix}/{node_hex}/toCloud` |
//! | cloud → mesh | `{prefix}/+/toDevice` (subscription filter) |
//! | topology    | `{prefix}/{root_hex}/topo`     |

use quickmesh_core::MeshAddr;

use crate::config::BridgeConfig;

const UPLINK_SUFFIX: &str = "toCloud";
const COMMAND_SUFFIX: &str = "toDevice";
const TOPOLOGY_SUFFIX: &str = "topo";

/// Maps mesh addresses to broker topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMapper {
    prefix: String,
}

impl TopicMapper {
    /// Create a mapper for the given prefix; trailing slashes are ignored
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Create from bridge configuration
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.topic_prefix.clone())
    }

    /// Topic prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Topic a message from `source` is published on
    pub fn uplink_topic(&self, source: &MeshAddr) -> String {
        format!("{}/{}/{}", self.prefix, source.to_hex(), UPLINK_SUFFIX)
    }

    /// Wildcard filter covering every node's command topic
    pub fn command_filter(&self) -> String {
        format!("{}/+/{}", self.prefix, COMMAND_SUFFIX)
    }

    /// Topic the root publishes topology snapshots on
    pub fn topology_topic(&self, root: &MeshAddr) -> String {
        format!("{}/{}/{}", self.prefix, root.to_hex(), TOPOLOGY_SUFFIX)
    }
}

impl Default for TopicMapper {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TOPIC_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> MeshAddr {
        MeshAddr::new([0x24, 0x0a, 0xc4, 0x00, 0x01, 0x02])
    }

    #[test]
    fn test_topics() {
        let mapper = TopicMapper::new("mesh");
        assert_eq!(mapper.uplink_topic(&node()), "mesh/240ac4000102/toCloud");
        assert_eq!(mapper.command_filter(), "mesh/+/toDevice");
        assert_eq!(mapper.topology_topic(&node()), "mesh/240ac4000102/topo");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let mapper = TopicMapper::new("site/a/");
        assert_eq!(mapper.prefix(), "site/a");
        assert_eq!(mapper.command_filter(), "site/a/+/toDevice");
    }

    #[test]
    fn test_from_config() {
        let config = BridgeConfig {
            topic_prefix: "presence".to_string(),
            ..Default::default()
        };
        let mapper = TopicMapper::from_config(&config);
        assert_eq!(mapper.uplink_topic(&node()), "presence/240ac4000102/toCloud");
    }
}
