//! 场景文件
//!
//! 一个 JSON 场景描述配置、拓扑与请求时间表。`ScenarioSpec::build` 校验
//! 节点引用与数值，得到可以直接放进 [`CdnWorld`] 的拓扑与请求来源。

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cdn::CdnWorld;
use crate::config::{ConfigError, SimConfig};
use crate::feed::{SessionRequest, TimedRequest, TraceFeed};
use crate::net::NodeId;
use crate::sim::SimTime;
use crate::topo::{NodeKind, StarOpts, Topology, TopologyProvider, build_star};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub schema_version: u32,
    #[serde(default)]
    pub meta: Option<ScenarioMeta>,
    #[serde(default)]
    pub config: SimConfig,
    pub topology: TopologySpec,
    #[serde(default)]
    pub requests: Vec<RequestSpec>,
    #[serde(default)]
    pub noise: Vec<RequestSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologySpec {
    Star {
        #[serde(default)]
        access_nodes: Option<usize>,
        #[serde(default)]
        static_cache_at_access: bool,
        #[serde(default)]
        static_cache_at_core: bool,
    },
    Graph {
        nodes: Vec<NodeSpec>,
        edges: Vec<(String, String)>,
        #[serde(default)]
        content_provider: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub static_cache: bool,
}

/// 一条请求：大小由 `size_bits` 或 `play_secs * rate_bps` 给出。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default)]
    pub at_s: f64,
    pub host: String,
    pub rate_bps: u64,
    #[serde(default)]
    pub size_bits: Option<f64>,
    #[serde(default)]
    pub play_secs: Option<f64>,
    #[serde(default)]
    pub channel: u32,
    #[serde(default)]
    pub source: Option<String>,
}

/// 校验后的场景
#[derive(Debug, Clone)]
pub struct Scenario {
    pub config: SimConfig,
    pub topology: Topology,
    pub requests: Vec<TimedRequest>,
    pub noise: Vec<TimedRequest>,
}

impl ScenarioSpec {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn build(&self) -> Result<Scenario, ConfigError> {
        if self.schema_version != 1 {
            return Err(ConfigError::Invalid {
                field: "schema_version",
                reason: format!("unsupported version {}", self.schema_version),
            });
        }
        self.config.validate()?;
        let topology = build_topology(&self.topology)?;
        let requests = resolve_requests(&topology, &self.requests)?;
        let noise = resolve_requests(&topology, &self.noise)?;
        info!(
            nodes = topology.len(),
            requests = requests.len(),
            noise = noise.len(),
            "📋 场景已加载"
        );
        Ok(Scenario {
            config: self.config.clone(),
            topology,
            requests,
            noise,
        })
    }
}

impl Scenario {
    pub fn into_world(self) -> CdnWorld {
        CdnWorld::new(
            self.config,
            Box::new(self.topology),
            Box::new(TraceFeed::new(self.requests)),
        )
        .with_noise(Box::new(TraceFeed::new(self.noise)))
    }
}

fn build_topology(spec: &TopologySpec) -> Result<Topology, ConfigError> {
    match spec {
        TopologySpec::Star {
            access_nodes,
            static_cache_at_access,
            static_cache_at_core,
        } => {
            let opts = StarOpts {
                access_nodes: access_nodes.unwrap_or(StarOpts::default().access_nodes),
                static_cache_at_access: *static_cache_at_access,
                static_cache_at_core: *static_cache_at_core,
            };
            if opts.access_nodes == 0 {
                return Err(ConfigError::Invalid {
                    field: "topology.access_nodes",
                    reason: "must be at least 1".into(),
                });
            }
            Ok(build_star(&opts).topo)
        }
        TopologySpec::Graph {
            nodes,
            edges,
            content_provider,
        } => {
            let mut topo = Topology::default();
            for n in nodes {
                if topo.lookup(&n.name).is_some() {
                    return Err(ConfigError::Invalid {
                        field: "topology.nodes",
                        reason: format!("duplicate node {:?}", n.name),
                    });
                }
                let id = topo.add_node(n.name.clone(), n.kind);
                topo.set_static_cache(id, n.static_cache);
            }
            for (a, b) in edges {
                let a = lookup(&topo, a)?;
                let b = lookup(&topo, b)?;
                topo.connect(a, b);
            }
            if let Some(name) = content_provider {
                let cp = lookup(&topo, name)?;
                topo.set_content_provider(cp);
            }
            if !topo.has_content_provider() {
                return Err(ConfigError::Invalid {
                    field: "topology.content_provider",
                    reason: "no content node in topology".into(),
                });
            }
            Ok(topo)
        }
    }
}

fn lookup(topo: &Topology, name: &str) -> Result<NodeId, ConfigError> {
    topo.lookup(name)
        .ok_or_else(|| ConfigError::UnknownNode(name.to_string()))
}

fn resolve_requests(topo: &Topology, specs: &[RequestSpec]) -> Result<Vec<TimedRequest>, ConfigError> {
    specs
        .iter()
        .map(|r| {
            if r.rate_bps == 0 {
                return Err(ConfigError::Invalid {
                    field: "requests.rate_bps",
                    reason: "must be positive".into(),
                });
            }
            let size_bits = match (r.size_bits, r.play_secs) {
                (Some(bits), _) => bits,
                (None, Some(secs)) => secs * r.rate_bps as f64,
                (None, None) => {
                    return Err(ConfigError::Invalid {
                        field: "requests.size_bits",
                        reason: format!("request for {:?} needs size_bits or play_secs", r.host),
                    });
                }
            };
            if !(size_bits.is_finite() && size_bits > 0.0) {
                return Err(ConfigError::Invalid {
                    field: "requests.size_bits",
                    reason: format!("must be positive, got {size_bits}"),
                });
            }
            if !(r.at_s.is_finite() && r.at_s >= 0.0) {
                return Err(ConfigError::Invalid {
                    field: "requests.at_s",
                    reason: format!("must not be negative, got {}", r.at_s),
                });
            }
            let host = lookup(topo, &r.host)?;
            let source = r.source.as_deref().map(|s| lookup(topo, s)).transpose()?;
            let target = source.unwrap_or_else(|| topo.content_provider());
            if topo.shortest_path(host, target).is_none() {
                return Err(ConfigError::Unreachable {
                    host: r.host.clone(),
                    target: topo.name(target).to_string(),
                });
            }
            Ok(TimedRequest {
                at: SimTime::from_secs_f64(r.at_s),
                req: SessionRequest {
                    host,
                    rate_bps: r.rate_bps,
                    size_bits,
                    channel: r.channel,
                    source,
                },
            })
        })
        .collect()
}
