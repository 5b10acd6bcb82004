//! Persisted layout of a devicegraph: one tagged record per device and one
//! `(source, target, holder)` record per edge.

use serde::{Deserialize, Serialize};

use crate::error::{ReportError, StorageError, StructuralError};

use super::{device::Device, graph::Devicegraph, holder::Holder, sid::Sid};

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PersistedGraph {
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    holders: Vec<PersistedHolder>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
struct PersistedHolder {
    source: Sid,
    target: Sid,
    holder: Holder,
}

impl Devicegraph {
    /// Renders the graph as YAML.
    pub fn save(&self) -> Result<String, StorageError> {
        let persisted = PersistedGraph {
            devices: self.devices().cloned().collect(),
            holders: self
                .holders()
                .into_iter()
                .map(|(source, target, holder)| PersistedHolder {
                    source,
                    target,
                    holder: holder.clone(),
                })
                .collect(),
        };
        serde_yaml::to_string(&persisted).structured(StructuralError::SerializeGraph)
    }

    /// Rebuilds a graph from its YAML rendering. Sids are preserved and the
    /// sid allocator is moved past the highest loaded sid. Holders go
    /// through the same checks as `add_holder`.
    pub fn load(text: &str) -> Result<Devicegraph, StorageError> {
        let persisted: PersistedGraph =
            serde_yaml::from_str(text).structured(StructuralError::ParsePersistedGraph)?;

        let mut graph = Devicegraph::new();
        for device in persisted.devices {
            super::names::validate(&device.data)?;
            graph.insert(device)?;
        }
        for holder in persisted.holders {
            graph.add_holder(holder.source, holder.target, holder.holder)?;
        }
        Ok(graph)
    }
}
