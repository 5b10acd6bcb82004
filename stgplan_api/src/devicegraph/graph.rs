use std::collections::{BTreeMap, BTreeSet};

use log::trace;
use petgraph::{
    stable_graph::{NodeIndex, StableGraph},
    visit::{EdgeRef, IntoEdgeReferences},
    Directed, Direction,
};

use crate::error::{InternalError, NotFoundError, ReportError, StorageError, StructuralError};

use super::{
    device::{Device, DeviceData},
    holder::Holder,
    names,
    sid::Sid,
    types::DeviceKind,
};

/// The type of the graph used to store devices and their holders.
type DevicePetgraph = StableGraph<Device, Holder, Directed>;

/// Graph of devices (vertices) and holders (edges).
///
/// Cloning a devicegraph deep-copies every device and holder and keeps all
/// sids, so the clone can later be diffed against the original.
#[derive(Debug, Clone, Default)]
pub struct Devicegraph {
    inner: DevicePetgraph,
    index: BTreeMap<Sid, NodeIndex>,
}

impl Devicegraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, sid: Sid) -> Result<NodeIndex, StorageError> {
        self.index
            .get(&sid)
            .copied()
            .structured(NotFoundError::Device { sid: sid.as_u32() })
    }

    /// Adds a new device with a freshly allocated sid. The name of the
    /// payload is checked against the grammar of its kind.
    pub fn create_device(&mut self, data: impl Into<DeviceData>) -> Result<Sid, StorageError> {
        let data = data.into();
        names::validate(&data)?;
        let sid = Sid::allocate();
        trace!("Creating {} device {sid}", data.kind());
        self.insert(Device::new(sid, data))?;
        Ok(sid)
    }

    /// Inserts a device keeping its sid.
    pub(crate) fn insert(&mut self, device: Device) -> Result<(), StorageError> {
        let sid = device.sid();
        if self.index.contains_key(&sid) {
            return Err(StorageError::new(StructuralError::DuplicateSid {
                sid: sid.as_u32(),
            }));
        }
        sid.reserve();
        let node = self.inner.add_node(device);
        self.index.insert(sid, node);
        Ok(())
    }

    /// Adds a holder from `source` to `target`.
    pub fn add_holder(
        &mut self,
        source: Sid,
        target: Sid,
        holder: Holder,
    ) -> Result<(), StorageError> {
        let source_node = self.node(source)?;
        let target_node = self.node(target)?;

        if source == target {
            return Err(StorageError::new(StructuralError::SelfHolder {
                source_sid: source.as_u32(),
            }));
        }

        if self.inner.find_edge(source_node, target_node).is_some() {
            return Err(StorageError::new(StructuralError::HolderAlreadyExists {
                source_sid: source.as_u32(),
                target_sid: target.as_u32(),
            }));
        }

        let source_kind = self.inner[source_node].kind();
        let target_kind = self.inner[target_node].kind();
        if !holder.kind().connects(source_kind, target_kind) {
            return Err(StorageError::new(StructuralError::InvalidHolderEndpoints {
                holder: holder.kind().to_string(),
                source_kind: source_kind.to_string(),
                target_kind: target_kind.to_string(),
            }));
        }

        let children = self
            .inner
            .neighbors_directed(source_node, Direction::Outgoing)
            .count();
        let valid_children = source_kind.valid_children();
        if !valid_children.allows_one_more(children) {
            return Err(StorageError::new(StructuralError::WrongNumberOfChildren {
                sid: source.as_u32(),
                kind: source_kind.to_string(),
                count: children + 1,
                expected: valid_children.to_string(),
            }));
        }

        let parents = self
            .inner
            .neighbors_directed(target_node, Direction::Incoming)
            .count();
        let valid_parents = target_kind.valid_parents();
        if !valid_parents.allows_one_more(parents) {
            return Err(StorageError::new(StructuralError::WrongNumberOfParents {
                sid: target.as_u32(),
                kind: target_kind.to_string(),
                count: parents + 1,
                expected: valid_parents.to_string(),
            }));
        }

        trace!("Adding {} holder {source} -> {target}", holder.kind());
        self.inner.add_edge(source_node, target_node, holder);
        Ok(())
    }

    /// Removes a device together with all its holders.
    pub fn remove_device(&mut self, sid: Sid) -> Result<Device, StorageError> {
        let node = self.node(sid)?;
        self.index.remove(&sid);
        self.inner
            .remove_node(node)
            .structured(NotFoundError::Device { sid: sid.as_u32() })
    }

    pub fn remove_holder(&mut self, source: Sid, target: Sid) -> Result<Holder, StorageError> {
        let not_found = NotFoundError::Holder {
            source_sid: source.as_u32(),
            target_sid: target.as_u32(),
        };
        let (Some(source_node), Some(target_node)) =
            (self.index.get(&source), self.index.get(&target))
        else {
            return Err(StorageError::new(not_found));
        };
        let edge = self
            .inner
            .find_edge(*source_node, *target_node)
            .structured(not_found)?;
        self.inner
            .remove_edge(edge)
            .structured(InternalError::Internal("holder vanished during removal"))
    }

    pub fn find_by_sid(&self, sid: Sid) -> Result<&Device, StorageError> {
        Ok(&self.inner[self.node(sid)?])
    }

    pub fn find_by_sid_mut(&mut self, sid: Sid) -> Result<&mut Device, StorageError> {
        let node = self.node(sid)?;
        Ok(&mut self.inner[node])
    }

    pub fn device_exists(&self, sid: Sid) -> bool {
        self.index.contains_key(&sid)
    }

    pub fn num_devices(&self) -> usize {
        self.index.len()
    }

    pub fn num_holders(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All devices, ordered by sid.
    pub fn devices(&self) -> impl Iterator<Item = &Device> + '_ {
        self.index.values().map(|node| &self.inner[*node])
    }

    pub fn sids(&self) -> impl Iterator<Item = Sid> + '_ {
        self.index.keys().copied()
    }

    /// All devices of the given kind, ordered by sid.
    pub fn filter_devices(&self, kind: DeviceKind) -> impl Iterator<Item = &Device> + '_ {
        self.devices().filter(move |device| device.kind() == kind)
    }

    /// All holders as `(source, target, holder)`, ordered by source and
    /// target sid.
    pub fn holders(&self) -> Vec<(Sid, Sid, &Holder)> {
        let mut holders: Vec<_> = self
            .inner
            .edge_references()
            .map(|edge| {
                (
                    self.inner[edge.source()].sid(),
                    self.inner[edge.target()].sid(),
                    edge.weight(),
                )
            })
            .collect();
        holders.sort_by_key(|(source, target, _)| (*source, *target));
        holders
    }

    pub fn holder(&self, source: Sid, target: Sid) -> Option<&Holder> {
        let edge = self
            .inner
            .find_edge(*self.index.get(&source)?, *self.index.get(&target)?)?;
        self.inner.edge_weight(edge)
    }

    pub fn holder_mut(&mut self, source: Sid, target: Sid) -> Option<&mut Holder> {
        let edge = self
            .inner
            .find_edge(*self.index.get(&source)?, *self.index.get(&target)?)?;
        self.inner.edge_weight_mut(edge)
    }

    fn neighbors(&self, sid: Sid, direction: Direction) -> Result<Vec<Sid>, StorageError> {
        let mut sids: Vec<_> = self
            .inner
            .neighbors_directed(self.node(sid)?, direction)
            .map(|node| self.inner[node].sid())
            .collect();
        sids.sort();
        Ok(sids)
    }

    /// Devices `sid` uses, ordered by sid.
    pub fn parents(&self, sid: Sid) -> Result<Vec<Sid>, StorageError> {
        self.neighbors(sid, Direction::Incoming)
    }

    /// Devices using `sid`, ordered by sid.
    pub fn children(&self, sid: Sid) -> Result<Vec<Sid>, StorageError> {
        self.neighbors(sid, Direction::Outgoing)
    }

    /// Holders ending at `sid` as `(source, holder)`.
    pub fn in_holders(&self, sid: Sid) -> Result<Vec<(Sid, &Holder)>, StorageError> {
        let mut holders: Vec<_> = self
            .inner
            .edges_directed(self.node(sid)?, Direction::Incoming)
            .map(|edge| (self.inner[edge.source()].sid(), edge.weight()))
            .collect();
        holders.sort_by_key(|(source, _)| *source);
        Ok(holders)
    }

    /// Holders starting at `sid` as `(target, holder)`.
    pub fn out_holders(&self, sid: Sid) -> Result<Vec<(Sid, &Holder)>, StorageError> {
        let mut holders: Vec<_> = self
            .inner
            .edges_directed(self.node(sid)?, Direction::Outgoing)
            .map(|edge| (self.inner[edge.target()].sid(), edge.weight()))
            .collect();
        holders.sort_by_key(|(target, _)| *target);
        Ok(holders)
    }

    fn closure(&self, sid: Sid, direction: Direction) -> Result<Vec<Sid>, StorageError> {
        let start = self.node(sid)?;
        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for next in self.inner.neighbors_directed(node, direction) {
                if seen.insert(self.inner[next].sid()) {
                    stack.push(next);
                }
            }
        }
        Ok(seen.into_iter().collect())
    }

    /// All devices `sid` transitively uses, ordered by sid.
    pub fn ancestors(&self, sid: Sid) -> Result<Vec<Sid>, StorageError> {
        self.closure(sid, Direction::Incoming)
    }

    /// All devices transitively using `sid`, ordered by sid.
    pub fn descendants(&self, sid: Sid) -> Result<Vec<Sid>, StorageError> {
        self.closure(sid, Direction::Outgoing)
    }

    /// Block device with the given kernel name.
    pub fn find_by_name(&self, name: &str) -> Option<&Device> {
        self.devices().find(|device| device.name() == Some(name))
    }

    /// Block device with the given kernel name or udev name.
    pub fn find_by_any_name(&self, name: &str) -> Option<&Device> {
        self.find_by_name(name)
            .or_else(|| self.devices().find(|device| device.has_name(name)))
    }

    /// Active block devices nothing uses.
    pub fn leaf_blk_devices(&self) -> Vec<Sid> {
        self.index
            .iter()
            .filter(|(_, node)| {
                let device = &self.inner[**node];
                device.kind().is_blk_device()
                    && device.active
                    && self
                        .inner
                        .neighbors_directed(**node, Direction::Outgoing)
                        .next()
                        .is_none()
            })
            .map(|(sid, _)| *sid)
            .collect()
    }

    /// Whether both graphs hold the same devices with equal content and the
    /// same holders.
    pub fn equal(&self, other: &Devicegraph) -> bool {
        self.index.len() == other.index.len()
            && self.devices().zip(other.devices()).all(|(lhs, rhs)| lhs.equal(rhs))
            && self.holders() == other.holders()
    }
}
