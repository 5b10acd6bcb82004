//! # Actiongraph
//!
//! Diffs a probed devicegraph against a staging devicegraph and orders the
//! resulting actions.
//!
//! Devices are matched by sid. Every device that only exists in one graph, or
//! whose content differs between the graphs, contributes one or more chains
//! of actions. Chains are ordered internally; ordering between devices comes
//! from the holders of the two graphs and from a few rules about mount
//! points and config files. The commit order is a topological order of the
//! resulting DAG with ties broken by ascending sid.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet, BinaryHeap},
};

use log::{debug, trace};
use petgraph::{
    algo,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
    Direction,
};

use stgplan_api::{
    devicegraph::{holder::HolderKind, DeviceKind, Holder},
    error::{PlanningInvariantError, StorageError, UnsupportedModificationError},
    Devicegraph, Sid,
};

use crate::devices;

pub mod action;

pub use action::{Action, ActionKind, ActionText, ReallotMode, Side, Tense};

/// Mount paths that are not part of the directory tree.
const NON_TREE_MOUNT_PATHS: [&str; 2] = ["swap", "none"];

/// The ordered set of actions transforming a probed devicegraph into a
/// staging devicegraph.
#[derive(Debug)]
pub struct Actiongraph<'a> {
    probed: &'a Devicegraph,
    staging: &'a Devicegraph,
    graph: DiGraph<Action, ()>,
    order: Vec<NodeIndex>,
}

impl<'a> Actiongraph<'a> {
    #[tracing::instrument(skip_all)]
    pub fn new(probed: &'a Devicegraph, staging: &'a Devicegraph) -> Result<Self, StorageError> {
        let mut builder = Builder::default();
        builder.add_device_actions(probed, staging)?;
        builder.add_holder_actions(probed, staging)?;
        builder.add_structural_dependencies(probed, staging)?;
        builder.add_mount_dependencies();
        builder.add_config_dependencies();

        let order = stable_order(&builder.graph)?;
        debug!(
            "Planned {} actions with {} dependencies",
            builder.graph.node_count(),
            builder.graph.edge_count()
        );

        Ok(Actiongraph {
            probed,
            staging,
            graph: builder.graph,
            order,
        })
    }

    pub fn probed(&self) -> &'a Devicegraph {
        self.probed
    }

    pub fn staging(&self) -> &'a Devicegraph {
        self.staging
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All actions in insertion order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> + '_ {
        self.graph.node_weights()
    }

    /// The actions in the order they must be committed.
    pub fn commit_order(&self) -> Vec<&Action> {
        self.order.iter().map(|node| &self.graph[*node]).collect()
    }

    /// Ordering edges as `(before, after)`.
    pub fn dependencies(&self) -> Vec<(&Action, &Action)> {
        self.graph
            .edge_references()
            .map(|edge| (&self.graph[edge.source()], &self.graph[edge.target()]))
            .collect()
    }

    pub fn text(&self, action: &Action, tense: Tense) -> Result<ActionText, StorageError> {
        devices::text(action, tense, self.probed, self.staging)
    }

    /// Texts of all actions in commit order.
    pub fn texts(&self, tense: Tense) -> Result<Vec<ActionText>, StorageError> {
        self.commit_order()
            .into_iter()
            .map(|action| self.text(action, tense))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Builder {
    graph: DiGraph<Action, ()>,

    /// The chains each device contributed, in the order they were added.
    chains: BTreeMap<Sid, Vec<Vec<NodeIndex>>>,
}

impl Builder {
    /// Adds the actions of a chain, each one ordered after its predecessor.
    fn add_chain(&mut self, chain: Vec<Action>) {
        let Some(sid) = chain.first().map(|action| action.sid) else {
            return;
        };

        let nodes: Vec<NodeIndex> = chain
            .into_iter()
            .map(|action| {
                trace!("Adding action {action}");
                self.graph.add_node(action)
            })
            .collect();
        for pair in nodes.windows(2) {
            self.graph.update_edge(pair[0], pair[1], ());
        }
        self.chains.entry(sid).or_default().push(nodes);
    }

    /// The parts of the chains of `sid` acting on `side`.
    fn side_chains(&self, sid: Sid, side: Side) -> Vec<Vec<NodeIndex>> {
        self.chains
            .get(&sid)
            .into_iter()
            .flatten()
            .map(|chain| {
                chain
                    .iter()
                    .copied()
                    .filter(|node| self.graph[*node].side == side)
                    .collect::<Vec<_>>()
            })
            .filter(|chain| !chain.is_empty())
            .collect()
    }

    /// The actions other devices' actions on `side` wait on when they depend
    /// on `sid`.
    fn tails(&self, sid: Sid, side: Side) -> Vec<NodeIndex> {
        self.side_chains(sid, side)
            .iter()
            .filter_map(|chain| {
                chain
                    .iter()
                    .rev()
                    .find(|node| self.graph[**node].last)
                    .or_else(|| chain.last())
                    .copied()
            })
            .collect()
    }

    /// The actions of `sid` on `side` that wait when `sid` depends on another
    /// device.
    fn heads(&self, sid: Sid, side: Side) -> Vec<NodeIndex> {
        self.side_chains(sid, side)
            .iter()
            .filter_map(|chain| {
                chain
                    .iter()
                    .find(|node| self.graph[**node].first)
                    .or_else(|| chain.first())
                    .copied()
            })
            .collect()
    }

    /// Tails on `side` of the nearest devices `sid` depends on: its parents
    /// in the staging graph for `Rhs`, its children in the probed graph for
    /// `Lhs`. Devices without actions on `side` are passed through.
    fn nearest_tails(
        &self,
        graph: &Devicegraph,
        sid: Sid,
        side: Side,
    ) -> Result<Vec<NodeIndex>, StorageError> {
        let neighbors = |sid| match side {
            Side::Rhs => graph.parents(sid),
            Side::Lhs => graph.children(sid),
        };

        let mut tails = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = neighbors(sid)?;
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            let next_tails = self.tails(next, side);
            if next_tails.is_empty() {
                stack.extend(neighbors(next)?);
            } else {
                tails.extend(next_tails);
            }
        }
        Ok(tails)
    }

    fn order(&mut self, before: &[NodeIndex], after: &[NodeIndex]) {
        for b in before {
            for a in after {
                if b != a {
                    self.graph.update_edge(*b, *a, ());
                }
            }
        }
    }

    /// Create, delete and modify chains of every device.
    fn add_device_actions(
        &mut self,
        probed: &Devicegraph,
        staging: &Devicegraph,
    ) -> Result<(), StorageError> {
        let sids: BTreeSet<Sid> = probed.sids().chain(staging.sids()).collect();
        for sid in sids {
            match (probed.find_by_sid(sid).ok(), staging.find_by_sid(sid).ok()) {
                (Some(lhs), None) => self.add_chain(devices::delete_actions(lhs)?),
                (None, Some(rhs)) => self.add_chain(devices::create_actions(staging, rhs)?),
                (Some(lhs), Some(rhs)) => {
                    if lhs.kind() != rhs.kind() {
                        return Err(StorageError::new(PlanningInvariantError::KindMismatch {
                            sid: sid.as_u32(),
                            probed: lhs.kind().to_string(),
                            staging: rhs.kind().to_string(),
                        }));
                    }
                    if !lhs.equal(rhs) {
                        for chain in devices::modify_actions(probed, staging, lhs, rhs)? {
                            self.add_chain(chain);
                        }
                    }
                }
                (None, None) => {}
            }
        }
        Ok(())
    }

    /// Membership changes of devices that exist in both graphs.
    fn add_holder_actions(
        &mut self,
        probed: &Devicegraph,
        staging: &Devicegraph,
    ) -> Result<(), StorageError> {
        for (source, target, holder) in staging.holders() {
            if !probed.device_exists(target) {
                continue;
            }
            match probed.holder(source, target) {
                None => {
                    let action = reallot(staging, source, target, holder, ReallotMode::Extend)?;
                    self.add_chain(vec![action]);
                }
                Some(old) if !same_holder(old, holder) => {
                    let device = staging.find_by_sid(target)?;
                    return Err(StorageError::new(UnsupportedModificationError::Attribute {
                        device: device.display_name(),
                        attribute: format!("{} holder from {source}", holder.kind()),
                    }));
                }
                Some(_) => {}
            }
        }

        for (source, target, holder) in probed.holders() {
            if !staging.device_exists(target) || staging.holder(source, target).is_some() {
                continue;
            }
            let action = reallot(probed, source, target, holder, ReallotMode::Reduce)?;
            self.add_chain(vec![action]);
        }

        Ok(())
    }

    /// Orders actions along the holders of both graphs.
    fn add_structural_dependencies(
        &mut self,
        probed: &Devicegraph,
        staging: &Devicegraph,
    ) -> Result<(), StorageError> {
        // Creations and modifications wait for the devices they are built
        // on.
        for sid in staging.sids() {
            let heads = self.heads(sid, Side::Rhs);
            if heads.is_empty() {
                continue;
            }
            let tails = self.nearest_tails(staging, sid, Side::Rhs)?;
            self.order(&tails, &heads);
        }

        // Deletions and deactivations wait for everything built on the
        // device.
        for sid in probed.sids() {
            let heads = self.heads(sid, Side::Lhs);
            if heads.is_empty() {
                continue;
            }
            let tails = self.nearest_tails(probed, sid, Side::Lhs)?;
            self.order(&tails, &heads);
        }

        // Devices that stay get rid of the old before they take on the new.
        for sid in probed.sids() {
            if !staging.device_exists(sid) {
                continue;
            }
            let tails = self.tails(sid, Side::Lhs);
            let heads = self.heads(sid, Side::Rhs);
            self.order(&tails, &heads);

            let new_children: Vec<Sid> = staging
                .children(sid)?
                .into_iter()
                .filter(|child| !probed.device_exists(*child))
                .collect();
            for old_child in probed.children(sid)? {
                if staging.device_exists(old_child) {
                    continue;
                }
                let tails = self.tails(old_child, Side::Lhs);
                for new_child in &new_children {
                    let heads = self.heads(*new_child, Side::Rhs);
                    self.order(&tails, &heads);
                }
            }
        }

        Ok(())
    }

    /// Mounts go top down, unmounts bottom up, and a path is unmounted
    /// before anything is mounted at or around it.
    fn add_mount_dependencies(&mut self) {
        let mounts: Vec<(NodeIndex, String, bool)> = self
            .graph
            .node_indices()
            .filter_map(|node| match &self.graph[node].kind {
                ActionKind::Mount { path } => Some((node, path.clone(), true)),
                ActionKind::Unmount { path } => Some((node, path.clone(), false)),
                _ => None,
            })
            .filter(|(_, path, _)| !NON_TREE_MOUNT_PATHS.contains(&path.as_str()))
            .collect();

        for (a, a_path, a_mounts) in &mounts {
            for (b, b_path, b_mounts) in &mounts {
                if a == b {
                    continue;
                }
                let before = match (a_mounts, b_mounts) {
                    (true, true) => is_nested(b_path, a_path),
                    (false, false) => is_nested(a_path, b_path),
                    (false, true) => {
                        a_path == b_path || is_nested(a_path, b_path) || is_nested(b_path, a_path)
                    }
                    (true, false) => false,
                };
                if before {
                    self.graph.update_edge(*a, *b, ());
                }
            }
        }
    }

    /// Config files are registered once the root filesystem is mounted.
    fn add_config_dependencies(&mut self) {
        let root_mounts: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|node| {
                matches!(
                    &self.graph[*node].kind,
                    ActionKind::Mount { path } if path == stgplan_api::constants::ROOT_MOUNT_POINT_PATH
                )
            })
            .collect();
        if root_mounts.is_empty() {
            return;
        }

        let registrations: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|node| self.graph[*node].kind.is_config_registration())
            .collect();
        self.order(&root_mounts, &registrations);
    }
}

/// Whether `path` lies strictly below `parent`.
fn is_nested(path: &str, parent: &str) -> bool {
    if path == parent {
        return false;
    }
    if parent == stgplan_api::constants::ROOT_MOUNT_POINT_PATH {
        return path.starts_with('/');
    }
    path.strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Holder attributes that matter for planning. Member positions and fault
/// states are reported by the system and may differ freely.
fn same_holder(lhs: &Holder, rhs: &Holder) -> bool {
    match (lhs.as_md_user(), rhs.as_md_user()) {
        (Some(lhs), Some(rhs)) => lhs.spare == rhs.spare,
        _ => lhs == rhs,
    }
}

fn reallot(
    graph: &Devicegraph,
    member: Sid,
    container: Sid,
    holder: &Holder,
    mode: ReallotMode,
) -> Result<Action, StorageError> {
    let device = graph.find_by_sid(container)?;
    let side = match mode {
        ReallotMode::Extend => Side::Rhs,
        ReallotMode::Reduce => Side::Lhs,
    };
    match (holder.kind(), device.kind()) {
        (HolderKind::MdUser, DeviceKind::Md) | (HolderKind::User, DeviceKind::LvmVg) => Ok(
            Action::new(container, ActionKind::Reallot { mode, member }, side),
        ),
        (kind, _) => Err(StorageError::new(UnsupportedModificationError::Attribute {
            device: device.display_name(),
            attribute: format!("{kind} holder from {member}"),
        })),
    }
}

/// Kahn's algorithm picking the ready action with the lowest sid first, and
/// among those the one added first.
fn stable_order(graph: &DiGraph<Action, ()>) -> Result<Vec<NodeIndex>, StorageError> {
    if let Err(cycle) = algo::toposort(graph, None) {
        return Err(StorageError::new(PlanningInvariantError::Cycle {
            action: graph[cycle.node_id()].to_string(),
        }));
    }

    let mut in_degree: BTreeMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|node| {
            (
                node,
                graph.neighbors_directed(node, Direction::Incoming).count(),
            )
        })
        .collect();

    let mut ready: BinaryHeap<Reverse<(Sid, NodeIndex)>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| Reverse((graph[*node].sid, *node)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((_, node))) = ready.pop() {
        order.push(node);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((graph[next].sid, next)));
                }
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::formatdoc;
    use stgplan_api::{
        constants::PARTITION_ID_RAID,
        devicegraph::{
            device::{
                BlkFilesystem, Disk, Luks, LvmLv, LvmPv, LvmVg, Md, MountPoint, Partition,
                PartitionTable,
            },
            types::{MdLevel, PtType},
        },
        error::ErrorKind,
        primitives::{bytes::ByteCount, region::Region},
    };
    use sysdefs::filesystems::RealFilesystemType;

    const GIB_BLOCKS: u64 = ByteCount::GIB / 512;

    fn disk(graph: &mut Devicegraph, name: &str, gib: u64) -> Sid {
        graph
            .create_device(Disk {
                name: name.into(),
                region: Region::new(0, gib * GIB_BLOCKS, 512),
                ..Default::default()
            })
            .unwrap()
    }

    fn partition_table(graph: &mut Devicegraph, disk: Sid) -> Sid {
        let pt = graph
            .create_device(PartitionTable {
                pt_type: PtType::Gpt,
            })
            .unwrap();
        graph.add_holder(disk, pt, Holder::Subdevice).unwrap();
        pt
    }

    fn partition(graph: &mut Devicegraph, pt: Sid, name: &str, start: u64, gib: u64) -> Sid {
        let partition = graph
            .create_device(Partition::new(
                name,
                Region::new(start, gib * GIB_BLOCKS, 512),
            ))
            .unwrap();
        graph.add_holder(pt, partition, Holder::Subdevice).unwrap();
        partition
    }

    fn filesystem(graph: &mut Devicegraph, blk: Sid, path: &str) -> (Sid, Sid) {
        let fs = graph
            .create_device(BlkFilesystem::new(RealFilesystemType::Ext4))
            .unwrap();
        graph.add_holder(blk, fs, Holder::filesystem_user()).unwrap();
        let mp = graph.create_device(MountPoint::new(path)).unwrap();
        graph.add_holder(fs, mp, Holder::MountUser).unwrap();
        (fs, mp)
    }

    fn mark_existing(graph: &mut Devicegraph) {
        let sids: Vec<Sid> = graph.sids().collect();
        for sid in sids {
            graph.find_by_sid_mut(sid).unwrap().exists_in_system = true;
        }
    }

    fn summary(actiongraph: &Actiongraph) -> Vec<(Sid, &'static str)> {
        actiongraph
            .commit_order()
            .into_iter()
            .map(|action| (action.sid, action.verb()))
            .collect()
    }

    fn position(actiongraph: &Actiongraph, sid: Sid, verb: &str) -> usize {
        actiongraph
            .commit_order()
            .iter()
            .position(|action| action.sid == sid && action.verb() == verb)
            .unwrap()
    }

    /// Asserts that every dependency is respected by the commit order.
    fn assert_topological(actiongraph: &Actiongraph) {
        let order = actiongraph.commit_order();
        for (before, after) in actiongraph.dependencies() {
            let b = order.iter().position(|a| *a == before).unwrap();
            let a = order.iter().position(|a| *a == after).unwrap();
            assert!(b < a, "{before} must come before {after}");
        }
    }

    #[test]
    fn test_identical_graphs() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let pt = partition_table(&mut probed, sda);
        let sda1 = partition(&mut probed, pt, "/dev/sda1", 2048, 5);
        filesystem(&mut probed, sda1, "/");
        mark_existing(&mut probed);

        let staging = probed.clone();
        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert!(actiongraph.is_empty());
        assert_eq!(actiongraph.len(), 0);
        assert!(actiongraph.commit_order().is_empty());
    }

    #[test]
    fn test_raid1_over_new_and_existing_partition() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let sdb = disk(&mut probed, "/dev/sdb", 20);
        let sdb_pt = partition_table(&mut probed, sdb);
        let sdb1 = partition(&mut probed, sdb_pt, "/dev/sdb1", 2048, 10);
        mark_existing(&mut probed);

        let mut staging = probed.clone();
        let sda_pt = partition_table(&mut staging, sda);
        let sda1 = partition(&mut staging, sda_pt, "/dev/sda1", 2048, 10);
        let md0 = staging
            .create_device(Md::new("/dev/md0", MdLevel::Raid1))
            .unwrap();
        staging.md_add_device(md0, sda1, false).unwrap();
        staging.md_add_device(md0, sdb1, false).unwrap();
        assert_eq!(
            staging.find_by_sid(md0).unwrap().region().unwrap().size(),
            10603134976
        );

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_eq!(
            summary(&actiongraph),
            vec![
                (sda_pt, "create"),
                (sda1, "create"),
                (md0, "create"),
                (md0, "add-to-etc-mdadm"),
            ]
        );
        assert!(actiongraph.actions().all(|action| action.sid != sdb1));
        assert_topological(&actiongraph);

        let texts: Vec<String> = actiongraph
            .texts(Tense::Pending)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(texts[1], "Create partition /dev/sda1 (10 GiB)");
        assert_eq!(
            texts[2],
            "Create RAID1 /dev/md0 (10354624 KiB, /dev/sda1, /dev/sdb1)"
        );
        assert_eq!(texts[3], "Add to mdadm.conf RAID1 /dev/md0");
    }

    #[test]
    fn test_single_addition_is_one_chain() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let pt = partition_table(&mut probed, sda);
        mark_existing(&mut probed);

        let mut staging = probed.clone();
        let sda1 = partition(&mut staging, pt, "/dev/sda1", 2048, 5);

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_eq!(summary(&actiongraph), vec![(sda1, "create")]);
        assert!(actiongraph
            .actions()
            .all(|action| action.side == Side::Rhs && action.kind == ActionKind::Create));
    }

    #[test]
    fn test_partition_flags_follow_create() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let pt = partition_table(&mut probed, sda);
        mark_existing(&mut probed);

        let mut staging = probed.clone();
        let sda1 = partition(&mut staging, pt, "/dev/sda1", 2048, 5);
        if let stgplan_api::devicegraph::DeviceData::Partition(p) =
            &mut staging.find_by_sid_mut(sda1).unwrap().data
        {
            p.id = PARTITION_ID_RAID;
            p.boot = true;
        }

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_eq!(
            summary(&actiongraph),
            vec![
                (sda1, "create"),
                (sda1, "set-partition-id"),
                (sda1, "set-boot")
            ]
        );
    }

    #[test]
    fn test_delete_container_after_contents() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let pt = partition_table(&mut probed, sda);
        let sda1 = partition(&mut probed, pt, "/dev/sda1", 2048, 5);
        let pv = probed.create_device(LvmPv::default()).unwrap();
        probed.add_holder(sda1, pv, Holder::User).unwrap();
        let vg = probed
            .create_device(LvmVg {
                vg_name: "system".into(),
                extent_size: 4 * ByteCount::MIB,
                ..Default::default()
            })
            .unwrap();
        probed.add_holder(pv, vg, Holder::User).unwrap();
        let root = probed
            .create_device(LvmLv {
                name: "/dev/system/root".into(),
                lv_name: "root".into(),
                region: Region::new(0, 1024, 4 * ByteCount::MIB as u32),
                ..Default::default()
            })
            .unwrap();
        probed.add_holder(vg, root, Holder::Subdevice).unwrap();
        let swap = probed
            .create_device(LvmLv {
                name: "/dev/system/swap".into(),
                lv_name: "swap".into(),
                region: Region::new(0, 256, 4 * ByteCount::MIB as u32),
                ..Default::default()
            })
            .unwrap();
        probed.add_holder(vg, swap, Holder::Subdevice).unwrap();
        let (fs, mp) = filesystem(&mut probed, root, "/data");
        mark_existing(&mut probed);

        let mut staging = probed.clone();
        for sid in [mp, fs, root, swap, vg, pv, sda1, pt] {
            staging.remove_device(sid).unwrap();
        }

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_topological(&actiongraph);

        let delete = |sid| position(&actiongraph, sid, "delete");
        assert!(position(&actiongraph, mp, "unmount") < delete(fs));
        assert!(delete(fs) < position(&actiongraph, root, "deactivate"));
        assert!(delete(root) < delete(vg));
        assert!(delete(swap) < delete(vg));
        assert!(delete(vg) < delete(pv));
        assert!(delete(pv) < delete(sda1));
        assert!(delete(sda1) < delete(pt));
        assert!(actiongraph.actions().all(|action| action.side == Side::Lhs));
    }

    /// Whether the dependencies order `before` of `first` before any action
    /// of `second`.
    fn depends(actiongraph: &Actiongraph, first: Sid, before: &ActionKind, second: Sid) -> bool {
        actiongraph
            .dependencies()
            .iter()
            .any(|(b, a)| b.sid == first && &b.kind == before && a.sid == second)
    }

    #[test]
    fn test_deactivate_after_unmount() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let pv = probed.create_device(LvmPv::default()).unwrap();
        probed.add_holder(sda, pv, Holder::User).unwrap();
        let vg = probed
            .create_device(LvmVg {
                vg_name: "system".into(),
                extent_size: 4 * ByteCount::MIB,
                ..Default::default()
            })
            .unwrap();
        probed.add_holder(pv, vg, Holder::User).unwrap();
        let lv = probed
            .create_device(LvmLv {
                name: "/dev/system/data".into(),
                lv_name: "data".into(),
                region: Region::new(0, 1024, 4 * ByteCount::MIB as u32),
                ..Default::default()
            })
            .unwrap();
        probed.add_holder(vg, lv, Holder::Subdevice).unwrap();
        let (fs, mp) = filesystem(&mut probed, lv, "/data");
        mark_existing(&mut probed);

        // The filesystem itself stays as it is
        let mut staging = probed.clone();
        staging.find_by_sid_mut(lv).unwrap().active = false;
        staging.find_by_sid_mut(mp).unwrap().active = false;

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_topological(&actiongraph);
        assert!(actiongraph.actions().all(|action| action.sid != fs));
        assert_eq!(
            summary(&actiongraph),
            vec![(mp, "unmount"), (lv, "deactivate")]
        );
        assert!(depends(
            &actiongraph,
            mp,
            &ActionKind::Unmount {
                path: "/data".into()
            },
            lv
        ));
    }

    #[test]
    fn test_activate_before_mount() {
        let mut probed = Devicegraph::new();
        let sdc = disk(&mut probed, "/dev/sdc", 10);
        let luks = probed
            .create_device(Luks {
                name: "/dev/mapper/cr_data".into(),
                dm_table_name: "cr_data".into(),
                ..Default::default()
            })
            .unwrap();
        probed.add_holder(sdc, luks, Holder::User).unwrap();
        let (fs, mp) = filesystem(&mut probed, luks, "/data");
        mark_existing(&mut probed);
        probed.find_by_sid_mut(luks).unwrap().active = false;
        probed.find_by_sid_mut(mp).unwrap().active = false;

        let mut staging = probed.clone();
        staging.find_by_sid_mut(luks).unwrap().active = true;
        staging.find_by_sid_mut(mp).unwrap().active = true;

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_topological(&actiongraph);
        assert!(actiongraph.actions().all(|action| action.sid != fs));
        assert_eq!(summary(&actiongraph), vec![(luks, "activate"), (mp, "mount")]);
        assert!(depends(&actiongraph, luks, &ActionKind::Activate, mp));
    }

    #[test]
    fn test_replace_partition() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let pt = partition_table(&mut probed, sda);
        let old = partition(&mut probed, pt, "/dev/sda1", 2048, 5);
        mark_existing(&mut probed);

        let mut staging = probed.clone();
        staging.remove_device(old).unwrap();
        let new = partition(&mut staging, pt, "/dev/sda1", 2048, 8);

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_eq!(summary(&actiongraph), vec![(old, "delete"), (new, "create")]);
    }

    #[test]
    fn test_md_membership_changes() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let pt = partition_table(&mut probed, sda);
        let sda1 = partition(&mut probed, pt, "/dev/sda1", 2048, 2);
        let sda2 = partition(&mut probed, pt, "/dev/sda2", 2048 + 2 * GIB_BLOCKS, 2);
        let md0 = probed
            .create_device(Md::new("/dev/md0", MdLevel::Raid1))
            .unwrap();
        probed.md_add_device(md0, sda1, false).unwrap();
        probed.md_add_device(md0, sda2, false).unwrap();
        mark_existing(&mut probed);

        let mut staging = probed.clone();
        staging.md_remove_device(md0, sda2).unwrap();
        staging.remove_device(sda2).unwrap();
        let sda3 = partition(&mut staging, pt, "/dev/sda3", 2048 + 4 * GIB_BLOCKS, 2);
        staging.md_add_device(md0, sda3, true).unwrap();

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_topological(&actiongraph);

        let order = actiongraph.commit_order();
        let reduce = order
            .iter()
            .position(|action| {
                action.kind
                    == ActionKind::Reallot {
                        mode: ReallotMode::Reduce,
                        member: sda2,
                    }
            })
            .unwrap();
        let extend = order
            .iter()
            .position(|action| {
                action.kind
                    == ActionKind::Reallot {
                        mode: ReallotMode::Extend,
                        member: sda3,
                    }
            })
            .unwrap();
        assert!(reduce < position(&actiongraph, sda2, "delete"));
        assert!(position(&actiongraph, sda3, "create") < extend);
        assert!(reduce < extend);
    }

    #[test]
    fn test_changed_spare_flag_is_unsupported() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let sdb = disk(&mut probed, "/dev/sdb", 10);
        let md0 = probed
            .create_device(Md::new("/dev/md0", MdLevel::Raid1))
            .unwrap();
        probed.md_add_device(md0, sda, false).unwrap();
        probed.md_add_device(md0, sdb, false).unwrap();
        mark_existing(&mut probed);

        let mut staging = probed.clone();
        if let Some(user) = staging
            .holder_mut(sdb, md0)
            .and_then(Holder::as_md_user_mut)
        {
            user.spare = true;
        }

        let error = Actiongraph::new(&probed, &staging).unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::UnsupportedModification(UnsupportedModificationError::Attribute { .. })
        ));
    }

    #[test]
    fn test_kind_mismatch() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        mark_existing(&mut probed);

        // A persisted graph may reuse a sid for a different kind
        let staging = Devicegraph::load(&formatdoc! {"
            devices:
            - sid: {sid}
              data:
                kind: md
                name: /dev/md0
                level: raid1
            ",
            sid = sda.as_u32(),
        })
        .unwrap();
        assert!(staging.device_exists(sda));

        let error = Actiongraph::new(&probed, &staging).unwrap_err();
        assert!(error.is_defect());
        assert_eq!(
            error.kind(),
            &ErrorKind::PlanningInvariant(PlanningInvariantError::KindMismatch {
                sid: sda.as_u32(),
                probed: "disk".into(),
                staging: "md".into(),
            })
        );
    }

    #[test]
    fn test_mount_nesting_and_root_registration() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let pt = partition_table(&mut probed, sda);
        mark_existing(&mut probed);

        let mut staging = probed.clone();
        let sda1 = partition(&mut staging, pt, "/dev/sda1", 2048, 1);
        let sda2 = partition(&mut staging, pt, "/dev/sda2", 2048 + GIB_BLOCKS, 5);
        // Created before the root filesystem so that sid order alone would
        // put it first
        let (_, boot) = filesystem(&mut staging, sda1, "/boot");
        let (_, root) = filesystem(&mut staging, sda2, "/");

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_topological(&actiongraph);
        assert!(position(&actiongraph, root, "mount") < position(&actiongraph, boot, "mount"));
        assert!(
            position(&actiongraph, root, "mount")
                < position(&actiongraph, boot, "add-to-etc-fstab")
        );
    }

    #[test]
    fn test_is_nested() {
        assert!(is_nested("/boot", "/"));
        assert!(is_nested("/boot/efi", "/boot"));
        assert!(!is_nested("/bootx", "/boot"));
        assert!(!is_nested("/boot", "/boot"));
        assert!(!is_nested("/", "/boot"));
    }

    #[test]
    fn test_cycle_is_a_defect() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);

        let mut graph = DiGraph::new();
        let a = graph.add_node(Action::create(sda));
        let b = graph.add_node(Action::new(sda, ActionKind::SetBoot, Side::Rhs));
        graph.add_edge(a, b, ());
        assert_eq!(stable_order(&graph).unwrap(), vec![a, b]);

        graph.add_edge(b, a, ());
        let error = stable_order(&graph).unwrap_err();
        assert!(error.is_defect());
        assert!(matches!(
            error.kind(),
            ErrorKind::PlanningInvariant(PlanningInvariantError::Cycle { .. })
        ));
    }

    #[test]
    fn test_ties_broken_by_sid() {
        let mut probed = Devicegraph::new();
        let sda = disk(&mut probed, "/dev/sda", 10);
        let sdb = disk(&mut probed, "/dev/sdb", 10);
        mark_existing(&mut probed);

        let mut staging = probed.clone();
        let pt_b = partition_table(&mut staging, sdb);
        let pt_a = partition_table(&mut staging, sda);

        let actiongraph = Actiongraph::new(&probed, &staging).unwrap();
        assert_eq!(
            summary(&actiongraph),
            vec![(pt_b, "create"), (pt_a, "create")]
        );
    }
}
