//! Read-only queries over a built graph.

use crate::graph::ClusterGraph;
use crate::model::StorageVolume;
use hacore_parse::{Endpoints, ResourceKind};
use hacore_types::{HostId, ResourceId, ResourceStatus, Score, VolumeId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

impl ClusterGraph {
    /// Status on the host currently running the resource, or `Stopped`. Groups
    /// and clones take the effective status of their first running child.
    pub fn effective_status(&self, id: &ResourceId) -> ResourceStatus {
        self.effective_status_inner(id, &mut BTreeSet::new())
    }

    fn effective_status_inner(&self, id: &ResourceId, visited: &mut BTreeSet<ResourceId>) -> ResourceStatus {
        let Some(resource) = self.resources.get(id) else {
            return ResourceStatus::Stopped;
        };
        if !visited.insert(id.clone()) {
            return ResourceStatus::Stopped;
        }
        match resource.kind() {
            ResourceKind::Primitive => resource
                .status
                .values()
                .copied()
                .find(|s| s.is_running())
                .unwrap_or_default(),
            ResourceKind::Group | ResourceKind::Clone => resource
                .def
                .children
                .iter()
                .map(|child| self.effective_status_inner(child, visited))
                .find(|s| s.is_running())
                .unwrap_or_default(),
        }
    }

    /// Hosts where the resource (or, for groups and clones, any member) is
    /// running, sorted.
    pub fn hosts_running(&self, id: &ResourceId) -> Vec<HostId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![id.clone()];
        let mut visited = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(resource) = self.resources.get(&current) else {
                continue;
            };
            if resource.kind() == ResourceKind::Primitive {
                out.extend(
                    resource
                        .status
                        .iter()
                        .filter(|(_, s)| s.is_running())
                        .map(|(h, _)| h.clone()),
                );
            } else {
                stack.extend(resource.def.children.iter().cloned());
            }
        }
        out.into_iter().collect()
    }

    /// Direct followers of `id`: order successors, positive colocation
    /// dependents, later group siblings and own members.
    fn followers(&self, id: &ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        for constraint in &self.constraints {
            match &constraint.endpoints {
                Endpoints::Order { first, then, .. } if first.contains(id) => {
                    out.extend(then.iter().cloned())
                }
                Endpoints::Colocation { rsc, with, .. }
                    if constraint.score > Score::ZERO && with.contains(id) =>
                {
                    out.extend(rsc.iter().cloned())
                }
                _ => {}
            }
        }
        if let Some(resource) = self.resources.get(id) {
            out.extend(self.later_siblings(id));
            if resource.kind() != ResourceKind::Primitive {
                out.extend(resource.def.children.iter().cloned());
            }
        }
        out
    }

    fn later_siblings(&self, id: &ResourceId) -> Vec<ResourceId> {
        let parent = self
            .resources
            .get(id)
            .and_then(|r| r.def.parent.as_ref())
            .and_then(|p| self.resources.get(p))
            .filter(|p| p.kind() == ResourceKind::Group);
        match parent {
            Some(group) => group
                .def
                .children
                .iter()
                .skip_while(|c| *c != id)
                .skip(1)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    fn reachable(&self, start: &ResourceId, next: impl Fn(&ResourceId) -> Vec<ResourceId>) -> BTreeSet<ResourceId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(current) = queue.pop_front() {
            for n in next(&current) {
                if seen.insert(n.clone()) {
                    queue.push_back(n);
                }
            }
        }
        seen.remove(start);
        seen
    }

    /// Every resource that must follow `id` when it moves or stops,
    /// transitively. Excludes `id`.
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.reachable(id, |r| self.followers(r)).into_iter().collect()
    }

    /// Resources placed together with `id` through positive colocations or
    /// group membership. Excludes `id`.
    pub fn colocated_with(&self, id: &ResourceId) -> Vec<ResourceId> {
        let mut edges: BTreeMap<ResourceId, BTreeSet<ResourceId>> = BTreeMap::new();
        let mut link = |a: &ResourceId, b: &ResourceId| {
            edges.entry(a.clone()).or_default().insert(b.clone());
            edges.entry(b.clone()).or_default().insert(a.clone());
        };
        for constraint in &self.constraints {
            if let Endpoints::Colocation { rsc, with, .. } = &constraint.endpoints {
                if constraint.score > Score::ZERO {
                    for a in rsc {
                        for b in with {
                            link(a, b);
                        }
                    }
                }
            }
        }
        for resource in self.resources.values().filter(|r| r.kind() == ResourceKind::Group) {
            for child in &resource.def.children {
                link(resource.id(), child);
            }
        }
        self.reachable(id, |r| edges.get(r).map(|s| s.iter().cloned().collect()).unwrap_or_default())
            .into_iter()
            .collect()
    }

    /// The two hosts holding legs of `volume`.
    pub fn peers_of(&self, volume: &VolumeId) -> Option<[HostId; 2]> {
        self.volumes
            .get(volume)
            .map(|v| [v.legs[0].host.clone(), v.legs[1].host.clone()])
    }

    /// Combined location preference of `resource` for `host`; `None` when no
    /// location constraint names the pair.
    pub fn location_score(&self, resource: &ResourceId, host: &HostId) -> Option<Score> {
        self.constraints
            .iter()
            .filter_map(|c| match &c.endpoints {
                Endpoints::Location { resource: r, host: h } if r == resource && h == host => Some(c.score),
                _ => None,
            })
            .reduce(Score::extreme)
    }

    /// True if nothing in the configuration forbids placing `resource` on
    /// `host` right now: the host accepts resources, no location on the
    /// resource or an enclosing group/clone is `-INFINITY`, and mandatory
    /// colocations agree with where their targets currently run.
    pub fn can_run_on(&self, resource: &ResourceId, host: &HostId) -> bool {
        let Some(node) = self.hosts.get(host) else {
            return false;
        };
        if !node.accepts_resources() || !self.resources.contains_key(resource) {
            return false;
        }

        let mut lineage = vec![resource.clone()];
        let mut current = resource.clone();
        while let Some(parent) = self.resources.get(&current).and_then(|r| r.def.parent.clone()) {
            if lineage.contains(&parent) {
                break;
            }
            lineage.push(parent.clone());
            current = parent;
        }
        if lineage
            .iter()
            .any(|r| self.location_score(r, host).is_some_and(Score::is_forbidden))
        {
            return false;
        }

        for constraint in &self.constraints {
            let Endpoints::Colocation { rsc, with, .. } = &constraint.endpoints else {
                continue;
            };
            if !rsc.iter().any(|r| lineage.contains(r)) {
                continue;
            }
            for target in with {
                let running = self.hosts_running(target);
                if constraint.score.is_forbidden() && running.contains(host) {
                    return false;
                }
                if constraint.score.is_mandatory() && !running.is_empty() && !running.contains(host) {
                    return false;
                }
            }
        }
        true
    }

    /// True if `later` is ordered after `earlier` through order constraints
    /// or group sequencing, transitively.
    pub fn ordered_after(&self, later: &ResourceId, earlier: &ResourceId) -> bool {
        let next = |id: &ResourceId| {
            let mut out: Vec<ResourceId> = self
                .constraints
                .iter()
                .filter_map(|c| match &c.endpoints {
                    Endpoints::Order { first, then, .. } if first.contains(id) => Some(then.clone()),
                    _ => None,
                })
                .flatten()
                .collect();
            out.extend(self.later_siblings(id));
            out
        };
        later != earlier && self.reachable(earlier, next).contains(later)
    }

    /// Volumes whose legs are both primary while disconnected.
    pub fn split_brain_volumes(&self) -> Vec<&StorageVolume> {
        self.volumes.values().filter(|v| v.is_split_brain()).collect()
    }

    /// Volumes with a leg on `host`.
    pub fn volumes_on(&self, host: &HostId) -> Vec<&StorageVolume> {
        self.volumes.values().filter(|v| v.leg(host).is_some()).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Host, Leg, Resource};
    use crate::ClusterGraph;
    use hacore_parse::{ConstraintDef, ResourceDef};
    use hacore_types::{
        DiskState, HostId, LegRole, ResourceId, ResourceStatus, Score, VolumeConnection, VolumeId,
    };

    fn rid(s: &str) -> ResourceId {
        ResourceId::new(s)
    }

    fn hid(s: &str) -> HostId {
        HostId::new(s)
    }

    fn graph() -> ClusterGraph {
        let mut g = ClusterGraph::default();
        for h in ["a", "b", "c"] {
            let mut host = Host::named(hid(h));
            host.online = Some(true);
            g.hosts.insert(hid(h), host);
        }
        let mut defs = vec![
            ResourceDef::primitive("drbd", "ocf:linbit:drbd"),
            ResourceDef::clone_of("ms_drbd", rid("drbd"), true),
            ResourceDef::primitive("fs", "ocf:heartbeat:Filesystem"),
            ResourceDef::primitive("ip", "ocf:heartbeat:IPaddr2"),
            ResourceDef::primitive("web", "systemd:nginx"),
            ResourceDef::group("g_web", vec![rid("fs"), rid("ip"), rid("web")]),
            ResourceDef::primitive("lonely", "systemd:cron"),
        ];
        for def in &mut defs {
            def.parent = match def.id.as_str() {
                "drbd" => Some(rid("ms_drbd")),
                "fs" | "ip" | "web" => Some(rid("g_web")),
                _ => None,
            };
        }
        for def in defs {
            g.resources.insert(def.id.clone(), Resource::from_def(def));
        }
        g.constraints = vec![
            ConstraintDef::order("o1", rid("ms_drbd"), rid("g_web"), Score::POS_INFINITY),
            ConstraintDef::colocation("c1", rid("g_web"), rid("ms_drbd"), Score::POS_INFINITY),
            ConstraintDef::colocation("c2", rid("lonely"), rid("web"), Score::NEG_INFINITY),
            ConstraintDef::location("l1", rid("g_web"), hid("c"), Score::NEG_INFINITY),
            ConstraintDef::location("l2", rid("ip"), hid("a"), Score::new(50)),
            ConstraintDef::location("l3", rid("ip"), hid("a"), Score::new(-200)),
        ];
        g
    }

    fn set_status(g: &mut ClusterGraph, r: &str, h: &str, s: ResourceStatus) {
        g.resources.get_mut(&rid(r)).unwrap().status.insert(hid(h), s);
    }

    #[test]
    fn test_dependents_transitive() {
        let g = graph();
        let deps = g.dependents_of(&rid("ms_drbd"));
        for r in ["drbd", "g_web", "fs", "ip", "web"] {
            assert!(deps.contains(&rid(r)), "missing {}", r);
        }
        assert!(!deps.contains(&rid("ms_drbd")));
        // negative colocation is not a dependency
        assert!(!deps.contains(&rid("lonely")));
    }

    #[test]
    fn test_group_sibling_dependents() {
        let g = graph();
        assert_eq!(g.dependents_of(&rid("ip")), vec![rid("web")]);
        assert!(g.dependents_of(&rid("web")).is_empty());
    }

    #[test]
    fn test_colocated_component() {
        let g = graph();
        let set = g.colocated_with(&rid("fs"));
        assert!(set.contains(&rid("g_web")));
        assert!(set.contains(&rid("ms_drbd")));
        assert!(set.contains(&rid("web")));
        assert!(!set.contains(&rid("fs")));
        assert!(!set.contains(&rid("lonely")));
    }

    #[test]
    fn test_effective_status_and_hosts_running() {
        let mut g = graph();
        set_status(&mut g, "fs", "a", ResourceStatus::Started);
        set_status(&mut g, "ip", "b", ResourceStatus::FailedStart);
        set_status(&mut g, "drbd", "a", ResourceStatus::Started);
        set_status(&mut g, "drbd", "b", ResourceStatus::Started);
        assert_eq!(g.effective_status(&rid("fs")), ResourceStatus::Started);
        assert_eq!(g.effective_status(&rid("ip")), ResourceStatus::Stopped);
        assert_eq!(g.effective_status(&rid("g_web")), ResourceStatus::Started);
        assert_eq!(g.effective_status(&rid("lonely")), ResourceStatus::Stopped);
        assert_eq!(g.hosts_running(&rid("ms_drbd")), vec![hid("a"), hid("b")]);
        assert_eq!(g.hosts_running(&rid("g_web")), vec![hid("a")]);
    }

    #[test]
    fn test_location_score_extreme() {
        let g = graph();
        assert_eq!(g.location_score(&rid("ip"), &hid("a")), Some(Score::new(-200)));
        assert_eq!(g.location_score(&rid("ip"), &hid("b")), None);
    }

    #[test]
    fn test_can_run_on() {
        let mut g = graph();
        // forbidden through the enclosing group
        assert!(!g.can_run_on(&rid("fs"), &hid("c")));
        assert!(g.can_run_on(&rid("fs"), &hid("a")));

        set_status(&mut g, "drbd", "a", ResourceStatus::Started);
        assert!(g.can_run_on(&rid("g_web"), &hid("a")));
        assert!(!g.can_run_on(&rid("g_web"), &hid("b")));

        set_status(&mut g, "web", "b", ResourceStatus::Started);
        assert!(!g.can_run_on(&rid("lonely"), &hid("b")));
        assert!(g.can_run_on(&rid("lonely"), &hid("a")));

        g.hosts.get_mut(&hid("a")).unwrap().standby = true;
        assert!(!g.can_run_on(&rid("lonely"), &hid("a")));
        assert!(!g.can_run_on(&rid("lonely"), &hid("zz")));
    }

    #[test]
    fn test_ordered_after() {
        let g = graph();
        assert!(g.ordered_after(&rid("g_web"), &rid("ms_drbd")));
        assert!(g.ordered_after(&rid("web"), &rid("fs")));
        assert!(!g.ordered_after(&rid("ms_drbd"), &rid("g_web")));
        assert!(!g.ordered_after(&rid("fs"), &rid("fs")));
    }

    fn leg(host: &str, role: LegRole) -> Leg {
        Leg {
            host: hid(host),
            device: "/dev/drbd0".into(),
            disk: "/dev/sdb".into(),
            meta_disk: "internal".into(),
            address: String::new(),
            port: None,
            node_id: None,
            role,
            disk_state: DiskState::UpToDate,
        }
    }

    #[test]
    fn test_split_brain_and_peers() {
        let mut g = graph();
        g.volumes.insert(
            VolumeId::new("r0"),
            crate::StorageVolume {
                id: VolumeId::new("r0"),
                legs: [leg("a", LegRole::Primary), leg("b", LegRole::Primary)],
                connection: VolumeConnection::Disconnected,
                sync_percent: None,
                protocol: None,
            },
        );
        g.volumes.insert(
            VolumeId::new("r1"),
            crate::StorageVolume {
                id: VolumeId::new("r1"),
                legs: [leg("b", LegRole::Primary), leg("c", LegRole::Primary)],
                connection: VolumeConnection::StandAlone,
                sync_percent: None,
                protocol: None,
            },
        );
        let split: Vec<_> = g.split_brain_volumes().into_iter().map(|v| v.id.clone()).collect();
        assert_eq!(split, vec![VolumeId::new("r0")]);
        assert_eq!(g.peers_of(&VolumeId::new("r1")), Some([hid("b"), hid("c")]));
        assert_eq!(g.volumes_on(&hid("b")).len(), 2);
        assert!(g.peers_of(&VolumeId::new("nope")).is_none());
    }
}
