//! Provisioning a cluster from a declarative layout.

use serde::{Deserialize, Serialize};
use tessera_types::{Identifier, NamespaceKind};
use tracing::info;

use crate::{Cluster, ClusterConfig, ClusterIo, Error, NamespaceSpec, Result};

/// Placement of one namespace, by datacenter index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceLayout {
    /// Index of the primary datacenter.
    pub primary: usize,
    /// Replica count per datacenter, one entry per datacenter, or empty for none.
    #[serde(default)]
    pub affinities: Vec<u32>,
}

/// Machines per datacenter plus the namespaces to create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterLayout {
    /// Number of machines in each datacenter.
    pub datacenters: Vec<usize>,
    pub keyed: Vec<NamespaceLayout>,
    pub range: Vec<NamespaceLayout>,
}

impl ClusterLayout {
    pub fn machine_count(&self) -> usize {
        self.datacenters.iter().sum()
    }

    fn namespaces(&self) -> impl Iterator<Item = (NamespaceKind, &NamespaceLayout)> {
        let keyed = self.keyed.iter().map(|layout| (NamespaceKind::Keyed, layout));
        let range = self.range.iter().map(|layout| (NamespaceKind::Range, layout));
        keyed.chain(range)
    }

    pub fn validate(&self) -> Result<()> {
        let datacenters = self.datacenters.len();
        for (kind, namespace) in self.namespaces() {
            if namespace.primary >= datacenters {
                return Err(Error::Layout(format!(
                    "{kind} namespace has primary datacenter {} but only {datacenters} datacenters exist",
                    namespace.primary
                )));
            }
            if !namespace.affinities.is_empty() && namespace.affinities.len() != datacenters {
                return Err(Error::Layout(format!(
                    "{kind} namespace lists {} affinities for {datacenters} datacenters",
                    namespace.affinities.len()
                )));
            }
        }
        Ok(())
    }
}

impl Cluster {
    /// Starts a cluster shaped like `layout`.
    ///
    /// Machines are spread over the datacenters in identifier order, and each
    /// namespace gets its affinities before it is moved to its primary.
    pub fn provision(config: ClusterConfig, io: ClusterIo, layout: &ClusterLayout) -> Result<Self> {
        layout.validate()?;
        let mut cluster = Self::new(config, io)?;

        for _ in 0..layout.machine_count() {
            cluster.add_machine(None)?;
        }
        let datacenters = (0..layout.datacenters.len())
            .map(|_| cluster.add_datacenter(None).map(|handle| handle.id()))
            .collect::<Result<Vec<Identifier>>>()?;

        let mut machines = cluster.known_machine_ids().into_iter();
        for (datacenter, count) in datacenters.iter().zip(&layout.datacenters) {
            for machine in machines.by_ref().take(*count) {
                cluster.move_server_to_datacenter(machine, *datacenter)?;
            }
        }

        for (kind, namespace) in layout.namespaces() {
            let handle = cluster.add_namespace(kind, NamespaceSpec::default())?;
            if !namespace.affinities.is_empty() {
                let affinities = datacenters.iter().copied().zip(namespace.affinities.iter().copied());
                cluster.set_namespace_affinities(handle, affinities)?;
            }
            let primary = datacenters
                .get(namespace.primary)
                .copied()
                .ok_or_else(|| Error::Layout(format!("no datacenter {}", namespace.primary)))?;
            cluster.move_namespace_to_datacenter(handle, Some(primary.into()))?;
        }

        info!(
            machines = cluster.machines.len(),
            datacenters = cluster.datacenters.len(),
            "cluster provisioned"
        );
        Ok(cluster)
    }
}
