//! Prints the BYOH CustomResourceDefinitions as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/bases/byoh.yaml`

use crds::{BootstrapKubeconfig, ByoCluster, ByoHost, ByoMachine, K8sInstallerConfig, K8sInstallerConfigTemplate};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        ByoHost::crd(),
        ByoMachine::crd(),
        ByoCluster::crd(),
        K8sInstallerConfig::crd(),
        K8sInstallerConfigTemplate::crd(),
        BootstrapKubeconfig::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
