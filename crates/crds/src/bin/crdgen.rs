//! Prints the CRDs owned by the RKE2 controllers as a multi-document YAML stream
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crds.yaml`

use crds::{RKE2Config, RKE2ControlPlane};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [RKE2Config::crd(), RKE2ControlPlane::crd()];
    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
