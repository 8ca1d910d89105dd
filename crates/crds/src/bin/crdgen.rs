//! Prints the NetworkAttachmentDefinition CRD as YAML.

use anyhow::Result;
use crds::NetworkAttachmentDefinition;
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let crd = NetworkAttachmentDefinition::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
