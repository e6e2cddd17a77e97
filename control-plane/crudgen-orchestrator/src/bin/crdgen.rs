use crudgen_orchestrator::crd::ServiceDefinition;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = ServiceDefinition::crd();
    println!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
