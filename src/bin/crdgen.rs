//! Print the Limitador CustomResourceDefinition as YAML.

use kube::CustomResourceExt;
use limitador_operator::crd::Limitador;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Limitador::crd())?);
    Ok(())
}
