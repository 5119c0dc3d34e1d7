//! Print the Application CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > deploy/crd.yaml
//! ```

use application_operator::Application;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(&Application::crd())?;
    print!("{}", yaml);
    Ok(())
}
