use otelop::crd::collector_crd;

fn main() -> anyhow::Result<()> {
    // cargo run --bin gen-crd > config/crd/opentelemetrycollectors.yaml
    print!("{}", serde_yaml::to_string(&collector_crd())?);
    Ok(())
}
