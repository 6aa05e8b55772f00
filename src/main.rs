use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    fhir_graph::cli::run().await
}
