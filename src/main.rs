use clap::Parser;
use kube::CustomResourceExt;
use tracing_subscriber::EnvFilter;
use vault_sync::crds::Vault;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
enum Args {
    /// Watch Vault resources and keep their Secrets in sync
    Run,
    /// Print the Vault CustomResourceDefinition
    Crds,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args {
        Args::Crds => {
            println!("{}", serde_yaml::to_string(&Vault::crd())?);
        }
        Args::Run => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| "vault_sync=info".into()),
                )
                .init();
            vault_sync::run().await?;
        }
    };

    Ok(())
}
